use batch_subtitler::transcription::srt::format_timestamp;
use batch_subtitler::{SRTGenerator, TranscriptSegment};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn segments(count: usize) -> Vec<TranscriptSegment> {
    (0..count)
        .map(|i| {
            let start = i as f64 * 2.5;
            TranscriptSegment::new(start, start + 2.4, format!(" Spoken line number {} ", i + 1))
        })
        .collect()
}

fn bench_timestamps(c: &mut Criterion) {
    c.bench_function("srt_format_timestamp", |b| {
        b.iter(|| {
            black_box(format_timestamp(black_box(3661.25)));
            black_box(format_timestamp(black_box(59.999)));
        })
    });
}

fn bench_srt_generation(c: &mut Criterion) {
    let small = segments(10);
    c.bench_function("srt_small_file", |b| {
        b.iter(|| black_box(SRTGenerator::from_segments(black_box(&small)).generate()))
    });

    // Roughly a two hour talk
    let large = segments(3000);
    c.bench_function("srt_large_file", |b| {
        b.iter(|| black_box(SRTGenerator::from_segments(black_box(&large)).generate()))
    });

    let rendered = SRTGenerator::from_segments(&large).generate();
    c.bench_function("srt_parse_large_file", |b| {
        b.iter(|| black_box(SRTGenerator::parse(black_box(&rendered))))
    });
}

criterion_group!(benches, bench_timestamps, bench_srt_generation);
criterion_main!(benches);
