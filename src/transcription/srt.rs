use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::TranscriptSegment;

/// SRT (SubRip Subtitle) entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SRTEntry {
    /// Sequential number, starting at 1
    pub index: usize,
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
    /// Subtitle text
    pub text: String,
}

impl SRTEntry {
    /// Create a new SRT entry
    pub fn new(index: usize, start: f64, end: f64, text: &str) -> Self {
        Self {
            index,
            start,
            end,
            text: text.trim().to_string(),
        }
    }
}

impl fmt::Display for SRTEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{} --> {}\n{}\n",
            self.index,
            format_timestamp(self.start),
            format_timestamp(self.end),
            self.text
        )
    }
}

/// SRT file generator
#[derive(Debug, Clone, Default)]
pub struct SRTGenerator {
    entries: Vec<SRTEntry>,
}

impl SRTGenerator {
    /// Create a new SRT generator
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// One entry per segment, numbered in input order
    pub fn from_segments(segments: &[TranscriptSegment]) -> Self {
        let entries = segments
            .iter()
            .enumerate()
            .map(|(i, segment)| SRTEntry::new(i + 1, segment.start, segment.end, &segment.text))
            .collect();
        Self { entries }
    }

    /// Append an entry, numbering it after the existing ones
    pub fn push(&mut self, start: f64, end: f64, text: &str) {
        let index = self.entries.len() + 1;
        self.entries.push(SRTEntry::new(index, start, end, text));
    }

    /// Generate SRT content as string
    pub fn generate(&self) -> String {
        let mut srt_content = String::new();

        for entry in &self.entries {
            srt_content.push_str(&entry.to_string());
            srt_content.push('\n');
        }

        srt_content
    }

    /// Write the rendered file so that readers never observe a partial file.
    ///
    /// Content goes to a temporary file in the destination directory which is then
    /// renamed over `path`.
    pub async fn save_to_file(&self, path: &Path) -> io::Result<()> {
        let content = self.generate();
        let path: PathBuf = path.to_path_buf();

        tokio::task::spawn_blocking(move || write_atomic(&path, content.as_bytes()))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get all entries
    pub fn get_entries(&self) -> &[SRTEntry] {
        &self.entries
    }

    /// Validate SRT entries for common issues
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for entry in &self.entries {
            if entry.start < 0.0 {
                issues.push(format!("Entry {}: Negative start time", entry.index));
            }

            if entry.end <= entry.start {
                issues.push(format!("Entry {}: End time is not after start time", entry.index));
            }

            if entry.text.is_empty() {
                issues.push(format!("Entry {}: Empty text", entry.index));
            }
        }

        // Starts must not go backwards; equal starts are fine
        for pair in self.entries.windows(2) {
            if pair[1].start < pair[0].start {
                issues.push(format!(
                    "Entries {} and {}: Start times out of order",
                    pair[0].index, pair[1].index
                ));
            }
        }

        issues
    }

    /// Parse SRT content back into entries
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = Vec::new();
        let normalized = content.replace("\r\n", "\n");

        for block in normalized.split("\n\n") {
            let block = block.trim_matches('\n');
            if block.trim().is_empty() {
                continue;
            }

            let mut lines = block.lines();
            let index_line = lines.next().ok_or_else(|| anyhow!("Missing index line"))?;
            let index: usize = index_line
                .trim()
                .parse()
                .with_context(|| format!("Invalid index line: {}", index_line))?;

            let timing_line = lines
                .next()
                .ok_or_else(|| anyhow!("Entry {}: missing timing line", index))?;
            let (start, end) = timing_line
                .split_once(" --> ")
                .ok_or_else(|| anyhow!("Entry {}: invalid timing line: {}", index, timing_line))?;

            let text = lines.collect::<Vec<_>>().join("\n");

            entries.push(SRTEntry {
                index,
                start: parse_timestamp(start.trim())?,
                end: parse_timestamp(end.trim())?,
                text,
            });
        }

        Ok(Self { entries })
    }
}

/// Format seconds as an SRT timestamp (HH:MM:SS,mmm).
///
/// Sub-millisecond remainders are truncated. A tolerance of a nanosecond keeps
/// binary float noise (59.999 is stored as 59.998999...) from losing a millisecond.
pub fn format_timestamp(seconds: f64) -> String {
    let total_millis = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0 + 1e-6).floor() as u64
    } else {
        0
    };

    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Parse a single timestamp (HH:MM:SS,mmm) to seconds
pub fn parse_timestamp(timestamp: &str) -> Result<f64> {
    let (hms, millis) = timestamp
        .split_once(',')
        .ok_or_else(|| anyhow!("Invalid timestamp format: {}", timestamp))?;

    let hms_parts: Vec<&str> = hms.split(':').collect();
    if hms_parts.len() != 3 {
        return Err(anyhow!("Invalid time format: {}", hms));
    }

    let hours: u64 = hms_parts[0].parse()?;
    let minutes: u64 = hms_parts[1].parse()?;
    let seconds: u64 = hms_parts[2].parse()?;
    let milliseconds: u64 = millis.parse()?;

    let total_millis = ((hours * 60 + minutes) * 60 + seconds) * 1000 + milliseconds;
    Ok(total_millis as f64 / 1000.0)
}

/// Write `content` to a temp file beside `path`, then rename it into place
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_timestamp_formatting() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(3661.25), "01:01:01,250");
        assert_eq!(format_timestamp(59.999), "00:00:59,999");
        assert_eq!(format_timestamp(1.5), "00:00:01,500");
        assert_eq!(format_timestamp(-3.0), "00:00:00,000");
        assert_eq!(format_timestamp(36000.0), "10:00:00,000");
    }

    #[test]
    fn test_timestamp_truncates_sub_millisecond_remainder() {
        assert_eq!(format_timestamp(1.0006), "00:00:01,000");
        assert_eq!(format_timestamp(0.0009), "00:00:00,000");
        assert_eq!(format_timestamp(12.3459), "00:00:12,345");
        assert_eq!(format_timestamp(3599.9999), "00:59:59,999");
    }

    #[test]
    fn test_srt_entry_display() {
        let entry = SRTEntry::new(1, 10.0, 15.0, "  Test subtitle \n");
        assert_eq!(entry.text, "Test subtitle");
        assert_eq!(entry.to_string(), "1\n00:00:10,000 --> 00:00:15,000\nTest subtitle\n");
    }

    #[test]
    fn test_generate_is_bit_exact() {
        let segments = vec![
            TranscriptSegment::new(0.0, 2.5, " Hello there."),
            TranscriptSegment::new(2.5, 4.0, "General Kenobi! "),
        ];

        let content = SRTGenerator::from_segments(&segments).generate();
        assert_eq!(
            content,
            "1\n00:00:00,000 --> 00:00:02,500\nHello there.\n\n\
             2\n00:00:02,500 --> 00:00:04,000\nGeneral Kenobi!\n\n"
        );
    }

    #[test]
    fn test_empty_segments_render_empty_file() {
        let generator = SRTGenerator::from_segments(&[]);
        assert!(generator.is_empty());
        assert_eq!(generator.generate(), "");
    }

    #[test]
    fn test_parse_roundtrip() {
        let segments = vec![
            TranscriptSegment::new(0.0, 1.2344, "first"),
            TranscriptSegment::new(1.2344, 3.0, "second line"),
            TranscriptSegment::new(1.2344, 7.5, "same start"),
        ];

        let rendered = SRTGenerator::from_segments(&segments).generate();
        let parsed = SRTGenerator::parse(&rendered).unwrap();

        assert_eq!(parsed.len(), segments.len());
        for (entry, segment) in parsed.get_entries().iter().zip(&segments) {
            assert!((entry.start - segment.start).abs() <= 0.001);
            assert!((entry.end - segment.end).abs() <= 0.001);
            assert_eq!(entry.text, segment.text);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SRTGenerator::parse("not a number\n00:00:00,000 --> 00:00:01,000\nx\n").is_err());
        assert!(SRTGenerator::parse("1\nno arrow here\nx\n").is_err());
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("01:01:01,250").unwrap(), 3661.25);
        assert!(parse_timestamp("01:01:01.250").is_err());
        assert!(parse_timestamp("01:01,250").is_err());
    }

    #[test]
    fn test_validation() {
        let mut generator = SRTGenerator::new();
        generator.push(10.0, 5.0, "Invalid");
        generator.push(15.0, 20.0, "");
        generator.push(12.0, 13.0, "Backwards");

        let issues = generator.validate();
        assert!(issues.iter().any(|issue| issue.contains("End time is not after start time")));
        assert!(issues.iter().any(|issue| issue.contains("Empty text")));
        assert!(issues.iter().any(|issue| issue.contains("out of order")));
    }

    #[test]
    fn test_abutting_segments_are_valid() {
        let mut generator = SRTGenerator::new();
        generator.push(0.0, 1.0, "a");
        generator.push(1.0, 2.0, "b");
        assert!(generator.validate().is_empty());
    }

    #[tokio::test]
    async fn test_save_to_file_replaces_atomically() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.srt");
        std::fs::write(&path, "stale").unwrap();

        let mut generator = SRTGenerator::new();
        generator.push(0.0, 1.0, "fresh");
        generator.save_to_file(&path).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "1\n00:00:00,000 --> 00:00:01,000\nfresh\n\n");

        // Only the subtitle file remains, no temp leftovers
        let count = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(count, 1);
    }
}
