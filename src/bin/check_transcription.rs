use anyhow::Result;
use batch_subtitler::config::{Config, DEFAULT_CONFIG_FILE};
use batch_subtitler::transcription::whisper::{detect_backend, ggml_model_candidates};
use batch_subtitler::AudioExtractor;
use std::path::Path;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("batch_subtitler=info,warn")
        .init();

    let config = Config::resolve(Path::new(DEFAULT_CONFIG_FILE));

    info!("🔍 Checking pipeline tool availability...");

    let extractor = AudioExtractor::new();
    if extractor.check_availability().await {
        info!("✅ {} available", extractor.ffmpeg_bin);
    } else {
        info!("❌ {} not found on PATH", extractor.ffmpeg_bin);
        info!("💡 Install ffmpeg to enable audio extraction");
    }

    info!("🎤 Checking Whisper backends for model '{}'...", config.model);
    match detect_backend(&config.model).await {
        Ok(backend) => {
            info!("✅ Using {} backend: {:?}", backend.name(), backend);
        }
        Err(e) => {
            info!("❌ {}", e);
            info!("💡 Recommendation: Install whisper.cpp for best performance:");
            info!("   git clone https://github.com/ggerganov/whisper.cpp.git");
            info!("   cd whisper.cpp && make -j");
            info!("   # Download models: ./models/download-ggml-model.sh {}", config.model);
            info!("📋 ggml model locations searched:");
            for candidate in ggml_model_candidates(&config.model) {
                info!("   - {}", candidate.display());
            }
            return Ok(());
        }
    }

    info!("🎉 All transcription components ready!");
    info!("💡 To subtitle videos, use: cargo run -- --input-dir /path/to/videos");

    Ok(())
}
