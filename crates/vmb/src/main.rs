use std::sync::Arc;

use vmb_core::{config::Config, media::MediaOps};
use vmb_ffmpeg::FfmpegEngine;

#[tokio::main]
async fn main() -> Result<(), vmb_core::Error> {
    vmb_core::logging::init("vmb")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        ffmpeg = %cfg.ffmpeg_path.display(),
        ffprobe = %cfg.ffprobe_path.display(),
        "media engine configured"
    );

    let media: Arc<dyn MediaOps> = Arc::new(FfmpegEngine::from_config(&cfg));

    vmb_telegram::router::run_polling(cfg, media)
        .await
        .map_err(|e| vmb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
