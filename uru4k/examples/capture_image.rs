//! Capture one fingerprint and save it as a PGM image

use tracing_subscriber::EnvFilter;
use uru4k::{CancelToken, CaptureOrchestrator, DecodedImage, Device};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "finger.pgm".to_string());

    let orchestrator = CaptureOrchestrator::new(Device::new_usb());
    let info = orchestrator.ensure_open().await?;
    println!("Opened {}", info);

    println!("Place your finger on the reader...");
    let image = orchestrator.capture_once(&CancelToken::new()).await?;

    if image.is_blank() {
        println!("Warning: captured image is blank");
    }

    std::fs::write(&path, image.to_pgm())?;
    println!("Saved {} ({}x{})", path, DecodedImage::WIDTH, DecodedImage::HEIGHT);

    orchestrator.shutdown().await?;
    Ok(())
}
