use std::path::PathBuf;

use clap::Parser;
use common::Error;
use env_logger::TimestampPrecision;
use upload_client::{endpoint_url, upload_image, Upload};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Image to run detection on
    image: PathBuf,

    /// Address of the detection server
    #[clap(long, default_value = "127.0.0.1:3000")]
    address: String,

    /// Path below which the server serves its endpoints
    #[clap(long, default_value = "/")]
    base_path: String,

    /// Where to write the rendered overlay
    #[clap(long, default_value = "overlay.png")]
    output: PathBuf,

    /// Ask for the detections instead of the overlay
    #[clap(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    log::info!("Uploading {} to {}", args.image.display(), &args.address);
    let endpoint = if args.json { "detect?format=json" } else { "detect" };
    let detect_url = endpoint_url(&args.address, &args.base_path, endpoint);

    match upload_image(&reqwest::Client::new(), &detect_url, &args.image).await? {
        Upload::Overlay(png) => {
            tokio::fs::write(&args.output, &png).await?;
            log::info!("Overlay written to {}", args.output.display());
        }
        Upload::Detections(detections) => {
            if !args.json {
                log::warn!("Server draws no overlays, nothing written to {}", args.output.display());
            }
            println!("{} objects", detections.len());
            for detection in detections {
                println!("{}", detection.caption());
            }
        }
    }

    Ok(())
}
