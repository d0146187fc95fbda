//! Detection server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use detect_server::{
    config::{Config, ModelSource, DEFAULT_MODEL_ID, DEFAULT_REMOTE_HOST, DEFAULT_THRESHOLD},
    meter::spawn_meter_logger,
    nn::DetrLoader,
    orchestrator::Orchestrator,
    render::{LabelStyle, RenderSurface},
    shell::{router, spawn_model_warmup, AppState},
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve HTTP on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Path below which all endpoints are served
    #[clap(long, default_value = "/")]
    base_path: String,

    /// Minimum confidence of a reported detection
    #[clap(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Model repository on the hub
    #[clap(long, default_value = DEFAULT_MODEL_ID)]
    model_id: String,

    /// Base URL of the model hub
    #[clap(long, default_value = DEFAULT_REMOTE_HOST)]
    remote_host: String,

    /// Revision of the model repository
    #[clap(long, default_value = "main")]
    revision: String,

    /// Path of the ONNX graph inside the model repository
    #[clap(long, default_value = "onnx/model.onnx")]
    model_file: String,

    /// Look for model files in the local model directory first
    #[clap(long)]
    allow_local_models: bool,

    /// Directory holding local model files, laid out like the hub repository
    #[clap(long, default_value = "models")]
    local_model_dir: PathBuf,

    /// Directory for downloaded model files
    #[clap(long)]
    cache_dir: Option<PathBuf>,

    /// Side length of the square model input
    #[clap(long, default_value_t = 800)]
    input_size: u32,

    /// TrueType font for label captions
    #[clap(long)]
    font: Option<PathBuf>,

    /// Answer with detections only, without drawing overlays
    #[clap(long)]
    headless: bool,

    /// Largest accepted upload in bytes
    #[clap(long, default_value_t = 20 * 1024 * 1024)]
    max_upload_bytes: usize,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let defaults = ModelSource::default();
        Config {
            server_address: args.server_address,
            base_path: args.base_path,
            threshold: args.threshold,
            model: ModelSource {
                remote_host: args.remote_host,
                model_id: args.model_id,
                revision: args.revision,
                model_file: args.model_file,
                allow_local_models: args.allow_local_models,
                local_model_dir: args.local_model_dir,
                cache_dir: args.cache_dir.unwrap_or(defaults.cache_dir),
                input_size: args.input_size,
            },
            font: args.font,
            headless: args.headless,
            max_upload_bytes: args.max_upload_bytes,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from(Args::parse());

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    anyhow::ensure!(
        (0.0..=1.0).contains(&config.threshold),
        "threshold must be within [0, 1], got {}",
        config.threshold
    );

    let surface = if config.headless {
        log::info!("Running headless, overlays are not drawn");
        None
    } else {
        Some(RenderSurface::new(LabelStyle::discover(config.font.as_deref())))
    };

    let orchestrator = Orchestrator::new(DetrLoader::new(config.model.clone()));
    let state = Arc::new(AppState::new(orchestrator, surface, &config));

    // Load the model in the background, uploads wait for it
    spawn_model_warmup(Arc::clone(&state));
    spawn_meter_logger(Duration::from_secs(10));

    let app = router(state, config.max_upload_bytes);

    // Serve HTTP server
    let addr: SocketAddr = config.server_address.parse()?;
    let base_path = match config.normalized_base_path() {
        path if path.is_empty() => "/".to_owned(),
        path => path,
    };
    log::info!("Serving on http://{addr}{base_path}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
