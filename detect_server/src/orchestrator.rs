//! Detection orchestrator.
//!
//! Owns the one inference provider of the process. The provider is built on first
//! use by an injected [`ProviderLoader`]; concurrent callers share the same
//! in-flight initialization, and its outcome (success or failure) is kept for the
//! lifetime of the orchestrator.
use std::sync::{Arc, OnceLock};

use common::detection::Detection;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use image::RgbImage;

use crate::{error::DetectError, nn::InferModel};

/// Shared handle to the inference provider.
pub type ProviderHandle = Arc<dyn InferModel>;

type SharedInit = Shared<BoxFuture<'static, Result<ProviderHandle, DetectError>>>;

/// Builds the inference provider.
pub trait ProviderLoader: Send + Sync {
    fn load(&self) -> BoxFuture<'static, anyhow::Result<ProviderHandle>>;
}

/// Initialization state of the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Loading,
    Ready,
    Failed(String),
}

pub struct Orchestrator {
    loader: Box<dyn ProviderLoader>,
    init: OnceLock<SharedInit>,
}

impl Orchestrator {
    pub fn new(loader: impl ProviderLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            init: OnceLock::new(),
        }
    }

    /// Get the provider, initializing it on first call.
    pub async fn ensure_ready(&self) -> Result<ProviderHandle, DetectError> {
        self.init
            .get_or_init(|| {
                log::info!("Initializing inference provider");
                let load = self.loader.load();
                async move {
                    match load.await {
                        Ok(provider) => {
                            log::info!("Inference provider ready");
                            Ok(provider)
                        }
                        Err(e) => {
                            log::error!("Inference provider initialization failed: {e:#}");
                            Err(DetectError::ModelInit(format!("{e:#}")))
                        }
                    }
                }
                .boxed()
                .shared()
            })
            .clone()
            .await
    }

    pub fn status(&self) -> ModelStatus {
        match self.init.get().and_then(|init| init.peek()) {
            None => ModelStatus::Loading,
            Some(Ok(_)) => ModelStatus::Ready,
            Some(Err(e)) => ModelStatus::Failed(e.to_string()),
        }
    }

    /// Run the provider on `image`.
    ///
    /// Detections keep the order and values of the provider output. A failing call
    /// leaves the provider usable for later calls.
    pub async fn detect(
        &self,
        image: Arc<RgbImage>,
        threshold: f32,
    ) -> Result<Vec<Detection>, DetectError> {
        let provider = self.ensure_ready().await?;

        let raw = tokio::task::spawn_blocking(move || provider.run(&image, threshold))
            .await
            .map_err(|e| DetectError::Inference(e.to_string()))?
            .map_err(|e| DetectError::Inference(format!("{e:#}")))?;

        let detections = raw
            .into_iter()
            .map(|raw| raw.into_detection())
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("Detected {} objects", detections.len());

        Ok(detections)
    }
}
