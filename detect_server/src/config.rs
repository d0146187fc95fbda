//! Runtime configuration of the detection server.
//!
use std::path::PathBuf;

/// Default hub serving the pretrained model files.
pub const DEFAULT_REMOTE_HOST: &str = "https://huggingface.co";
/// Default pretrained object-detection model.
pub const DEFAULT_MODEL_ID: &str = "Xenova/detr-resnet-50";
/// Default minimum confidence of a reported detection.
pub const DEFAULT_THRESHOLD: f32 = 0.9;

/// Where the model files come from and how they are loaded.
#[derive(Debug, Clone)]
pub struct ModelSource {
    /// Base URL of the model hub.
    pub remote_host: String,
    /// Repository of the model on the hub, e.g. `Xenova/detr-resnet-50`.
    pub model_id: String,
    pub revision: String,
    /// Path of the ONNX graph inside the model repository.
    pub model_file: String,
    /// Look for the model under `local_model_dir` before going to the hub.
    pub allow_local_models: bool,
    pub local_model_dir: PathBuf,
    /// Downloaded model files are kept here across runs.
    pub cache_dir: PathBuf,
    /// Side length of the square model input.
    pub input_size: u32,
}

impl ModelSource {
    /// URL of `file` inside the model repository on the hub.
    pub fn file_url(&self, file: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.remote_host.trim_end_matches('/'),
            self.model_id,
            self.revision,
            file
        )
    }
}

impl Default for ModelSource {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("detect_server");

        Self {
            remote_host: DEFAULT_REMOTE_HOST.into(),
            model_id: DEFAULT_MODEL_ID.into(),
            revision: "main".into(),
            model_file: "onnx/model.onnx".into(),
            allow_local_models: false,
            local_model_dir: PathBuf::from("models"),
            cache_dir,
            input_size: 800,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    /// Every endpoint is served below this path.
    pub base_path: String,
    pub threshold: f32,
    pub model: ModelSource,
    /// TrueType font for label chips; well-known system fonts are tried when unset.
    pub font: Option<PathBuf>,
    /// Serve detections only, without drawing overlays.
    pub headless: bool,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:3000".into(),
            base_path: "/".into(),
            threshold: DEFAULT_THRESHOLD,
            model: ModelSource::default(),
            font: None,
            headless: false,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Base path without trailing slash; empty when serving from the root.
    pub fn normalized_base_path(&self) -> String {
        let trimmed = self.base_path.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_file_url() {
        let source = ModelSource {
            remote_host: "https://hub.example/".into(),
            ..ModelSource::default()
        };
        assert_eq!(
            source.file_url("config.json"),
            "https://hub.example/Xenova/detr-resnet-50/resolve/main/config.json"
        );
    }

    #[test]
    fn test_normalized_base_path() {
        let mut config = Config::default();
        assert_eq!(config.normalized_base_path(), "");

        config.base_path = "demo/".into();
        assert_eq!(config.normalized_base_path(), "/demo");

        config.base_path = "/nested/demo".into();
        assert_eq!(config.normalized_base_path(), "/nested/demo");
    }
}
