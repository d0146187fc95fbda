//! Utility functions
//!
use std::{
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use futures::TryStreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::config::ModelSource;

/// Name of the model configuration holding the label table.
pub const CONFIG_FILE: &str = "config.json";

/// Location of the files making up a model on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub model: PathBuf,
    pub config: PathBuf,
}

impl ModelFiles {
    /// Files of `source` below `dir`, laid out as in the model repository.
    fn in_dir(dir: &Path, source: &ModelSource) -> Self {
        Self {
            model: dir.join(&source.model_file),
            config: dir.join(CONFIG_FILE),
        }
    }

    fn exist(&self) -> bool {
        self.model.is_file() && self.config.is_file()
    }
}

/// Find the model files, downloading them into the cache if needed.
///
/// A local copy below `local_model_dir` is only considered when local models are allowed.
pub async fn resolve_model_files(client: &Client, source: &ModelSource) -> Result<ModelFiles> {
    if source.allow_local_models {
        let local = ModelFiles::in_dir(&source.local_model_dir.join(&source.model_id), source);
        if local.exist() {
            log::info!("Using local model {}", local.model.display());
            return Ok(local);
        }
        log::info!(
            "No local copy of {} in {}",
            source.model_id,
            source.local_model_dir.display()
        );
    }

    let cached = ModelFiles::in_dir(&source.cache_dir.join(&source.model_id), source);
    for (remote, path) in [
        (source.model_file.as_str(), &cached.model),
        (CONFIG_FILE, &cached.config),
    ] {
        if path.is_file() {
            log::debug!("Cached {}", path.display());
            continue;
        }

        let url = source.file_url(remote);
        log::info!("Downloading {url}");
        download_file(client, &url, path)
            .await
            .with_context(|| format!("cannot download {url}"))?;
    }

    Ok(cached)
}

/// Download a file from a URL to a given filepath.
///
/// The body is streamed into a `.part` file that is renamed once complete, so an
/// interrupted download never looks like a cached file.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<u64> {
    let filepath = filepath.as_ref();
    if let Some(parent) = filepath.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let resp = client.get(url).send().await?.error_for_status()?;
    let mut content = StreamReader::new(
        resp.bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
    );

    let partial = filepath.with_extension("part");
    let mut file = tokio::fs::File::create(&partial).await?;
    let written = tokio::io::copy(&mut content, &mut file).await?;
    file.flush().await?;
    tokio::fs::rename(&partial, filepath).await?;

    log::info!("Wrote {} ({written} bytes)", filepath.display());

    Ok(written)
}
