//! Client side of the detection server: upload an image, fetch the outcome.
//!
use std::path::Path;

use common::{detection::Detection, Error};
use reqwest::{header::CONTENT_TYPE, multipart, Client};

/// Multipart field the server reads the image from.
pub const IMAGE_FIELD: &str = "image";

/// What the server answered to an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum Upload {
    /// PNG encoded overlay.
    Overlay(Vec<u8>),
    /// Detections, answered for `?format=json` or by a headless server.
    Detections(Vec<Detection>),
}

/// URL of `endpoint` on a server at `address` serving below `base_path`.
pub fn endpoint_url(address: &str, base_path: &str, endpoint: &str) -> String {
    let address = address.trim_end_matches('/');
    let address = if address.contains("://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    };

    let mut url = address;
    for segment in [base_path, endpoint] {
        let segment = segment.trim_matches('/');
        if !segment.is_empty() {
            url.push('/');
            url.push_str(segment);
        }
    }

    url
}

/// Post the image at `path` to the detect endpoint.
pub async fn upload_image(client: &Client, url: &str, path: &Path) -> Result<Upload, Error> {
    let data = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_owned());
    log::debug!("Uploading {} bytes from {}", data.len(), path.display());

    let part = multipart::Part::bytes(data).file_name(file_name);
    let form = multipart::Form::new().part(IMAGE_FIELD, part);

    let response = client.post(url).multipart(form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("server answered {status}: {body}").into());
    }

    let is_png = response
        .headers()
        .get(CONTENT_TYPE)
        .map_or(false, |value| value.as_bytes().starts_with(b"image/png"));
    if is_png {
        Ok(Upload::Overlay(response.bytes().await?.to_vec()))
    } else {
        // `null` when the server has nothing to report.
        let detections: Option<Vec<Detection>> = response.json().await?;
        Ok(Upload::Detections(detections.unwrap_or_default()))
    }
}

#[cfg(test)]
mod test {
    use super::endpoint_url;

    #[test]
    fn test_endpoint_url() {
        assert_eq!(
            endpoint_url("127.0.0.1:3000", "/", "detect"),
            "http://127.0.0.1:3000/detect"
        );
        assert_eq!(
            endpoint_url("https://demo.example/", "/app/", "/status"),
            "https://demo.example/app/status"
        );
        assert_eq!(
            endpoint_url("127.0.0.1:3000", "", "detect?format=json"),
            "http://127.0.0.1:3000/detect?format=json"
        );
    }
}
