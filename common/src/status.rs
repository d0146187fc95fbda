//! Session status as reported by the detection server.
//!
use serde::{Deserialize, Serialize};

use crate::detection::Detection;

/// The mutually exclusive phases of a detection session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "phase", rename_all = "kebab-case")]
pub enum Phase {
    /// The inference provider is not initialized yet.
    ModelLoading,
    /// Waiting for an image.
    Ready,
    /// A detection for the image with `generation` is in flight.
    Detecting { generation: u64 },
    /// Model initialization or the last detection failed.
    Failed { message: String },
}

impl Phase {
    pub fn is_failed(&self) -> bool {
        matches!(self, Phase::Failed { .. })
    }
}

/// Body of the `/status` endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<Detection>>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_phase_json_shape() -> Result<(), crate::Error> {
        let report = StatusReport {
            phase: Phase::Failed {
                message: "boom".into(),
            },
            detections: None,
        };

        let json = serde_json::to_value(&report)?;
        assert_eq!(json["phase"], "failed");
        assert_eq!(json["message"], "boom");
        assert!(json.get("detections").is_none());

        let parsed: StatusReport = serde_json::from_value(json)?;
        assert_eq!(parsed, report);

        Ok(())
    }

    #[test]
    fn test_detecting_carries_generation() -> Result<(), crate::Error> {
        let json = serde_json::to_string(&Phase::Detecting { generation: 3 })?;
        assert_eq!(json, r#"{"phase":"detecting","generation":3}"#);
        Ok(())
    }
}
