//! Detection data model.
//!
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a raw detection cannot become a [`Detection`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvalidDetection {
    #[error("score {0} is outside of [0, 1]")]
    Score(f32),
    #[error("degenerate box [{xmin}, {ymin}, {xmax}, {ymax}]")]
    Box {
        xmin: f32,
        ymin: f32,
        xmax: f32,
        ymax: f32,
    },
}

/// Axis-aligned box in source-image pixel coordinates.
///
/// The top-left corner is `(xmin, ymin)`, the bottom-right corner is `(xmax, ymax)`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    /// Build a box, rejecting boxes without positive width and height.
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Result<Self, InvalidDetection> {
        // Negated comparison so that NaN coordinates are rejected as well.
        if !(xmin < xmax && ymin < ymax) {
            return Err(InvalidDetection::Box {
                xmin,
                ymin,
                xmax,
                ymax,
            });
        }

        Ok(Self {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }
}

/// One predicted object instance.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Detection {
    pub score: f32,
    pub label: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(score: f32, label: impl Into<String>, bbox: BoundingBox) -> Result<Self, InvalidDetection> {
        if !(0.0..=1.0).contains(&score) {
            return Err(InvalidDetection::Score(score));
        }

        Ok(Self {
            score,
            label: label.into(),
            bbox,
        })
    }

    /// Text shown on the label chip, e.g. `person 91.0%`.
    pub fn caption(&self) -> String {
        format!("{} {:.1}%", self.label, self.score * 100.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rejects_degenerate_boxes() {
        assert!(BoundingBox::new(10.0, 20.0, 200.0, 400.0).is_ok());
        assert!(BoundingBox::new(10.0, 20.0, 10.0, 400.0).is_err());
        assert!(BoundingBox::new(10.0, 400.0, 200.0, 20.0).is_err());
        assert!(BoundingBox::new(f32::NAN, 0.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_rejects_scores_out_of_range() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        assert_eq!(
            Detection::new(1.5, "cat", bbox),
            Err(InvalidDetection::Score(1.5))
        );
        assert!(Detection::new(0.0, "cat", bbox).is_ok());
        assert!(Detection::new(1.0, "cat", bbox).is_ok());
    }

    #[test]
    fn test_caption() {
        let bbox = BoundingBox::new(10.0, 20.0, 200.0, 400.0).unwrap();
        let detection = Detection::new(0.91, "person", bbox).unwrap();
        assert_eq!(detection.caption(), "person 91.0%");
    }

    #[test]
    fn test_json_uses_box_field() -> Result<(), crate::Error> {
        let bbox = BoundingBox::new(10.0, 20.0, 200.0, 400.0)?;
        let detection = Detection::new(0.5, "dog", bbox)?;

        let json = serde_json::to_value(&detection)?;
        assert_eq!(json["box"]["xmax"], 200.0);
        assert_eq!(json["label"], "dog");

        Ok(())
    }
}
