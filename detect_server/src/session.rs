//! State of the detection session behind the upload shell.
//!
//! The phase only changes when model initialization settles, an image is
//! selected or rejected, or the detection for the current image settles. Every selection
//! starts a new generation and only the newest generation may complete: a late
//! result for an image that has since been replaced is dropped.
use bytes::Bytes;
use common::{
    detection::Detection,
    status::{Phase, StatusReport},
};

use crate::error::DetectError;

/// Receipt for a selected image, redeemed by [`Session::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Ticket {
    generation: u64,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of a detection: the detections and, when a surface is drawn on, the
/// PNG encoded overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub detections: Vec<Detection>,
    pub overlay: Option<Bytes>,
}

/// Outcome of completing a detection.
#[derive(Debug)]
pub enum Completion {
    /// Detections and overlay are stored.
    Rendered,
    /// The detection failed; the session shows the error.
    Failed(DetectError),
    /// A newer image was selected in the meantime; the result was dropped.
    Superseded,
}

pub struct Session {
    phase: Phase,
    generation: u64,
    detections: Option<Vec<Detection>>,
    overlay: Option<Bytes>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: Phase::ModelLoading,
            generation: 0,
            detections: None,
            overlay: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn detections(&self) -> Option<&[Detection]> {
        self.detections.as_deref()
    }

    /// The PNG overlay of the current image, once its detection succeeded.
    pub fn overlay(&self) -> Option<Bytes> {
        self.overlay.clone()
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            phase: self.phase.clone(),
            detections: self.detections.clone(),
        }
    }

    pub fn model_ready(&mut self) {
        if self.phase == Phase::ModelLoading {
            self.phase = Phase::Ready;
        }
    }

    pub fn model_failed(&mut self, message: String) {
        self.phase = Phase::Failed { message };
    }

    /// Whether `ticket` belongs to the current image.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        ticket.generation == self.generation
    }

    /// Start a new image, clearing what was shown for the previous one.
    pub fn select(&mut self) -> Ticket {
        self.next_generation();
        self.phase = Phase::Detecting {
            generation: self.generation,
        };

        Ticket {
            generation: self.generation,
        }
    }

    /// Replace the current image by one that cannot be processed.
    pub fn reject(&mut self, message: String) {
        self.next_generation();
        log::warn!("Image {} rejected: {message}", self.generation);
        self.phase = Phase::Failed { message };
    }

    fn next_generation(&mut self) {
        self.generation += 1;
        self.detections = None;
        self.overlay = None;
    }

    /// Settle the detection started by `ticket`.
    pub fn complete(&mut self, ticket: Ticket, result: Result<Outcome, DetectError>) -> Completion {
        if !self.is_current(ticket) {
            log::info!(
                "Dropping result of image {}, image {} is current",
                ticket.generation,
                self.generation
            );
            return Completion::Superseded;
        }

        match result {
            Ok(outcome) => {
                self.detections = Some(outcome.detections);
                self.overlay = outcome.overlay;
                self.phase = Phase::Ready;
                Completion::Rendered
            }
            Err(e) => {
                log::warn!("Detection of image {} failed: {e}", ticket.generation);
                self.phase = Phase::Failed {
                    message: e.to_string(),
                };
                Completion::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use common::detection::BoundingBox;

    use super::*;

    fn person() -> Vec<Detection> {
        let bbox = BoundingBox::new(10.0, 20.0, 200.0, 400.0).unwrap();
        vec![Detection::new(0.91, "person", bbox).unwrap()]
    }

    fn rendered(detections: Vec<Detection>) -> Result<Outcome, DetectError> {
        Ok(Outcome {
            detections,
            overlay: Some(Bytes::from_static(b"png")),
        })
    }

    #[test]
    fn test_model_loading_then_ready() {
        let mut session = Session::new();
        assert_eq!(session.phase(), &Phase::ModelLoading);

        session.model_ready();
        assert_eq!(session.phase(), &Phase::Ready);
    }

    #[test]
    fn test_model_failure_is_shown() {
        let mut session = Session::new();
        session.model_failed("no network".into());
        assert!(session.phase().is_failed());

        // A late ready signal does not hide the failure.
        session.model_ready();
        assert!(session.phase().is_failed());
    }

    #[test]
    fn test_successful_detection_is_stored() {
        let mut session = Session::new();
        session.model_ready();

        let ticket = session.select();
        assert_eq!(
            session.phase(),
            &Phase::Detecting {
                generation: ticket.generation()
            }
        );

        assert!(matches!(
            session.complete(ticket, rendered(person())),
            Completion::Rendered
        ));
        assert_eq!(session.phase(), &Phase::Ready);
        assert_eq!(session.detections(), Some(&person()[..]));
        assert_eq!(session.overlay(), Some(Bytes::from_static(b"png")));
    }

    #[test]
    fn test_selection_clears_previous_detections() {
        let mut session = Session::new();
        let ticket = session.select();
        let _ = session.complete(ticket, rendered(person()));
        assert!(session.overlay().is_some());

        let _ticket = session.select();

        assert_eq!(session.detections(), None);
        assert!(session.overlay().is_none());
        assert!(session.status_report().detections.is_none());
    }

    #[test]
    fn test_rejected_image_clears_previous_detections() {
        let mut session = Session::new();
        let ticket = session.select();
        let _ = session.complete(ticket, rendered(person()));

        session.reject("cannot decode image".into());

        assert_eq!(session.detections(), None);
        assert!(session.overlay().is_none());
        assert_eq!(
            session.phase(),
            &Phase::Failed {
                message: "cannot decode image".into()
            }
        );
    }

    #[test]
    fn test_rejection_supersedes_running_detection() {
        let mut session = Session::new();
        let ticket = session.select();
        session.reject("cannot decode image".into());

        assert!(!session.is_current(ticket));
        assert!(matches!(
            session.complete(ticket, rendered(person())),
            Completion::Superseded
        ));
        assert_eq!(session.detections(), None);
    }

    #[test]
    fn test_failed_detection_shows_nothing() {
        let mut session = Session::new();
        let ticket = session.select();

        let completion = session.complete(ticket, Err(DetectError::Inference("boom".into())));

        assert!(matches!(completion, Completion::Failed(DetectError::Inference(_))));
        assert_eq!(
            session.phase(),
            &Phase::Failed {
                message: "inference failed: boom".into()
            }
        );
        assert_eq!(session.detections(), None);
        assert!(session.overlay().is_none());
    }

    #[test]
    fn test_latest_selection_wins() {
        let mut session = Session::new();
        let first = session.select();
        let second = session.select();

        assert!(matches!(
            session.complete(first, rendered(person())),
            Completion::Superseded
        ));
        assert_eq!(session.detections(), None);
        assert_eq!(
            session.phase(),
            &Phase::Detecting {
                generation: second.generation()
            }
        );

        assert!(matches!(
            session.complete(second, rendered(vec![])),
            Completion::Rendered
        ));
        assert_eq!(session.detections(), Some(&[][..]));

        // The stale result stays dropped even after the newer one settled.
        assert!(matches!(
            session.complete(first, Err(DetectError::Inference("late".into()))),
            Completion::Superseded
        ));
        assert_eq!(session.phase(), &Phase::Ready);
    }

    #[test]
    fn test_headless_session_keeps_detections() {
        let mut session = Session::new();
        let ticket = session.select();
        let outcome = Outcome {
            detections: person(),
            overlay: None,
        };

        assert!(matches!(
            session.complete(ticket, Ok(outcome)),
            Completion::Rendered
        ));
        assert_eq!(session.detections().map(<[_]>::len), Some(1));
        assert!(session.overlay().is_none());
    }
}
