//! Common code shared between `detect_server` and `upload_client`.
pub mod detection;
pub mod status;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
