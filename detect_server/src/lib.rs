pub mod config;
pub mod endpoints;
pub mod error;
pub mod meter;
pub mod nn;
pub mod orchestrator;
pub mod render;
pub mod session;
pub mod shell;
pub mod utils;
