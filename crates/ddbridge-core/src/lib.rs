//! # ddbridge-core
//!
//! Core types, status codes, configuration, and error handling shared by the
//! ddbridge engine, the orchestration layer, and host harnesses.

pub mod config;
pub mod error;
pub mod status;
pub mod types;

pub use config::{BridgeConfig, EngineConfig, MEMORY_PAGE};
pub use error::{Error, Result};
pub use status::DecodeStatus;
pub use types::*;
