//! Core infrastructure for the uspgen texture-sample code generator
//!
//! This crate provides the error taxonomy, configuration and logging
//! bootstrap shared by the hardware description and the sample generator.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{CoreKind, Config};
pub use error::{EmitError, EncodeError, LayoutError, ResourceError, Result, UspError};
