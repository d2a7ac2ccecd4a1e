//! # tempo-core
//!
//! Core types and error handling shared by the Tempo playback crates.

pub mod error;
pub mod source;

pub use error::{Error, Result};
pub use source::{DataSource, MediaDataSource};
