//! # tempo-audio
//!
//! Managed audio playback for Tempo.
//!
//! Features:
//! - `ManagedPlayer`, a state machine that absorbs out-of-order calls instead of failing
//! - A `PlaybackBackend` seam so any engine can sit underneath
//! - `NativeBackend`: symphonia decoding, rubato resampling and cpal output
//!   joined by a lock-free ring buffer

pub mod backend;
pub mod buffer;
pub mod config;
pub mod decode;
pub mod diagnostics;
pub mod engine;
pub mod loader;
pub mod managed;
pub mod output;
pub mod resample;
pub mod state;

#[cfg(test)]
mod mock;

pub use backend::{BackendListener, PlaybackBackend};
pub use config::EngineConfig;
pub use diagnostics::{
    Diagnostic, DiagnosticsHook, RecordingDiagnostics, Signal, TracingDiagnostics,
};
pub use engine::NativeBackend;
pub use managed::ManagedPlayer;
pub use state::{Operation, PlayerState};
