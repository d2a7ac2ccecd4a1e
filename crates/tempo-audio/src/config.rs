//! Native engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables for [`crate::NativeBackend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ring buffer capacity in samples (about 2 seconds at 48kHz stereo).
    pub ring_buffer_size: usize,
    /// Samples buffered before preparation reports ready.
    pub prefill_samples: usize,
    /// Initial output volume in `0.0..=1.0`.
    pub volume: f32,
    /// Output device name; the host default when unset.
    pub device: Option<String>,
    /// `User-Agent` sent when fetching HTTP sources without one.
    pub user_agent: String,
    /// Largest HTTP body accepted, in bytes.
    pub max_download_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 48000 * 2 * 4,
            prefill_samples: 8192 * 2,
            volume: 0.85,
            device: None,
            user_agent: concat!("tempo/", env!("CARGO_PKG_VERSION")).to_string(),
            max_download_bytes: 256 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Clamp out-of-range values into something the engine can run with.
    pub fn normalized(mut self) -> Self {
        self.ring_buffer_size = self.ring_buffer_size.max(4096);
        self.prefill_samples = self.prefill_samples.min(self.ring_buffer_size / 2);
        self.volume = if self.volume.is_nan() {
            Self::default().volume
        } else {
            self.volume.clamp(0.0, 1.0)
        };
        self
    }
}
