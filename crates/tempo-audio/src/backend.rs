//! The seam between a managed player and the engine that actually plays audio.

use std::sync::Arc;
use std::time::Duration;
use tempo_core::{DataSource, Error, Result};

/// Receives asynchronous signals from a backend.
///
/// Backends call these from their own worker context, never from inside one of
/// their [`PlaybackBackend`] methods.
pub trait BackendListener: Send + Sync {
    /// The source finished preparing and output can start.
    fn on_prepared(&self);

    /// The stream reached its end.
    fn on_completion(&self);

    /// Preparation or playback failed. Returns whether the error was handled.
    fn on_error(&self, error: &Error) -> bool;
}

/// Primitive operations of an underlying playback engine.
///
/// A backend performs whatever it is asked; legality is the caller's concern.
pub trait PlaybackBackend: Send {
    /// Register the listener that receives this backend's signals.
    fn set_listener(&mut self, listener: Arc<dyn BackendListener>);

    /// Attach a data source.
    fn set_data_source(&mut self, source: DataSource) -> Result<()>;

    /// Prepare the current source, blocking until it is ready or has failed.
    ///
    /// Success is still followed by [`BackendListener::on_prepared`].
    fn prepare(&mut self) -> Result<()>;

    /// Begin preparing the current source; readiness is reported through
    /// [`BackendListener::on_prepared`].
    fn prepare_async(&mut self) -> Result<()>;

    /// Begin or resume output.
    fn start(&mut self) -> Result<()>;

    /// Suspend output.
    fn pause(&mut self) -> Result<()>;

    /// Stop output. The source needs preparing again before it can start.
    fn stop(&mut self) -> Result<()>;

    /// Drop the current source and return to a freshly constructed condition.
    fn reset(&mut self) -> Result<()>;

    /// Move the playback position.
    fn seek_to(&mut self, position: Duration) -> Result<()>;

    /// Current playback position.
    fn current_position(&self) -> Duration;

    /// Duration of the prepared source.
    fn duration(&self) -> Duration;

    /// Set output volume in `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32) -> Result<()>;
}
