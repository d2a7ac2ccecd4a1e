//! A playback façade that tracks engine state and ignores calls made at the wrong time.
//!
//! Every state-changing operation is checked against [`Operation::target`]
//! before it reaches the backend. An operation the current state does not
//! permit is dropped and reported to the [`DiagnosticsHook`] instead of failing,
//! so a stray or duplicated call from a loosely coordinated caller never
//! interrupts playback.
//!
//! The backend mutex serialises every transition, whether it comes from a
//! caller or from a backend signal. `state` is only written while that mutex is
//! held, and callbacks run after it has been released so they may call back
//! into the player.

use crate::backend::{BackendListener, PlaybackBackend};
use crate::diagnostics::{Diagnostic, DiagnosticsHook, Signal, TracingDiagnostics};
use crate::state::{Operation, PlayerState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tempo_core::{DataSource, Error, MediaDataSource, Result};
use tracing::{debug, warn};

type PlayerCallback<B> = Arc<dyn Fn(&ManagedPlayer<B>) + Send + Sync>;
type ErrorCallback<B> = Arc<dyn Fn(&ManagedPlayer<B>, &Error) -> bool + Send + Sync>;

struct Shared<B: PlaybackBackend + 'static> {
    backend: Mutex<B>,
    state: RwLock<PlayerState>,
    on_prepared: RwLock<Option<PlayerCallback<B>>>,
    on_completion: RwLock<Option<PlayerCallback<B>>>,
    on_error: RwLock<Option<ErrorCallback<B>>>,
    diagnostics: Arc<dyn DiagnosticsHook>,
}

/// Owns a [`PlaybackBackend`] and only drives it in ways its state allows.
pub struct ManagedPlayer<B: PlaybackBackend + 'static> {
    shared: Arc<Shared<B>>,
}

impl<B: PlaybackBackend + 'static> ManagedPlayer<B> {
    /// Wrap `backend`, logging absorbed calls through `tracing`.
    pub fn new(backend: B) -> Self {
        Self::with_diagnostics(backend, Arc::new(TracingDiagnostics))
    }

    /// Wrap `backend`, sending absorbed calls and signals to `diagnostics`.
    pub fn with_diagnostics(mut backend: B, diagnostics: Arc<dyn DiagnosticsHook>) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<B>>| {
            backend.set_listener(Arc::new(Listener {
                shared: weak.clone(),
            }));
            Shared {
                backend: Mutex::new(backend),
                state: RwLock::new(PlayerState::Idle),
                on_prepared: RwLock::new(None),
                on_completion: RwLock::new(None),
                on_error: RwLock::new(None),
                diagnostics,
            }
        });
        Self { shared }
    }

    /// Current state.
    pub fn state(&self) -> PlayerState {
        *self.shared.state.read()
    }

    pub fn is_prepared(&self) -> bool {
        self.state() == PlayerState::Prepared
    }

    pub fn is_complete(&self) -> bool {
        self.state() == PlayerState::Completed
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlayerState::Started
    }

    /// Attach a data source. Only permitted while idle.
    ///
    /// Returns an error if the backend rejects the source; the player stays idle.
    pub fn set_data_source(&self, source: DataSource) -> Result<()> {
        debug!("set_data_source({source}) called");

        let mut backend = self.shared.backend.lock();
        let state = self.state();
        let Some(target) = Operation::SetDataSource.target(state) else {
            drop(backend);
            self.ignore(Operation::SetDataSource, state);
            return Ok(());
        };

        backend.set_data_source(source)?;
        self.set_state(target);
        Ok(())
    }

    pub fn set_data_source_uri(&self, uri: &str) -> Result<()> {
        self.set_data_source(DataSource::uri(uri)?)
    }

    pub fn set_data_source_uri_with_headers(
        &self,
        uri: &str,
        headers: HashMap<String, String>,
    ) -> Result<()> {
        self.set_data_source(DataSource::uri_with_headers(uri, headers)?)
    }

    pub fn set_data_source_path(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.set_data_source(DataSource::Path(path.into()))
    }

    pub fn set_data_source_file(&self, file: File) -> Result<()> {
        self.set_data_source(DataSource::File(file))
    }

    pub fn set_data_source_file_range(&self, file: File, offset: u64, length: u64) -> Result<()> {
        self.set_data_source(DataSource::file_range(file, offset, length)?)
    }

    pub fn set_data_source_custom(&self, source: Arc<dyn MediaDataSource>) -> Result<()> {
        self.set_data_source(DataSource::Custom(source))
    }

    /// Begin preparing the source without blocking.
    pub fn prepare_async(&self) {
        self.transition(Operation::PrepareAsync, B::prepare_async);
    }

    /// Prepare the source, blocking until the backend is ready or has failed.
    ///
    /// A failure is returned to the caller and leaves the player initialized.
    pub fn prepare(&self) -> Result<()> {
        debug!("prepare() called");

        let mut backend = self.shared.backend.lock();
        let state = self.state();
        let Some(target) = Operation::Prepare.target(state) else {
            drop(backend);
            self.ignore(Operation::Prepare, state);
            return Ok(());
        };

        backend.prepare()?;
        self.set_state(target);
        Ok(())
    }

    pub fn start(&self) {
        self.transition(Operation::Start, B::start);
    }

    pub fn pause(&self) {
        self.transition(Operation::Pause, B::pause);
    }

    pub fn stop(&self) {
        self.transition(Operation::Stop, B::stop);
    }

    /// Return to idle from any state, discarding the current source.
    pub fn reset(&self) {
        debug!("reset() called");
        let mut backend = self.shared.backend.lock();
        self.reset_locked(&mut *backend);
    }

    /// Move the playback position.
    ///
    /// From `Completed` the backend is started and paused first so it accepts
    /// the seek; the player then reports `Paused` without passing through `Started`.
    /// If a step of that sequence fails, the state follows the last step that succeeded.
    pub fn seek_to(&self, position: Duration) {
        debug!("seek_to({position:?}) called");

        let outcome = {
            let mut backend = self.shared.backend.lock();
            let state = self.state();
            let Some(target) = Operation::SeekTo.target(state) else {
                drop(backend);
                self.ignore(Operation::SeekTo, state);
                return;
            };

            let result = if state == PlayerState::Completed {
                self.seek_from_end(&mut *backend, position)
            } else {
                backend.seek_to(position)
            };
            result.map(|()| self.set_state(target))
        };

        if let Err(e) = outcome {
            self.handle_error(&e);
        }
    }

    /// Playback position; the full duration once completed, zero before preparation.
    pub fn current_position(&self) -> Duration {
        let backend = self.shared.backend.lock();
        match self.state() {
            PlayerState::Completed => backend.duration(),
            state if state.has_position() => backend.current_position(),
            _ => Duration::ZERO,
        }
    }

    /// Track duration, or zero while it is not yet known.
    pub fn duration(&self) -> Duration {
        let backend = self.shared.backend.lock();
        if self.state().has_duration() {
            backend.duration()
        } else {
            Duration::ZERO
        }
    }

    /// Set output volume. Permitted in every state.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        if volume.is_nan() {
            return Err(Error::InvalidArgument("volume is NaN".into()));
        }

        let result = self.shared.backend.lock().set_volume(volume.clamp(0.0, 1.0));
        if let Err(e) = &result {
            warn!("Failed to set volume: {e}");
        }
        result
    }

    /// Register the callback run after the player becomes prepared.
    pub fn set_on_prepared(&self, callback: impl Fn(&Self) + Send + Sync + 'static) {
        *self.shared.on_prepared.write() = Some(Arc::new(callback));
    }

    /// Register the callback run after the stream completes.
    pub fn set_on_completion(&self, callback: impl Fn(&Self) + Send + Sync + 'static) {
        *self.shared.on_completion.write() = Some(Arc::new(callback));
    }

    /// Register the error callback. It returns whether it handled the error;
    /// an unhandled error resets the player.
    pub fn set_on_error(&self, callback: impl Fn(&Self, &Error) -> bool + Send + Sync + 'static) {
        *self.shared.on_error.write() = Some(Arc::new(callback));
    }

    pub fn clear_on_prepared(&self) {
        self.shared.on_prepared.write().take();
    }

    pub fn clear_on_completion(&self) {
        self.shared.on_completion.write().take();
    }

    pub fn clear_on_error(&self) {
        self.shared.on_error.write().take();
    }

    fn transition(&self, operation: Operation, action: impl FnOnce(&mut B) -> Result<()>) {
        debug!("{operation}() called");

        let outcome = {
            let mut backend = self.shared.backend.lock();
            let state = self.state();
            let Some(target) = operation.target(state) else {
                drop(backend);
                self.ignore(operation, state);
                return;
            };
            action(&mut *backend).map(|()| self.set_state(target))
        };

        if let Err(e) = outcome {
            self.handle_error(&e);
        }
    }

    fn seek_from_end(&self, backend: &mut B, position: Duration) -> Result<()> {
        backend.start()?;
        if let Err(e) = backend.pause() {
            self.set_state(PlayerState::Started);
            return Err(e);
        }
        if let Err(e) = backend.seek_to(position) {
            self.set_state(PlayerState::Paused);
            return Err(e);
        }
        Ok(())
    }

    fn set_state(&self, next: PlayerState) {
        let mut state = self.shared.state.write();
        if *state != next {
            debug!("State changed: {} -> {}", *state, next);
        }
        *state = next;
    }

    fn reset_locked(&self, backend: &mut B) {
        if let Err(e) = backend.reset() {
            warn!("Backend reset failed: {e}");
        }
        self.set_state(PlayerState::Idle);
    }

    fn ignore(&self, operation: Operation, state: PlayerState) {
        self.shared
            .diagnostics
            .record(Diagnostic::IgnoredCall { operation, state });
    }

    fn stale(&self, signal: Signal, state: PlayerState) {
        self.shared
            .diagnostics
            .record(Diagnostic::StaleSignal { signal, state });
    }

    fn handle_prepared(&self) {
        {
            let guard = self.shared.backend.lock();
            let state = self.state();
            if state != PlayerState::Preparing {
                drop(guard);
                self.stale(Signal::Prepared, state);
                return;
            }
            self.set_state(PlayerState::Prepared);
        }

        let callback = self.shared.on_prepared.read().clone();
        if let Some(callback) = callback {
            callback(self);
        }
    }

    fn handle_completion(&self) {
        {
            let guard = self.shared.backend.lock();
            let state = self.state();
            if !matches!(state, PlayerState::Started | PlayerState::Paused) {
                drop(guard);
                self.stale(Signal::Completion, state);
                return;
            }
            self.set_state(PlayerState::Completed);
        }

        let callback = self.shared.on_completion.read().clone();
        if let Some(callback) = callback {
            callback(self);
        }
    }

    fn handle_error(&self, error: &Error) {
        let Some(callback) = self.shared.on_error.read().clone() else {
            warn!("Error with no error callback registered: {error}");
            return;
        };
        if callback(self, error) {
            return;
        }

        let state = {
            let mut backend = self.shared.backend.lock();
            let state = self.state();
            self.reset_locked(&mut *backend);
            state
        };
        self.shared.diagnostics.record(Diagnostic::ErrorRecovery {
            error: error.to_string(),
            state,
        });
    }
}

impl<B: PlaybackBackend + 'static> fmt::Debug for ManagedPlayer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedPlayer")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Forwards backend signals to the player that owns the backend.
struct Listener<B: PlaybackBackend + 'static> {
    shared: Weak<Shared<B>>,
}

impl<B: PlaybackBackend + 'static> Listener<B> {
    fn player(&self) -> Option<ManagedPlayer<B>> {
        self.shared.upgrade().map(|shared| ManagedPlayer { shared })
    }
}

impl<B: PlaybackBackend + 'static> BackendListener for Listener<B> {
    fn on_prepared(&self) {
        if let Some(player) = self.player() {
            player.handle_prepared();
        }
    }

    fn on_completion(&self) {
        if let Some(player) = self.player() {
            player.handle_completion();
        }
    }

    fn on_error(&self, error: &Error) -> bool {
        if let Some(player) = self.player() {
            player.handle_error(error);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::diagnostics::RecordingDiagnostics;
    use crate::mock::{Call, FailOn, MockBackend, MockHandle, MOCK_DURATION, MOCK_POSITION};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn player() -> (
        ManagedPlayer<MockBackend>,
        MockHandle,
        Arc<RecordingDiagnostics>,
    ) {
        let (backend, handle) = MockBackend::new();
        let diagnostics = Arc::new(RecordingDiagnostics::new());
        let player = ManagedPlayer::with_diagnostics(backend, diagnostics.clone());
        (player, handle, diagnostics)
    }

    fn source() -> DataSource {
        DataSource::Path(PathBuf::from("/music/track.flac"))
    }

    /// Drive a fresh player into `target` through legal operations only.
    fn drive_to(player: &ManagedPlayer<MockBackend>, handle: &MockHandle, target: PlayerState) {
        use PlayerState::*;

        if target == Idle {
            return;
        }
        player.set_data_source(source()).unwrap();
        if target == Initialized {
            return;
        }
        player.prepare_async();
        if target == Preparing {
            return;
        }
        handle.signal_prepared();
        if target == Prepared {
            return;
        }
        player.start();
        match target {
            Started => {}
            Paused => player.pause(),
            Stopped => player.stop(),
            Completed => handle.signal_completion(),
            _ => unreachable!(),
        }
    }

    fn apply(player: &ManagedPlayer<MockBackend>, operation: Operation) {
        match operation {
            Operation::SetDataSource => player.set_data_source(source()).unwrap(),
            Operation::PrepareAsync => player.prepare_async(),
            Operation::Prepare => player.prepare().unwrap(),
            Operation::Start => player.start(),
            Operation::Pause => player.pause(),
            Operation::Stop => player.stop(),
            Operation::Reset => player.reset(),
            Operation::SeekTo => player.seek_to(Duration::from_secs(10)),
        }
    }

    #[test]
    fn test_new_player_is_idle() {
        let (player, handle, _) = player();
        assert_eq!(player.state(), PlayerState::Idle);
        assert!(!player.is_prepared());
        assert!(!player.is_complete());
        assert!(handle.calls().is_empty());
    }

    #[test]
    fn test_full_lifecycle_sequence() {
        let (player, handle, diagnostics) = player();
        let mut observed = vec![player.state()];

        player.set_data_source(source()).unwrap();
        observed.push(player.state());
        player.prepare_async();
        observed.push(player.state());
        handle.signal_prepared();
        observed.push(player.state());
        player.start();
        observed.push(player.state());
        player.pause();
        observed.push(player.state());
        player.stop();
        observed.push(player.state());
        player.reset();
        observed.push(player.state());

        assert_eq!(
            observed,
            [
                PlayerState::Idle,
                PlayerState::Initialized,
                PlayerState::Preparing,
                PlayerState::Prepared,
                PlayerState::Started,
                PlayerState::Paused,
                PlayerState::Stopped,
                PlayerState::Idle,
            ]
        );
        assert_eq!(
            handle.calls(),
            [
                Call::SetDataSource("path"),
                Call::PrepareAsync,
                Call::Start,
                Call::Pause,
                Call::Stop,
                Call::Reset,
            ]
        );
        assert!(diagnostics.events().is_empty());
    }

    #[test]
    fn test_start_while_idle_is_ignored() {
        let (player, handle, diagnostics) = player();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        player.set_on_prepared(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        player.start();

        assert_eq!(player.state(), PlayerState::Idle);
        assert!(handle.calls().is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(
            diagnostics.ignored_calls(),
            [(Operation::Start, PlayerState::Idle)]
        );
    }

    #[test]
    fn test_illegal_operations_leave_state_and_backend_untouched() {
        for state in PlayerState::ALL {
            for operation in Operation::ALL {
                if operation.is_legal(state) {
                    continue;
                }
                let (player, handle, diagnostics) = player();
                drive_to(&player, &handle, state);
                assert_eq!(player.state(), state);
                handle.take_calls();
                diagnostics.drain();

                apply(&player, operation);

                assert_eq!(player.state(), state, "{operation} from {state}");
                assert!(handle.calls().is_empty(), "{operation} from {state}");
                assert_eq!(diagnostics.ignored_calls(), [(operation, state)]);
            }
        }
    }

    #[test]
    fn test_reset_from_every_state() {
        for state in PlayerState::ALL {
            let (player, handle, _) = player();
            drive_to(&player, &handle, state);
            handle.take_calls();

            player.reset();

            assert_eq!(player.state(), PlayerState::Idle);
            assert_eq!(handle.calls(), [Call::Reset]);
        }
    }

    #[test]
    fn test_redundant_set_data_source_keeps_playing() {
        let (player, handle, diagnostics) = player();
        drive_to(&player, &handle, PlayerState::Started);
        handle.take_calls();

        player.set_data_source(source()).unwrap();

        assert_eq!(player.state(), PlayerState::Started);
        assert!(handle.calls().is_empty());
        assert_eq!(
            diagnostics.ignored_calls(),
            [(Operation::SetDataSource, PlayerState::Started)]
        );
    }

    #[test]
    fn test_prepared_callback_fires_once() {
        let (player, handle, _) = player();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        player.set_on_prepared(move |p| {
            assert_eq!(p.state(), PlayerState::Prepared);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        player.set_data_source(source()).unwrap();
        player.prepare_async();
        assert_eq!(player.state(), PlayerState::Preparing);

        handle.signal_prepared();
        handle.signal_prepared();

        assert!(player.is_prepared());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prepared_signal_after_reset_is_stale() {
        let (player, handle, diagnostics) = player();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        player.set_on_prepared(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drive_to(&player, &handle, PlayerState::Preparing);
        player.reset();
        handle.signal_prepared();

        assert_eq!(player.state(), PlayerState::Idle);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(
            diagnostics.events(),
            [Diagnostic::StaleSignal {
                signal: Signal::Prepared,
                state: PlayerState::Idle
            }]
        );
    }

    #[test]
    fn test_prepared_callback_can_start_playback() {
        let (player, handle, _) = player();
        player.set_on_prepared(|p| p.start());

        drive_to(&player, &handle, PlayerState::Preparing);
        handle.signal_prepared();

        assert!(player.is_playing());
        assert_eq!(handle.calls().last(), Some(&Call::Start));
    }

    #[test]
    fn test_replacing_callback_discards_previous() {
        let (player, handle, _) = player();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let counter = first.clone();
        player.set_on_completion(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = second.clone();
        player.set_on_completion(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drive_to(&player, &handle, PlayerState::Completed);

        assert!(player.is_complete());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        player.clear_on_completion();
        player.start();
        handle.signal_completion();
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completion_outside_playback_is_stale() {
        let (player, handle, diagnostics) = player();
        drive_to(&player, &handle, PlayerState::Stopped);

        handle.signal_completion();

        assert_eq!(player.state(), PlayerState::Stopped);
        assert_eq!(
            diagnostics.events(),
            [Diagnostic::StaleSignal {
                signal: Signal::Completion,
                state: PlayerState::Stopped
            }]
        );
    }

    #[test]
    fn test_position_when_completed_equals_duration() {
        let (player, handle, _) = player();
        drive_to(&player, &handle, PlayerState::Completed);

        assert_eq!(player.current_position(), player.duration());
        assert_eq!(player.duration(), MOCK_DURATION);
    }

    #[test]
    fn test_position_and_duration_zero_before_preparation() {
        for state in [
            PlayerState::Idle,
            PlayerState::Initialized,
            PlayerState::Preparing,
            PlayerState::Stopped,
        ] {
            let (player, handle, _) = player();
            drive_to(&player, &handle, state);
            assert_eq!(player.current_position(), Duration::ZERO, "{state}");
            assert_eq!(player.duration(), Duration::ZERO, "{state}");
        }
    }

    #[test]
    fn test_position_forwarded_while_playable() {
        for state in [PlayerState::Prepared, PlayerState::Started, PlayerState::Paused] {
            let (player, handle, _) = player();
            drive_to(&player, &handle, state);
            assert_eq!(player.current_position(), MOCK_POSITION);
            assert_eq!(player.duration(), MOCK_DURATION);
        }
    }

    #[test]
    fn test_seek_from_completed_pauses_without_exposing_started() {
        let (player, handle, _) = player();
        drive_to(&player, &handle, PlayerState::Completed);
        handle.take_calls();

        player.seek_to(Duration::from_secs(42));

        assert_eq!(player.state(), PlayerState::Paused);
        assert_eq!(
            handle.calls(),
            [
                Call::Start,
                Call::Pause,
                Call::SeekTo(Duration::from_secs(42))
            ]
        );
    }

    #[test]
    fn test_seek_while_started_keeps_state() {
        let (player, handle, _) = player();
        drive_to(&player, &handle, PlayerState::Started);
        handle.take_calls();

        player.seek_to(Duration::from_secs(5));

        assert_eq!(player.state(), PlayerState::Started);
        assert_eq!(handle.calls(), [Call::SeekTo(Duration::from_secs(5))]);
    }

    #[test]
    fn test_unhandled_error_resets_from_any_state() {
        for state in PlayerState::ALL {
            let (player, handle, diagnostics) = player();
            player.set_on_error(|_, _| false);
            drive_to(&player, &handle, state);

            let acknowledged = handle.signal_error(&Error::AudioDecode("corrupt".into()));

            assert!(acknowledged);
            assert_eq!(player.state(), PlayerState::Idle);
            assert_eq!(
                diagnostics.events().last(),
                Some(&Diagnostic::ErrorRecovery {
                    error: "Audio decode error: corrupt".into(),
                    state,
                })
            );
        }
    }

    #[test]
    fn test_handled_error_keeps_state() {
        let (player, handle, diagnostics) = player();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = seen.clone();
        player.set_on_error(move |_, e| {
            errors.lock().push(e.to_string());
            true
        });
        drive_to(&player, &handle, PlayerState::Started);
        handle.take_calls();

        assert!(handle.signal_error(&Error::Network("dropped".into())));

        assert_eq!(player.state(), PlayerState::Started);
        assert!(handle.calls().is_empty());
        assert_eq!(seen.lock().as_slice(), ["Network error: dropped"]);
        assert!(diagnostics.events().is_empty());
    }

    #[test]
    fn test_error_without_callback_keeps_state() {
        for state in [PlayerState::Initialized, PlayerState::Paused] {
            let (player, handle, diagnostics) = player();
            drive_to(&player, &handle, state);
            handle.take_calls();

            assert!(handle.signal_error(&Error::AudioOutput("device lost".into())));

            assert_eq!(player.state(), state);
            assert!(handle.calls().is_empty());
            assert!(diagnostics.events().is_empty());
        }
    }

    #[test]
    fn test_callbacks_survive_forced_reset() {
        let (player, handle, _) = player();
        let prepared = Arc::new(AtomicUsize::new(0));
        let counter = prepared.clone();
        player.set_on_prepared(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        player.set_on_error(|_, _| false);

        drive_to(&player, &handle, PlayerState::Started);
        handle.signal_error(&Error::Internal("boom".into()));
        assert_eq!(player.state(), PlayerState::Idle);

        drive_to(&player, &handle, PlayerState::Prepared);
        assert_eq!(prepared.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backend_failure_on_start_goes_through_error_path() {
        let (player, handle, _) = player();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        player.set_on_error(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        });
        drive_to(&player, &handle, PlayerState::Prepared);
        handle.fail_next(FailOn::Start);

        player.start();

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[test]
    fn test_failed_prepare_async_keeps_state_and_reports() {
        let (player, handle, _) = player();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = seen.clone();
        player.set_on_error(move |p, e| {
            errors.lock().push((p.state(), e.to_string()));
            true
        });
        player.set_data_source(source()).unwrap();
        handle.take_calls();
        handle.fail_next(FailOn::PrepareAsync);

        player.prepare_async();

        assert_eq!(player.state(), PlayerState::Initialized);
        assert!(handle.calls().is_empty());
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].0, PlayerState::Initialized);

        player.prepare_async();
        assert_eq!(player.state(), PlayerState::Preparing);
    }

    #[test]
    fn test_unhandled_seek_failure_resets() {
        let (player, handle, diagnostics) = player();
        player.set_on_error(|_, _| false);
        drive_to(&player, &handle, PlayerState::Started);
        handle.take_calls();
        handle.fail_next(FailOn::Seek);

        player.seek_to(Duration::from_secs(3));

        assert_eq!(player.state(), PlayerState::Idle);
        assert_eq!(handle.calls(), [Call::Reset]);
        assert!(matches!(
            diagnostics.events().last(),
            Some(Diagnostic::ErrorRecovery {
                state: PlayerState::Started,
                ..
            })
        ));
    }

    #[test]
    fn test_seek_from_completed_failing_pause_reports_started() {
        let (player, handle, _) = player();
        player.set_on_error(|_, _| true);
        drive_to(&player, &handle, PlayerState::Completed);
        handle.take_calls();
        handle.fail_next(FailOn::Pause);

        player.seek_to(Duration::from_millis(100));

        assert_eq!(handle.calls(), [Call::Start]);
        assert_eq!(player.state(), PlayerState::Started);
        assert!(player.is_playing());
    }

    #[test]
    fn test_seek_from_completed_failing_seek_reports_paused() {
        let (player, handle, _) = player();
        player.set_on_error(|_, _| true);
        drive_to(&player, &handle, PlayerState::Completed);
        handle.take_calls();
        handle.fail_next(FailOn::Seek);

        player.seek_to(Duration::from_millis(100));

        assert_eq!(handle.calls(), [Call::Start, Call::Pause]);
        assert_eq!(player.state(), PlayerState::Paused);
    }

    #[test]
    fn test_sync_prepare_failure_propagates() {
        let (player, handle, diagnostics) = player();
        player.set_data_source(source()).unwrap();
        handle.fail_next(FailOn::Prepare);

        let result = player.prepare();

        assert!(matches!(result, Err(Error::AudioDecode(_))));
        assert_eq!(player.state(), PlayerState::Initialized);
        assert!(diagnostics.events().is_empty());

        player.prepare().unwrap();
        assert_eq!(player.state(), PlayerState::Preparing);
        handle.signal_prepared();
        assert!(player.is_prepared());
    }

    #[test]
    fn test_rejected_source_leaves_player_idle() {
        let (player, handle, _) = player();
        handle.fail_next(FailOn::SetDataSource);

        assert!(player.set_data_source(source()).is_err());
        assert_eq!(player.state(), PlayerState::Idle);

        player.set_data_source(source()).unwrap();
        assert_eq!(player.state(), PlayerState::Initialized);
    }

    #[test]
    fn test_source_variants_funnel_through_idle_check() {
        let (player, handle, diagnostics) = player();
        player
            .set_data_source_uri("https://example.com/song.mp3")
            .unwrap();
        player.set_data_source_path("/music/other.ogg").unwrap();
        player
            .set_data_source_uri_with_headers("https://example.com/x", HashMap::new())
            .unwrap();

        assert_eq!(handle.calls(), [Call::SetDataSource("uri")]);
        assert_eq!(
            diagnostics.ignored_calls(),
            [
                (Operation::SetDataSource, PlayerState::Initialized),
                (Operation::SetDataSource, PlayerState::Initialized)
            ]
        );
    }

    #[test]
    fn test_prepare_async_from_stopped() {
        let (player, handle, _) = player();
        drive_to(&player, &handle, PlayerState::Stopped);

        player.prepare_async();
        assert_eq!(player.state(), PlayerState::Preparing);
        handle.signal_prepared();
        player.start();
        assert!(player.is_playing());
    }

    #[test]
    fn test_volume_is_clamped_and_validated() {
        let (player, handle, _) = player();
        player.set_volume(1.5).unwrap();
        player.set_volume(-1.0).unwrap();
        assert!(matches!(
            player.set_volume(f32::NAN),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(handle.calls(), [Call::SetVolume(1.0), Call::SetVolume(0.0)]);
    }

    #[test]
    fn test_signal_from_another_thread() {
        let (player, handle, _) = player();
        drive_to(&player, &handle, PlayerState::Preparing);

        let signaller = handle.clone();
        std::thread::spawn(move || signaller.signal_prepared())
            .join()
            .unwrap();

        assert!(player.is_prepared());
    }

    #[test]
    fn test_signals_after_player_dropped_are_acknowledged() {
        let (player, handle, _) = player();
        drop(player);

        handle.signal_prepared();
        handle.signal_completion();
        assert!(handle.signal_error(&Error::Internal("late".into())));
    }

    fn operation() -> impl Strategy<Value = Operation> {
        prop::sample::select(Operation::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn state_follows_transition_table(ops in prop::collection::vec(operation(), 0..40)) {
            let (player, handle, diagnostics) = player();
            let mut expected = PlayerState::Idle;
            let mut ignored = 0;

            for op in ops {
                let before = handle.calls().len();
                apply(&player, op);
                let made = handle.calls().len() - before;

                match op.target(expected) {
                    Some(next) => {
                        let calls = if op == Operation::SeekTo && expected == PlayerState::Completed { 3 } else { 1 };
                        prop_assert_eq!(made, calls);
                        expected = next;
                    }
                    None => {
                        prop_assert_eq!(made, 0);
                        ignored += 1;
                    }
                }
                prop_assert_eq!(player.state(), expected);

                if expected == PlayerState::Preparing {
                    handle.signal_prepared();
                    expected = PlayerState::Prepared;
                    prop_assert_eq!(player.state(), expected);
                }
            }

            prop_assert_eq!(diagnostics.ignored_calls().len(), ignored);
        }
    }
}
