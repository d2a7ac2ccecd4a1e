//! Native playback backend coordinating load, decode, resample, and output.
//!
//! A worker thread owns the decoder and the cpal stream and executes
//! commands in order. Signals travel to a second thread before reaching the
//! listener, so a listener may block on the player while the worker keeps
//! answering commands.

use crate::backend::{BackendListener, PlaybackBackend};
use crate::buffer::{shared_ring_buffer, SharedRingBuffer};
use crate::config::EngineConfig;
use crate::decode::AudioDecoder;
use crate::loader::{self, LoadedSource};
use crate::output::{AudioOutput, OutputControl};
use crate::resample::{remix, Resampler};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempo_core::{DataSource, Error, Result};
use tracing::{debug, error, info, trace, warn};

/// Free ring space below which the worker stops decoding for a moment.
const MIN_FREE_SPACE: usize = 2048;

/// Commands executed by the engine worker, in the order sent.
#[derive(Debug)]
enum EngineCommand {
    SetSource(DataSource),
    /// Prepare the current source. With a reply channel the result is also
    /// sent there, ahead of any signal.
    Prepare {
        reply: Option<Sender<Result<()>>>,
    },
    Start,
    Pause,
    Stop,
    /// Drop everything; later signals carry `generation`.
    Reset {
        generation: u64,
    },
    Seek(Duration),
    Shutdown,
}

/// Asynchronous outcomes reported to the listener.
#[derive(Debug)]
enum EngineSignal {
    Prepared,
    Completion,
    Error(Error),
}

/// State read by both the backend handle and the worker.
struct EngineShared {
    control: Arc<OutputControl>,
    /// Position of the first frame after the last seek or restart.
    base_position: RwLock<Duration>,
    duration: RwLock<Duration>,
    output_rate: AtomicU32,
    /// Bumped by every reset; signals from older generations are dropped.
    generation: AtomicU64,
    listener: RwLock<Option<Arc<dyn BackendListener>>>,
}

impl EngineShared {
    fn new(volume: f32) -> Self {
        Self {
            control: Arc::new(OutputControl::new(volume)),
            base_position: RwLock::new(Duration::ZERO),
            duration: RwLock::new(Duration::ZERO),
            output_rate: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            listener: RwLock::new(None),
        }
    }

    fn reset_timeline(&self, base: Duration) {
        *self.base_position.write() = base;
        self.control.frames_played.store(0, Ordering::Release);
    }

    fn position(&self) -> Duration {
        playback_position(
            *self.base_position.read(),
            self.control.frames_played.load(Ordering::Acquire),
            self.output_rate.load(Ordering::Acquire),
            *self.duration.read(),
        )
    }
}

/// Position after `frames` output frames at `rate`, clamped to a known duration.
fn playback_position(base: Duration, frames: u64, rate: u32, duration: Duration) -> Duration {
    if rate == 0 {
        return base;
    }
    let nanos = u128::from(frames) * 1_000_000_000 / u128::from(rate);
    let position = base.saturating_add(Duration::from_nanos(
        u64::try_from(nanos).unwrap_or(u64::MAX),
    ));
    if duration.is_zero() {
        position
    } else {
        position.min(duration)
    }
}

/// [`PlaybackBackend`] implemented with symphonia, rubato and cpal.
pub struct NativeBackend {
    command_tx: Sender<EngineCommand>,
    shared: Arc<EngineShared>,
}

impl NativeBackend {
    /// Open the default output device with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        let config = config.normalized();
        let (command_tx, command_rx) = unbounded();
        let (signal_tx, signal_rx) = unbounded();
        let (init_tx, init_rx) = bounded(1);

        let shared = Arc::new(EngineShared::new(config.volume));
        let ring_buffer = shared_ring_buffer(config.ring_buffer_size);

        let notifier_shared = shared.clone();
        std::thread::Builder::new()
            .name("audio-engine-events".to_string())
            .spawn(move || deliver_signals(&notifier_shared, &signal_rx))
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn event thread: {e}")))?;

        let worker_shared = shared.clone();
        std::thread::Builder::new()
            .name("audio-engine".to_string())
            .spawn(move || {
                // cpal::Stream is not Send, so the output lives on this thread
                let output = match AudioOutput::open(
                    config.device.as_deref(),
                    ring_buffer.clone(),
                    worker_shared.control.clone(),
                ) {
                    Ok(output) => output,
                    Err(e) => {
                        error!("Failed to initialize audio output: {e}");
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };

                info!(
                    "Audio output initialized: {} Hz, {} channels, device: {}",
                    output.sample_rate(),
                    output.channels(),
                    output.device_name()
                );
                worker_shared
                    .output_rate
                    .store(output.sample_rate(), Ordering::Release);
                let _ = init_tx.send(Ok(()));

                let worker = EngineWorker::new(
                    config,
                    worker_shared,
                    ring_buffer,
                    signal_tx,
                    output.sample_rate(),
                    output.channels(),
                );
                worker.run(&command_rx);
                drop(output);
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn engine thread: {e}")))?;

        init_rx.recv().map_err(|_| Error::EngineUnavailable)??;

        Ok(Self { command_tx, shared })
    }

    fn send(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::EngineUnavailable)
    }
}

impl PlaybackBackend for NativeBackend {
    fn set_listener(&mut self, listener: Arc<dyn BackendListener>) {
        *self.shared.listener.write() = Some(listener);
    }

    fn set_data_source(&mut self, source: DataSource) -> Result<()> {
        loader::validate(&source)?;
        self.send(EngineCommand::SetSource(source))
    }

    fn prepare(&mut self) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(EngineCommand::Prepare {
            reply: Some(reply_tx),
        })?;
        reply_rx.recv().map_err(|_| Error::EngineUnavailable)?
    }

    fn prepare_async(&mut self) -> Result<()> {
        self.send(EngineCommand::Prepare { reply: None })
    }

    fn start(&mut self) -> Result<()> {
        self.send(EngineCommand::Start)
    }

    fn pause(&mut self) -> Result<()> {
        self.send(EngineCommand::Pause)
    }

    fn stop(&mut self) -> Result<()> {
        self.send(EngineCommand::Stop)
    }

    fn reset(&mut self) -> Result<()> {
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.send(EngineCommand::Reset { generation })
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        self.send(EngineCommand::Seek(position))
    }

    fn current_position(&self) -> Duration {
        self.shared.position()
    }

    fn duration(&self) -> Duration {
        *self.shared.duration.read()
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.shared.control.set_volume(volume);
        Ok(())
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
    }
}

impl std::fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBackend")
            .field("position", &self.shared.position())
            .field("duration", &*self.shared.duration.read())
            .finish_non_exhaustive()
    }
}

/// Forward worker signals to the listener, dropping stale generations.
fn deliver_signals(shared: &EngineShared, signals: &Receiver<(u64, EngineSignal)>) {
    for (generation, signal) in signals {
        let current = shared.generation.load(Ordering::Acquire);
        if generation != current {
            debug!("Dropping {signal:?} from generation {generation} (now {current})");
            continue;
        }

        let Some(listener) = shared.listener.read().clone() else {
            trace!("No listener for {signal:?}");
            continue;
        };

        match signal {
            EngineSignal::Prepared => listener.on_prepared(),
            EngineSignal::Completion => listener.on_completion(),
            EngineSignal::Error(e) => {
                if !listener.on_error(&e) {
                    warn!("Unhandled engine error: {e}");
                }
            }
        }
    }
    debug!("Signal channel closed");
}

/// A prepared source ready to feed the ring.
struct Track {
    decoder: AudioDecoder,
    resampler: Resampler,
    channels: usize,
    end_of_stream: bool,
}

/// Outcome of one fill step.
enum Fill {
    Progress,
    Full,
    EndOfStream,
}

/// Runs on the engine thread and owns all decoding state.
struct EngineWorker {
    config: EngineConfig,
    shared: Arc<EngineShared>,
    ring_buffer: SharedRingBuffer,
    signals: Sender<(u64, EngineSignal)>,
    output_rate: u32,
    output_channels: usize,
    generation: u64,
    source: Option<DataSource>,
    /// Encoded bytes kept so a stopped source can be prepared again.
    loaded: Option<LoadedSource>,
    track: Option<Track>,
    /// Output samples that did not fit in the ring yet.
    pending: Vec<f32>,
    playing: bool,
    completed: bool,
}

impl EngineWorker {
    fn new(
        config: EngineConfig,
        shared: Arc<EngineShared>,
        ring_buffer: SharedRingBuffer,
        signals: Sender<(u64, EngineSignal)>,
        output_rate: u32,
        output_channels: u16,
    ) -> Self {
        let generation = shared.generation.load(Ordering::Acquire);
        Self {
            config,
            shared,
            ring_buffer,
            signals,
            output_rate,
            output_channels: usize::from(output_channels.max(1)),
            generation,
            source: None,
            loaded: None,
            track: None,
            pending: Vec::new(),
            playing: false,
            completed: false,
        }
    }

    fn run(mut self, command_rx: &Receiver<EngineCommand>) {
        info!("Audio engine worker started");

        loop {
            // Poll while playing so decoding keeps up; block otherwise
            let command = if self.playing {
                match command_rx.try_recv() {
                    Ok(cmd) => Some(cmd),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => {
                        debug!("Command channel closed, shutting down");
                        break;
                    }
                }
            } else {
                match command_rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(cmd) => Some(cmd),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => {
                        debug!("Command channel closed, shutting down");
                        break;
                    }
                }
            };

            if let Some(cmd) = command {
                if matches!(cmd, EngineCommand::Shutdown) {
                    info!("Audio engine shutting down");
                    break;
                }
                self.handle_command(cmd);
            }

            if self.playing {
                self.process_audio();
            }

            if self.ring_buffer.free() < MIN_FREE_SPACE {
                std::thread::sleep(Duration::from_micros(500));
            }
        }

        self.set_playing(false);
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SetSource(source) => {
                debug!("Source set: {source}");
                self.clear_track();
                self.loaded = None;
                self.source = Some(source);
            }
            EngineCommand::Prepare { reply } => {
                let result = self.prepare();
                match (reply, result) {
                    // The caller records the transition before the signal lands
                    (Some(reply), Ok(())) => {
                        let _ = reply.send(Ok(()));
                        self.emit(EngineSignal::Prepared);
                    }
                    (Some(reply), Err(e)) => {
                        self.clear_track();
                        let _ = reply.send(Err(e));
                    }
                    (None, Ok(())) => self.emit(EngineSignal::Prepared),
                    (None, Err(e)) => self.fail(e),
                }
            }
            EngineCommand::Start => self.start(),
            EngineCommand::Pause => self.set_playing(false),
            EngineCommand::Stop => {
                debug!("Playback stopped");
                self.clear_track();
            }
            EngineCommand::Reset { generation } => {
                debug!("Engine reset to generation {generation}");
                self.clear_track();
                self.source = None;
                self.loaded = None;
                *self.shared.duration.write() = Duration::ZERO;
                self.generation = generation;
            }
            EngineCommand::Seek(position) => {
                if let Err(e) = self.seek(position) {
                    self.fail(e);
                }
            }
            EngineCommand::Shutdown => {
                // Handled in the main loop
            }
        }
    }

    fn prepare(&mut self) -> Result<()> {
        self.clear_track();

        let loaded = match self.loaded.take() {
            Some(loaded) => loaded,
            None => {
                let source = self.source.as_ref().ok_or(Error::NoDataSource)?;
                loader::load(source, &self.config)?
            }
        };
        let decoder = AudioDecoder::from_bytes(loaded.data.clone(), loaded.extension.as_deref());
        self.loaded = Some(loaded);
        let decoder = decoder?;

        let resampler = Resampler::new(decoder.sample_rate(), self.output_rate, self.output_channels)?;
        let duration = decoder.duration().unwrap_or_default();
        debug!(
            "Track prepared: {} Hz -> {} Hz{}, {} channels, {:.2}s",
            resampler.input_rate(),
            resampler.output_rate(),
            if resampler.needs_resampling() { " (resampled)" } else { "" },
            decoder.channels(),
            duration.as_secs_f64()
        );

        *self.shared.duration.write() = duration;
        self.track = Some(Track {
            channels: usize::from(decoder.channels().max(1)),
            decoder,
            resampler,
            end_of_stream: false,
        });

        self.prefill()
    }

    fn start(&mut self) {
        if self.track.is_none() {
            warn!("Cannot start: no prepared source");
            self.emit(EngineSignal::Error(Error::Internal(
                "start requested without a prepared source".to_string(),
            )));
            return;
        }

        if self.completed {
            debug!("Restarting completed track");
            if let Err(e) = self.seek(Duration::ZERO) {
                self.fail(e);
                return;
            }
        }

        self.set_playing(true);
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let duration = *self.shared.duration.read();
        let Some(track) = self.track.as_mut() else {
            debug!("Seek ignored: no prepared source");
            return Ok(());
        };

        self.ring_buffer.clear();
        self.pending.clear();
        self.completed = false;

        if !duration.is_zero() && position >= duration {
            // Nothing left to decode
            track.end_of_stream = true;
            self.shared.reset_timeline(duration);
            return Ok(());
        }

        debug!("Seeking to {:.2} seconds", position.as_secs_f64());
        track.decoder.seek(position)?;
        track.resampler.reset();
        track.end_of_stream = false;
        self.shared.reset_timeline(position);

        self.prefill()
    }

    fn prefill(&mut self) -> Result<()> {
        let target = self.config.prefill_samples;
        while self.ring_buffer.available() < target {
            match self.fill_step()? {
                Fill::Progress => {}
                Fill::Full | Fill::EndOfStream => break,
            }
        }
        debug!("Pre-filled {} samples", self.ring_buffer.available());
        Ok(())
    }

    fn process_audio(&mut self) {
        if self.ring_buffer.free() < MIN_FREE_SPACE {
            return;
        }

        match self.fill_step() {
            Ok(Fill::Progress | Fill::Full) => {}
            Ok(Fill::EndOfStream) => {
                if self.ring_buffer.is_empty() {
                    info!("Playback finished");
                    self.set_playing(false);
                    self.completed = true;
                    self.emit(EngineSignal::Completion);
                } else {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            Err(e) => self.fail(e),
        }
    }

    /// Move one packet's worth of audio towards the ring.
    fn fill_step(&mut self) -> Result<Fill> {
        if !self.pending.is_empty() {
            let written = self.ring_buffer.write(&self.pending);
            self.pending.drain(..written);
            if !self.pending.is_empty() {
                return Ok(Fill::Full);
            }
        }

        let output_channels = self.output_channels;
        let Some(track) = self.track.as_mut() else {
            return Ok(Fill::EndOfStream);
        };
        if track.end_of_stream {
            return Ok(Fill::EndOfStream);
        }

        let input_channels = track.channels;
        let samples = match track.decoder.decode_next()? {
            Some(decoded) => {
                let mixed = remix(decoded, input_channels, output_channels);
                track.resampler.process(&mixed)?
            }
            None => {
                trace!("Decoder reached end of stream");
                track.end_of_stream = true;
                track.resampler.flush()?
            }
        };

        let written = self.ring_buffer.write(&samples);
        if written < samples.len() {
            self.pending.extend_from_slice(&samples[written..]);
        }
        Ok(Fill::Progress)
    }

    fn clear_track(&mut self) {
        self.set_playing(false);
        self.track = None;
        self.pending.clear();
        self.ring_buffer.clear();
        self.completed = false;
        self.shared.reset_timeline(Duration::ZERO);
    }

    fn set_playing(&mut self, playing: bool) {
        if self.playing != playing {
            debug!("Output {}", if playing { "running" } else { "halted" });
        }
        self.playing = playing;
        self.shared.control.playing.store(playing, Ordering::Release);
    }

    fn fail(&mut self, error: Error) {
        error!("Engine error: {error}");
        self.clear_track();
        self.emit(EngineSignal::Error(error));
    }

    fn emit(&self, signal: EngineSignal) {
        if self.signals.send((self.generation, signal)).is_err() {
            debug!("Signal receiver gone");
        }
    }
}
