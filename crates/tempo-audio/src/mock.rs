//! Scripted backend for exercising the managed player without audio hardware.

use crate::backend::{BackendListener, PlaybackBackend};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempo_core::{DataSource, Error, Result};

pub const MOCK_POSITION: Duration = Duration::from_millis(1500);
pub const MOCK_DURATION: Duration = Duration::from_secs(180);

/// A primitive operation the backend was asked to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetDataSource(&'static str),
    Prepare,
    PrepareAsync,
    Start,
    Pause,
    Stop,
    Reset,
    SeekTo(Duration),
    SetVolume(f32),
}

/// Which primitive should fail next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    SetDataSource,
    Prepare,
    PrepareAsync,
    Start,
    Pause,
    Seek,
}

#[derive(Default)]
struct MockInner {
    calls: Vec<Call>,
    listener: Option<Arc<dyn BackendListener>>,
    fail_on: Option<FailOn>,
}

pub struct MockBackend {
    inner: Arc<Mutex<MockInner>>,
}

/// Test-side view of a [`MockBackend`] that has been moved into a player.
#[derive(Clone)]
pub struct MockHandle {
    inner: Arc<Mutex<MockInner>>,
}

impl MockBackend {
    pub fn new() -> (Self, MockHandle) {
        let inner = Arc::new(Mutex::new(MockInner::default()));
        (
            Self {
                inner: inner.clone(),
            },
            MockHandle { inner },
        )
    }

    fn call(&self, call: Call, fail: Option<FailOn>) -> Result<()> {
        let mut inner = self.inner.lock();
        if fail.is_some() && inner.fail_on == fail {
            inner.fail_on = None;
            return Err(Error::AudioDecode(format!("scripted failure in {call:?}")));
        }
        inner.calls.push(call);
        Ok(())
    }
}

impl PlaybackBackend for MockBackend {
    fn set_listener(&mut self, listener: Arc<dyn BackendListener>) {
        self.inner.lock().listener = Some(listener);
    }

    fn set_data_source(&mut self, source: DataSource) -> Result<()> {
        self.call(Call::SetDataSource(source.kind()), Some(FailOn::SetDataSource))
    }

    fn prepare(&mut self) -> Result<()> {
        self.call(Call::Prepare, Some(FailOn::Prepare))
    }

    fn prepare_async(&mut self) -> Result<()> {
        self.call(Call::PrepareAsync, Some(FailOn::PrepareAsync))
    }

    fn start(&mut self) -> Result<()> {
        self.call(Call::Start, Some(FailOn::Start))
    }

    fn pause(&mut self) -> Result<()> {
        self.call(Call::Pause, Some(FailOn::Pause))
    }

    fn stop(&mut self) -> Result<()> {
        self.call(Call::Stop, None)
    }

    fn reset(&mut self) -> Result<()> {
        self.call(Call::Reset, None)
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        self.call(Call::SeekTo(position), Some(FailOn::Seek))
    }

    fn current_position(&self) -> Duration {
        MOCK_POSITION
    }

    fn duration(&self) -> Duration {
        MOCK_DURATION
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.call(Call::SetVolume(volume), None)
    }
}

impl MockHandle {
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.inner.lock().calls)
    }

    pub fn fail_next(&self, fail: FailOn) {
        self.inner.lock().fail_on = Some(fail);
    }

    fn listener(&self) -> Arc<dyn BackendListener> {
        #[allow(clippy::expect_used)]
        self.inner
            .lock()
            .listener
            .clone()
            .expect("player registers a listener on construction")
    }

    pub fn signal_prepared(&self) {
        self.listener().on_prepared();
    }

    pub fn signal_completion(&self) {
        self.listener().on_completion();
    }

    pub fn signal_error(&self, error: &Error) -> bool {
        self.listener().on_error(error)
    }
}

/// A 16-bit PCM WAV file of `frames` frames of silence.
pub fn silent_wav(sample_rate: u32, channels: u16, frames: u32) -> Vec<u8> {
    let data_len = frames * u32::from(channels) * 2;
    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
    wav.extend_from_slice(&(channels * 2).to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.resize(44 + data_len as usize, 0);
    wav
}

/// In-memory [`tempo_core::MediaDataSource`].
pub struct MemorySource(pub Vec<u8>);

impl tempo_core::MediaDataSource for MemorySource {
    fn read_at(&self, position: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let start = usize::try_from(position).unwrap_or(usize::MAX).min(self.0.len());
        let end = (start + buf.len()).min(self.0.len());
        buf[..end - start].copy_from_slice(&self.0[start..end]);
        Ok(end - start)
    }

    fn size(&self) -> Option<u64> {
        Some(self.0.len() as u64)
    }
}
