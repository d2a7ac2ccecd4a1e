//! Audio output using cpal.

use crate::buffer::SharedRingBuffer;
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tempo_core::{Error, Result};
use tracing::{debug, error, info, trace};

/// State shared between the engine worker and the real-time output callback.
#[derive(Debug)]
pub struct OutputControl {
    /// When false the callback writes silence and leaves the ring untouched.
    pub playing: AtomicBool,
    /// Bits of an `f32` gain in `0.0..=1.0`.
    volume: AtomicU32,
    /// Frames taken from the ring since the last reset.
    pub frames_played: AtomicU64,
}

impl OutputControl {
    pub fn new(volume: f32) -> Self {
        Self {
            playing: AtomicBool::new(false),
            volume: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            frames_played: AtomicU64::new(0),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

/// An open output stream. Must stay on the thread that created it.
pub struct AudioOutput {
    _stream: Stream,
    sample_rate: u32,
    channels: u16,
    device_name: String,
}

impl AudioOutput {
    /// Open `device_name`, or the host's default output device.
    pub fn open(
        device_name: Option<&str>,
        ring_buffer: SharedRingBuffer,
        control: Arc<OutputControl>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(wanted) => host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
                .find(|d| d.name().is_ok_and(|name| name == wanted))
                .ok_or_else(|| Error::AudioOutput(format!("Output device `{wanted}` not found")))?,
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))?,
        };

        Self::with_device(device, ring_buffer, control)
    }

    pub fn with_device(
        device: Device,
        ring_buffer: SharedRingBuffer,
        control: Arc<OutputControl>,
    ) -> Result<Self> {
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {device_name}");

        let supported_config = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get output config: {e}")))?;
        debug!("Supported output config: {:?}", supported_config);

        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, ring_buffer, control)?,
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, ring_buffer, control)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, ring_buffer, control)?,
            _ => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {sample_format:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

        Ok(Self {
            _stream: stream,
            sample_rate: config.sample_rate.0,
            channels: config.channels,
            device_name,
        })
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &Device,
        config: &StreamConfig,
        ring_buffer: SharedRingBuffer,
        control: Arc<OutputControl>,
    ) -> Result<Stream> {
        let channels = u64::from(config.channels.max(1));
        let mut scratch: Vec<f32> = Vec::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if !control.playing.load(Ordering::Acquire) {
                        data.fill(T::from_sample(0.0f32));
                        return;
                    }

                    scratch.resize(data.len(), 0.0);
                    let read = ring_buffer.read(&mut scratch);
                    let volume = control.volume();

                    for (i, sample) in data.iter_mut().enumerate() {
                        let value = if i < read { scratch[i] * volume } else { 0.0 };
                        // Soft clip near full scale
                        let limited = if value.abs() > 0.9 { value.tanh() } else { value };
                        *sample = T::from_sample(limited);
                    }

                    control
                        .frames_played
                        .fetch_add(read as u64 / channels, Ordering::AcqRel);
                    if read < data.len() && read > 0 {
                        trace!("Buffer underrun: needed {}, got {}", data.len(), read);
                    }
                },
                |err| error!("Audio stream error: {err}"),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }
}

/// Names of the host's output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}
