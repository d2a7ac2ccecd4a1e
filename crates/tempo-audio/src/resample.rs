//! Sample-rate conversion to the output device rate using rubato.

use rubato::{FftFixedIn, Resampler as _};
use tempo_core::{Error, Result};
use tracing::debug;

const CHUNK_FRAMES: usize = 1024;

/// Converts interleaved samples from a track's rate to the device rate.
///
/// When the rates already match, samples pass through untouched.
pub struct Resampler {
    fft: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Deinterleaved input waiting for a full chunk.
    pending: Vec<Vec<f32>>,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidArgument("resampler needs at least one channel".into()));
        }

        let fft = if input_rate == output_rate {
            None
        } else {
            debug!("Resampler created: {input_rate}Hz -> {output_rate}Hz, {channels} channels");
            Some(
                FftFixedIn::new(
                    input_rate as usize,
                    output_rate as usize,
                    CHUNK_FRAMES,
                    2,
                    channels,
                )
                .map_err(|e| Error::AudioOutput(format!("Failed to create resampler: {e}")))?,
            )
        };

        Ok(Self {
            fft,
            input_rate,
            output_rate,
            channels,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
        })
    }

    pub const fn needs_resampling(&self) -> bool {
        self.fft.is_some()
    }

    pub const fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Feed interleaved input; returns whatever full chunks produced.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(fft) = self.fft.as_mut() else {
            return Ok(input.to_vec());
        };

        for frame in input.chunks_exact(self.channels) {
            for (channel, sample) in self.pending.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        let mut output = Vec::new();
        while self.pending[0].len() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..CHUNK_FRAMES).collect())
                .collect();
            let resampled = fft
                .process(&chunk, None)
                .map_err(|e| Error::AudioOutput(format!("Resample failed: {e}")))?;
            interleave_into(&resampled, usize::MAX, &mut output);
        }
        Ok(output)
    }

    /// Drain the partial chunk left at end of stream.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let remaining = self.pending[0].len();
        let mut output = Vec::new();
        if remaining == 0 {
            return Ok(output);
        }

        let Some(fft) = self.fft.as_mut() else {
            interleave_into(&self.pending, usize::MAX, &mut output);
            self.pending.iter_mut().for_each(Vec::clear);
            return Ok(output);
        };

        let chunk: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|channel| {
                let mut data = std::mem::take(channel);
                data.resize(CHUNK_FRAMES, 0.0);
                data
            })
            .collect();
        let resampled = fft
            .process(&chunk, None)
            .map_err(|e| Error::AudioOutput(format!("Resample failed: {e}")))?;

        let frames = (remaining as f64 * f64::from(self.output_rate) / f64::from(self.input_rate))
            .round() as usize;
        interleave_into(&resampled, frames, &mut output);
        Ok(output)
    }

    /// Forget buffered input, e.g. after a seek.
    pub fn reset(&mut self) {
        if let Some(fft) = self.fft.as_mut() {
            fft.reset();
        }
        self.pending.iter_mut().for_each(Vec::clear);
    }
}

fn interleave_into(channels: &[Vec<f32>], max_frames: usize, output: &mut Vec<f32>) {
    let frames = channels.first().map_or(0, Vec::len).min(max_frames);
    output.reserve(frames * channels.len());
    for frame in 0..frames {
        output.extend(channels.iter().map(|channel| channel[frame]));
    }
}

/// Convert interleaved samples between channel counts.
///
/// Mono is duplicated to every output channel, a mono output receives the
/// average of all inputs, and otherwise channels are copied by index with
/// missing ones repeating the input layout.
pub fn remix(input: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return input.to_vec();
    }

    let frames = input.len() / from;
    let mut output = Vec::with_capacity(frames * to);
    for frame in input.chunks_exact(from) {
        if to == 1 {
            output.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            output.extend((0..to).map(|channel| frame[channel % from]));
        }
    }
    output
}
