//! Audio decoding using symphonia.

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    units::Time,
};
use tempo_core::{Error, Result};
use tracing::{debug, warn};

/// Decoder for one in-memory track.
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    samples: Option<SampleBuffer<f32>>,
    /// First timestamp to emit after a seek; earlier frames are dropped.
    required_ts: Option<u64>,
}

impl AudioDecoder {
    /// Probe `data` and open its first audio track.
    pub fn from_bytes(data: Bytes, extension: Option<&str>) -> Result<Self> {
        let mss = MediaSourceStream::new(
            Box::new(Cursor::new(data)),
            MediaSourceStreamOptions::default(),
        );

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::UnsupportedFormat(format!("Failed to probe format: {e}")))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::AudioDecode("No audio tracks found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::AudioDecode("Track has no sample rate".to_string()))?;
        let channels = track.codec_params.channels.map_or(2, |c| c.count() as u16);

        debug!("Audio track: id={track_id}, sample_rate={sample_rate}, channels={channels}");

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::UnsupportedFormat(format!("Failed to create decoder: {e}")))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            samples: None,
            required_ts: None,
        })
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Decode the next packet into interleaved samples; `None` at end of stream.
    pub fn decode_next(&mut self) -> Result<Option<&[f32]>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Failed to read packet: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let skip = self
                .required_ts
                .map_or(0, |required| required.saturating_sub(packet.ts()));

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if skip >= decoded.frames() as u64 {
                        // Entirely before the seek target
                        continue;
                    }
                    self.required_ts = None;

                    let spec = *decoded.spec();
                    let needed = decoded.capacity() * spec.channels.count();
                    let fits = self
                        .samples
                        .as_ref()
                        .is_some_and(|buf| buf.capacity() >= needed);
                    if !fits {
                        self.samples = None;
                    }
                    let frames = decoded.capacity() as u64;
                    let buf = self
                        .samples
                        .get_or_insert_with(|| SampleBuffer::new(frames, spec));
                    buf.copy_interleaved_ref(decoded);
                    let offset = skip as usize * spec.channels.count();
                    return Ok(Some(&buf.samples()[offset..]));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error (skipping packet): {e}");
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Decode failed: {e}")));
                }
            }
        }
    }

    /// Seek to `position` from the start of the track.
    pub fn seek(&mut self, position: Duration) -> Result<()> {
        let time = Time::new(position.as_secs(), f64::from(position.subsec_nanos()) / 1e9);

        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::AudioDecode(format!("Seek failed: {e}")))?;

        debug!(
            "Seeked to ts {} (requested {})",
            seeked.actual_ts, seeked.required_ts
        );
        self.required_ts = Some(seeked.required_ts);
        self.decoder.reset();
        Ok(())
    }

    /// Total duration, if the container declares it.
    pub fn duration(&self) -> Option<Duration> {
        let track = self
            .format
            .tracks()
            .iter()
            .find(|t| t.id == self.track_id)?;

        let time_base = track.codec_params.time_base?;
        let n_frames = track.codec_params.n_frames?;
        let time = time_base.calc_time(n_frames);

        Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
    }
}
