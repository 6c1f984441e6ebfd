// Audio decoder using Symphonia
// Decodes audio files to interleaved f32 PCM

use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{debug, warn};

use crate::error::AudioError;

pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    total_frames: Option<u64>,
    /// Reused across packets, regrown when a packet is larger
    sample_buf: Option<SampleBuffer<f32>>,
}

impl AudioDecoder {
    /// Open an audio file and prepare for decoding
    pub fn open(path: &Path) -> Result<Self, AudioError> {
        let file = File::open(path)
            .map_err(|e| AudioError::Load(format!("{}: {}", path.display(), e)))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Create a hint using the file extension
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| AudioError::Load(format!("unrecognized format: {}", e)))?;

        let format = probed.format;

        // Find the first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioError::Load("no audio track found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AudioError::Load("unknown sample rate".to_string()))?;
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
        let total_frames = track.codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::Load(format!("unsupported codec: {}", e)))?;

        debug!(
            "Opened {:?}: {} Hz, {} channels, {:?} frames",
            path, sample_rate, channels, total_frames
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            total_frames,
            sample_buf: None,
        })
    }

    /// Open a file and determine its duration in seconds.
    /// Containers that don't declare a frame count are decoded once to count frames.
    pub fn open_with_duration(path: &Path) -> Result<(Self, f64), AudioError> {
        let decoder = Self::open(path)?;
        if let Some(duration) = decoder.declared_duration() {
            return Ok((decoder, duration));
        }

        debug!("No declared length for {:?}, counting frames", path);
        let mut counter = Self::open(path)?;
        let mut frames: u64 = 0;
        while let Some(samples) = counter.decode_next()? {
            frames += (samples.len() / counter.channels.max(1)) as u64;
        }
        let duration = frames as f64 / decoder.sample_rate as f64;
        Ok((decoder, duration))
    }

    /// Get the sample rate of the audio
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the number of channels
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Duration from the container header, if declared
    pub fn declared_duration(&self) -> Option<f64> {
        self.total_frames
            .map(|frames| frames as f64 / self.sample_rate as f64)
    }

    /// Decode next packet, returns interleaved f32 samples
    /// Returns None when end of stream is reached
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>, AudioError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(AudioError::Load(format!("failed to read packet: {}", e))),
            };

            // Skip packets from other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let frames = decoded.capacity();
                    let too_small = self
                        .sample_buf
                        .as_ref()
                        .map_or(true, |buf| buf.capacity() < frames * spec.channels.count());
                    if too_small {
                        self.sample_buf = Some(SampleBuffer::new(frames as u64, spec));
                    }
                    if let Some(buf) = self.sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        return Ok(Some(buf.samples().to_vec()));
                    }
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet, skip it
                    warn!("Decode error (skipping packet): {}", e);
                    continue;
                }
                Err(e) => return Err(AudioError::Load(format!("decode failed: {}", e))),
            }
        }
    }

    /// Seek to a position in seconds. Returns the position actually reached.
    pub fn seek(&mut self, position_secs: f64) -> Result<f64, AudioError> {
        let position_secs = position_secs.max(0.0);
        let time = Time::new(position_secs.trunc() as u64, position_secs.fract());

        let seeked_to = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| AudioError::Load(format!("seek failed: {}", e)))?;

        // Reset decoder state after seek
        self.decoder.reset();

        Ok(seeked_to.actual_ts as f64 / self.sample_rate as f64)
    }
}

/// Map interleaved frames from one channel count to another.
/// Downmix to mono averages; otherwise source channels repeat cyclically.
pub fn remap_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for ch in 0..to {
                out.push(frame[ch % from]);
            }
        }
    }
    out
}
