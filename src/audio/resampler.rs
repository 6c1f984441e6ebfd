// Streaming sample-rate conversion using rubato
// Used when the output device runs at a different rate than the file

use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

use crate::error::AudioError;

/// Frames handed to rubato per call
const CHUNK_FRAMES: usize = 1024;

/// Resampler that accepts arbitrarily sized interleaved packets.
/// Input is buffered until a full chunk is available.
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    channels: usize,
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self, AudioError> {
        debug!(
            "Resampling {}Hz -> {}Hz ({} channels)",
            input_rate, output_rate, channels
        );
        let inner = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| AudioError::Output(format!("failed to create resampler: {}", e)))?;

        Ok(Self {
            inner,
            channels,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
        })
    }

    /// Push interleaved input, returns whatever interleaved output is ready
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, AudioError> {
        for frame in interleaved.chunks_exact(self.channels) {
            for (ch, sample) in frame.iter().enumerate() {
                self.pending[ch].push(*sample);
            }
        }

        let mut output = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|plane| plane.drain(..needed).collect())
                .collect();
            let planar = self
                .inner
                .process(&chunk, None)
                .map_err(|e| AudioError::Output(format!("resampling failed: {}", e)))?;
            interleave_into(&planar, &mut output);
        }
        Ok(output)
    }

    /// Drain buffered input at end of stream
    pub fn flush(&mut self) -> Result<Vec<f32>, AudioError> {
        let mut output = Vec::new();
        if self.pending[0].is_empty() {
            return Ok(output);
        }
        let planar = self
            .inner
            .process_partial(Some(self.pending.as_slice()), None)
            .map_err(|e| AudioError::Output(format!("resampling failed: {}", e)))?;
        for plane in &mut self.pending {
            plane.clear();
        }
        interleave_into(&planar, &mut output);
        Ok(output)
    }

    /// Drop buffered input and filter state (after a seek)
    pub fn reset(&mut self) {
        self.inner.reset();
        for plane in &mut self.pending {
            plane.clear();
        }
    }
}

fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let Some(first) = planar.first() else {
        return;
    };
    out.reserve(first.len() * planar.len());
    for frame in 0..first.len() {
        for plane in planar {
            out.push(plane[frame]);
        }
    }
}
