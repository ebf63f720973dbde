//! Streaming resample stage.
//!
//! Uses Rubato to convert decoded interleaved `f32` audio from the track's
//! native rate to the output device rate. There is no resampler thread:
//! the render side pulls converted frames and the conversion happens inside
//! the pull, one fixed input chunk at a time.
//!
//! Rate is the only thing converted. Channel count passes through, and the
//! stream's reported position and length stay in the native domain.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::source::DecodedStream;

/// Input chunk size in frames for the steady-state resampling loop.
const CHUNK_FRAMES: usize = 1024;

/// Streaming rate converter between a [`DecodedStream`] and the mix.
pub struct StreamResampler {
    resampler: Box<dyn Resampler<f32> + Send>,
    channels: usize,
    input: Vec<f32>,
    output: Vec<f32>,
    ready: Vec<f32>,
    ready_pos: usize,
}

impl StreamResampler {
    /// Build a converter from `src_rate` to `dst_rate`.
    ///
    /// Quality/CPU trade-offs are governed by the internal sinc parameters;
    /// there is one fixed setting for all conversions.
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize) -> Result<Self> {
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler: Box<dyn Resampler<f32> + Send> = Box::new(
            Async::<f32>::new_sinc(f_ratio, 1.1, &params, CHUNK_FRAMES, channels, FixedAsync::Input)
                .context("resampler init")?,
        );

        let out_capacity = resampler.output_frames_max() * channels;
        Ok(Self {
            resampler,
            channels,
            input: vec![0.0; CHUNK_FRAMES * channels],
            output: vec![0.0; out_capacity],
            ready: Vec::new(),
            ready_pos: 0,
        })
    }

    /// Pull up to `out.len() / channels` converted frames from `stream`.
    ///
    /// Returns the number of frames written; fewer than requested means the
    /// stream is exhausted (or stopped on its sticky error).
    pub fn read(&mut self, stream: &mut dyn DecodedStream, out: &mut [f32]) -> usize {
        let mut written = 0usize;
        'fill: while written < out.len() {
            while self.ready_pos >= self.ready.len() {
                if !self.refill(stream) {
                    break 'fill;
                }
            }
            let take = (out.len() - written).min(self.ready.len() - self.ready_pos);
            out[written..written + take]
                .copy_from_slice(&self.ready[self.ready_pos..self.ready_pos + take]);
            self.ready_pos += take;
            written += take;
        }
        written / self.channels
    }

    /// Convert one input chunk. Returns false once the stream is exhausted.
    fn refill(&mut self, stream: &mut dyn DecodedStream) -> bool {
        let frames_in = stream.read(&mut self.input);
        if frames_in == 0 {
            return false;
        }

        let input_adapter = match InterleavedSlice::new(
            &self.input[..frames_in * self.channels],
            self.channels,
            frames_in,
        ) {
            Ok(a) => a,
            Err(e) => {
                tracing::error!("interleaved slice (input) error: {e:#}");
                return false;
            }
        };

        let out_capacity_frames = self.output.len() / self.channels;
        let mut output_adapter =
            match InterleavedSlice::new_mut(&mut self.output, self.channels, out_capacity_frames) {
                Ok(a) => a,
                Err(e) => {
                    tracing::error!("interleaved slice (output) error: {e:#}");
                    return false;
                }
            };

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            // A short read marks the end of the stream; tell the resampler
            // how much of the chunk is real.
            partial_len: (frames_in < CHUNK_FRAMES).then_some(frames_in),
        };

        let (_nbr_in, nbr_out) = match self.resampler.process_into_buffer(
            &input_adapter,
            &mut output_adapter,
            Some(&indexing),
        ) {
            Ok(x) => x,
            Err(e) => {
                tracing::error!("resampler process error: {e:#}");
                return false;
            }
        };

        self.ready.clear();
        self.ready
            .extend_from_slice(&self.output[..nbr_out * self.channels]);
        self.ready_pos = 0;
        true
    }
}
