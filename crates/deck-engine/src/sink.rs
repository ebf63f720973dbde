//! Output device abstraction and the shared playback mix.
//!
//! The mix owns the at-most-one active track and sits behind a single
//! mutex: the playback lock. The CPAL render callback and the control loop
//! both go through this lock, so scopes stay short on both sides.
//!
//! The real-time callback:
//! - locks the mix once per buffer and pulls interleaved stereo from it
//!   (decode and resample both run inside that pull)
//! - applies basic channel mapping (stereo↔mono, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::device::{pick_buffer_size, pick_device, pick_output_config};
use crate::resample::StreamResampler;
use crate::source::DecodedStream;

/// A loaded track registered with the mix: the decoded stream, the rate
/// converter when the native rate differs from the device, and the pause
/// flag the callback honors.
pub struct ActiveTrack {
    stream: Box<dyn DecodedStream>,
    resampler: Option<StreamResampler>,
    paused: bool,
    done_tx: Sender<()>,
    done_sent: bool,
    native: Vec<f32>,
}

impl ActiveTrack {
    pub fn new(
        stream: Box<dyn DecodedStream>,
        resampler: Option<StreamResampler>,
        done_tx: Sender<()>,
    ) -> Self {
        Self {
            stream,
            resampler,
            paused: false,
            done_tx,
            done_sent: false,
            native: Vec::new(),
        }
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Read access to the underlying stream, for position and error polls.
    pub fn stream(&self) -> &dyn DecodedStream {
        &*self.stream
    }

    /// Fill `out` (interleaved stereo) from the track. Returns frames
    /// written; the first short fill signals completion exactly once.
    fn render(&mut self, out: &mut [f32]) -> usize {
        let frames_wanted = out.len() / 2;
        let channels = self.stream.channels();
        let native_len = frames_wanted * channels;
        if self.native.len() < native_len {
            self.native.resize(native_len, 0.0);
        }

        let native = &mut self.native[..native_len];
        let frames = match self.resampler.as_mut() {
            Some(rs) => rs.read(&mut *self.stream, native),
            None => self.stream.read(native),
        };

        map_to_stereo(&native[..frames * channels], channels, &mut out[..frames * 2]);

        if frames < frames_wanted && !self.done_sent {
            self.done_sent = true;
            // Unbounded channel: never blocks inside the render path.
            let _ = self.done_tx.send(());
        }
        frames
    }
}

/// Map interleaved native-channel frames to interleaved stereo.
///
/// Mono lands on both output channels; layouts wider than stereo keep
/// their first two channels.
fn map_to_stereo(native: &[f32], channels: usize, out: &mut [f32]) {
    match channels {
        0 => out.fill(0.0),
        1 => {
            for (i, s) in native.iter().enumerate() {
                out[i * 2] = *s;
                out[i * 2 + 1] = *s;
            }
        }
        2 => out.copy_from_slice(native),
        _ => {
            let frames = out.len() / 2;
            for f in 0..frames {
                out[f * 2] = native[f * channels];
                out[f * 2 + 1] = native[f * channels + 1];
            }
        }
    }
}

/// Playback state shared between the control loop and the render callback.
pub struct Mix {
    current: Option<ActiveTrack>,
}

impl Mix {
    /// Register a track. Callers detach any previous track first.
    pub fn set_current(&mut self, track: ActiveTrack) {
        self.current = Some(track);
    }

    pub fn current(&self) -> Option<&ActiveTrack> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut ActiveTrack> {
        self.current.as_mut()
    }

    /// Take the active track out of the mix.
    pub fn take_current(&mut self) -> Option<ActiveTrack> {
        self.current.take()
    }

    /// Render interleaved stereo into `out`, silence-filling whatever the
    /// track does not produce. A paused track produces silence without
    /// advancing its stream. Returns frames pulled from the track.
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        let Some(track) = self.current.as_mut() else {
            return 0;
        };
        if track.paused {
            return 0;
        }
        track.render(out)
    }
}

/// Handle to the mix, guarded by the playback lock.
#[derive(Clone)]
pub struct SharedMix(Arc<Mutex<Mix>>);

impl SharedMix {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Mix { current: None })))
    }

    /// Acquire the playback lock.
    ///
    /// Keep the scope short: the render callback takes this lock on every
    /// buffer it fills.
    pub fn lock(&self) -> MutexGuard<'_, Mix> {
        self.0.lock().unwrap()
    }

    /// Detach the active track from the mix.
    ///
    /// Takes the playback lock itself; callers must not already hold it.
    pub fn clear(&self) -> Option<ActiveTrack> {
        self.lock().take_current()
    }
}

impl Default for SharedMix {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide audio sink.
///
/// Implementations render the shared mix on their own real-time thread.
/// Initialization happens once, at the native rate of the first track ever
/// loaded, and the device is never re-initialized; later rate mismatches
/// are bridged by a resampler upstream.
pub trait OutputDevice: Send {
    /// The mix this device renders, shared with the control loop.
    fn mix(&self) -> &SharedMix;

    /// One-time initialization at (or as close as possible to) `sample_rate`.
    fn init(&mut self, sample_rate: u32) -> Result<()>;

    /// The rate chosen at initialization, `None` before [`Self::init`].
    fn sample_rate(&self) -> Option<u32>;
}

/// CPAL-backed [`OutputDevice`].
pub struct CpalOutput {
    selector: Option<String>,
    mix: SharedMix,
    rate: Option<u32>,
}

impl CpalOutput {
    /// Create an uninitialized device handle.
    ///
    /// `selector` picks an output by case-insensitive substring; `None`
    /// uses the host default.
    pub fn new(selector: Option<String>) -> Self {
        Self {
            selector,
            mix: SharedMix::new(),
            rate: None,
        }
    }
}

impl OutputDevice for CpalOutput {
    fn mix(&self) -> &SharedMix {
        &self.mix
    }

    fn init(&mut self, sample_rate: u32) -> Result<()> {
        if self.rate.is_some() {
            return Err(anyhow!("Output device already initialized"));
        }

        // The CPAL stream is not Send, so it is built and kept on a
        // dedicated thread that lives for the rest of the process.
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let mix = self.mix.clone();
        let selector = self.selector.clone();
        std::thread::spawn(move || run_output_stream(selector, sample_rate, mix, ready_tx));

        match ready_rx.recv() {
            Ok(Ok(rate)) => {
                self.rate = Some(rate);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow!("Output thread exited before reporting")),
        }
    }

    fn sample_rate(&self) -> Option<u32> {
        self.rate
    }
}

/// Body of the output-stream thread: build the stream, report the chosen
/// rate, then keep the stream alive. CPAL renders on its own thread; this
/// one only anchors the stream's lifetime.
fn run_output_stream(
    selector: Option<String>,
    sample_rate: u32,
    mix: SharedMix,
    ready_tx: Sender<Result<u32>>,
) {
    let _stream = match open_stream(selector.as_deref(), sample_rate, mix) {
        Ok((stream, rate)) => {
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.into()));
                return;
            }
            let _ = ready_tx.send(Ok(rate));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    loop {
        std::thread::park();
    }
}

fn open_stream(
    selector: Option<&str>,
    target_rate: u32,
    mix: SharedMix,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = pick_device(&host, selector)?;
    let config = pick_output_config(&device, target_rate)?;

    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buffer_size) = pick_buffer_size(&config) {
        stream_config.buffer_size = buffer_size;
    }

    tracing::info!(
        device = %device.description()?,
        rate_hz = stream_config.sample_rate,
        buffer_size = ?stream_config.buffer_size,
        "output device initialized"
    );

    let rate = stream_config.sample_rate;
    let stream = build_output_stream(&device, &stream_config, config.sample_format(), mix)?;
    Ok((stream, rate))
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mix: SharedMix,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, mix),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, mix),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, mix),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, mix),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mix: SharedMix,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let mut stereo: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels_out;
            if stereo.len() < frames * 2 {
                stereo.resize(frames * 2, 0.0);
            }
            mix.lock().render(&mut stereo[..frames * 2]);

            for frame in 0..frames {
                for ch in 0..channels_out {
                    let sample = stereo_to_channel(&stereo, frame, channels_out, ch);
                    data[frame * channels_out + ch] =
                        <T as cpal::Sample>::from_sample::<f32>(sample);
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Read one device-channel sample from a stereo frame.
///
/// A mono output takes the average of the pair; outputs wider than
/// stereo repeat left on even channels and right on odd ones.
fn stereo_to_channel(stereo: &[f32], frame: usize, dst_channels: usize, dst_ch: usize) -> f32 {
    let l = stereo[frame * 2];
    let r = stereo[frame * 2 + 1];
    match dst_channels {
        1 => 0.5 * (l + r),
        _ => {
            if dst_ch % 2 == 0 {
                l
            } else {
                r
            }
        }
    }
}
