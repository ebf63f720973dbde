//! Streaming audio decode stage.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode packets into interleaved `f32` samples
//! - hand frames out on demand to whoever renders the mix
//!
//! Unlike a push pipeline there is no decode thread: the render side pulls
//! and decoding happens inside the pull.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

/// Formats the player accepts, keyed by file extension.
///
/// Anything else is rejected before the file is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackFormat {
    Mp3,
    Flac,
    Vorbis,
    Wav,
}

impl TrackFormat {
    /// Map a path to its decoder by extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp3" => Some(Self::Mp3),
            "flac" => Some(Self::Flac),
            "ogg" => Some(Self::Vorbis),
            "wav" => Some(Self::Wav),
            _ => None,
        }
    }

    /// Extension handed to the probe as a format hint.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
            Self::Vorbis => "ogg",
            Self::Wav => "wav",
        }
    }
}

/// Pull interface over an open, decoding audio stream.
///
/// Implementations own the underlying byte source; dropping the stream
/// releases it. The error slot is sticky: once set it stays set and the
/// stream hands out no further frames.
pub trait DecodedStream: Send {
    /// Decode up to `out.len() / channels()` frames of interleaved `f32`
    /// into `out`. Returns the number of frames written; fewer than
    /// requested means end of stream or a sticky error.
    fn read(&mut self, out: &mut [f32]) -> usize;

    /// Native sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Native channel count.
    fn channels(&self) -> usize;

    /// Total length in frames, when the container reports it.
    fn length_frames(&self) -> Option<u64>;

    /// Frames handed out so far, in the native domain.
    fn position_frames(&self) -> u64;

    /// Seek to an absolute frame.
    fn seek(&mut self, frame: u64) -> Result<()>;

    /// Sticky decode error, set by a failed mid-stream read.
    fn error(&self) -> Option<&anyhow::Error>;
}

/// Symphonia-backed [`DecodedStream`] over a local file.
pub struct TrackStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    rate: u32,
    channels: usize,
    n_frames: Option<u64>,
    pos_frames: u64,
    pending: Vec<f32>,
    pending_pos: usize,
    finished: bool,
    err: Option<anyhow::Error>,
}

impl TrackStream {
    /// Probe an already-open file and set up the matching decoder.
    ///
    /// The file must be positioned at the start; tag reading happens in a
    /// separate pass before this (see [`crate::meta`]).
    pub fn open(file: File, format: TrackFormat) -> Result<Self> {
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(format.extension());

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .context("probe container")?;

        let reader = probed.format;
        let track = reader
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let channels = codec_params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();

        let rate = codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .context("instantiate decoder")?;

        Ok(Self {
            format: reader,
            decoder,
            track_id,
            rate,
            channels,
            n_frames: codec_params.n_frames,
            pos_frames: 0,
            pending: Vec::new(),
            pending_pos: 0,
            finished: false,
            err: None,
        })
    }

    /// Decode packets until at least one frame is pending, EOF, or error.
    fn refill(&mut self) {
        while self.pending_pos >= self.pending.len() && !self.finished && self.err.is_none() {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof
                        && e.to_string() == "end of stream" =>
                {
                    self.finished = true;
                    return;
                }
                Err(e) => {
                    self.finished = true;
                    self.err = Some(anyhow::Error::new(e).context("read packet"));
                    return;
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let mut sample_buf =
                        SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
                    sample_buf.copy_interleaved_ref(decoded);
                    self.pending.clear();
                    self.pending.extend_from_slice(sample_buf.samples());
                    self.pending_pos = 0;
                }
                // A corrupt packet is recoverable; skip it.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => {
                    self.finished = true;
                    self.err = Some(anyhow::Error::new(e).context("decode packet"));
                    return;
                }
            }
        }
    }
}

impl DecodedStream for TrackStream {
    fn read(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0usize;
        while written < out.len() {
            if self.pending_pos >= self.pending.len() {
                self.refill();
                if self.pending_pos >= self.pending.len() {
                    break;
                }
            }
            let take = (out.len() - written).min(self.pending.len() - self.pending_pos);
            out[written..written + take]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + take]);
            self.pending_pos += take;
            written += take;
        }
        let frames = written / self.channels;
        self.pos_frames += frames as u64;
        frames
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn length_frames(&self) -> Option<u64> {
        self.n_frames
    }

    fn position_frames(&self) -> u64 {
        self.pos_frames
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        let rate = u64::from(self.rate);
        let time = Time::new(frame / rate, (frame % rate) as f64 / rate as f64);
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .context("seek")?;
        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.finished = false;
        // actual_ts is in track timebase units, which is frames for PCM-style audio.
        self.pos_frames = seeked.actual_ts;
        Ok(())
    }

    fn error(&self) -> Option<&anyhow::Error> {
        self.err.as_ref()
    }
}
