//! Shared fixtures for unit tests: synthesized WAV files and a scripted
//! in-memory stream.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;

use crate::source::DecodedStream;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Unique path under the system temp dir.
pub(crate) fn temp_path(name: &str) -> PathBuf {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("deck-test-{}-{}-{}", std::process::id(), id, name))
}

/// Write a canonical PCM16 WAV file with a short sine sweep.
///
/// When `title` is given, a RIFF INFO chunk with INAM/IART/IPRD values is
/// placed before the data chunk ("Test Artist" / "Test Album" for the
/// latter two).
pub(crate) fn write_wav(path: &Path, rate: u32, channels: u16, frames: u32, title: Option<&str>) {
    let mut body = Vec::new();
    body.extend_from_slice(b"WAVE");

    body.extend_from_slice(b"fmt ");
    body.extend_from_slice(&16u32.to_le_bytes());
    body.extend_from_slice(&1u16.to_le_bytes()); // PCM
    body.extend_from_slice(&channels.to_le_bytes());
    body.extend_from_slice(&rate.to_le_bytes());
    let block_align = channels * 2;
    body.extend_from_slice(&(rate * u32::from(block_align)).to_le_bytes());
    body.extend_from_slice(&block_align.to_le_bytes());
    body.extend_from_slice(&16u16.to_le_bytes());

    if let Some(title) = title {
        body.extend_from_slice(&info_chunk(title));
    }

    let n_samples = frames * u32::from(channels);
    body.extend_from_slice(b"data");
    body.extend_from_slice(&(n_samples * 2).to_le_bytes());
    for i in 0..n_samples {
        let s = ((i as f32 * 0.05).sin() * 9_000.0) as i16;
        body.extend_from_slice(&s.to_le_bytes());
    }

    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    std::fs::write(path, out).unwrap();
}

/// RIFF LIST/INFO chunk carrying a title, artist and album.
fn info_chunk(title: &str) -> Vec<u8> {
    let mut items = Vec::new();
    for (id, value) in [
        ("INAM", title),
        ("IART", "Test Artist"),
        ("IPRD", "Test Album"),
    ] {
        let mut v = value.as_bytes().to_vec();
        v.push(0);
        let size = v.len() as u32;
        if v.len() % 2 == 1 {
            v.push(0); // word alignment, excluded from the declared size
        }
        items.extend_from_slice(id.as_bytes());
        items.extend_from_slice(&size.to_le_bytes());
        items.extend_from_slice(&v);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"LIST");
    out.extend_from_slice(&((items.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(b"INFO");
    out.extend_from_slice(&items);
    out
}

/// In-memory [`DecodedStream`] producing a fixed number of constant frames.
pub(crate) struct ScriptedStream {
    rate: u32,
    channels: usize,
    total: u64,
    pos: u64,
    err: Option<anyhow::Error>,
}

impl ScriptedStream {
    pub(crate) fn new(rate: u32, channels: usize, total: u64) -> Self {
        Self {
            rate,
            channels,
            total,
            pos: 0,
            err: None,
        }
    }

    /// A stream whose sticky error slot is already set.
    pub(crate) fn with_error(rate: u32, channels: usize, message: &str) -> Self {
        Self {
            rate,
            channels,
            total: 0,
            pos: 0,
            err: Some(anyhow::anyhow!("{message}")),
        }
    }
}

impl DecodedStream for ScriptedStream {
    fn read(&mut self, out: &mut [f32]) -> usize {
        if self.err.is_some() {
            return 0;
        }
        let wanted = (out.len() / self.channels) as u64;
        let frames = wanted.min(self.total - self.pos) as usize;
        out[..frames * self.channels].fill(0.25);
        self.pos += frames as u64;
        frames
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn length_frames(&self) -> Option<u64> {
        Some(self.total)
    }

    fn position_frames(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        self.pos = frame.min(self.total);
        Ok(())
    }

    fn error(&self) -> Option<&anyhow::Error> {
        self.err.as_ref()
    }
}
