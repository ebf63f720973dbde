//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for listing output devices, selecting one by
//! substring, and choosing a stream config close to a wanted sample rate.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device matching `needle` (case-insensitive), or
/// the host default.
///
/// Returns an error if no matching device exists or if the host reports no
/// output devices.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Choose the output config closest to `target_rate`.
///
/// Exact rate matches win; otherwise the nearest supported rate, with the
/// higher side preferred on a tie. Sample format breaks remaining ties.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let rate = target_rate.clamp(range.min_sample_rate(), range.max_sample_rate());
        let candidate = Candidate {
            rate,
            target: target_rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = match &best {
            None => true,
            Some((current, _)) => candidate.beats(current),
        };
        if replace {
            let cfg = range.with_sample_rate(rate);
            best = Some((candidate, cfg));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    rate: u32,
    target: u32,
    format_rank: u8,
}

impl Candidate {
    fn distance(&self) -> u32 {
        self.rate.abs_diff(self.target)
    }

    fn beats(&self, other: &Candidate) -> bool {
        if self.distance() != other.distance() {
            return self.distance() < other.distance();
        }
        if self.rate != other.rate {
            // Equal distance on opposite sides: take the higher rate.
            return self.rate > other.rate;
        }
        self.format_rank < other.format_rank
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Largest fixed buffer worth asking for.
const MAX_BUFFER_FRAMES: u32 = 16_384;

/// Prefer a fixed buffer size if the device advertises one.
///
/// Returns `None` when the device only supports the default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_buffer_frames(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn clamp_buffer_frames(min: u32, max: u32) -> u32 {
    if max > MAX_BUFFER_FRAMES {
        min.max(MAX_BUFFER_FRAMES)
    } else {
        max
    }
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
