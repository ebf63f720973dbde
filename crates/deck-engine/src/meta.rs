//! Best-effort tag reading.
//!
//! Runs as a separate pass over the already-open file, before the decoder
//! is set up; the caller rewinds the handle afterward. Failures here never
//! fail the track: callers log and continue untagged.

use std::fs::File;

use anyhow::{Context, Result};
use lofty::{Accessor, PictureType, Tag, TaggedFileExt, read_from};

/// Raw tag values pulled from a track, prior to artwork encoding.
#[derive(Clone, Debug, Default)]
pub struct TrackTags {
    pub artist: String,
    pub title: String,
    pub album: String,
    /// Cover image bytes, empty when the file carries none.
    pub cover: Vec<u8>,
}

/// Largest cover blob worth decoding.
const MAX_COVER_BYTES: usize = 5_000_000;

/// Read tags and cover art from an open file.
///
/// Leaves the file position wherever the tag parser stopped; rewind before
/// handing the handle to the decoder.
pub fn read_tags(file: &mut File) -> Result<TrackTags> {
    let tagged = read_from(file).context("read tags")?;

    let mut tags = TrackTags::default();
    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        return Ok(tags);
    };

    if let Some(v) = tag.artist() {
        tags.artist = v.into_owned();
    }
    if let Some(v) = tag.title() {
        tags.title = v.into_owned();
    }
    if let Some(v) = tag.album() {
        tags.album = v.into_owned();
    }
    tags.cover = select_cover(tag);

    Ok(tags)
}

/// Prefer the front cover, fall back to the first picture.
fn select_cover(tag: &Tag) -> Vec<u8> {
    let pictures = tag.pictures();
    let best = pictures
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first());

    match best {
        Some(p) if p.data().len() <= MAX_COVER_BYTES => p.data().to_vec(),
        Some(p) => {
            tracing::warn!(bytes = p.data().len(), "cover art too large, skipping");
            Vec::new()
        }
        None => Vec::new(),
    }
}
