//! Capability detection on raw SDP text.
//!
//! Detection is a plain substring search on the session description, which
//! keeps it interoperable with peers that produce the exact same line
//! layout. It depends on every media section starting on its own line.

use serde::Serialize;
use std::fmt;

const VIDEO_MARKER: &str = "\nm=video ";
const AUDIO_MARKER: &str = "\nm=audio ";
const DATACHANNEL_MARKER: &str = "webrtc-datachannel";

/// A negotiable capability of a session.
///
/// Variants are declared in alphabetical order so that the derived `Ord`
/// sorts them the same way their names sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Media {
    Audio,
    Datachannel,
    Video,
}

impl Media {
    pub fn as_str(&self) -> &'static str {
        match self {
            Media::Audio => "audio",
            Media::Datachannel => "datachannel",
            Media::Video => "video",
        }
    }
}

impl fmt::Display for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities announced by an SDP blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SdpConstraints {
    pub video: bool,
    pub audio: bool,
    pub datachannel: bool,
}

/// Read-only view over a session description.
#[derive(Debug, Clone, Copy)]
pub struct Sdp<'a> {
    text: &'a str,
}

impl<'a> Sdp<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text }
    }

    pub fn as_str(&self) -> &'a str {
        self.text
    }

    pub fn constraints(&self) -> SdpConstraints {
        SdpConstraints {
            video: self.text.contains(VIDEO_MARKER),
            audio: self.text.contains(AUDIO_MARKER),
            datachannel: self.text.contains(DATACHANNEL_MARKER),
        }
    }

    /// Alphabetically sorted list of the capabilities present.
    pub fn enabled(&self) -> Vec<Media> {
        let c = self.constraints();
        [
            (Media::Audio, c.audio),
            (Media::Datachannel, c.datachannel),
            (Media::Video, c.video),
        ]
        .into_iter()
        .filter_map(|(media, present)| present.then_some(media))
        .collect()
    }

    /// True when the enabled set is exactly `medias`, order ignored.
    pub fn only(&self, medias: &[Media]) -> bool {
        let mut wanted = medias.to_vec();
        wanted.sort();
        self.enabled() == wanted
    }
}
