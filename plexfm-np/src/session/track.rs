//! Track identity and notification details

use serde::Serialize;
use std::fmt;

use super::SessionError;
use crate::models::PlexMetadata;

/// Treat missing and blank strings alike
fn present(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// Artist resolution: track artist first, studio as fallback
fn resolve_artist(metadata: &PlexMetadata) -> Option<&str> {
    present(metadata.grandparent_title.as_ref()).or_else(|| present(metadata.parent_studio.as_ref()))
}

/// Identity of "what is playing"
///
/// `artist_title`, or `_title` when no artist field is present. Two events
/// with equal keys refer to the same track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey(String);

impl TrackKey {
    /// Derive the key from webhook metadata; `None` without a title
    pub fn from_metadata(metadata: &PlexMetadata) -> Option<Self> {
        let title = present(metadata.title.as_ref())?;
        let artist = resolve_artist(metadata).unwrap_or("");
        Some(Self(format!("{}_{}", artist, title)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of everything sent in a now-playing notification
///
/// Captured once per play event and replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackDetails {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track_number: Option<u32>,
    pub duration_secs: Option<u64>,
}

impl TrackDetails {
    /// Capture details from webhook metadata
    ///
    /// Requires a title and at least one artist field.
    pub fn from_metadata(metadata: &PlexMetadata) -> Option<Self> {
        let title = present(metadata.title.as_ref())?;
        let artist = resolve_artist(metadata)?;

        Some(Self {
            artist: artist.to_string(),
            title: title.to_string(),
            album: present(metadata.parent_title.as_ref()).map(str::to_string),
            album_artist: Some(artist.to_string()),
            track_number: metadata.index,
            duration_secs: metadata.duration.map(|ms| ms / 1000).filter(|secs| *secs > 0),
        })
    }

    /// Check the fields the notifier cannot do without
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.artist.trim().is_empty() {
            return Err(SessionError::IncompleteDetails("artist"));
        }
        if self.title.trim().is_empty() {
            return Err(SessionError::IncompleteDetails("title"));
        }
        Ok(())
    }
}
