//! Plex webhook payload schema
//!
//! Plex posts one JSON document per playback event inside the `payload`
//! form field. Only the fields needed to identify a track are modelled;
//! everything else in the document is ignored.

use serde::{Deserialize, Serialize};

/// Metadata for the media item the event refers to
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlexMetadata {
    /// Album title
    pub parent_title: Option<String>,
    /// Track artist
    pub grandparent_title: Option<String>,
    /// Fallback artist when `grandparent_title` is missing (compilations)
    pub parent_studio: Option<String>,
    /// Track title
    pub title: Option<String>,
    /// Disc number
    pub parent_index: Option<u32>,
    /// Track number
    pub index: Option<u32>,
    /// Media type, e.g. "track"
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    /// Duration in milliseconds
    pub duration: Option<u64>,
}

/// Plex account that triggered the event
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PlexAccount {
    /// Username
    pub title: Option<String>,
}

/// Plex player that emitted the event
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PlexPlayer {
    pub uuid: Option<String>,
    pub name: Option<String>,
}

/// Parsed Plex webhook document
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WebhookPayload {
    /// Event name, e.g. "media.play"
    pub event: String,
    #[serde(rename = "Metadata")]
    pub metadata: Option<PlexMetadata>,
    #[serde(rename = "Account")]
    pub account: Option<PlexAccount>,
    #[serde(rename = "Player")]
    pub player: Option<PlexPlayer>,
}

/// Playback transitions the session reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Play,
    Resume,
    Pause,
    Stop,
}

impl EventKind {
    /// Map a Plex event name to a playback transition
    ///
    /// Returns `None` for events the session does not handle
    /// (`media.scrobble`, `media.rate`, `library.new`, ...).
    pub fn from_plex_event(event: &str) -> Option<Self> {
        match event {
            "media.play" => Some(Self::Play),
            "media.resume" => Some(Self::Resume),
            "media.pause" => Some(Self::Pause),
            "media.stop" => Some(Self::Stop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "media.play",
            Self::Resume => "media.resume",
            Self::Pause => "media.pause",
            Self::Stop => "media.stop",
        }
    }
}
