//! Media items and triggers as they are stored and served.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of media a record points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Audio,
    Video,
    Subtitle,
}

impl MediaType {
    /// Types that can be uploaded and synced from disk.
    pub const UPLOADABLE: [MediaType; 3] = [MediaType::Image, MediaType::Audio, MediaType::Video];

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Subtitle => "subtitle",
        }
    }

    /// Upload subdirectory, e.g. `images`.
    #[must_use]
    pub fn dir_name(self) -> String {
        format!("{}s", self.as_str())
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown media type name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown media type: {0}")]
pub struct UnknownMediaType(pub String);

impl FromStr for MediaType {
    type Err = UnknownMediaType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "subtitle" => Ok(Self::Subtitle),
            other => Err(UnknownMediaType(other.to_owned())),
        }
    }
}

/// A stored media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub url: String,
    #[serde(default)]
    pub name: String,
    /// Size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Screen position in overlay coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Settings that depend on the trigger's media type.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerKind {
    Image {
        size: f64,
        position: Position,
        random_position: bool,
    },
    Video {
        size: f64,
        volume: f64,
        position: Position,
        random_position: bool,
    },
    Audio {
        volume: f64,
    },
}

impl TriggerKind {
    /// The media type this variant belongs to.
    #[must_use]
    pub fn media_type(&self) -> MediaType {
        match self {
            Self::Image { .. } => MediaType::Image,
            Self::Video { .. } => MediaType::Video,
            Self::Audio { .. } => MediaType::Audio,
        }
    }
}

/// Something an overlay plays when fired: a media item plus playback settings.
///
/// On the wire the variant fields sit flat beside the base fields and are
/// selected by `item.type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TriggerRecord", into = "TriggerRecord")]
pub struct Trigger {
    pub id: String,
    pub name: String,
    pub duration: f64,
    pub max_duration: bool,
    pub active: bool,
    pub item: MediaItem,
    pub kind: TriggerKind,
}

/// A trigger whose fields do not fit its media type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{media_type} trigger: {problem}")]
pub struct InvalidTrigger {
    pub media_type: MediaType,
    pub problem: &'static str,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerRecord {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    max_duration: bool,
    #[serde(default)]
    active: bool,
    item: MediaItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    random_position: Option<bool>,
}

impl TryFrom<TriggerRecord> for Trigger {
    type Error = InvalidTrigger;

    fn try_from(record: TriggerRecord) -> Result<Self, Self::Error> {
        let media_type = record.item.media_type;
        let invalid = |problem| InvalidTrigger { media_type, problem };

        let kind = match media_type {
            MediaType::Image => TriggerKind::Image {
                size: record.size.ok_or_else(|| invalid("missing size"))?,
                position: record.position.unwrap_or_default(),
                random_position: record.random_position.unwrap_or(false),
            },
            MediaType::Video => TriggerKind::Video {
                size: record.size.ok_or_else(|| invalid("missing size"))?,
                volume: record.volume.ok_or_else(|| invalid("missing volume"))?,
                position: record.position.unwrap_or_default(),
                random_position: record.random_position.unwrap_or(false),
            },
            MediaType::Audio => TriggerKind::Audio {
                volume: record.volume.ok_or_else(|| invalid("missing volume"))?,
            },
            MediaType::Subtitle => return Err(invalid("unsupported media type")),
        };

        Ok(Self {
            id: record.id,
            name: record.name,
            duration: record.duration,
            max_duration: record.max_duration,
            active: record.active,
            item: record.item,
            kind,
        })
    }
}

impl From<Trigger> for TriggerRecord {
    fn from(trigger: Trigger) -> Self {
        let (size, volume, position, random_position) = match trigger.kind {
            TriggerKind::Image {
                size,
                position,
                random_position,
            } => (Some(size), None, Some(position), Some(random_position)),
            TriggerKind::Video {
                size,
                volume,
                position,
                random_position,
            } => (Some(size), Some(volume), Some(position), Some(random_position)),
            TriggerKind::Audio { volume } => (None, Some(volume), None, None),
        };

        Self {
            id: trigger.id,
            name: trigger.name,
            duration: trigger.duration,
            max_duration: trigger.max_duration,
            active: trigger.active,
            item: trigger.item,
            size,
            volume,
            position,
            random_position,
        }
    }
}
