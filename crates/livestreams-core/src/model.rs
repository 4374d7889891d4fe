use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Stable channel identifier.  Keys the bundled catalog as well as the
/// preference and schedule maps, where it is rendered as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Key used for this id in persisted string-keyed maps.
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ChannelId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// A channel.  Only the id is stored; name, artwork, colours and
/// livestreams are looked up in the catalog on access, so two channels are
/// equal exactly when their ids are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
}

impl Channel {
    pub fn new(id: u32) -> Self {
        Self { id: ChannelId(id) }
    }
}

/// One playable version of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Livestream {
    #[serde(default)]
    pub title: Option<String>,
    pub url: Url,
}

impl Livestream {
    /// Title for pickers and now-playing; `"Unknown"` when untitled.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or("Unknown")
    }
}

/// A scheduled show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Start time.
    pub date: DateTime<Utc>,
    pub title: String,
}

impl ScheduleEntry {
    pub fn new(date: DateTime<Utc>, title: impl Into<String>) -> Self {
        Self {
            date,
            title: title.into(),
        }
    }

    /// Local start time as `H:mm`.
    pub fn time_label(&self) -> String {
        self.time_label_in(&Local)
    }

    pub fn time_label_in<Tz: TimeZone>(&self, tz: &Tz) -> String
    where
        Tz::Offset: fmt::Display,
    {
        self.date.with_timezone(tz).format("%-H:%M").to_string()
    }
}
