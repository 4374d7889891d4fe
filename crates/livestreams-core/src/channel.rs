//! Lookups derived from a channel id: schedule view, preferred livestream
//! and the version chooser.  All of them are pure functions over the catalog,
//! the schedule snapshot and the stored preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::error::RegistryError;
use crate::model::{Channel, ChannelId, Livestream};
use crate::schedule::{current_and_upcoming, Program, ScheduleDocument};

/// Preferred livestream title per channel id string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreferredVersions(pub BTreeMap<String, String>);

impl PreferredVersions {
    pub fn get(&self, id: ChannelId) -> Option<&str> {
        self.0.get(&id.key()).map(String::as_str)
    }

    /// Record `title` for `id`; `None` forgets the preference.
    pub fn set(&mut self, id: ChannelId, title: Option<&str>) {
        match title {
            Some(title) => {
                self.0.insert(id.key(), title.to_string());
            }
            None => {
                self.0.remove(&id.key());
            }
        }
    }
}

pub fn program(channel: &Channel, schedule: &ScheduleDocument, now: DateTime<Utc>) -> Program {
    current_and_upcoming(schedule.entries(channel.id), now)
}

/// The livestream whose title matches the stored preference, else the
/// channel's first livestream.
pub fn preferred_livestream(
    channel: &Channel,
    catalog: &Catalog,
    preferences: &PreferredVersions,
) -> Result<Livestream, RegistryError> {
    let livestreams = catalog.livestreams(channel.id);
    let preferred = preferences.get(channel.id).and_then(|title| {
        livestreams
            .iter()
            .find(|l| l.title.as_deref() == Some(title))
    });
    preferred
        .or_else(|| livestreams.first())
        .cloned()
        .ok_or(RegistryError::NoLivestreamAvailable(channel.id))
}

/// One entry of the "Choose Version" picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChoice {
    pub livestream: Livestream,
    pub label: String,
    pub preferred: bool,
}

/// Picker entries; empty unless the channel offers more than one version.
pub fn version_choices(
    channel: &Channel,
    catalog: &Catalog,
    preferences: &PreferredVersions,
) -> Vec<VersionChoice> {
    let livestreams = catalog.livestreams(channel.id);
    if livestreams.len() < 2 {
        return Vec::new();
    }
    let preferred = preferred_livestream(channel, catalog, preferences).ok();
    livestreams
        .iter()
        .map(|l| VersionChoice {
            livestream: l.clone(),
            label: l.label().to_string(),
            preferred: preferred.as_ref() == Some(l),
        })
        .collect()
}
