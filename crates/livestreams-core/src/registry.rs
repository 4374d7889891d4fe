//! Channel registry: channel order, current selection, active livestream
//! and play state.
//!
//! States are `NoSelection` and `Selected(channel, livestream, playing)`.
//! `select` and `deselect` move between them; preferring another
//! livestream for the selected channel and player rate events change the
//! livestream or the playing flag in place.
//!
//! The registry is plain synchronous state meant to have exactly one owner
//! (the daemon core loop).  Consumers read `snapshot()`, which captures
//! channel, livestream and playing flag together.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::catalog::Catalog;
use crate::channel::{self, PreferredVersions, VersionChoice};
use crate::config::DeviceIdiom;
use crate::error::RegistryError;
use crate::model::{Channel, ChannelId, Livestream};
use crate::store::{KeyValueStore, CHANNELS_KEY, PREFERRED_VERSIONS_KEY};

/// Channel order used until the user reorders anything.
pub fn default_channel_ids() -> Vec<ChannelId> {
    (1..=20).map(ChannelId).collect()
}

/// Tags a playback resource.  Rate events from a resource that has since
/// been replaced carry an older generation and are ignored.
pub type Generation = u64;

/// The playback resource the registry drives.
pub trait Player: Send {
    /// Tear down the current resource and, for `Some(url)`, bind a new one
    /// to `url`.  `None` leaves an empty player.  Rate changes of the new
    /// resource must be reported with `generation`.
    fn replace(&mut self, url: Option<&Url>, generation: Generation);
    fn play(&mut self);
    fn pause(&mut self);
    /// Whether a resource with a media item is loaded.
    fn has_item(&self) -> bool;
}

/// System "now playing" metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    /// Channel name.
    pub title: String,
    /// Livestream title.
    pub artist: Option<String>,
    /// Channel cover.
    pub artwork: Option<String>,
    pub is_live: bool,
}

/// Availability of the transport controls.  Previous/next track are never
/// offered for a livestream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteCommands {
    pub play_enabled: bool,
    pub pause_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteCommandStatus {
    Success,
    NoActionableItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum Selection {
    #[default]
    NoSelection,
    Selected {
        channel: ChannelId,
        livestream: Livestream,
        playing: bool,
    },
}

/// Consistent view of the registry at one revision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub rev: u64,
    pub channels: Vec<ChannelId>,
    pub selection: Selection,
    pub now_playing: Option<NowPlaying>,
    pub remote: RemoteCommands,
}

pub struct ChannelRegistry {
    catalog: Arc<Catalog>,
    preferences: KeyValueStore,
    player: Box<dyn Player>,
    current: Option<Channel>,
    livestream: Option<Livestream>,
    /// Play intent; survives livestream switches and deselection.
    is_playing: bool,
    generation: Generation,
    now_playing: Option<NowPlaying>,
    remote: RemoteCommands,
    rev: u64,
}

impl ChannelRegistry {
    pub fn new(
        catalog: Arc<Catalog>,
        preferences: KeyValueStore,
        player: Box<dyn Player>,
        idiom: DeviceIdiom,
    ) -> Self {
        let mut registry = Self {
            catalog,
            preferences,
            player,
            current: None,
            livestream: None,
            is_playing: false,
            generation: 0,
            now_playing: None,
            remote: RemoteCommands::default(),
            rev: 1,
        };

        if idiom.has_persistent_sidebar() {
            if let Some(first) = registry.all().first().copied() {
                if let Err(e) = registry.select(first) {
                    warn!("registry: initial selection of {} failed: {}", first.id, e);
                }
            }
        }

        registry
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    // ── channel order ─────────────────────────────────────────────────────────

    pub fn all(&self) -> Vec<Channel> {
        self.channel_ids().into_iter().map(|id| Channel { id }).collect()
    }

    fn channel_ids(&self) -> Vec<ChannelId> {
        self.preferences
            .get(CHANNELS_KEY)
            .unwrap_or_else(default_channel_ids)
    }

    /// Move the channel at `from` to `to`, shifting the ones in between.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<(), RegistryError> {
        let mut ids = self.channel_ids();
        let len = ids.len();
        for index in [from, to] {
            if index >= len {
                return Err(RegistryError::IndexOutOfRange { index, len });
            }
        }
        let id = ids.remove(from);
        ids.insert(to, id);
        self.preferences.set(CHANNELS_KEY, &ids)?;
        debug!("registry: moved channel {} from {} to {}", id, from, to);
        self.rev += 1;
        Ok(())
    }

    // ── selection ─────────────────────────────────────────────────────────────

    pub fn current(&self) -> Option<Channel> {
        self.current
    }

    pub fn livestream(&self) -> Option<&Livestream> {
        self.livestream.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Make `channel` current and switch to its preferred livestream.  A
    /// channel without livestreams is refused and nothing changes.
    pub fn select(&mut self, channel: Channel) -> Result<(), RegistryError> {
        let livestream = self.preferred_livestream(&channel)?;
        info!(
            "registry: selected channel {} ({})",
            channel.id,
            self.catalog.name(channel.id)
        );
        self.current = Some(channel);
        self.set_livestream(Some(livestream));
        self.rev += 1;
        Ok(())
    }

    pub fn deselect(&mut self) {
        info!("registry: cleared selection");
        self.current = None;
        self.set_livestream(None);
        self.now_playing = None;
        self.rev += 1;
    }

    // ── livestream preference ─────────────────────────────────────────────────

    pub fn preferred_versions(&self) -> PreferredVersions {
        self.preferences
            .get(PREFERRED_VERSIONS_KEY)
            .unwrap_or_default()
    }

    pub fn preferred_livestream(&self, channel: &Channel) -> Result<Livestream, RegistryError> {
        channel::preferred_livestream(channel, &self.catalog, &self.preferred_versions())
    }

    pub fn version_choices(&self, channel: &Channel) -> Vec<VersionChoice> {
        channel::version_choices(channel, &self.catalog, &self.preferred_versions())
    }

    /// Remember `livestream` as the version of `channel`.  When `channel` is
    /// the current one the registry switches to `livestream` right away.
    pub fn set_preferred_livestream(
        &mut self,
        livestream: Livestream,
        channel: Channel,
    ) -> Result<(), RegistryError> {
        let mut versions = self.preferred_versions();
        versions.set(channel.id, livestream.title.as_deref());
        self.preferences.set(PREFERRED_VERSIONS_KEY, &versions)?;
        debug!(
            "registry: channel {} now prefers {:?}",
            channel.id,
            livestream.label()
        );

        if self.current == Some(channel) {
            self.set_livestream(Some(livestream));
        }
        self.rev += 1;
        Ok(())
    }

    fn set_livestream(&mut self, livestream: Option<Livestream>) {
        match livestream {
            Some(livestream) => {
                if self.livestream.as_ref() == Some(&livestream) {
                    return;
                }
                self.generation += 1;
                debug!(
                    "registry: binding player to {} (generation {})",
                    livestream.url, self.generation
                );
                self.player.replace(Some(&livestream.url), self.generation);
                self.livestream = Some(livestream);
                if self.is_playing {
                    self.player.play();
                }
                self.refresh_now_playing();
            }
            None => {
                self.generation += 1;
                self.player.replace(None, self.generation);
                self.livestream = None;
            }
        }
    }

    // ── playback ──────────────────────────────────────────────────────────────

    /// Apply a rate change reported by the player.  Returns `false` for
    /// events of a replaced resource.
    pub fn on_rate_changed(&mut self, generation: Generation, rate: f32) -> bool {
        if generation != self.generation {
            debug!(
                "registry: ignoring rate {} from stale generation {} (current {})",
                rate, generation, self.generation
            );
            return false;
        }
        if self.is_playing && rate == 0.0 {
            self.set_playing(false);
        } else if !self.is_playing && rate > 0.0 {
            self.set_playing(true);
        }
        self.refresh_now_playing();
        self.rev += 1;
        true
    }

    fn set_playing(&mut self, playing: bool) {
        self.is_playing = playing;
        self.remote = RemoteCommands {
            play_enabled: !playing,
            pause_enabled: playing,
        };
    }

    pub fn remote_play(&mut self) -> RemoteCommandStatus {
        if !self.player.has_item() {
            return RemoteCommandStatus::NoActionableItem;
        }
        self.player.play();
        RemoteCommandStatus::Success
    }

    pub fn remote_pause(&mut self) -> RemoteCommandStatus {
        if !self.player.has_item() {
            return RemoteCommandStatus::NoActionableItem;
        }
        self.player.pause();
        RemoteCommandStatus::Success
    }

    fn refresh_now_playing(&mut self) {
        if let (Some(channel), Some(livestream)) = (self.current, &self.livestream) {
            self.now_playing = Some(NowPlaying {
                title: self.catalog.name(channel.id).to_string(),
                artist: livestream.title.clone(),
                artwork: self.catalog.cover(channel.id).map(str::to_string),
                is_live: true,
            });
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let selection = match (self.current, &self.livestream) {
            (Some(channel), Some(livestream)) => Selection::Selected {
                channel: channel.id,
                livestream: livestream.clone(),
                playing: self.is_playing,
            },
            _ => Selection::NoSelection,
        };
        RegistrySnapshot {
            rev: self.rev,
            channels: self.channel_ids(),
            selection,
            now_playing: self.now_playing.clone(),
            remote: self.remote,
        }
    }
}
