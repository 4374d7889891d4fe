use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::warn;

use crate::model::{ChannelId, Livestream};

/// Channel catalog compiled into the binary.
const BUNDLED_CATALOG: &str = include_str!("../assets/channels.toml");

/// Host of the stand-in stream URLs shipped in the bundled catalog.
pub const PLACEHOLDER_STREAM_HOST: &str = "streams.example.net";

/// Display name used for ids without catalog data.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Theme colour, written as `#RRGGBB` in catalog files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let hex = value
            .strip_prefix('#')
            .ok_or_else(|| format!("colour {:?} must start with '#'", value))?;
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("colour {:?} must be #RRGGBB", value));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|e| format!("colour {:?}: {}", value, e))
        };
        Ok(Self {
            red: channel(0..2)?,
            green: channel(2..4)?,
            blue: channel(4..6)?,
        })
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

/// Branding and livestreams of one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelAssets {
    pub name: Option<String>,
    pub logo: Option<String>,
    pub cover: Option<String>,
    pub primary_color: Option<Color>,
    pub secondary_color: Option<Color>,
    pub livestreams: Vec<Livestream>,
}

/// Read-only asset store keyed by channel id.  Every lookup degrades to a
/// placeholder when the id or the asset is missing.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    channels: BTreeMap<ChannelId, ChannelAssets>,
}

impl Catalog {
    pub fn new(channels: BTreeMap<ChannelId, ChannelAssets>) -> Self {
        Self { channels }
    }

    pub fn bundled() -> anyhow::Result<Self> {
        parse_catalog_from_toml_str(BUNDLED_CATALOG)
    }

    /// Catalog from `path` when given, else the bundled one.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                parse_catalog_from_toml_str(&content)
            }
            None => Self::bundled(),
        }
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn name(&self, id: ChannelId) -> &str {
        self.assets(id)
            .and_then(|a| a.name.as_deref())
            .unwrap_or(UNKNOWN_NAME)
    }

    pub fn logo(&self, id: ChannelId) -> Option<&str> {
        self.assets(id).and_then(|a| a.logo.as_deref())
    }

    pub fn cover(&self, id: ChannelId) -> Option<&str> {
        self.assets(id).and_then(|a| a.cover.as_deref())
    }

    pub fn primary_color(&self, id: ChannelId) -> Color {
        self.assets(id)
            .and_then(|a| a.primary_color)
            .unwrap_or_default()
    }

    pub fn secondary_color(&self, id: ChannelId) -> Color {
        self.assets(id)
            .and_then(|a| a.secondary_color)
            .unwrap_or_default()
    }

    pub fn livestreams(&self, id: ChannelId) -> &[Livestream] {
        self.assets(id)
            .map(|a| a.livestreams.as_slice())
            .unwrap_or(&[])
    }

    /// Whether any livestream still points at the bundled stand-in host.
    pub fn uses_placeholder_streams(&self) -> bool {
        self.channels
            .values()
            .flat_map(|a| &a.livestreams)
            .any(|l| l.url.host_str() == Some(PLACEHOLDER_STREAM_HOST))
    }

    fn assets(&self, id: ChannelId) -> Option<&ChannelAssets> {
        self.channels.get(&id)
    }
}

// ── TOML loader ───────────────────────────────────────────────────────────────

/// Matches the `[[channel]]` tables of a catalog file.
#[derive(Debug, Deserialize)]
struct TomlCatalogFile {
    #[serde(default)]
    channel: Vec<TomlChannel>,
}

#[derive(Debug, Deserialize)]
struct TomlChannel {
    id: u32,
    name: Option<String>,
    logo: Option<String>,
    cover: Option<String>,
    primary_color: Option<Color>,
    secondary_color: Option<Color>,
    #[serde(default)]
    livestream: Vec<Livestream>,
}

pub fn parse_catalog_from_toml_str(content: &str) -> anyhow::Result<Catalog> {
    let file: TomlCatalogFile = toml::from_str(content)?;
    let mut channels = BTreeMap::new();
    for c in file.channel {
        let id = ChannelId(c.id);
        let assets = ChannelAssets {
            name: c.name,
            logo: c.logo,
            cover: c.cover,
            primary_color: c.primary_color,
            secondary_color: c.secondary_color,
            livestreams: c.livestream,
        };
        if channels.insert(id, assets).is_some() {
            warn!("catalog: channel {} defined twice, keeping the last one", id);
        }
    }
    Ok(Catalog::new(channels))
}
