use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Color};
use crate::channel::{self, PreferredVersions, VersionChoice};
use crate::model::{Channel, ChannelId, Livestream, ScheduleEntry};
use crate::schedule::ScheduleDocument;

/// Everything a client shows for one channel at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideRow {
    pub id: ChannelId,
    pub name: String,
    pub logo: Option<String>,
    pub cover: Option<String>,
    pub primary_color: Color,
    pub secondary_color: Color,
    pub livestreams: Vec<Livestream>,
    #[serde(default)]
    pub versions: Vec<VersionChoice>,
    pub current: Option<GuideEntry>,
    pub next: Option<GuideEntry>,
    #[serde(default)]
    pub upcoming: Vec<GuideEntry>,
}

/// A schedule entry with its start time already rendered in local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideEntry {
    pub date: DateTime<Utc>,
    pub title: String,
    /// `H:mm`.
    pub time_label: String,
}

impl From<&ScheduleEntry> for GuideEntry {
    fn from(entry: &ScheduleEntry) -> Self {
        Self {
            date: entry.date,
            title: entry.title.clone(),
            time_label: entry.time_label(),
        }
    }
}

pub fn guide_rows(
    channels: &[Channel],
    catalog: &Catalog,
    schedule: &ScheduleDocument,
    preferences: &PreferredVersions,
    now: DateTime<Utc>,
) -> Vec<GuideRow> {
    channels
        .iter()
        .map(|c| {
            let program = channel::program(c, schedule, now);
            GuideRow {
                id: c.id,
                name: catalog.name(c.id).to_string(),
                logo: catalog.logo(c.id).map(str::to_string),
                cover: catalog.cover(c.id).map(str::to_string),
                primary_color: catalog.primary_color(c.id),
                secondary_color: catalog.secondary_color(c.id),
                livestreams: catalog.livestreams(c.id).to_vec(),
                versions: channel::version_choices(c, catalog, preferences),
                current: program.current().map(GuideEntry::from),
                next: program.next().map(GuideEntry::from),
                upcoming: program.upcoming().iter().map(GuideEntry::from).collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_catalog_from_toml_str;
    use chrono::TimeZone;

    #[test]
    fn rows_follow_channel_order_and_schedule() {
        let catalog = parse_catalog_from_toml_str(
            r#"
            [[channel]]
            id = 1
            name = "One"

            [[channel.livestream]]
            url = "https://streams.example.net/one/master.m3u8"
            "#,
        )
        .unwrap();
        let at = |h| Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap();
        let mut schedule = ScheduleDocument::default();
        schedule.0.insert(
            "1".into(),
            vec![
                ScheduleEntry::new(at(10), "A"),
                ScheduleEntry::new(at(11), "B"),
                ScheduleEntry::new(at(12), "C"),
            ],
        );

        let channels = [Channel::new(9), Channel::new(1)];
        let rows = guide_rows(
            &channels,
            &catalog,
            &schedule,
            &PreferredVersions::default(),
            at(10) + chrono::Duration::minutes(45),
        );

        assert_eq!(rows[0].id, ChannelId(9));
        assert_eq!(rows[0].name, "Unknown");
        assert!(rows[0].current.is_none());

        assert_eq!(rows[1].name, "One");
        assert_eq!(rows[1].current.as_ref().unwrap().title, "A");
        assert_eq!(rows[1].next.as_ref().unwrap().title, "B");
        assert_eq!(rows[1].upcoming.len(), 2);
        let b = &rows[1].upcoming[0];
        assert_eq!(b.time_label, at(11).with_timezone(&chrono::Local).format("%-H:%M").to_string());
        assert!(rows[1].versions.is_empty());
    }
}
