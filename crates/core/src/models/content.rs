//! Content catalog records and the resolver's decision type

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A video in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    pub title: String,
    pub file_name: String,
    /// SHA-256 of the file contents; the device cache is keyed by this
    pub content_hash: String,
    pub size_bytes: u64,
    pub duration_secs: Option<u32>,
    pub uploaded_at: DateTime<Utc>,
}

/// Ordered collection of videos
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One slot of a playlist
///
/// Positions are zero-based, unique, and dense within a playlist; every
/// mutation renumbers the whole sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub playlist_id: Uuid,
    pub video_id: Uuid,
    pub position: u32,
    pub added_at: DateTime<Utc>,
}

/// What an assignment points at: exactly one of the two, enforced by the type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ContentRef {
    Video(Uuid),
    Playlist(Uuid),
}

/// Day-of-week mask, bit 0 = Monday .. bit 6 = Sunday
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayMask(pub u8);

impl DayMask {
    pub const ALL: DayMask = DayMask(0x7f);

    pub fn from_days(days: &[u8]) -> Self {
        let mut mask = 0u8;
        for &day in days {
            if day < 7 {
                mask |= 1 << day;
            }
        }
        DayMask(mask)
    }

    /// `weekday` follows chrono's numbering from Monday = 0
    pub fn contains(&self, weekday: u8) -> bool {
        weekday < 7 && self.0 & (1 << weekday) != 0
    }
}

impl Default for DayMask {
    fn default() -> Self {
        DayMask::ALL
    }
}

/// Optional daily window and day mask constraining an assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaySchedule {
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default)]
    pub days: DayMask,
}

impl PlaySchedule {
    /// Whether `now` falls inside the window on an allowed day.
    ///
    /// Windows where end < start cross midnight (22:00-02:00) and match
    /// times on either side of it.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        let weekday = now.weekday().num_days_from_monday() as u8;
        if !self.days.contains(weekday) {
            return false;
        }

        let time = now.time();
        if self.start <= self.end {
            self.start <= time && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

/// Binding of a device to a single video or playlist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub device_id: Uuid,
    pub content: ContentRef,
    pub schedule: Option<PlaySchedule>,
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    pub fn is_scheduled(&self) -> bool {
        self.schedule.is_some()
    }
}

/// Download reference handed to devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    pub video_id: Uuid,
    pub file_name: String,
    pub content_hash: String,
    /// Path on the coordinator to fetch the bytes from
    pub download_path: String,
}

/// Fully expanded content carried in a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "media", rename_all = "lowercase")]
pub enum ResolvedMedia {
    Video(VideoDescriptor),
    Playlist {
        playlist_id: Uuid,
        name: String,
        /// Items in playback order; the device sequences and loops locally
        items: Vec<VideoDescriptor>,
    },
}

/// Assignment content after resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedContent {
    pub assignment_id: Uuid,
    pub content: ResolvedMedia,
}

/// Emergency override content carried in a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastContent {
    pub broadcast_id: Uuid,
    pub priority: u8,
    pub title: String,
    pub message: String,
    /// Present when the broadcast overrides with a video rather than a message
    pub video: Option<VideoDescriptor>,
}

/// The resolver's authoritative answer to "what should this device show now"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ContentDecision {
    EmergencyOverride(BroadcastContent),
    ScheduledAssignment(ResolvedContent),
    DefaultAssignment(ResolvedContent),
    NoContent,
}

impl ContentDecision {
    /// Videos the device must have cached to honor this decision
    pub fn required_videos(&self) -> Vec<&VideoDescriptor> {
        match self {
            ContentDecision::EmergencyOverride(b) => b.video.iter().collect(),
            ContentDecision::ScheduledAssignment(r) | ContentDecision::DefaultAssignment(r) => {
                match &r.content {
                    ResolvedMedia::Video(v) => vec![v],
                    ResolvedMedia::Playlist { items, .. } => items.iter().collect(),
                }
            }
            ContentDecision::NoContent => Vec::new(),
        }
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, ContentDecision::EmergencyOverride(_))
    }
}
