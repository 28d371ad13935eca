//! Content resolution: the single answer to "what should this screen show"
//!
//! Precedence is fixed: an active emergency broadcast targeting the device
//! beats a scheduled assignment inside its window, which beats an always-on
//! assignment. Anything else resolves to no content. The result is a pure
//! function of stored state and the supplied clock, so repeated calls without
//! a state change return the same decision.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use signage_gateway_core::models::{
    Assignment, BroadcastContent, ContentDecision, ContentRef, EmergencyBroadcast, ResolvedContent,
    ResolvedMedia, VideoDescriptor,
};
use signage_gateway_core::Result;

use crate::catalog::CatalogService;
use crate::repository::{BroadcastRepository, ContentRepository};

pub struct ContentResolver {
    broadcasts: Arc<dyn BroadcastRepository>,
    content: Arc<dyn ContentRepository>,
}

impl ContentResolver {
    pub fn new(broadcasts: Arc<dyn BroadcastRepository>, content: Arc<dyn ContentRepository>) -> Self {
        Self { broadcasts, content }
    }

    pub async fn resolve(&self, device_id: Uuid, now: DateTime<Utc>) -> Result<ContentDecision> {
        if let Some(broadcast) = self.winning_broadcast(device_id).await? {
            let video = match broadcast.video_id {
                Some(video_id) => self.descriptor_for(video_id).await?,
                None => None,
            };
            return Ok(ContentDecision::EmergencyOverride(BroadcastContent {
                broadcast_id: broadcast.id,
                priority: broadcast.priority,
                title: broadcast.title,
                message: broadcast.message,
                video,
            }));
        }

        let Some(assignment) = self.content.assignment_for_device(device_id).await? else {
            return Ok(ContentDecision::NoContent);
        };

        match &assignment.schedule {
            Some(schedule) => {
                if !schedule.is_active_at(now) {
                    // A windowed assignment outside its window leaves the
                    // screen dark rather than falling back to stale content.
                    return Ok(ContentDecision::NoContent);
                }
                match self.resolve_media(&assignment).await? {
                    Some(content) => Ok(ContentDecision::ScheduledAssignment(content)),
                    None => Ok(ContentDecision::NoContent),
                }
            }
            None => match self.resolve_media(&assignment).await? {
                Some(content) => Ok(ContentDecision::DefaultAssignment(content)),
                None => Ok(ContentDecision::NoContent),
            },
        }
    }

    /// Highest priority wins; ties go to the most recently created broadcast,
    /// then the larger id. The id comparison makes the order total, so equal
    /// (priority, created_at) pairs pick the same winner on every call and on
    /// every backend.
    async fn winning_broadcast(&self, device_id: Uuid) -> Result<Option<EmergencyBroadcast>> {
        let active = self.broadcasts.active_for_device(device_id).await?;
        Ok(active.into_iter().max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        }))
    }

    async fn resolve_media(&self, assignment: &Assignment) -> Result<Option<ResolvedContent>> {
        let media = match assignment.content {
            ContentRef::Video(video_id) => {
                match self.descriptor_for(video_id).await? {
                    Some(descriptor) => Some(ResolvedMedia::Video(descriptor)),
                    None => None,
                }
            }
            ContentRef::Playlist(playlist_id) => {
                let Some(playlist) = self.content.get_playlist(playlist_id).await? else {
                    warn!(playlist_id = %playlist_id, "assignment points at missing playlist");
                    return Ok(None);
                };
                let mut descriptors = Vec::new();
                for item in self.content.playlist_items(playlist_id).await? {
                    if let Some(descriptor) = self.descriptor_for(item.video_id).await? {
                        descriptors.push(descriptor);
                    }
                }
                if descriptors.is_empty() {
                    return Ok(None);
                }
                Some(ResolvedMedia::Playlist {
                    playlist_id,
                    name: playlist.name,
                    items: descriptors,
                })
            }
        };
        Ok(media.map(|content| ResolvedContent {
            assignment_id: assignment.id,
            content,
        }))
    }

    async fn descriptor_for(&self, video_id: Uuid) -> Result<Option<VideoDescriptor>> {
        match self.content.get_video(video_id).await? {
            Some(video) => Ok(Some(CatalogService::descriptor(&video))),
            None => {
                warn!(video_id = %video_id, "referenced video missing from catalog");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repositories;
    use chrono::Duration;
    use signage_gateway_core::models::{
        BroadcastDelivery, BroadcastStatus, BroadcastTarget, DayMask, PlaySchedule, Video,
    };

    struct Fixture {
        repos: Repositories,
        resolver: ContentResolver,
        device_id: Uuid,
    }

    fn fixture() -> Fixture {
        let repos = Repositories::in_memory();
        let resolver = ContentResolver::new(repos.broadcasts.clone(), repos.content.clone());
        Fixture {
            repos,
            resolver,
            device_id: Uuid::new_v4(),
        }
    }

    async fn seed_video(repos: &Repositories, title: &str) -> Video {
        let video = Video {
            id: Uuid::new_v4(),
            title: title.to_string(),
            file_name: format!("{}.mp4", title),
            content_hash: format!("hash-{}", title),
            size_bytes: 2048,
            duration_secs: Some(15),
            uploaded_at: Utc::now(),
        };
        repos.content.insert_video(video.clone()).await.unwrap();
        video
    }

    async fn seed_assignment(
        repos: &Repositories,
        device_id: Uuid,
        content: ContentRef,
        schedule: Option<PlaySchedule>,
    ) {
        repos
            .content
            .upsert_assignment(Assignment {
                id: Uuid::new_v4(),
                device_id,
                content,
                schedule,
                assigned_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    async fn seed_active_broadcast(
        repos: &Repositories,
        device_id: Uuid,
        priority: u8,
        created_at: DateTime<Utc>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        repos
            .broadcasts
            .create_broadcast(
                EmergencyBroadcast {
                    id,
                    title: format!("alert-{}", priority),
                    message: "evacuate".to_string(),
                    video_id: None,
                    priority,
                    duration_secs: Some(300),
                    target: BroadcastTarget::AllDevices,
                    status: BroadcastStatus::Active,
                    activate_at: None,
                    created_at,
                },
                vec![BroadcastDelivery {
                    broadcast_id: id,
                    device_id,
                    acknowledged_at: None,
                    displayed_at: None,
                    created_at,
                }],
            )
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn no_state_resolves_to_no_content() {
        let f = fixture();
        let decision = f.resolver.resolve(f.device_id, Utc::now()).await.unwrap();
        assert_eq!(decision, ContentDecision::NoContent);
    }

    #[tokio::test]
    async fn default_assignment_resolves_video() {
        let f = fixture();
        let video = seed_video(&f.repos, "welcome").await;
        seed_assignment(&f.repos, f.device_id, ContentRef::Video(video.id), None).await;

        match f.resolver.resolve(f.device_id, Utc::now()).await.unwrap() {
            ContentDecision::DefaultAssignment(resolved) => match resolved.content {
                ResolvedMedia::Video(descriptor) => {
                    assert_eq!(descriptor.video_id, video.id);
                    assert_eq!(descriptor.content_hash, "hash-welcome");
                }
                other => panic!("expected video, got {:?}", other),
            },
            other => panic!("expected default assignment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn broadcast_preempts_assignment_and_reverts() {
        let f = fixture();
        let video = seed_video(&f.repos, "welcome").await;
        seed_assignment(&f.repos, f.device_id, ContentRef::Video(video.id), None).await;
        let broadcast_id = seed_active_broadcast(&f.repos, f.device_id, 5, Utc::now()).await;

        match f.resolver.resolve(f.device_id, Utc::now()).await.unwrap() {
            ContentDecision::EmergencyOverride(content) => {
                assert_eq!(content.broadcast_id, broadcast_id);
            }
            other => panic!("expected emergency override, got {:?}", other),
        }

        // Once the broadcast ends, the same device falls back to its assignment.
        f.repos
            .broadcasts
            .transition_status(broadcast_id, BroadcastStatus::Active, BroadcastStatus::Expired)
            .await
            .unwrap();
        assert!(matches!(
            f.resolver.resolve(f.device_id, Utc::now()).await.unwrap(),
            ContentDecision::DefaultAssignment(_)
        ));
    }

    #[tokio::test]
    async fn higher_priority_broadcast_wins() {
        let f = fixture();
        let now = Utc::now();
        seed_active_broadcast(&f.repos, f.device_id, 2, now).await;
        let high = seed_active_broadcast(&f.repos, f.device_id, 5, now - Duration::minutes(5)).await;

        match f.resolver.resolve(f.device_id, now).await.unwrap() {
            ContentDecision::EmergencyOverride(content) => assert_eq!(content.broadcast_id, high),
            other => panic!("expected emergency override, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn equal_priority_ties_break_to_newest() {
        let f = fixture();
        let now = Utc::now();
        seed_active_broadcast(&f.repos, f.device_id, 3, now - Duration::minutes(10)).await;
        let newer = seed_active_broadcast(&f.repos, f.device_id, 3, now).await;

        match f.resolver.resolve(f.device_id, now).await.unwrap() {
            ContentDecision::EmergencyOverride(content) => assert_eq!(content.broadcast_id, newer),
            other => panic!("expected emergency override, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn exact_tie_picks_the_same_broadcast_every_time() {
        let f = fixture();
        let stamp = Utc::now();
        let first = seed_active_broadcast(&f.repos, f.device_id, 3, stamp).await;
        let second = seed_active_broadcast(&f.repos, f.device_id, 3, stamp).await;
        let expected = first.max(second);

        // Equal priority and creation time must still resolve to one fixed
        // winner, not whichever the store happened to iterate last.
        for _ in 0..5 {
            match f.resolver.resolve(f.device_id, Utc::now()).await.unwrap() {
                ContentDecision::EmergencyOverride(content) => {
                    assert_eq!(content.broadcast_id, expected)
                }
                other => panic!("expected emergency override, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn broadcast_not_targeting_device_is_ignored() {
        let f = fixture();
        let other_device = Uuid::new_v4();
        seed_active_broadcast(&f.repos, other_device, 5, Utc::now()).await;

        let decision = f.resolver.resolve(f.device_id, Utc::now()).await.unwrap();
        assert_eq!(decision, ContentDecision::NoContent);
    }

    #[tokio::test]
    async fn windowed_assignment_only_inside_window() {
        let f = fixture();
        let video = seed_video(&f.repos, "daytime").await;
        let schedule = PlaySchedule {
            start: chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: chrono::NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            days: DayMask::ALL,
        };
        seed_assignment(
            &f.repos,
            f.device_id,
            ContentRef::Video(video.id),
            Some(schedule),
        )
        .await;

        let noon = chrono::NaiveDate::from_ymd_opt(2026, 8, 17)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();
        assert!(matches!(
            f.resolver.resolve(f.device_id, noon).await.unwrap(),
            ContentDecision::ScheduledAssignment(_)
        ));

        let night = chrono::NaiveDate::from_ymd_opt(2026, 8, 17)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(
            f.resolver.resolve(f.device_id, night).await.unwrap(),
            ContentDecision::NoContent
        );
    }

    #[tokio::test]
    async fn playlist_assignment_expands_ordered_items() {
        let f = fixture();
        let a = seed_video(&f.repos, "a").await;
        let b = seed_video(&f.repos, "b").await;
        let playlist_id = Uuid::new_v4();
        f.repos
            .content
            .insert_playlist(signage_gateway_core::models::Playlist {
                id: playlist_id,
                name: "loop".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        f.repos
            .content
            .replace_playlist_items(
                playlist_id,
                vec![
                    signage_gateway_core::models::PlaylistItem {
                        playlist_id,
                        video_id: a.id,
                        position: 0,
                        added_at: Utc::now(),
                    },
                    signage_gateway_core::models::PlaylistItem {
                        playlist_id,
                        video_id: b.id,
                        position: 1,
                        added_at: Utc::now(),
                    },
                ],
                Utc::now(),
            )
            .await
            .unwrap();
        seed_assignment(&f.repos, f.device_id, ContentRef::Playlist(playlist_id), None).await;

        match f.resolver.resolve(f.device_id, Utc::now()).await.unwrap() {
            ContentDecision::DefaultAssignment(resolved) => match resolved.content {
                ResolvedMedia::Playlist { items, .. } => {
                    assert_eq!(items.len(), 2);
                    assert_eq!(items[0].video_id, a.id);
                    assert_eq!(items[1].video_id, b.id);
                }
                other => panic!("expected playlist, got {:?}", other),
            },
            other => panic!("expected default assignment, got {:?}", other),
        }
    }
}
