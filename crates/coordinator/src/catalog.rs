//! Content catalog: videos, playlists, device assignments
//!
//! Playlist positions are zero-based and dense; every mutation rewrites the
//! whole item sequence so ordering bugs cannot accumulate.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use signage_gateway_core::models::{
    Assignment, ContentRef, PlaySchedule, Playlist, PlaylistItem, Video, VideoDescriptor,
};
use signage_gateway_core::{Result, SignageError};

use crate::repository::ContentRepository;

pub struct CatalogService {
    content: Arc<dyn ContentRepository>,
}

impl CatalogService {
    pub fn new(content: Arc<dyn ContentRepository>) -> Self {
        Self { content }
    }

    pub async fn add_video(
        &self,
        title: String,
        file_name: String,
        content_hash: String,
        size_bytes: u64,
        duration_secs: Option<u32>,
    ) -> Result<Video> {
        if title.trim().is_empty() {
            return Err(SignageError::Validation("title must not be empty".into()));
        }
        if content_hash.trim().is_empty() {
            return Err(SignageError::Validation(
                "content_hash must not be empty".into(),
            ));
        }
        let video = Video {
            id: Uuid::new_v4(),
            title,
            file_name,
            content_hash,
            size_bytes,
            duration_secs,
            uploaded_at: Utc::now(),
        };
        self.content.insert_video(video.clone()).await?;
        info!(video_id = %video.id, title = %video.title, "video added to catalog");
        Ok(video)
    }

    pub async fn get_video(&self, id: Uuid) -> Result<Video> {
        self.content
            .get_video(id)
            .await?
            .ok_or_else(|| SignageError::NotFound(format!("video {}", id)))
    }

    pub async fn list_videos(&self) -> Result<Vec<Video>> {
        self.content.list_videos().await
    }

    pub async fn create_playlist(&self, name: String) -> Result<Playlist> {
        if name.trim().is_empty() {
            return Err(SignageError::Validation("name must not be empty".into()));
        }
        let now = Utc::now();
        let playlist = Playlist {
            id: Uuid::new_v4(),
            name,
            created_at: now,
            updated_at: now,
        };
        self.content.insert_playlist(playlist.clone()).await?;
        Ok(playlist)
    }

    pub async fn get_playlist(&self, id: Uuid) -> Result<Playlist> {
        self.content
            .get_playlist(id)
            .await?
            .ok_or_else(|| SignageError::NotFound(format!("playlist {}", id)))
    }

    pub async fn playlist_items(&self, playlist_id: Uuid) -> Result<Vec<PlaylistItem>> {
        self.get_playlist(playlist_id).await?;
        self.content.playlist_items(playlist_id).await
    }

    /// Append a video to the end of a playlist.
    pub async fn add_to_playlist(&self, playlist_id: Uuid, video_id: Uuid) -> Result<Vec<PlaylistItem>> {
        self.get_playlist(playlist_id).await?;
        self.get_video(video_id).await?;

        let mut items = self.content.playlist_items(playlist_id).await?;
        if items.iter().any(|item| item.video_id == video_id) {
            return Err(SignageError::Validation(format!(
                "video {} is already in playlist {}",
                video_id, playlist_id
            )));
        }
        items.push(PlaylistItem {
            playlist_id,
            video_id,
            position: 0, // renumbered below
            added_at: Utc::now(),
        });
        self.write_renumbered(playlist_id, items).await
    }

    pub async fn remove_from_playlist(
        &self,
        playlist_id: Uuid,
        video_id: Uuid,
    ) -> Result<Vec<PlaylistItem>> {
        let mut items = self.content.playlist_items(playlist_id).await?;
        let before = items.len();
        items.retain(|item| item.video_id != video_id);
        if items.len() == before {
            return Err(SignageError::NotFound(format!(
                "video {} in playlist {}",
                video_id, playlist_id
            )));
        }
        self.write_renumbered(playlist_id, items).await
    }

    /// Replace the playback order with the given video sequence. Every video
    /// currently in the playlist must appear exactly once.
    pub async fn reorder_playlist(
        &self,
        playlist_id: Uuid,
        ordered_video_ids: Vec<Uuid>,
    ) -> Result<Vec<PlaylistItem>> {
        let items = self.content.playlist_items(playlist_id).await?;
        if items.len() != ordered_video_ids.len() {
            return Err(SignageError::Validation(format!(
                "reorder must list all {} items, got {}",
                items.len(),
                ordered_video_ids.len()
            )));
        }

        let mut reordered = Vec::with_capacity(items.len());
        for video_id in &ordered_video_ids {
            let item = items
                .iter()
                .find(|item| item.video_id == *video_id)
                .ok_or_else(|| {
                    SignageError::Validation(format!(
                        "video {} is not in playlist {}",
                        video_id, playlist_id
                    ))
                })?;
            reordered.push(item.clone());
        }
        self.write_renumbered(playlist_id, reordered).await
    }

    async fn write_renumbered(
        &self,
        playlist_id: Uuid,
        mut items: Vec<PlaylistItem>,
    ) -> Result<Vec<PlaylistItem>> {
        for (position, item) in items.iter_mut().enumerate() {
            item.position = position as u32;
        }
        self.content
            .replace_playlist_items(playlist_id, items.clone(), Utc::now())
            .await?;
        Ok(items)
    }

    /// Bind content to a device, replacing any previous assignment.
    pub async fn assign(
        &self,
        device_id: Uuid,
        content: ContentRef,
        schedule: Option<PlaySchedule>,
    ) -> Result<Assignment> {
        match content {
            ContentRef::Video(id) => {
                self.get_video(id).await?;
            }
            ContentRef::Playlist(id) => {
                self.get_playlist(id).await?;
            }
        }
        let assignment = Assignment {
            id: Uuid::new_v4(),
            device_id,
            content,
            schedule,
            assigned_at: Utc::now(),
        };
        self.content.upsert_assignment(assignment.clone()).await?;
        info!(device_id = %device_id, "content assigned");
        Ok(assignment)
    }

    pub async fn unassign(&self, device_id: Uuid) -> Result<()> {
        if !self.content.clear_assignment(device_id).await? {
            return Err(SignageError::NotFound(format!(
                "assignment for device {}",
                device_id
            )));
        }
        Ok(())
    }

    /// Download reference handed to devices for one catalog video
    pub fn descriptor(video: &Video) -> VideoDescriptor {
        VideoDescriptor {
            video_id: video.id,
            file_name: video.file_name.clone(),
            content_hash: video.content_hash.clone(),
            download_path: format!("/api/videos/{}/download", video.id),
        }
    }
}
