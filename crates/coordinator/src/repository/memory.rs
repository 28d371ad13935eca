//! In-memory store backing all repository traits
//!
//! Devices, rollout rows, and config entries live in `DashMap`s so writes to
//! different keys never contend and writes to the same key serialize on the
//! shard lock. Broadcasts and their delivery snapshot share a single
//! `RwLock`ed table because creation must write both atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use signage_gateway_core::models::{
    Assignment, BroadcastDelivery, BroadcastStatus, Device, DeviceConfigEntry, DeviceGroup,
    DeviceUpdate, EmergencyBroadcast, Playlist, PlaylistItem, SystemUpdate, Video,
};
use signage_gateway_core::Result;

use super::{
    BroadcastRepository, ConfigRepository, ContentRepository, DeviceRepository, HeartbeatPatch,
    UpdateRepository,
};

#[derive(Default)]
struct BroadcastTables {
    broadcasts: HashMap<Uuid, EmergencyBroadcast>,
    deliveries: HashMap<(Uuid, Uuid), BroadcastDelivery>,
}

#[derive(Default)]
pub struct MemoryStore {
    devices: DashMap<Uuid, Device>,
    groups: DashMap<Uuid, DeviceGroup>,
    videos: DashMap<Uuid, Video>,
    playlists: DashMap<Uuid, Playlist>,
    playlist_items: RwLock<HashMap<Uuid, Vec<PlaylistItem>>>,
    /// Keyed by device id; one assignment per device
    assignments: DashMap<Uuid, Assignment>,
    broadcast_tables: RwLock<BroadcastTables>,
    updates: DashMap<Uuid, SystemUpdate>,
    device_updates: DashMap<(Uuid, Uuid), DeviceUpdate>,
    config: DashMap<Uuid, BTreeMap<String, DeviceConfigEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceRepository for MemoryStore {
    async fn insert_device(&self, device: Device) -> Result<()> {
        self.devices.insert(device.id, device);
        Ok(())
    }

    async fn get_device(&self, id: Uuid) -> Result<Option<Device>> {
        Ok(self.devices.get(&id).map(|d| d.clone()))
    }

    async fn find_by_serial(&self, serial: &str) -> Result<Option<Device>> {
        Ok(self
            .devices
            .iter()
            .find(|d| d.serial == serial && !d.is_deleted())
            .map(|d| d.clone()))
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|d| !d.is_deleted())
            .map(|d| d.clone())
            .collect();
        devices.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(devices)
    }

    async fn list_by_group(&self, group_id: Uuid) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|d| !d.is_deleted() && d.group_id == Some(group_id))
            .map(|d| d.clone())
            .collect();
        devices.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(devices)
    }

    async fn apply_heartbeat(&self, id: Uuid, patch: HeartbeatPatch) -> Result<bool> {
        match self.devices.get_mut(&id) {
            Some(mut device) if !device.is_deleted() => {
                device.last_seen = Some(patch.seen_at);
                if patch.current_content.is_some() {
                    device.current_content = patch.current_content;
                }
                if let Some(version) = patch.software_version {
                    device.software_version = version;
                }
                if patch.ip_address.is_some() {
                    device.ip_address = patch.ip_address;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate_credential(&self, id: Uuid, credential_hash: String) -> Result<()> {
        if let Some(mut device) = self.devices.get_mut(&id) {
            device.credential_hash = credential_hash;
        }
        Ok(())
    }

    async fn soft_delete_device(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        match self.devices.get_mut(&id) {
            Some(mut device) if !device.is_deleted() => {
                device.deleted_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_group(&self, group: DeviceGroup) -> Result<()> {
        self.groups.insert(group.id, group);
        Ok(())
    }

    async fn get_group(&self, id: Uuid) -> Result<Option<DeviceGroup>> {
        Ok(self.groups.get(&id).map(|g| g.clone()))
    }

    async fn list_groups(&self) -> Result<Vec<DeviceGroup>> {
        let mut groups: Vec<DeviceGroup> = self.groups.iter().map(|g| g.clone()).collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }
}

#[async_trait]
impl ContentRepository for MemoryStore {
    async fn insert_video(&self, video: Video) -> Result<()> {
        self.videos.insert(video.id, video);
        Ok(())
    }

    async fn get_video(&self, id: Uuid) -> Result<Option<Video>> {
        Ok(self.videos.get(&id).map(|v| v.clone()))
    }

    async fn list_videos(&self) -> Result<Vec<Video>> {
        let mut videos: Vec<Video> = self.videos.iter().map(|v| v.clone()).collect();
        videos.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(videos)
    }

    async fn insert_playlist(&self, playlist: Playlist) -> Result<()> {
        self.playlists.insert(playlist.id, playlist);
        Ok(())
    }

    async fn get_playlist(&self, id: Uuid) -> Result<Option<Playlist>> {
        Ok(self.playlists.get(&id).map(|p| p.clone()))
    }

    async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        let mut playlists: Vec<Playlist> = self.playlists.iter().map(|p| p.clone()).collect();
        playlists.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(playlists)
    }

    async fn replace_playlist_items(
        &self,
        playlist_id: Uuid,
        items: Vec<PlaylistItem>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.playlist_items.write().insert(playlist_id, items);
        if let Some(mut playlist) = self.playlists.get_mut(&playlist_id) {
            playlist.updated_at = updated_at;
        }
        Ok(())
    }

    async fn playlist_items(&self, playlist_id: Uuid) -> Result<Vec<PlaylistItem>> {
        let mut items = self
            .playlist_items
            .read()
            .get(&playlist_id)
            .cloned()
            .unwrap_or_default();
        items.sort_by_key(|item| item.position);
        Ok(items)
    }

    async fn upsert_assignment(&self, assignment: Assignment) -> Result<()> {
        self.assignments.insert(assignment.device_id, assignment);
        Ok(())
    }

    async fn assignment_for_device(&self, device_id: Uuid) -> Result<Option<Assignment>> {
        Ok(self.assignments.get(&device_id).map(|a| a.clone()))
    }

    async fn clear_assignment(&self, device_id: Uuid) -> Result<bool> {
        Ok(self.assignments.remove(&device_id).is_some())
    }
}

#[async_trait]
impl BroadcastRepository for MemoryStore {
    async fn create_broadcast(
        &self,
        broadcast: EmergencyBroadcast,
        deliveries: Vec<BroadcastDelivery>,
    ) -> Result<()> {
        let mut tables = self.broadcast_tables.write();
        for delivery in deliveries {
            tables
                .deliveries
                .insert((delivery.broadcast_id, delivery.device_id), delivery);
        }
        tables.broadcasts.insert(broadcast.id, broadcast);
        Ok(())
    }

    async fn get_broadcast(&self, id: Uuid) -> Result<Option<EmergencyBroadcast>> {
        Ok(self.broadcast_tables.read().broadcasts.get(&id).cloned())
    }

    async fn list_with_status(&self, status: BroadcastStatus) -> Result<Vec<EmergencyBroadcast>> {
        let mut broadcasts: Vec<EmergencyBroadcast> = self
            .broadcast_tables
            .read()
            .broadcasts
            .values()
            .filter(|b| b.status == status)
            .cloned()
            .collect();
        broadcasts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(broadcasts)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: BroadcastStatus,
        to: BroadcastStatus,
    ) -> Result<bool> {
        let mut tables = self.broadcast_tables.write();
        match tables.broadcasts.get_mut(&id) {
            Some(broadcast) if broadcast.status == from => {
                broadcast.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn active_for_device(&self, device_id: Uuid) -> Result<Vec<EmergencyBroadcast>> {
        let tables = self.broadcast_tables.read();
        let mut broadcasts: Vec<EmergencyBroadcast> = tables
            .broadcasts
            .values()
            .filter(|b| {
                b.status == BroadcastStatus::Active
                    && tables.deliveries.contains_key(&(b.id, device_id))
            })
            .cloned()
            .collect();
        // Id is the final key so equal timestamps still order the same way
        // on every call.
        broadcasts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(broadcasts)
    }

    async fn get_delivery(
        &self,
        broadcast_id: Uuid,
        device_id: Uuid,
    ) -> Result<Option<BroadcastDelivery>> {
        Ok(self
            .broadcast_tables
            .read()
            .deliveries
            .get(&(broadcast_id, device_id))
            .cloned())
    }

    async fn mark_acknowledged(
        &self,
        broadcast_id: Uuid,
        device_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<BroadcastDelivery>> {
        let mut tables = self.broadcast_tables.write();
        Ok(tables
            .deliveries
            .get_mut(&(broadcast_id, device_id))
            .map(|delivery| {
                delivery.acknowledged_at.get_or_insert(at);
                delivery.clone()
            }))
    }

    async fn mark_displayed(
        &self,
        broadcast_id: Uuid,
        device_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<BroadcastDelivery>> {
        let mut tables = self.broadcast_tables.write();
        Ok(tables
            .deliveries
            .get_mut(&(broadcast_id, device_id))
            .map(|delivery| {
                delivery.displayed_at.get_or_insert(at);
                delivery.clone()
            }))
    }
}

#[async_trait]
impl UpdateRepository for MemoryStore {
    async fn insert_update(&self, update: SystemUpdate) -> Result<()> {
        self.updates.insert(update.id, update);
        Ok(())
    }

    async fn get_update(&self, id: Uuid) -> Result<Option<SystemUpdate>> {
        Ok(self.updates.get(&id).map(|u| u.clone()))
    }

    async fn list_updates(&self) -> Result<Vec<SystemUpdate>> {
        let mut updates: Vec<SystemUpdate> = self.updates.iter().map(|u| u.clone()).collect();
        updates.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(updates)
    }

    async fn insert_device_update(&self, row: DeviceUpdate) -> Result<()> {
        self.device_updates
            .insert((row.device_id, row.update_id), row);
        Ok(())
    }

    async fn get_device_update(
        &self,
        device_id: Uuid,
        update_id: Uuid,
    ) -> Result<Option<DeviceUpdate>> {
        Ok(self
            .device_updates
            .get(&(device_id, update_id))
            .map(|r| r.clone()))
    }

    async fn device_updates_for_device(&self, device_id: Uuid) -> Result<Vec<DeviceUpdate>> {
        let mut rows: Vec<DeviceUpdate> = self
            .device_updates
            .iter()
            .filter(|r| r.device_id == device_id)
            .map(|r| r.clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn with_device_update(
        &self,
        device_id: Uuid,
        update_id: Uuid,
        apply: Box<dyn FnOnce(Option<DeviceUpdate>) -> Result<DeviceUpdate> + Send>,
    ) -> Result<DeviceUpdate> {
        // The entry guard serializes concurrent reports for the same pair.
        match self.device_updates.entry((device_id, update_id)) {
            Entry::Occupied(mut occupied) => {
                let next = apply(Some(occupied.get().clone()))?;
                occupied.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                let next = apply(None)?;
                vacant.insert(next.clone());
                Ok(next)
            }
        }
    }
}

#[async_trait]
impl ConfigRepository for MemoryStore {
    async fn upsert_entry(&self, device_id: Uuid, entry: DeviceConfigEntry) -> Result<()> {
        self.config
            .entry(device_id)
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn entries_for_device(&self, device_id: Uuid) -> Result<Vec<DeviceConfigEntry>> {
        Ok(self
            .config
            .get(&device_id)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }
}
