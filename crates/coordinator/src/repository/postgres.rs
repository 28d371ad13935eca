//! PostgreSQL implementation of the repository traits
//!
//! Structured columns (reported content, broadcast targets, schedules,
//! config values) are stored as JSONB through their serde representations so
//! the wire and storage shapes never drift apart. Enum-like statuses and
//! versions are stored as text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use signage_gateway_core::models::{
    Assignment, BroadcastDelivery, BroadcastStatus, Device, DeviceConfigEntry, DeviceGroup,
    DeviceUpdate, DeviceUpdateStatus, EmergencyBroadcast, Playlist, PlaylistItem, SystemUpdate,
    Video,
};
use signage_gateway_core::{Result, SignageError};

use super::{
    BroadcastRepository, ConfigRepository, ContentRepository, DeviceRepository, HeartbeatPatch,
    UpdateRepository,
};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage(op: &str) -> impl FnOnce(sqlx::Error) -> SignageError + '_ {
    move |e| SignageError::Storage(format!("{}: {}", op, e))
}

fn decode(op: &str) -> impl FnOnce(serde_json::Error) -> SignageError + '_ {
    move |e| SignageError::Storage(format!("{}: corrupt column: {}", op, e))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &sqlx::postgres::PgRow,
    column: &str,
    op: &str,
) -> Result<Option<T>> {
    let value: Option<serde_json::Value> = row.try_get(column).map_err(storage(op))?;
    value
        .map(|v| serde_json::from_value(v).map_err(decode(op)))
        .transpose()
}

fn broadcast_status_from_str(s: &str, op: &str) -> Result<BroadcastStatus> {
    match s {
        "pending" => Ok(BroadcastStatus::Pending),
        "active" => Ok(BroadcastStatus::Active),
        "expired" => Ok(BroadcastStatus::Expired),
        "cancelled" => Ok(BroadcastStatus::Cancelled),
        other => Err(SignageError::Storage(format!(
            "{}: unknown broadcast status '{}'",
            op, other
        ))),
    }
}

fn update_status_from_str(s: &str, op: &str) -> Result<DeviceUpdateStatus> {
    match s {
        "pending" => Ok(DeviceUpdateStatus::Pending),
        "downloading" => Ok(DeviceUpdateStatus::Downloading),
        "installing" => Ok(DeviceUpdateStatus::Installing),
        "completed" => Ok(DeviceUpdateStatus::Completed),
        "failed" => Ok(DeviceUpdateStatus::Failed),
        other => Err(SignageError::Storage(format!(
            "{}: unknown update status '{}'",
            op, other
        ))),
    }
}

fn device_from_row(row: &sqlx::postgres::PgRow, op: &str) -> Result<Device> {
    let version: String = row.try_get("software_version").map_err(storage(op))?;
    Ok(Device {
        id: row.try_get("id").map_err(storage(op))?,
        name: row.try_get("name").map_err(storage(op))?,
        serial: row.try_get("serial").map_err(storage(op))?,
        credential_hash: row.try_get("credential_hash").map_err(storage(op))?,
        ip_address: row.try_get("ip_address").map_err(storage(op))?,
        registered_at: row.try_get("registered_at").map_err(storage(op))?,
        last_seen: row.try_get("last_seen").map_err(storage(op))?,
        current_content: json_column(row, "current_content", op)?,
        software_version: version
            .parse()
            .map_err(|e| SignageError::Storage(format!("{}: bad version: {}", op, e)))?,
        group_id: row.try_get("group_id").map_err(storage(op))?,
        deleted_at: row.try_get("deleted_at").map_err(storage(op))?,
    })
}

fn broadcast_from_row(row: &sqlx::postgres::PgRow, op: &str) -> Result<EmergencyBroadcast> {
    let status: String = row.try_get("status").map_err(storage(op))?;
    let target: serde_json::Value = row.try_get("target").map_err(storage(op))?;
    let priority: i16 = row.try_get("priority").map_err(storage(op))?;
    let duration_secs: Option<i32> = row.try_get("duration_secs").map_err(storage(op))?;
    Ok(EmergencyBroadcast {
        id: row.try_get("id").map_err(storage(op))?,
        title: row.try_get("title").map_err(storage(op))?,
        message: row.try_get("message").map_err(storage(op))?,
        video_id: row.try_get("video_id").map_err(storage(op))?,
        priority: priority as u8,
        duration_secs: duration_secs.map(|d| d as u32),
        target: serde_json::from_value(target).map_err(decode(op))?,
        status: broadcast_status_from_str(&status, op)?,
        activate_at: row.try_get("activate_at").map_err(storage(op))?,
        created_at: row.try_get("created_at").map_err(storage(op))?,
    })
}

fn delivery_from_row(row: &sqlx::postgres::PgRow, op: &str) -> Result<BroadcastDelivery> {
    Ok(BroadcastDelivery {
        broadcast_id: row.try_get("broadcast_id").map_err(storage(op))?,
        device_id: row.try_get("device_id").map_err(storage(op))?,
        acknowledged_at: row.try_get("acknowledged_at").map_err(storage(op))?,
        displayed_at: row.try_get("displayed_at").map_err(storage(op))?,
        created_at: row.try_get("created_at").map_err(storage(op))?,
    })
}

fn system_update_from_row(row: &sqlx::postgres::PgRow, op: &str) -> Result<SystemUpdate> {
    let version: String = row.try_get("version").map_err(storage(op))?;
    let size_bytes: i64 = row.try_get("size_bytes").map_err(storage(op))?;
    Ok(SystemUpdate {
        id: row.try_get("id").map_err(storage(op))?,
        version: version
            .parse()
            .map_err(|e| SignageError::Storage(format!("{}: bad version: {}", op, e)))?,
        description: row.try_get("description").map_err(storage(op))?,
        file_name: row.try_get("file_name").map_err(storage(op))?,
        checksum: row.try_get("checksum").map_err(storage(op))?,
        size_bytes: size_bytes as u64,
        is_critical: row.try_get("is_critical").map_err(storage(op))?,
        released_at: row.try_get("released_at").map_err(storage(op))?,
    })
}

fn device_update_from_row(row: &sqlx::postgres::PgRow, op: &str) -> Result<DeviceUpdate> {
    let status: String = row.try_get("status").map_err(storage(op))?;
    let progress: i16 = row.try_get("progress").map_err(storage(op))?;
    Ok(DeviceUpdate {
        id: row.try_get("id").map_err(storage(op))?,
        device_id: row.try_get("device_id").map_err(storage(op))?,
        update_id: row.try_get("update_id").map_err(storage(op))?,
        status: update_status_from_str(&status, op)?,
        progress: progress as u8,
        error: row.try_get("error").map_err(storage(op))?,
        started_at: row.try_get("started_at").map_err(storage(op))?,
        completed_at: row.try_get("completed_at").map_err(storage(op))?,
        created_at: row.try_get("created_at").map_err(storage(op))?,
    })
}

fn video_from_row(row: &sqlx::postgres::PgRow, op: &str) -> Result<Video> {
    let size_bytes: i64 = row.try_get("size_bytes").map_err(storage(op))?;
    let duration_secs: Option<i32> = row.try_get("duration_secs").map_err(storage(op))?;
    Ok(Video {
        id: row.try_get("id").map_err(storage(op))?,
        title: row.try_get("title").map_err(storage(op))?,
        file_name: row.try_get("file_name").map_err(storage(op))?,
        content_hash: row.try_get("content_hash").map_err(storage(op))?,
        size_bytes: size_bytes as u64,
        duration_secs: duration_secs.map(|d| d as u32),
        uploaded_at: row.try_get("uploaded_at").map_err(storage(op))?,
    })
}

fn assignment_from_row(row: &sqlx::postgres::PgRow, op: &str) -> Result<Assignment> {
    let content: serde_json::Value = row.try_get("content").map_err(storage(op))?;
    Ok(Assignment {
        id: row.try_get("id").map_err(storage(op))?,
        device_id: row.try_get("device_id").map_err(storage(op))?,
        content: serde_json::from_value(content).map_err(decode(op))?,
        schedule: json_column(row, "schedule", op)?,
        assigned_at: row.try_get("assigned_at").map_err(storage(op))?,
    })
}

async fn insert_delivery_tx(
    tx: &mut Transaction<'_, Postgres>,
    delivery: &BroadcastDelivery,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO broadcast_deliveries (broadcast_id, device_id, acknowledged_at, displayed_at, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (broadcast_id, device_id) DO NOTHING
        "#,
    )
    .bind(delivery.broadcast_id)
    .bind(delivery.device_id)
    .bind(delivery.acknowledged_at)
    .bind(delivery.displayed_at)
    .bind(delivery.created_at)
    .execute(&mut **tx)
    .await
    .map_err(storage("insert_delivery"))?;
    Ok(())
}

#[async_trait]
impl DeviceRepository for PostgresStore {
    async fn insert_device(&self, device: Device) -> Result<()> {
        let content = device
            .current_content
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(decode("insert_device"))?;
        sqlx::query(
            r#"
            INSERT INTO devices (id, name, serial, credential_hash, ip_address, registered_at,
                                 last_seen, current_content, software_version, group_id, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(device.id)
        .bind(&device.name)
        .bind(&device.serial)
        .bind(&device.credential_hash)
        .bind(&device.ip_address)
        .bind(device.registered_at)
        .bind(device.last_seen)
        .bind(content)
        .bind(device.software_version.to_string())
        .bind(device.group_id)
        .bind(device.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(storage("insert_device"))?;
        Ok(())
    }

    async fn get_device(&self, id: Uuid) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("get_device"))?;
        row.map(|r| device_from_row(&r, "get_device")).transpose()
    }

    async fn find_by_serial(&self, serial: &str) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT * FROM devices WHERE serial = $1 AND deleted_at IS NULL")
            .bind(serial)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("find_by_serial"))?;
        row.map(|r| device_from_row(&r, "find_by_serial"))
            .transpose()
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let rows =
            sqlx::query("SELECT * FROM devices WHERE deleted_at IS NULL ORDER BY registered_at")
                .fetch_all(&self.pool)
                .await
                .map_err(storage("list_devices"))?;
        rows.iter()
            .map(|r| device_from_row(r, "list_devices"))
            .collect()
    }

    async fn list_by_group(&self, group_id: Uuid) -> Result<Vec<Device>> {
        let rows = sqlx::query(
            "SELECT * FROM devices WHERE group_id = $1 AND deleted_at IS NULL ORDER BY registered_at",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage("list_by_group"))?;
        rows.iter()
            .map(|r| device_from_row(r, "list_by_group"))
            .collect()
    }

    async fn apply_heartbeat(&self, id: Uuid, patch: HeartbeatPatch) -> Result<bool> {
        let content = patch
            .current_content
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(decode("apply_heartbeat"))?;
        // Single UPDATE keeps concurrent heartbeats for the same device
        // row-atomic without an explicit lock.
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET last_seen = $2,
                current_content = COALESCE($3, current_content),
                software_version = COALESCE($4, software_version),
                ip_address = COALESCE($5, ip_address)
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(patch.seen_at)
        .bind(content)
        .bind(patch.software_version.map(|v| v.to_string()))
        .bind(patch.ip_address)
        .execute(&self.pool)
        .await
        .map_err(storage("apply_heartbeat"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn rotate_credential(&self, id: Uuid, credential_hash: String) -> Result<()> {
        sqlx::query("UPDATE devices SET credential_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(credential_hash)
            .execute(&self.pool)
            .await
            .map_err(storage("rotate_credential"))?;
        Ok(())
    }

    async fn soft_delete_device(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result =
            sqlx::query("UPDATE devices SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(storage("soft_delete_device"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_group(&self, group: DeviceGroup) -> Result<()> {
        sqlx::query(
            "INSERT INTO device_groups (id, name, description, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(group.id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage("insert_group"))?;
        Ok(())
    }

    async fn get_group(&self, id: Uuid) -> Result<Option<DeviceGroup>> {
        let row = sqlx::query("SELECT * FROM device_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("get_group"))?;
        row.map(|r| {
            Ok(DeviceGroup {
                id: r.try_get("id").map_err(storage("get_group"))?,
                name: r.try_get("name").map_err(storage("get_group"))?,
                description: r.try_get("description").map_err(storage("get_group"))?,
                created_at: r.try_get("created_at").map_err(storage("get_group"))?,
            })
        })
        .transpose()
    }

    async fn list_groups(&self) -> Result<Vec<DeviceGroup>> {
        let rows = sqlx::query("SELECT * FROM device_groups ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list_groups"))?;
        rows.iter()
            .map(|r| {
                Ok(DeviceGroup {
                    id: r.try_get("id").map_err(storage("list_groups"))?,
                    name: r.try_get("name").map_err(storage("list_groups"))?,
                    description: r.try_get("description").map_err(storage("list_groups"))?,
                    created_at: r.try_get("created_at").map_err(storage("list_groups"))?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ContentRepository for PostgresStore {
    async fn insert_video(&self, video: Video) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO videos (id, title, file_name, content_hash, size_bytes, duration_secs, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(video.id)
        .bind(&video.title)
        .bind(&video.file_name)
        .bind(&video.content_hash)
        .bind(video.size_bytes as i64)
        .bind(video.duration_secs.map(|d| d as i32))
        .bind(video.uploaded_at)
        .execute(&self.pool)
        .await
        .map_err(storage("insert_video"))?;
        Ok(())
    }

    async fn get_video(&self, id: Uuid) -> Result<Option<Video>> {
        let row = sqlx::query("SELECT * FROM videos WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("get_video"))?;
        row.map(|r| video_from_row(&r, "get_video")).transpose()
    }

    async fn list_videos(&self) -> Result<Vec<Video>> {
        let rows = sqlx::query("SELECT * FROM videos ORDER BY uploaded_at")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list_videos"))?;
        rows.iter()
            .map(|r| video_from_row(r, "list_videos"))
            .collect()
    }

    async fn insert_playlist(&self, playlist: Playlist) -> Result<()> {
        sqlx::query("INSERT INTO playlists (id, name, created_at, updated_at) VALUES ($1, $2, $3, $4)")
            .bind(playlist.id)
            .bind(&playlist.name)
            .bind(playlist.created_at)
            .bind(playlist.updated_at)
            .execute(&self.pool)
            .await
            .map_err(storage("insert_playlist"))?;
        Ok(())
    }

    async fn get_playlist(&self, id: Uuid) -> Result<Option<Playlist>> {
        let row = sqlx::query("SELECT * FROM playlists WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("get_playlist"))?;
        row.map(|r| {
            Ok(Playlist {
                id: r.try_get("id").map_err(storage("get_playlist"))?,
                name: r.try_get("name").map_err(storage("get_playlist"))?,
                created_at: r.try_get("created_at").map_err(storage("get_playlist"))?,
                updated_at: r.try_get("updated_at").map_err(storage("get_playlist"))?,
            })
        })
        .transpose()
    }

    async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        let rows = sqlx::query("SELECT * FROM playlists ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list_playlists"))?;
        rows.iter()
            .map(|r| {
                Ok(Playlist {
                    id: r.try_get("id").map_err(storage("list_playlists"))?,
                    name: r.try_get("name").map_err(storage("list_playlists"))?,
                    created_at: r.try_get("created_at").map_err(storage("list_playlists"))?,
                    updated_at: r.try_get("updated_at").map_err(storage("list_playlists"))?,
                })
            })
            .collect()
    }

    async fn replace_playlist_items(
        &self,
        playlist_id: Uuid,
        items: Vec<PlaylistItem>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("replace_playlist_items"))?;

        sqlx::query("DELETE FROM playlist_items WHERE playlist_id = $1")
            .bind(playlist_id)
            .execute(&mut *tx)
            .await
            .map_err(storage("replace_playlist_items"))?;

        for item in &items {
            sqlx::query(
                r#"
                INSERT INTO playlist_items (playlist_id, video_id, position, added_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(item.playlist_id)
            .bind(item.video_id)
            .bind(item.position as i32)
            .bind(item.added_at)
            .execute(&mut *tx)
            .await
            .map_err(storage("replace_playlist_items"))?;
        }

        sqlx::query("UPDATE playlists SET updated_at = $2 WHERE id = $1")
            .bind(playlist_id)
            .bind(updated_at)
            .execute(&mut *tx)
            .await
            .map_err(storage("replace_playlist_items"))?;

        tx.commit()
            .await
            .map_err(storage("replace_playlist_items"))?;
        Ok(())
    }

    async fn playlist_items(&self, playlist_id: Uuid) -> Result<Vec<PlaylistItem>> {
        let rows =
            sqlx::query("SELECT * FROM playlist_items WHERE playlist_id = $1 ORDER BY position")
                .bind(playlist_id)
                .fetch_all(&self.pool)
                .await
                .map_err(storage("playlist_items"))?;
        rows.iter()
            .map(|r| {
                let position: i32 = r.try_get("position").map_err(storage("playlist_items"))?;
                Ok(PlaylistItem {
                    playlist_id: r
                        .try_get("playlist_id")
                        .map_err(storage("playlist_items"))?,
                    video_id: r.try_get("video_id").map_err(storage("playlist_items"))?,
                    position: position as u32,
                    added_at: r.try_get("added_at").map_err(storage("playlist_items"))?,
                })
            })
            .collect()
    }

    async fn upsert_assignment(&self, assignment: Assignment) -> Result<()> {
        let content =
            serde_json::to_value(&assignment.content).map_err(decode("upsert_assignment"))?;
        let schedule = assignment
            .schedule
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(decode("upsert_assignment"))?;
        sqlx::query(
            r#"
            INSERT INTO assignments (device_id, id, content, schedule, assigned_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (device_id) DO UPDATE
            SET id = EXCLUDED.id,
                content = EXCLUDED.content,
                schedule = EXCLUDED.schedule,
                assigned_at = EXCLUDED.assigned_at
            "#,
        )
        .bind(assignment.device_id)
        .bind(assignment.id)
        .bind(content)
        .bind(schedule)
        .bind(assignment.assigned_at)
        .execute(&self.pool)
        .await
        .map_err(storage("upsert_assignment"))?;
        Ok(())
    }

    async fn assignment_for_device(&self, device_id: Uuid) -> Result<Option<Assignment>> {
        let row = sqlx::query("SELECT * FROM assignments WHERE device_id = $1")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("assignment_for_device"))?;
        row.map(|r| assignment_from_row(&r, "assignment_for_device"))
            .transpose()
    }

    async fn clear_assignment(&self, device_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM assignments WHERE device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await
            .map_err(storage("clear_assignment"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl BroadcastRepository for PostgresStore {
    async fn create_broadcast(
        &self,
        broadcast: EmergencyBroadcast,
        deliveries: Vec<BroadcastDelivery>,
    ) -> Result<()> {
        let target = serde_json::to_value(&broadcast.target).map_err(decode("create_broadcast"))?;
        let mut tx = self.pool.begin().await.map_err(storage("create_broadcast"))?;

        sqlx::query(
            r#"
            INSERT INTO broadcasts (id, title, message, video_id, priority, duration_secs,
                                    target, status, activate_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(broadcast.id)
        .bind(&broadcast.title)
        .bind(&broadcast.message)
        .bind(broadcast.video_id)
        .bind(broadcast.priority as i16)
        .bind(broadcast.duration_secs.map(|d| d as i32))
        .bind(target)
        .bind(broadcast.status.as_str())
        .bind(broadcast.activate_at)
        .bind(broadcast.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage("create_broadcast"))?;

        for delivery in &deliveries {
            insert_delivery_tx(&mut tx, delivery).await?;
        }

        tx.commit().await.map_err(storage("create_broadcast"))?;
        Ok(())
    }

    async fn get_broadcast(&self, id: Uuid) -> Result<Option<EmergencyBroadcast>> {
        let row = sqlx::query("SELECT * FROM broadcasts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("get_broadcast"))?;
        row.map(|r| broadcast_from_row(&r, "get_broadcast"))
            .transpose()
    }

    async fn list_with_status(&self, status: BroadcastStatus) -> Result<Vec<EmergencyBroadcast>> {
        let rows =
            sqlx::query("SELECT * FROM broadcasts WHERE status = $1 ORDER BY created_at, id")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list_with_status"))?;
        rows.iter()
            .map(|r| broadcast_from_row(r, "list_with_status"))
            .collect()
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: BroadcastStatus,
        to: BroadcastStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE broadcasts SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage("transition_status"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_for_device(&self, device_id: Uuid) -> Result<Vec<EmergencyBroadcast>> {
        let rows = sqlx::query(
            r#"
            SELECT b.* FROM broadcasts b
            JOIN broadcast_deliveries d ON d.broadcast_id = b.id
            WHERE d.device_id = $1 AND b.status = 'active'
            ORDER BY b.created_at, b.id
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage("active_for_device"))?;
        rows.iter()
            .map(|r| broadcast_from_row(r, "active_for_device"))
            .collect()
    }

    async fn get_delivery(
        &self,
        broadcast_id: Uuid,
        device_id: Uuid,
    ) -> Result<Option<BroadcastDelivery>> {
        let row = sqlx::query(
            "SELECT * FROM broadcast_deliveries WHERE broadcast_id = $1 AND device_id = $2",
        )
        .bind(broadcast_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("get_delivery"))?;
        row.map(|r| delivery_from_row(&r, "get_delivery"))
            .transpose()
    }

    async fn mark_acknowledged(
        &self,
        broadcast_id: Uuid,
        device_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<BroadcastDelivery>> {
        let row = sqlx::query(
            r#"
            UPDATE broadcast_deliveries
            SET acknowledged_at = COALESCE(acknowledged_at, $3)
            WHERE broadcast_id = $1 AND device_id = $2
            RETURNING *
            "#,
        )
        .bind(broadcast_id)
        .bind(device_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("mark_acknowledged"))?;
        row.map(|r| delivery_from_row(&r, "mark_acknowledged"))
            .transpose()
    }

    async fn mark_displayed(
        &self,
        broadcast_id: Uuid,
        device_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<BroadcastDelivery>> {
        let row = sqlx::query(
            r#"
            UPDATE broadcast_deliveries
            SET displayed_at = COALESCE(displayed_at, $3)
            WHERE broadcast_id = $1 AND device_id = $2
            RETURNING *
            "#,
        )
        .bind(broadcast_id)
        .bind(device_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("mark_displayed"))?;
        row.map(|r| delivery_from_row(&r, "mark_displayed"))
            .transpose()
    }
}

#[async_trait]
impl UpdateRepository for PostgresStore {
    async fn insert_update(&self, update: SystemUpdate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_updates (id, version, description, file_name, checksum,
                                        size_bytes, is_critical, released_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(update.id)
        .bind(update.version.to_string())
        .bind(&update.description)
        .bind(&update.file_name)
        .bind(&update.checksum)
        .bind(update.size_bytes as i64)
        .bind(update.is_critical)
        .bind(update.released_at)
        .execute(&self.pool)
        .await
        .map_err(storage("insert_update"))?;
        Ok(())
    }

    async fn get_update(&self, id: Uuid) -> Result<Option<SystemUpdate>> {
        let row = sqlx::query("SELECT * FROM system_updates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("get_update"))?;
        row.map(|r| system_update_from_row(&r, "get_update"))
            .transpose()
    }

    async fn list_updates(&self) -> Result<Vec<SystemUpdate>> {
        let rows = sqlx::query("SELECT * FROM system_updates ORDER BY released_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list_updates"))?;
        let mut updates: Vec<SystemUpdate> = rows
            .iter()
            .map(|r| system_update_from_row(r, "list_updates"))
            .collect::<Result<_>>()?;
        // Version order, not release order; suffix rules live in ReleaseVersion
        updates.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(updates)
    }

    async fn insert_device_update(&self, row: DeviceUpdate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO device_updates (id, device_id, update_id, status, progress, error,
                                        started_at, completed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (device_id, update_id) DO NOTHING
            "#,
        )
        .bind(row.id)
        .bind(row.device_id)
        .bind(row.update_id)
        .bind(row.status.as_str())
        .bind(row.progress as i16)
        .bind(&row.error)
        .bind(row.started_at)
        .bind(row.completed_at)
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage("insert_device_update"))?;
        Ok(())
    }

    async fn get_device_update(
        &self,
        device_id: Uuid,
        update_id: Uuid,
    ) -> Result<Option<DeviceUpdate>> {
        let row =
            sqlx::query("SELECT * FROM device_updates WHERE device_id = $1 AND update_id = $2")
                .bind(device_id)
                .bind(update_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage("get_device_update"))?;
        row.map(|r| device_update_from_row(&r, "get_device_update"))
            .transpose()
    }

    async fn device_updates_for_device(&self, device_id: Uuid) -> Result<Vec<DeviceUpdate>> {
        let rows =
            sqlx::query("SELECT * FROM device_updates WHERE device_id = $1 ORDER BY created_at")
                .bind(device_id)
                .fetch_all(&self.pool)
                .await
                .map_err(storage("device_updates_for_device"))?;
        rows.iter()
            .map(|r| device_update_from_row(r, "device_updates_for_device"))
            .collect()
    }

    async fn with_device_update(
        &self,
        device_id: Uuid,
        update_id: Uuid,
        apply: Box<dyn FnOnce(Option<DeviceUpdate>) -> Result<DeviceUpdate> + Send>,
    ) -> Result<DeviceUpdate> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("with_device_update"))?;

        // Row lock serializes concurrent reports for the same pair.
        let row = sqlx::query(
            "SELECT * FROM device_updates WHERE device_id = $1 AND update_id = $2 FOR UPDATE",
        )
        .bind(device_id)
        .bind(update_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage("with_device_update"))?;

        let current = row
            .map(|r| device_update_from_row(&r, "with_device_update"))
            .transpose()?;
        let next = apply(current)?;

        sqlx::query(
            r#"
            INSERT INTO device_updates (id, device_id, update_id, status, progress, error,
                                        started_at, completed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (device_id, update_id) DO UPDATE
            SET status = EXCLUDED.status,
                progress = EXCLUDED.progress,
                error = EXCLUDED.error,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(next.id)
        .bind(next.device_id)
        .bind(next.update_id)
        .bind(next.status.as_str())
        .bind(next.progress as i16)
        .bind(&next.error)
        .bind(next.started_at)
        .bind(next.completed_at)
        .bind(next.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage("with_device_update"))?;

        tx.commit().await.map_err(storage("with_device_update"))?;
        Ok(next)
    }
}

#[async_trait]
impl ConfigRepository for PostgresStore {
    async fn upsert_entry(&self, device_id: Uuid, entry: DeviceConfigEntry) -> Result<()> {
        let value = serde_json::to_value(&entry.value).map_err(decode("upsert_entry"))?;
        sqlx::query(
            r#"
            INSERT INTO device_config (device_id, key, value, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (device_id, key) DO UPDATE
            SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(device_id)
        .bind(&entry.key)
        .bind(value)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage("upsert_entry"))?;
        Ok(())
    }

    async fn entries_for_device(&self, device_id: Uuid) -> Result<Vec<DeviceConfigEntry>> {
        let rows = sqlx::query("SELECT * FROM device_config WHERE device_id = $1 ORDER BY key")
            .bind(device_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("entries_for_device"))?;
        rows.iter()
            .map(|r| {
                let value: serde_json::Value =
                    r.try_get("value").map_err(storage("entries_for_device"))?;
                Ok(DeviceConfigEntry {
                    key: r.try_get("key").map_err(storage("entries_for_device"))?,
                    value: serde_json::from_value(value).map_err(decode("entries_for_device"))?,
                    updated_at: r
                        .try_get("updated_at")
                        .map_err(storage("entries_for_device"))?,
                })
            })
            .collect()
    }
}
