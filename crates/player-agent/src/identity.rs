//! Persisted device identity
//!
//! The credential is only ever handed out at registration, so losing this
//! file means re-registering, which rotates it server-side. Writes go through
//! a temp file and rename so a power cut cannot leave a torn identity.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use signage_gateway_core::{Result, SignageError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: Uuid,
    pub credential: String,
    pub serial: String,
    pub name: String,
}

impl DeviceIdentity {
    pub async fn load(path: &Path) -> Result<Option<DeviceIdentity>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let identity = serde_json::from_slice(&bytes).map_err(|e| {
                    SignageError::Storage(format!("corrupt identity file {}: {}", path.display(), e))
                })?;
                Ok(Some(identity))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SignageError::Storage(format!(
                "reading identity file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub async fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SignageError::Storage(format!("creating {}: {}", parent.display(), e)))?;
        }

        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| SignageError::Storage(format!("encoding identity: {}", e)))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| SignageError::Storage(format!("writing {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| SignageError::Storage(format!("renaming identity file: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let identity = DeviceIdentity {
            device_id: Uuid::new_v4(),
            credential: "secret-token".to_string(),
            serial: "RPI-001".to_string(),
            name: "lobby".to_string(),
        };
        identity.store(&path).await.unwrap();

        let loaded = DeviceIdentity::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded.device_id, identity.device_id);
        assert_eq!(loaded.credential, "secret-token");
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = DeviceIdentity::load(&dir.path().join("absent.json"))
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let err = DeviceIdentity::load(&path).await.unwrap_err();
        assert!(matches!(err, SignageError::Storage(_)));
    }
}
