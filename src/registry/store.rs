//! JSON-file backed device registry

use a2dp_switcher_core::{DeviceId, DeviceRecord, DeviceRegistry, RegistryError};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const REGISTRY_FILE: &str = "devices.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreData {
    custom_names: BTreeMap<u32, String>,
    hidden: BTreeSet<u32>,
}

/// Registry persisted to `devices.json`, rewritten after every change.
///
/// Concurrent callers are serialized; the last write wins.
pub struct DeviceStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl DeviceStore {
    /// Open the registry in `data_dir`, starting empty if no file exists
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(REGISTRY_FILE);

        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid registry {}", path.display()))?
        } else {
            StoreData::default()
        };

        debug!(
            "[REGISTRY] Loaded {} names, {} hidden from {}",
            data.custom_names.len(),
            data.hidden.len(),
            path.display()
        );

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every device with a stored override
    pub fn records(&self) -> Vec<DeviceRecord> {
        let data = self.data.lock();
        let ids: BTreeSet<u32> = data
            .custom_names
            .keys()
            .chain(data.hidden.iter())
            .copied()
            .collect();

        ids.into_iter()
            .map(|id| DeviceRecord {
                device_id: DeviceId(id),
                custom_name: data.custom_names.get(&id).cloned(),
                hidden: data.hidden.contains(&id),
            })
            .collect()
    }

    fn update<F>(&self, change: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut StoreData),
    {
        let mut data = self.data.lock();
        let mut next = data.clone();
        change(&mut next);

        let content =
            serde_json::to_string_pretty(&next).map_err(|e| RegistryError::Encode(e.to_string()))?;
        if let Err(e) = std::fs::write(&self.path, content) {
            warn!("[REGISTRY] Failed to save {}: {}", self.path.display(), e);
            return Err(e.into());
        }

        *data = next;
        Ok(())
    }
}

impl DeviceRegistry for DeviceStore {
    fn display_name(&self, id: DeviceId, fallback: &str) -> String {
        self.data
            .lock()
            .custom_names
            .get(&id.0)
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }

    fn set_display_name(&self, id: DeviceId, name: &str) -> Result<(), RegistryError> {
        debug!("[REGISTRY] Name for {} = {:?}", id, name);
        self.update(|data| {
            if name.is_empty() {
                data.custom_names.remove(&id.0);
            } else {
                data.custom_names.insert(id.0, name.to_string());
            }
        })
    }

    fn is_visible(&self, id: DeviceId) -> bool {
        !self.data.lock().hidden.contains(&id.0)
    }

    fn set_visible(&self, id: DeviceId, visible: bool) -> Result<(), RegistryError> {
        debug!("[REGISTRY] Visibility for {} = {}", id, visible);
        self.update(|data| {
            if visible {
                data.hidden.remove(&id.0);
            } else {
                data.hidden.insert(id.0);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::open(dir.path()).unwrap();

        assert_eq!(store.display_name(DeviceId(1), "Speaker"), "Speaker");
        store.set_display_name(DeviceId(1), "Kitchen").unwrap();
        assert_eq!(store.display_name(DeviceId(1), "Speaker"), "Kitchen");
    }

    #[test]
    fn test_empty_name_clears_override() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::open(dir.path()).unwrap();

        store.set_display_name(DeviceId(1), "Kitchen").unwrap();
        store.set_display_name(DeviceId(1), "").unwrap();
        assert_eq!(store.display_name(DeviceId(1), "Speaker"), "Speaker");
        assert!(store.records().is_empty());
    }

    #[test]
    fn test_visibility() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::open(dir.path()).unwrap();

        assert!(store.is_visible(DeviceId(9)));
        store.set_visible(DeviceId(9), false).unwrap();
        assert!(!store.is_visible(DeviceId(9)));
        store.set_visible(DeviceId(9), true).unwrap();
        assert!(store.is_visible(DeviceId(9)));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DeviceStore::open(dir.path()).unwrap();
            store.set_display_name(DeviceId(3), "Desk").unwrap();
            store.set_visible(DeviceId(4), false).unwrap();
        }

        let store = DeviceStore::open(dir.path()).unwrap();
        assert_eq!(
            store.records(),
            vec![
                DeviceRecord {
                    device_id: DeviceId(3),
                    custom_name: Some("Desk".into()),
                    hidden: false,
                },
                DeviceRecord {
                    device_id: DeviceId(4),
                    custom_name: None,
                    hidden: true,
                },
            ]
        );
    }

    #[test]
    fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::open(dir.path()).unwrap();
        store.set_display_name(DeviceId(42), "Car").unwrap();
        store.set_visible(DeviceId(7), false).unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["custom_names"]["42"], "Car");
        assert_eq!(value["hidden"], serde_json::json!([7]));
    }

    #[test]
    fn test_failed_save_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::open(dir.path()).unwrap();
        store.set_display_name(DeviceId(1), "Kitchen").unwrap();

        // A directory in place of the file makes every write fail
        std::fs::remove_file(store.path()).unwrap();
        std::fs::create_dir(store.path()).unwrap();

        assert!(matches!(
            store.set_display_name(DeviceId(1), "Desk"),
            Err(RegistryError::Io(_))
        ));
        assert!(store.set_visible(DeviceId(2), false).is_err());

        assert_eq!(store.display_name(DeviceId(1), "Speaker"), "Kitchen");
        assert!(store.is_visible(DeviceId(2)));
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(REGISTRY_FILE), "{not json").unwrap();
        assert!(DeviceStore::open(dir.path()).is_err());
    }
}
