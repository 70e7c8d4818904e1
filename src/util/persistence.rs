#![allow(dead_code)]

//! Durable, crash-tolerant persistence for the shipment table.
//!
//! The store is the single owner of the backing file. Every mutation reads the
//! full state, changes one entry, and writes the full state back through a
//! temp-file + rename so a reader never observes a torn document.

use std::fs;
use std::io;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde_json::Error as SerdeError;

use crate::domain::ShipmentState;
use crate::util::unix_now;

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "RateKeeper";
const APP_NAME: &str = "RateKeeper";

const STATE_FILENAME: &str = "shipments.json";

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("storage directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}

/// File-backed table of pending/purchased/voided shipments.
pub struct ShipmentStore {
    path: PathBuf,
}

impl ShipmentStore {
    /// Store at the platform data directory (created on first use).
    pub fn open_default() -> Result<Self, PersistError> {
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
            .ok_or(PersistError::StorageUnavailable)?;
        let base = dirs.data_dir().to_path_buf();
        fs::create_dir_all(&base)?;
        Ok(Self {
            path: base.join(STATE_FILENAME),
        })
    }

    /// Store at an explicit path. Used by tests and by callers that keep
    /// state somewhere non-standard.
    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the full state. A missing or unparsable file degrades to the
    /// empty state; first-run absence and corruption are not fatal.
    pub fn load(&self) -> ShipmentState {
        if !self.path.exists() {
            return ShipmentState::default();
        }

        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    println!("[store] Failed to parse {}: {e}", self.path.display());
                    ShipmentState::default()
                }
            },
            Err(e) => {
                println!("[store] Failed to read {}: {e}", self.path.display());
                ShipmentState::default()
            }
        }
    }

    /// Stamp `last_updated` and replace the backing file atomically.
    pub fn save(&self, state: &mut ShipmentState) -> Result<(), PersistError> {
        state.last_updated = unix_now();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, Parcel, PendingShipment, RateOption, ShipmentStatus};

    fn sample_shipment(id: &str) -> PendingShipment {
        PendingShipment {
            id: id.to_string(),
            created_at: 1_700_000_000,
            order_ref: Some("order-77".to_string()),
            to_address: Address {
                street1: "48 Leicester Square".to_string(),
                city: "London".to_string(),
                postal_code: "WC2H 7LU".to_string(),
                country: "GB".to_string(),
                ..Address::default()
            },
            from_address: Address {
                street1: "1 Warehouse Way".to_string(),
                city: "Leeds".to_string(),
                postal_code: "LS1 4AP".to_string(),
                country: "GB".to_string(),
                ..Address::default()
            },
            parcel: Parcel {
                weight_kg: 15.0,
                ..Parcel::default()
            },
            rates: vec![RateOption {
                id: "rate_1".to_string(),
                carrier: "RoyalMail".to_string(),
                service: "Tracked48".to_string(),
                price: "9.99".to_string(),
                currency: "GBP".to_string(),
                est_delivery_days: Some(2),
                est_delivery_date: None,
            }],
            status: ShipmentStatus::Pending,
            tracking_code: None,
            label_url: None,
        }
    }

    #[test]
    fn load_after_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShipmentStore::at_path(dir.path().join("shipments.json"));

        let mut state = ShipmentState::default();
        state
            .shipments
            .insert("shp_1".to_string(), sample_shipment("shp_1"));
        store.save(&mut state).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.shipments.len(), 1);
        assert_eq!(loaded.shipments["shp_1"], state.shipments["shp_1"]);
        assert!(loaded.last_updated > 0);
    }

    #[test]
    fn empty_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShipmentStore::at_path(dir.path().join("shipments.json"));

        let mut state = ShipmentState::default();
        store.save(&mut state).unwrap();
        assert!(store.load().shipments.is_empty());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShipmentStore::at_path(dir.path().join("nope.json"));
        assert!(store.load().shipments.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipments.json");
        fs::write(&path, "{not valid json").unwrap();

        let store = ShipmentStore::at_path(path);
        assert!(store.load().shipments.is_empty());
    }

    #[test]
    fn save_leaves_no_temp_residue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipments.json");
        let store = ShipmentStore::at_path(path.clone());

        let mut state = ShipmentState::default();
        state
            .shipments
            .insert("shp_2".to_string(), sample_shipment("shp_2"));
        store.save(&mut state).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
