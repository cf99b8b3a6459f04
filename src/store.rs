use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::state::{AdminSettings, Alert, EmergencyContact, UserState};

/// Change notification emitted after every successful write, so the
/// user and admin views stay in sync within one process. Subscribers
/// that lag simply lose old events; writers never block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StoreEvent {
    State(UserState),
    Alert(Alert),
    Settings(AdminSettings),
}

#[derive(Debug)]
pub enum StoreError {
    /// A settings write carried a stale version; the caller must re-read
    /// and retry instead of silently overwriting a concurrent edit.
    VersionConflict { expected: u64, actual: u64 },
    UnknownContact(Uuid),
    EmptyField(&'static str),
    Decode(serde_json::Error),
    Io(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::VersionConflict { expected, actual } => write!(
                f,
                "settings version conflict: write expected {}, store is at {}",
                expected, actual
            ),
            StoreError::UnknownContact(id) => write!(f, "no contact with id {}", id),
            StoreError::EmptyField(field) => write!(f, "contact {} must not be empty", field),
            StoreError::Decode(e) => write!(f, "stored state is not valid: {}", e),
            StoreError::Io(e) => write!(f, "state file error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Schema of the on-disk snapshot: identity, admin settings and the
/// alert log survive a restart; live sensor state does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub user_id: String,
    pub user_name: Option<String>,
    pub settings: AdminSettings,
    pub alerts: Vec<Alert>,
}

impl StoreSnapshot {
    pub fn seed(user_id: String, user_name: Option<String>, settings: AdminSettings) -> Self {
        Self {
            user_id,
            user_name,
            settings,
            alerts: Vec::new(),
        }
    }
}

/// Owning state manager for everything the two views share.
///
/// The sensor pipeline is the single writer of the user state record;
/// admin settings use compare-and-set versions so two racing editors
/// get an explicit conflict instead of last-write-wins. Each write
/// fans out a [`StoreEvent`] on the broadcast bus.
pub struct GuardStore {
    user_state: RwLock<(u64, UserState)>,
    settings: RwLock<(u64, AdminSettings)>,
    alerts: Mutex<Vec<Alert>>,
    tx: broadcast::Sender<StoreEvent>,
    persist_path: Option<PathBuf>,
}

impl GuardStore {
    pub fn new(initial: StoreSnapshot, persist_path: Option<PathBuf>) -> Self {
        let (tx, _) = broadcast::channel(1024);
        let state = UserState::new(initial.user_id, initial.user_name);
        Self {
            user_state: RwLock::new((0, state)),
            settings: RwLock::new((0, initial.settings)),
            alerts: Mutex::new(initial.alerts),
            tx,
            persist_path,
        }
    }

    /// Read a snapshot file, surfacing malformed JSON as a typed decode
    /// error so the caller can decide to substitute defaults.
    pub fn load_snapshot(path: &Path) -> Result<StoreSnapshot, StoreError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> UserState {
        self.user_state.read().unwrap().1.clone()
    }

    pub fn state_version(&self) -> u64 {
        self.user_state.read().unwrap().0
    }

    /// Replace the user state record. Single-writer by design; the
    /// version bumps unconditionally. Returns the new version.
    pub fn publish_state(&self, state: UserState) -> u64 {
        let version = {
            let mut guard = self.user_state.write().unwrap();
            guard.0 += 1;
            guard.1 = state.clone();
            guard.0
        };
        let _ = self.tx.send(StoreEvent::State(state));
        version
    }

    /// Replace the user state after an identity edit. Unlike the
    /// per-sample [`GuardStore::publish_state`], the snapshot is written
    /// through so the new id and name survive a restart.
    pub fn publish_identity(&self, state: UserState) -> u64 {
        let version = self.publish_state(state);
        self.persist();
        version
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    /// Prepend a new alert record. Records are immutable once stored.
    pub fn push_alert(&self, alert: Alert) {
        self.alerts.lock().unwrap().insert(0, alert.clone());
        self.persist();
        let _ = self.tx.send(StoreEvent::Alert(alert));
    }

    /// Current admin settings together with their version, for
    /// compare-and-set updates.
    pub fn settings(&self) -> (u64, AdminSettings) {
        let guard = self.settings.read().unwrap();
        (guard.0, guard.1.clone())
    }

    /// Replace the admin settings. `expected_version`, when given, must
    /// match the stored version or the write is rejected. Thresholds
    /// are clamped to their slider ranges before storing.
    pub fn update_settings(
        &self,
        mut new: AdminSettings,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        new.clamp_thresholds();
        let (version, stored) = {
            let mut guard = self.settings.write().unwrap();
            if let Some(expected) = expected_version {
                if expected != guard.0 {
                    return Err(StoreError::VersionConflict {
                        expected,
                        actual: guard.0,
                    });
                }
            }
            guard.0 += 1;
            guard.1 = new;
            (guard.0, guard.1.clone())
        };
        self.persist();
        let _ = self.tx.send(StoreEvent::Settings(stored));
        Ok(version)
    }

    pub fn add_contact(&self, name: String, phone: String) -> Result<EmergencyContact, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::EmptyField("name"));
        }
        if phone.trim().is_empty() {
            return Err(StoreError::EmptyField("phone"));
        }
        let contact = EmergencyContact::new(name, phone);
        let added = contact.clone();
        self.mutate_contacts(move |contacts| {
            contacts.push(contact);
            Ok(())
        })?;
        Ok(added)
    }

    pub fn update_contact(
        &self,
        id: Uuid,
        name: String,
        phone: String,
    ) -> Result<EmergencyContact, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::EmptyField("name"));
        }
        if phone.trim().is_empty() {
            return Err(StoreError::EmptyField("phone"));
        }
        let mut updated = None;
        self.mutate_contacts(|contacts| {
            let contact = contacts
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or(StoreError::UnknownContact(id))?;
            contact.name = name;
            contact.phone = phone;
            updated = Some(contact.clone());
            Ok(())
        })?;
        Ok(updated.expect("contact updated above"))
    }

    pub fn remove_contact(&self, id: Uuid) -> Result<(), StoreError> {
        self.mutate_contacts(|contacts| {
            let before = contacts.len();
            contacts.retain(|c| c.id != id);
            if contacts.len() == before {
                return Err(StoreError::UnknownContact(id));
            }
            Ok(())
        })
    }

    pub fn toggle_contact(&self, id: Uuid) -> Result<EmergencyContact, StoreError> {
        let mut toggled = None;
        self.mutate_contacts(|contacts| {
            let contact = contacts
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or(StoreError::UnknownContact(id))?;
            contact.active = !contact.active;
            toggled = Some(contact.clone());
            Ok(())
        })?;
        Ok(toggled.expect("contact toggled above"))
    }

    /// Snapshot of everything that survives a restart.
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.user_state.read().unwrap();
        StoreSnapshot {
            user_id: state.1.id.clone(),
            user_name: state.1.user_name.clone(),
            settings: self.settings.read().unwrap().1.clone(),
            alerts: self.alerts.lock().unwrap().clone(),
        }
    }

    /// Run an edit against the contact list inside the settings record,
    /// bumping the version and notifying on success.
    fn mutate_contacts<F>(&self, edit: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Vec<EmergencyContact>) -> Result<(), StoreError>,
    {
        let stored = {
            let mut guard = self.settings.write().unwrap();
            edit(&mut guard.1.contacts)?;
            guard.0 += 1;
            guard.1.clone()
        };
        self.persist();
        let _ = self.tx.send(StoreEvent::Settings(stored));
        Ok(())
    }

    fn persist(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let snapshot = self.snapshot();
        let result = serde_json::to_vec_pretty(&snapshot)
            .map_err(StoreError::from)
            .and_then(|bytes| std::fs::write(path, bytes).map_err(StoreError::from));
        if let Err(e) = result {
            warn!("failed to persist state to {}: {}", path.display(), e);
        }
    }
}
