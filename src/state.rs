use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Three-level safety status. GREEN is normal, YELLOW elevated risk,
/// RED an active emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyLevel {
    #[default]
    Green,
    Yellow,
    Red,
}

/// A positioning fix as reported by the location sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub lat: f64,
    pub lng: f64,
    /// Estimated accuracy in meters.
    pub accuracy: f64,
}

/// Coordinates captured into an alert record. Accuracy is not kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl From<GeoFix> for LatLng {
    fn from(fix: GeoFix) -> Self {
        Self {
            lat: fix.lat,
            lng: fix.lng,
        }
    }
}

/// Live state of the monitored user. Rewritten continuously by the
/// sensor pipeline; read-only everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub id: String,
    pub user_name: Option<String>,
    pub safety_level: SafetyLevel,
    /// Normalized microphone loudness, 0-100.
    pub sound_level: f64,
    /// Qualifying shakes seen in the current window, 0-3.
    pub shake_count: u8,
    pub location: Option<GeoFix>,
    pub last_update: DateTime<Utc>,
}

impl UserState {
    pub fn new(id: String, user_name: Option<String>) -> Self {
        Self {
            id,
            user_name,
            safety_level: SafetyLevel::Green,
            sound_level: 0.0,
            shake_count: 0,
            location: None,
            last_update: Utc::now(),
        }
    }
}

/// Immutable record of one emergency trigger. Prepended to the alert
/// list and never mutated afterwards; marking the user safe does not
/// retract it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub user_id: String,
    pub user_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub safety_level: SafetyLevel,
    pub location: Option<LatLng>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub active: bool,
}

impl EmergencyContact {
    pub fn new(name: String, phone: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            phone,
            active: true,
        }
    }
}

pub const PANIC_THRESHOLD_MIN: u32 = 10;
pub const PANIC_THRESHOLD_MAX: u32 = 100;
pub const SHAKE_THRESHOLD_MIN: u32 = 5;
pub const SHAKE_THRESHOLD_MAX: u32 = 30;

/// Admin-editable configuration: the contact list and the two trigger
/// thresholds. `auto_call` and `auto_sms` are persisted and editable
/// but consulted by no logic; no dispatch integration exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminSettings {
    pub contacts: Vec<EmergencyContact>,
    pub auto_call: bool,
    pub auto_sms: bool,
    /// Acceleration magnitude above which a shake qualifies, 5-30.
    pub shake_threshold: u32,
    /// Sound level percentage above which an emergency is declared, 10-100.
    pub panic_threshold: u32,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            contacts: Vec::new(),
            auto_call: true,
            auto_sms: true,
            shake_threshold: 15,
            panic_threshold: 85,
        }
    }
}

impl AdminSettings {
    /// Force both thresholds back into their slider ranges.
    pub fn clamp_thresholds(&mut self) {
        self.panic_threshold = self
            .panic_threshold
            .clamp(PANIC_THRESHOLD_MIN, PANIC_THRESHOLD_MAX);
        self.shake_threshold = self
            .shake_threshold
            .clamp(SHAKE_THRESHOLD_MIN, SHAKE_THRESHOLD_MAX);
    }
}
