use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::state::{AdminSettings, Alert, GeoFix, LatLng, SafetyLevel, UserState};

/// Fraction of the panic threshold above which the sound level counts
/// as elevated (YELLOW).
pub const ELEVATED_FRACTION: f64 = 0.6;
/// Minimum spacing between two qualifying shakes.
pub const SHAKE_DEBOUNCE_MS: i64 = 500;
/// Idle time after which the shake counter falls back to zero.
pub const SHAKE_DECAY_MS: i64 = 5_000;
/// Qualifying shakes needed to trigger an emergency.
pub const SHAKES_TO_TRIGGER: u8 = 3;

pub const MANUAL_PANIC_REASON: &str = "Manual Panic Button";
pub const SHAKE_REASON: &str = "Device Shaken Thrice";

/// Normalize a block of 0-255 frequency magnitudes into a 0-100 level.
pub fn sound_level_from_magnitudes(magnitudes: &[u8]) -> f64 {
    if magnitudes.is_empty() {
        return 0.0;
    }
    let avg = magnitudes.iter().map(|&m| m as f64).sum::<f64>() / magnitudes.len() as f64;
    (avg / 128.0 * 100.0).min(100.0)
}

/// Trigger thresholds, read from the admin settings before each sample
/// so edits apply immediately.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub panic: u32,
    pub shake: u32,
}

impl From<&AdminSettings> for Thresholds {
    fn from(settings: &AdminSettings) -> Self {
        Self {
            panic: settings.panic_threshold,
            shake: settings.shake_threshold,
        }
    }
}

/// Maps sensor samples onto the GREEN/YELLOW/RED status and produces
/// alert records on emergency triggers.
///
/// Every processing call takes the sample timestamp, so the debounce
/// and decay windows are testable without waiting on wall-clock time.
/// While an emergency is active, further triggers are ignored until
/// [`SafetyMonitor::mark_safe`] is called.
pub struct SafetyMonitor {
    user_id: String,
    user_name: Option<String>,
    safety_level: SafetyLevel,
    sound_level: f64,
    shake_count: u8,
    location: Option<GeoFix>,
    emergency: bool,
    last_shake: Option<DateTime<Utc>>,
}

impl SafetyMonitor {
    pub fn new(user_id: String, user_name: Option<String>) -> Self {
        Self {
            user_id,
            user_name,
            safety_level: SafetyLevel::Green,
            sound_level: 0.0,
            shake_count: 0,
            location: None,
            emergency: false,
            last_shake: None,
        }
    }

    /// Process one microphone sample. Returns the alert record if this
    /// sample triggered an emergency.
    pub fn process_audio(
        &mut self,
        magnitudes: &[u8],
        thresholds: Thresholds,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        self.decay_shakes(now);
        self.sound_level = sound_level_from_magnitudes(magnitudes);
        if self.sound_level > thresholds.panic as f64 {
            return self.trigger_emergency(
                format!("Excessive Panic Sound Level (> {}%)", thresholds.panic),
                now,
            );
        }
        self.reevaluate(thresholds);
        None
    }

    /// Process one accelerometer sample (gravity-inclusive axes).
    pub fn process_motion(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        thresholds: Thresholds,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        self.decay_shakes(now);
        let magnitude = (x * x + y * y + z * z).sqrt();
        if magnitude > thresholds.shake as f64 {
            let spaced_out = self
                .last_shake
                .map_or(true, |t| (now - t).num_milliseconds() >= SHAKE_DEBOUNCE_MS);
            if spaced_out {
                self.last_shake = Some(now);
                self.shake_count = (self.shake_count + 1).min(SHAKES_TO_TRIGGER);
                if self.shake_count >= SHAKES_TO_TRIGGER {
                    return self.trigger_emergency(SHAKE_REASON.to_string(), now);
                }
                self.reevaluate(thresholds);
            }
        }
        None
    }

    /// Update the last-known position. Absence of a fix blocks nothing;
    /// it only omits location from states and alerts.
    pub fn process_position(&mut self, fix: GeoFix) {
        self.location = Some(fix);
    }

    /// Periodic maintenance: expire the shake counter and re-derive the
    /// status. Replaces the per-sample browser timeout with a bounded
    /// tick.
    pub fn tick(&mut self, thresholds: Thresholds, now: DateTime<Utc>) {
        self.decay_shakes(now);
        self.reevaluate(thresholds);
    }

    /// Declare an emergency. Idempotent: returns the new alert record on
    /// the first call and `None` while an emergency is already active.
    pub fn trigger_emergency(&mut self, reason: String, now: DateTime<Utc>) -> Option<Alert> {
        if self.emergency {
            return None;
        }
        self.emergency = true;
        self.safety_level = SafetyLevel::Red;
        info!("emergency triggered: {}", reason);
        Some(Alert {
            id: Uuid::new_v4(),
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
            timestamp: now,
            safety_level: SafetyLevel::Red,
            location: self.location.map(LatLng::from),
            reason,
        })
    }

    /// Manual "mark safe": clears the emergency and the shake counter.
    /// Recorded alerts stay in the log.
    pub fn mark_safe(&mut self) {
        self.emergency = false;
        self.shake_count = 0;
        self.last_shake = None;
        self.safety_level = SafetyLevel::Green;
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    pub fn set_identity(&mut self, user_id: String, user_name: Option<String>) {
        self.user_id = user_id;
        self.user_name = user_name;
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> UserState {
        UserState {
            id: self.user_id.clone(),
            user_name: self.user_name.clone(),
            safety_level: self.safety_level,
            sound_level: self.sound_level,
            shake_count: self.shake_count,
            location: self.location,
            last_update: now,
        }
    }

    fn decay_shakes(&mut self, now: DateTime<Utc>) {
        if self.shake_count > 0 {
            if let Some(t) = self.last_shake {
                if (now - t).num_milliseconds() >= SHAKE_DECAY_MS {
                    self.shake_count = 0;
                }
            }
        }
    }

    /// Combined rule, applied whenever shake count, sound level or the
    /// thresholds change and no emergency is active.
    fn reevaluate(&mut self, thresholds: Thresholds) {
        if self.emergency {
            return;
        }
        self.safety_level = if self.shake_count >= 1
            || self.sound_level > thresholds.panic as f64 * ELEVATED_FRACTION
        {
            SafetyLevel::Yellow
        } else {
            SafetyLevel::Green
        };
    }
}

/// The monitor is shared between the sensor pipeline and the web
/// handlers for the panic and mark-safe operations.
pub type SharedMonitor = Arc<Mutex<SafetyMonitor>>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const TH: Thresholds = Thresholds {
        panic: 85,
        shake: 15,
    };

    fn monitor() -> SafetyMonitor {
        SafetyMonitor::new("USER-1".to_string(), Some("Ana".to_string()))
    }

    /// Magnitudes that normalize to roughly the given 0-100 level.
    fn magnitudes_for_level(level: f64) -> Vec<u8> {
        let value = (level / 100.0 * 128.0).round() as u8;
        vec![value; 64]
    }

    #[test]
    fn test_sound_normalization() {
        assert_eq!(sound_level_from_magnitudes(&[]), 0.0);
        assert_eq!(sound_level_from_magnitudes(&[128; 32]), 100.0);
        // Values above 128 are capped at 100.
        assert_eq!(sound_level_from_magnitudes(&[255; 32]), 100.0);
        let half = sound_level_from_magnitudes(&[64; 32]);
        assert!((half - 50.0).abs() < 1.0);
    }

    #[test]
    fn test_quiet_sample_stays_green() {
        let mut mon = monitor();
        assert!(mon
            .process_audio(&magnitudes_for_level(30.0), TH, Utc::now())
            .is_none());
        let state = mon.snapshot(Utc::now());
        assert_eq!(state.safety_level, SafetyLevel::Green);
        assert!((state.sound_level - 30.0).abs() < 1.0);
    }

    #[test]
    fn test_elevated_sound_goes_yellow() {
        let mut mon = monitor();
        // 60% of 85 is 51; a level of 60 is elevated but not panic.
        assert!(mon
            .process_audio(&magnitudes_for_level(60.0), TH, Utc::now())
            .is_none());
        assert_eq!(mon.snapshot(Utc::now()).safety_level, SafetyLevel::Yellow);
    }

    #[test]
    fn test_panic_sound_triggers_emergency() {
        let mut mon = monitor();
        let alert = mon
            .process_audio(&magnitudes_for_level(90.0), TH, Utc::now())
            .expect("level 90 with threshold 85 must trigger");
        assert_eq!(alert.reason, "Excessive Panic Sound Level (> 85%)");
        assert_eq!(alert.safety_level, SafetyLevel::Red);
        assert_eq!(mon.snapshot(Utc::now()).safety_level, SafetyLevel::Red);
    }

    #[test]
    fn test_emergency_trigger_is_idempotent() {
        let mut mon = monitor();
        let now = Utc::now();
        assert!(mon.trigger_emergency("first".to_string(), now).is_some());
        assert!(mon.trigger_emergency("second".to_string(), now).is_none());
    }

    #[test]
    fn test_three_spaced_shakes_trigger() {
        let mut mon = monitor();
        let start = Utc::now();
        // Magnitude 20 with threshold 15, each 600ms apart.
        assert!(mon.process_motion(20.0, 0.0, 0.0, TH, start).is_none());
        assert_eq!(mon.snapshot(start).shake_count, 1);
        assert_eq!(mon.snapshot(start).safety_level, SafetyLevel::Yellow);
        assert!(mon
            .process_motion(0.0, 20.0, 0.0, TH, start + Duration::milliseconds(600))
            .is_none());
        let alert = mon
            .process_motion(0.0, 0.0, 20.0, TH, start + Duration::milliseconds(1200))
            .expect("third qualifying shake must trigger");
        assert_eq!(alert.reason, SHAKE_REASON);
    }

    #[test]
    fn test_rapid_shakes_are_debounced() {
        let mut mon = monitor();
        let start = Utc::now();
        mon.process_motion(20.0, 0.0, 0.0, TH, start);
        // 200ms later: below the 500ms spacing, must not count.
        mon.process_motion(20.0, 0.0, 0.0, TH, start + Duration::milliseconds(200));
        assert_eq!(mon.snapshot(start).shake_count, 1);
        // Exactly 500ms after the last qualifying shake counts again.
        mon.process_motion(20.0, 0.0, 0.0, TH, start + Duration::milliseconds(500));
        assert_eq!(mon.snapshot(start).shake_count, 2);
    }

    #[test]
    fn test_weak_motion_does_not_count() {
        let mut mon = monitor();
        // Resting magnitude (gravity only) is ~9.8, below threshold 15.
        mon.process_motion(0.0, 0.0, 9.8, TH, Utc::now());
        assert_eq!(mon.snapshot(Utc::now()).shake_count, 0);
        assert_eq!(mon.snapshot(Utc::now()).safety_level, SafetyLevel::Green);
    }

    #[test]
    fn test_shake_counter_decays_after_idle() {
        let mut mon = monitor();
        let start = Utc::now();
        mon.process_motion(20.0, 0.0, 0.0, TH, start);
        assert_eq!(mon.snapshot(start).shake_count, 1);
        mon.tick(TH, start + Duration::milliseconds(SHAKE_DECAY_MS));
        let state = mon.snapshot(start);
        assert_eq!(state.shake_count, 0);
        assert_eq!(state.safety_level, SafetyLevel::Green);
    }

    #[test]
    fn test_audio_sample_expires_stale_shakes() {
        let mut mon = monitor();
        let start = Utc::now();
        mon.process_motion(20.0, 0.0, 0.0, TH, start);
        assert_eq!(mon.snapshot(start).safety_level, SafetyLevel::Yellow);
        // A quiet audio sample past the decay window must not keep the
        // status elevated on the expired shake count.
        let later = start + Duration::milliseconds(SHAKE_DECAY_MS);
        mon.process_audio(&magnitudes_for_level(10.0), TH, later);
        let state = mon.snapshot(later);
        assert_eq!(state.shake_count, 0);
        assert_eq!(state.safety_level, SafetyLevel::Green);
    }

    #[test]
    fn test_mark_safe_resets_but_allows_retrigger() {
        let mut mon = monitor();
        let now = Utc::now();
        mon.trigger_emergency(MANUAL_PANIC_REASON.to_string(), now);
        mon.mark_safe();
        let state = mon.snapshot(now);
        assert_eq!(state.safety_level, SafetyLevel::Green);
        assert_eq!(state.shake_count, 0);
        assert!(!mon.is_emergency());
        // A fresh emergency can be raised again after clearing.
        assert!(mon.trigger_emergency("again".to_string(), now).is_some());
    }

    #[test]
    fn test_alert_captures_location_snapshot() {
        let mut mon = monitor();
        mon.process_position(GeoFix {
            lat: 19.076,
            lng: 72.8777,
            accuracy: 5.0,
        });
        let alert = mon
            .trigger_emergency(MANUAL_PANIC_REASON.to_string(), Utc::now())
            .unwrap();
        let loc = alert.location.expect("location snapshot expected");
        assert_eq!(loc.lat, 19.076);
        assert_eq!(loc.lng, 72.8777);
    }

    #[test]
    fn test_yellow_does_not_downgrade_red() {
        let mut mon = monitor();
        let now = Utc::now();
        mon.process_audio(&magnitudes_for_level(90.0), TH, now);
        assert_eq!(mon.snapshot(now).safety_level, SafetyLevel::Red);
        // Quiet samples while the emergency is active must not lower the status.
        mon.process_audio(&magnitudes_for_level(10.0), TH, now);
        assert_eq!(mon.snapshot(now).safety_level, SafetyLevel::Red);
    }
}
