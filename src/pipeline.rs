use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::info;

use crate::receiver::SensorReading;
use crate::state::GeoFix;
use crate::store::GuardStore;
use crate::trigger::{SharedMonitor, Thresholds};

/// Spacing of the maintenance tick that expires the shake counter when
/// no samples arrive.
const DECAY_TICK_MS: u64 = 1_000;

/// Single consumer of the sensor feed: stamps each reading with its
/// receive time, runs it through the shared monitor, and publishes the
/// refreshed state (and any produced alert) to the store.
///
/// Thresholds are re-read from the store before every sample so admin
/// edits apply immediately. The periodic tick keeps the shake counter
/// decaying while the feed is silent.
pub async fn run_pipeline(
    mut rx: mpsc::Receiver<SensorReading>,
    monitor: SharedMonitor,
    store: Arc<GuardStore>,
) {
    info!("sensor pipeline started");
    let mut tick = tokio::time::interval(Duration::from_millis(DECAY_TICK_MS));

    loop {
        tokio::select! {
            maybe_reading = rx.recv() => {
                let Some(reading) = maybe_reading else {
                    info!("sensor channel closed, pipeline stopping");
                    break;
                };
                let now = Utc::now();
                let thresholds = Thresholds::from(&store.settings().1);
                let (state, alert) = {
                    let mut mon = monitor.lock().unwrap();
                    let alert = match reading {
                        SensorReading::Audio { magnitudes } => {
                            mon.process_audio(&magnitudes, thresholds, now)
                        }
                        SensorReading::Motion { x, y, z } => {
                            mon.process_motion(x, y, z, thresholds, now)
                        }
                        SensorReading::Position { lat, lng, accuracy } => {
                            mon.process_position(GeoFix { lat, lng, accuracy });
                            None
                        }
                    };
                    (mon.snapshot(now), alert)
                };
                if let Some(alert) = alert {
                    store.push_alert(alert);
                }
                store.publish_state(state);
            }
            _ = tick.tick() => {
                let now = Utc::now();
                let thresholds = Thresholds::from(&store.settings().1);
                let state = {
                    let mut mon = monitor.lock().unwrap();
                    mon.tick(thresholds, now);
                    mon.snapshot(now)
                };
                store.publish_state(state);
            }
        }
    }
}
