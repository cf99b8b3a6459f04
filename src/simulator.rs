use std::time::Duration;

use clap::ValueEnum;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::info;

use crate::receiver::SensorReading;

/// Synthetic crowd scenarios for demos and stress runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Quiet crowd, gentle motion, steady position fix.
    Calm,
    /// Loud sustained noise that crosses the default panic threshold.
    Panic,
    /// Repeated hard shakes spaced wide enough to count.
    Shake,
}

/// Base coordinates the simulated user wanders around.
const BASE_LAT: f64 = 19.0760;
const BASE_LNG: f64 = 72.8777;

/// Steps between position fixes; audio and motion go out every step.
const POSITION_EVERY: u64 = 10;

/// Produce the readings for one simulation step.
pub fn readings_for_step(scenario: Scenario, step: u64) -> Vec<SensorReading> {
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(3);

    let magnitudes = match scenario {
        // Around level 25: comfortably below 60% of the default threshold.
        Scenario::Calm => synth_magnitudes(32, &mut rng),
        // Around level 94: above the default panic threshold of 85.
        Scenario::Panic => synth_magnitudes(120, &mut rng),
        Scenario::Shake => synth_magnitudes(40, &mut rng),
    };
    out.push(SensorReading::Audio { magnitudes });

    let (x, y, z) = match scenario {
        // Gravity plus a little hand tremor.
        Scenario::Calm | Scenario::Panic => (
            rng.gen_range(-0.5..0.5),
            rng.gen_range(-0.5..0.5),
            9.8 + rng.gen_range(-0.3..0.3),
        ),
        // A hard jolt every third step, idle gravity otherwise.
        Scenario::Shake => {
            if step % 3 == 0 {
                (rng.gen_range(12.0..18.0), rng.gen_range(12.0..18.0), 9.8)
            } else {
                (0.0, 0.0, 9.8)
            }
        }
    };
    out.push(SensorReading::Motion { x, y, z });

    if step % POSITION_EVERY == 0 {
        out.push(SensorReading::Position {
            lat: BASE_LAT + rng.gen_range(-0.0005..0.0005),
            lng: BASE_LNG + rng.gen_range(-0.0005..0.0005),
            accuracy: rng.gen_range(3.0..12.0),
        });
    }

    out
}

/// Feed synthetic readings straight into the pipeline channel, at the
/// given pace. Used by `--simulate`; the `sensor-feed` binary sends the
/// same readings over UDP instead.
pub async fn run_local_feed(
    scenario: Scenario,
    interval_ms: u64,
    tx: mpsc::Sender<SensorReading>,
) {
    info!(
        "simulator started: scenario {:?}, {}ms interval",
        scenario, interval_ms
    );
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    let mut step = 0u64;
    loop {
        interval.tick().await;
        for reading in readings_for_step(scenario, step) {
            if tx.send(reading).await.is_err() {
                info!("pipeline channel closed, simulator stopping");
                return;
            }
        }
        step += 1;
    }
}

fn synth_magnitudes(center: u8, rng: &mut impl Rng) -> Vec<u8> {
    (0..64)
        .map(|_| {
            let jitter = rng.gen_range(-8i16..=8);
            (center as i16 + jitter).clamp(0, 255) as u8
        })
        .collect()
}
