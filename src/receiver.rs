use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use serde::{Deserialize, Serialize};

/// One sensor sample as it arrives on the feed, one JSON object per
/// datagram. How a sample was acquired (microphone, accelerometer,
/// positioning) is the feed's business; only the derived semantics are
/// handled here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorReading {
    /// Block of 0-255 frequency magnitudes from the microphone.
    Audio { magnitudes: Vec<u8> },
    /// Gravity-inclusive acceleration along the three device axes.
    Motion { x: f64, y: f64, z: f64 },
    /// Positioning fix with accuracy in meters.
    Position { lat: f64, lng: f64, accuracy: f64 },
}

/// Listen for sensor datagrams on the loopback feed port and forward
/// decoded readings to the pipeline.
///
/// A sensor that never sends (denied permission, no hardware) simply
/// never updates its signal; malformed datagrams are dropped with a
/// debug log. Neither produces a user-facing error or a retry.
pub async fn start_receiver(port: u16, tx: mpsc::Sender<SensorReading>) -> std::io::Result<()> {
    let socket = UdpSocket::bind(("127.0.0.1", port)).await?;
    info!("sensor feed listening on {}", socket.local_addr()?);

    let mut buf = [0u8; 8192];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, source)) => match serde_json::from_slice::<SensorReading>(&buf[..len]) {
                Ok(reading) => {
                    if tx.send(reading).await.is_err() {
                        info!("pipeline channel closed, receiver stopping");
                        break;
                    }
                }
                Err(e) => {
                    debug!("dropping malformed datagram from {}: {}", source, e);
                }
            },
            Err(e) => {
                warn!("failed to receive datagram: {}", e);
            }
        }
    }

    Ok(())
}
