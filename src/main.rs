use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use stampede_guard::insights::InsightsClient;
use stampede_guard::pipeline::run_pipeline;
use stampede_guard::receiver::start_receiver;
use stampede_guard::settings::Settings;
use stampede_guard::simulator::{self, Scenario};
use stampede_guard::state::AdminSettings;
use stampede_guard::store::{GuardStore, StoreSnapshot};
use stampede_guard::trigger::{SafetyMonitor, SharedMonitor};
use stampede_guard::web::{routes::create_router, WebState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Crowd-safety alerting service")]
struct Args {
    /// Path to a TOML or YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the web API port
    #[arg(long)]
    web_port: Option<u16>,

    /// Override the sensor feed UDP port
    #[arg(long)]
    udp_port: Option<u16>,

    /// Generate sensor readings in-process instead of listening for a feed
    #[arg(long)]
    simulate: bool,

    /// Scenario for --simulate
    #[arg(long, value_enum, default_value_t = Scenario::Calm)]
    scenario: Scenario,

    /// Write the effective configuration to the given path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut settings = match Settings::new(args.config.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(port) = args.web_port {
        settings.settings.web_port = port;
    }
    if let Some(port) = args.udp_port {
        settings.settings.udp_port = port;
    }
    if settings.insights.api_key.is_empty() {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            settings.insights.api_key = key;
        }
    }

    if let Some(path) = args.dump_config {
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => "yaml",
            _ => "toml",
        };
        match settings.dump(format) {
            Ok(text) => {
                if let Err(e) = std::fs::write(&path, text) {
                    error!("failed to write {}: {}", path.display(), e);
                    std::process::exit(1);
                }
                info!("configuration written to {}", path.display());
            }
            Err(e) => {
                error!("failed to dump configuration: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = std::fs::create_dir_all(&settings.settings.data_dir) {
        warn!(
            "cannot create data directory {}: {}",
            settings.settings.data_dir.display(),
            e
        );
    }
    let state_path = settings.settings.data_dir.join("guard_state.json");
    let initial = if state_path.exists() {
        match GuardStore::load_snapshot(&state_path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    "discarding unreadable state file {}: {}",
                    state_path.display(),
                    e
                );
                seed_snapshot(&settings)
            }
        }
    } else {
        seed_snapshot(&settings)
    };
    info!("monitoring user {}", initial.user_id);

    let store = Arc::new(GuardStore::new(initial.clone(), Some(state_path)));
    let monitor: SharedMonitor = Arc::new(Mutex::new(SafetyMonitor::new(
        initial.user_id,
        initial.user_name,
    )));
    let insights = Arc::new(InsightsClient::new(&settings.insights));

    // Sensor feed -> pipeline
    let (feed_tx, feed_rx) = mpsc::channel(256);
    if args.simulate {
        let scenario = args.scenario;
        tokio::spawn(async move {
            simulator::run_local_feed(scenario, 200, feed_tx).await;
        });
    } else {
        let udp_port = settings.settings.udp_port;
        tokio::spawn(async move {
            if let Err(e) = start_receiver(udp_port, feed_tx).await {
                error!("sensor receiver failed: {}", e);
            }
        });
    }
    tokio::spawn(run_pipeline(feed_rx, monitor.clone(), store.clone()));

    // Web API for both views
    let web_state = WebState {
        store,
        monitor,
        insights,
        admin_passwords: Arc::new(settings.auth.admin_passwords.clone()),
    };
    let router = create_router(web_state);
    let addr = format!("0.0.0.0:{}", settings.settings.web_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("cannot bind web port {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("web interface listening on {}", addr);
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("web server error: {}", e);
    }
}

/// First-run state: configured identity (or a generated one) plus
/// threshold seeds from the configuration.
fn seed_snapshot(settings: &Settings) -> StoreSnapshot {
    let user_id = settings
        .identity
        .user_id
        .clone()
        .unwrap_or_else(|| format!("USER-{}", rand::thread_rng().gen_range(0..1000)));
    let mut admin = AdminSettings {
        panic_threshold: settings.thresholds.panic,
        shake_threshold: settings.thresholds.shake,
        ..Default::default()
    };
    admin.clamp_thresholds();
    StoreSnapshot::seed(user_id, settings.identity.user_name.clone(), admin)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
