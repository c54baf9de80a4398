use clap::Parser;
use log::{error, info, warn};
use onvif_mqtt_bridge::Manager;
use onvif_mqtt_bridge::config::{self, Config};
use onvif_mqtt_bridge::input::OnvifSource;
use onvif_mqtt_bridge::output::MqttPublisher;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{Signal, SignalKind, signal};

#[derive(Parser, Debug)]
#[command(name = "onvif-mqtt-bridge")]
#[command(about = "Publish ONVIF camera events as MQTT sensor states")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "ONVIF_MQTT_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `onvif_mqtt_bridge=trace` (overrides RUST_LOG)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Seconds between checks of the configuration file for changes
    #[arg(long, default_value_t = 5)]
    watch_interval: u64,
}

fn init_logger(filter: Option<&str>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(filter) = filter {
        builder.parse_filters(filter);
    }
    builder.format_timestamp_millis().init();
}

/// Process signal streams, created once for the lifetime of the bridge.
struct Signals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(args.log_level.as_deref());
    info!("Starting ONVIF MQTT bridge");

    let path = config::resolve_path(args.config);
    let config = match Config::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Configuration loaded from {}", path.display());
    info!("  Broker: {}:{}", config.mqtt.host, config.mqtt.port);
    info!("  Base topic: {}", config.mqtt.base_topic);
    info!("  Devices: {}", config.onvif.len());

    // Streams live for the whole run; signals during startup or a reload
    // are buffered until the loop polls again.
    let mut signals = match Signals::install() {
        Ok(signals) => signals,
        Err(e) => {
            error!("Failed to install signal handlers: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let publisher = Arc::new(MqttPublisher::new(&config.mqtt));
    let source = Arc::new(OnvifSource::new(config.subscription.clone()));

    let mut manager = match Manager::start(config, publisher.clone(), source).await {
        Ok(manager) => manager,
        Err(e) => {
            error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (mut changes, watcher) =
        config::watch(path.clone(), Duration::from_secs(args.watch_interval.max(1)));

    info!("ONVIF MQTT bridge is running");
    info!("  - Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = signals.interrupt.recv() => {
                info!("Received shutdown signal");
                break;
            }
            _ = signals.terminate.recv() => {
                info!("Received SIGTERM");
                break;
            }
            _ = signals.hangup.recv() => {
                info!("Received SIGHUP, reloading {}", path.display());
                match Config::from_file(&path) {
                    Ok(config) => manager.reload(config).await,
                    Err(e) => warn!("Keeping current configuration: {}", e),
                }
            }
            Some(config) = changes.recv() => {
                manager.reload(config).await;
            }
        }
    }

    watcher.abort();
    manager.shutdown().await;
    publisher.disconnect().await;

    info!("ONVIF MQTT bridge stopped");
    ExitCode::SUCCESS
}
