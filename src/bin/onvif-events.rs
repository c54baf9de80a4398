//! Watch the raw event stream of one camera.
//!
//! Usage:
//!   cargo run --bin onvif-events -- --device front_door
//!   cargo run --bin onvif-events -- --device front_door --json
//!
//! Subscribes to the camera's pull point and logs every notification with the
//! category it classifies as. Nothing is published to MQTT.

use clap::Parser;
use log::{error, info, warn};
use onvif_mqtt_bridge::config::{self, Config};
use onvif_mqtt_bridge::events::{
    Classification, EventFeed, EventState, NotificationSink, RawNotification,
    SubscriptionSource, classify_topic,
};
use onvif_mqtt_bridge::input::OnvifSource;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "onvif-events")]
#[command(about = "Log classified ONVIF events from one camera")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "ONVIF_MQTT_CONFIG")]
    config: Option<PathBuf>,

    /// Device name from the configuration (defaults to the first one)
    #[arg(short, long)]
    device: Option<String>,

    /// Print each notification as a JSON line instead of logging it
    #[arg(long)]
    json: bool,
}

fn describe(notification: &RawNotification) -> String {
    let state = EventState::from_items(&notification.items);
    match classify_topic(&notification.topic) {
        Classification::Known(category) => format!("{} {:?}", category, state),
        Classification::Unknown => format!("unknown {:?}", state),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match Config::from_file(config::resolve_path(cli.config)) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let device = match &cli.device {
        Some(name) => config.onvif.iter().find(|d| &d.name == name),
        None => config.onvif.first(),
    };
    let Some(device) = device.cloned() else {
        error!("No matching device in configuration");
        return ExitCode::FAILURE;
    };

    let json = cli.json;
    let sink: NotificationSink = Arc::new(move |notification: RawNotification| {
        if json {
            match serde_json::to_string(&notification) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode notification: {}", e),
            }
        } else {
            info!("{} -> {}", notification.topic, describe(&notification));
        }
    });

    info!("Subscribing to {} at {}:{}", device.name, device.hostname, device.port);
    let source = OnvifSource::new(config.subscription.clone());
    let feed = match source.subscribe(&device, sink).await {
        Ok(feed) => feed,
        Err(e) => {
            error!("Failed to subscribe: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Listening for events... Press Ctrl+C to exit.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down...");
    if let Err(e) = feed.teardown().await {
        warn!("{}", e);
    }
    ExitCode::SUCCESS
}
