//! The daemon: loads config, seeds the device table and model registry,
//! then runs discovery + controller + HTTP façade on a single-threaded
//! event loop.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tuya_lan::config;
use tuya_lan::controller::Controller;
use tuya_lan::device::DeviceTable;
use tuya_lan::error::Result;
use tuya_lan::http::{self, AppState};
use tuya_lan::model::ModelRegistry;

#[derive(Parser, Debug)]
#[command(name = "tuya-land", about = "LAN-local Tuya discovery and control daemon")]
struct Args {
    /// Path to the JSON config document.
    #[arg(long, default_value = "tuya.json")]
    config: PathBuf,

    /// Address the HTTP façade listens on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    http_addr: SocketAddr,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    if std::env::var("RUST_LOG").is_err() {
        // SAFETY: called once, before any other task is spawned, and this
        // runtime has only the one OS thread to begin with.
        unsafe { std::env::set_var("RUST_LOG", &args.log_level) };
    }
    env_logger::init();

    let mut devices = DeviceTable::new();
    let mut models = ModelRegistry::new();
    match config::load(&args.config).await {
        Ok(file) => {
            devices.merge_config(file.tuya.devices.into_iter().map(Into::into).collect());
            models.reload(file.tuya.models.into_iter().map(Into::into).collect());
            log::info!("loaded config from {}", args.config.display());
        }
        Err(e) => log::warn!("could not load config at {}: {e}", args.config.display()),
    }
    devices.resolve_control_points(&models);

    let devices = Arc::new(Mutex::new(devices));
    let models = Arc::new(Mutex::new(models));

    let (controller, mut events) = Controller::new();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log::info!("controller event: {event:?}");
        }
    });

    let state = Arc::new(AppState {
        devices: devices.clone(),
        models: models.clone(),
        controller: controller.clone(),
    });

    let http_addr = args.http_addr;
    tokio::spawn(async move {
        let app = http::router(state);
        match tokio::net::TcpListener::bind(http_addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app).await {
                    log::error!("HTTP façade stopped: {e}");
                }
            }
            Err(e) => log::error!("failed to bind HTTP façade on {http_addr}: {e}"),
        }
    });

    tuya_lan::eventloop::run(devices, models, controller).await
}
