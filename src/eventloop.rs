//! The single-threaded cooperative loop multiplexing the two discovery
//! sockets, the controller's periodic tick, and config reloads.
//!
//! Implemented over `tokio::select!` on a `current_thread` runtime rather
//! than raw `select(2)`/`poll(2)`: the runtime's cooperative, non-preemptive
//! task scheduling gives the same "no locking required" guarantee as long
//! as the controller is only ever driven from this one task.

use crate::controller::Controller;
use crate::device::DeviceTable;
use crate::discovery::{self, ENCRYPTED_PORT, PLAINTEXT_PORT};
use crate::model::ModelRegistry;
use log::{error, info};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Runs forever. Only the initial socket bind failure aborts startup; every
/// other error inside the loop is logged and the loop continues.
///
/// `devices` and `models` are shared with the HTTP façade behind a
/// `tokio::sync::Mutex`. Because this runs on a `current_thread` runtime
/// alongside the façade's task, the mutex is never actually contended — it
/// exists to let the borrow checker see the sharing, not to arbitrate
/// between real concurrent writers.
pub async fn run(
    devices: Arc<Mutex<DeviceTable>>,
    models: Arc<Mutex<ModelRegistry>>,
    mut controller: Controller,
) -> crate::error::Result<()> {
    let plaintext_socket = discovery::bind(PLAINTEXT_PORT).await?;
    let encrypted_socket = discovery::bind(ENCRYPTED_PORT).await?;
    info!("listening for discovery beacons on :{PLAINTEXT_PORT} and :{ENCRYPTED_PORT}");

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut plaintext_buf = vec![0u8; 2048];
    let mut encrypted_buf = vec![0u8; 2048];

    loop {
        tokio::select! {
            result = plaintext_socket.recv_from(&mut plaintext_buf) => {
                let mut devices = devices.lock().await;
                handle_recv(result, &plaintext_buf, &mut devices, discovery::handle_plaintext_datagram);
            }
            result = encrypted_socket.recv_from(&mut encrypted_buf) => {
                let mut devices = devices.lock().await;
                handle_recv(result, &encrypted_buf, &mut devices, discovery::handle_encrypted_datagram);
            }
            _ = tick.tick() => {
                let mut devices = devices.lock().await;
                let models = models.lock().await;
                controller.tick(&mut devices, &models, unix_now()).await;
            }
        }
    }
}

fn handle_recv(
    result: std::io::Result<(usize, std::net::SocketAddr)>,
    buf: &[u8],
    devices: &mut DeviceTable,
    handler: fn(&[u8], std::net::IpAddr, &mut DeviceTable, u64),
) {
    match result {
        Ok((n, from)) => handler(&buf[..n], from.ip(), devices, unix_now()),
        Err(e) => error!("discovery socket error: {e}"),
    }
}

