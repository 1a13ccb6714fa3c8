//! The per-device state machine: sense, command, retry, pulse, silence.
//!
//! All state lives in the [`DeviceTable`] passed in by the caller; this
//! type only holds the `tokio::sync::mpsc` sender for emitted events and
//! the gate that limits the periodic tick's body to once every 5 s, per
//! the single-threaded, lock-free model the event loop runs under.

use crate::device::{ControllerState, DeviceTable};
use crate::messages;
use crate::model::ModelRegistry;
use crate::protocol::{self, CONTROL, QUERY, STATUS};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const SENSE_INTERVAL_SECS: u64 = 35;
const TICK_INTERVAL_SECS: u64 = 5;
const SILENCE_TIMEOUT_SECS: u64 = 100;
const COMMAND_WINDOW_SECS: u64 = 10;
const PULSE_REVERT_WINDOW_SECS: u64 = 5;
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(3);
const CONFIRM_WAIT: Duration = Duration::from_secs(4);
const TUYA_TCP_PORT: u16 = 6668;

/// Events the controller emits as devices confirm, diverge, or time out.
/// Additive to the state machine — consumed by the ambient logging layer
/// and, optionally, a collaborator event sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Confirmed(usize),
    Changed(usize),
    Timeout(usize),
}

#[derive(Clone)]
pub struct Controller {
    events: mpsc::UnboundedSender<Event>,
    last_tick_run: u64,
}

impl Controller {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                events: tx,
                last_tick_run: 0,
            },
            rx,
        )
    }

    /// Record a desired state. Returns `1` ("accepted") or `0` (unknown
    /// device index).
    pub fn set(
        &self,
        devices: &mut DeviceTable,
        index: usize,
        state: bool,
        pulse_seconds: u64,
        cause: &str,
        now: u64,
    ) -> u32 {
        let Some(device) = devices.get_mut(index) else {
            return 0;
        };

        debug!("set({index}, {state}, pulse={pulse_seconds}, cause={cause})");
        device.commanded = state;
        if pulse_seconds > 0 {
            device.pulse_deadline = now + pulse_seconds;
        }

        if device.pending > 0 {
            // Already awaiting confirmation of a prior command: bookkeeping
            // only, no new exchange.
            return 1;
        }

        if device.status != state {
            // Only arm the confirmation window when there is something to
            // confirm. A `Set` to the already-observed state has nothing
            // for `apply_retry_or_timeout` to resolve, and that function
            // treats `status == commanded` as "nothing to do" — arming
            // `pending` here would leave it stuck, blocking the next sense
            // and the next `Set` alike.
            device.pending = now + COMMAND_WINDOW_SECS;
            if device.detected() {
                device.state = ControllerState::Commanding;
            }
        }
        1
    }

    pub fn get(&self, devices: &DeviceTable, index: usize) -> Option<bool> {
        devices.get(index).map(|d| d.status)
    }

    pub fn commanded(&self, devices: &DeviceTable, index: usize) -> Option<bool> {
        devices.get(index).map(|d| d.commanded)
    }

    pub fn deadline(&self, devices: &DeviceTable, index: usize) -> Option<u64> {
        devices.get(index).map(|d| d.pulse_deadline)
    }

    pub fn failure(&self, devices: &DeviceTable, index: usize) -> Option<&'static str> {
        match devices.get(index) {
            Some(d) if d.state == ControllerState::Silent => Some("silent"),
            _ => None,
        }
    }

    /// Called by the event loop at most once per second; the body only
    /// actually runs every `TICK_INTERVAL_SECS`.
    pub async fn tick(&mut self, devices: &mut DeviceTable, models: &ModelRegistry, now: u64) {
        if now.saturating_sub(self.last_tick_run) < TICK_INTERVAL_SECS {
            return;
        }
        self.last_tick_run = now;

        devices.resolve_control_points(models);

        for index in 0..devices.len() {
            self.apply_silence(devices, index, now);
            self.apply_sense_schedule(devices, index, now).await;
            self.apply_pulse_expiry(devices, index, now);
            self.apply_retry_or_timeout(devices, index, now).await;
        }
    }

    fn apply_silence(&self, devices: &mut DeviceTable, index: usize, now: u64) {
        let Some(device) = devices.get_mut(index) else {
            return;
        };
        if device.last_detected > 0 && now.saturating_sub(device.last_detected) > SILENCE_TIMEOUT_SECS {
            warn!("device {index} ({}) silent, marking failed", device.id);
            device.state = ControllerState::Silent;
            device.status = false;
            device.pending = 0;
            device.pulse_deadline = 0;
            device.last_detected = 0;
            device.busy = false;
        }
    }

    async fn apply_sense_schedule(&self, devices: &mut DeviceTable, index: usize, now: u64) {
        let should_sense = {
            let Some(device) = devices.get(index) else {
                return;
            };
            device.state == ControllerState::Idle
                && device.pending == 0
                && device.detected()
                && !device.busy
                && device.control_point > 0
                && now.saturating_sub(device.last_sense) >= SENSE_INTERVAL_SECS
        };
        if !should_sense {
            return;
        }

        devices.get_mut(index).unwrap().busy = true;
        devices.get_mut(index).unwrap().state = ControllerState::Sensing;
        let result = self.sense(devices, index, now).await;
        if let Some(device) = devices.get_mut(index) {
            device.busy = false;
            device.last_sense = now;
            if device.state == ControllerState::Sensing {
                device.state = ControllerState::Idle;
            }
        }
        if let Err(e) = result {
            debug!("sense failed for device {index}: {e}");
        }
    }

    fn apply_pulse_expiry(&self, devices: &mut DeviceTable, index: usize, now: u64) {
        let Some(device) = devices.get_mut(index) else {
            return;
        };
        if device.pulse_deadline > 0 && now >= device.pulse_deadline {
            device.commanded = false;
            device.pending = now + PULSE_REVERT_WINDOW_SECS;
            device.pulse_deadline = 0;
            if device.detected() && device.state == ControllerState::Idle {
                device.state = ControllerState::Commanding;
            }
        }
    }

    async fn apply_retry_or_timeout(&self, devices: &mut DeviceTable, index: usize, now: u64) {
        let action = {
            let Some(device) = devices.get(index) else {
                return;
            };
            if device.pending == 0 || device.status == device.commanded || device.busy {
                None
            } else if device.pending > now {
                Some(true) // retry
            } else {
                Some(false) // give up
            }
        };

        match action {
            Some(true) => {
                if devices.get(index).map(|d| d.detected()).unwrap_or(false) {
                    devices.get_mut(index).unwrap().busy = true;
                    let result = self.command(devices, index, now).await;
                    if let Some(device) = devices.get_mut(index) {
                        device.busy = false;
                    }
                    if let Err(e) = result {
                        debug!("retry command failed for device {index}: {e}");
                    }
                }
            }
            Some(false) => {
                let device = devices.get_mut(index).unwrap();
                warn!("device {index} ({}) command timed out", device.id);
                device.commanded = device.status;
                device.pending = 0;
                device.state = ControllerState::Idle;
                device.busy = false;
                let _ = self.events.send(Event::Timeout(index));
            }
            None => {}
        }
    }

    /// QUERY exchange: open TCP, send, read one response, close.
    async fn sense(&self, devices: &mut DeviceTable, index: usize, now: u64) -> crate::error::Result<()> {
        let (addr, secret, control_point) = {
            let device = devices.get(index).ok_or(crate::error::CoreError::UnknownDevice(index))?;
            let ip = device.ip_address.ok_or(crate::error::CoreError::ConnectionFailed)?;
            (SocketAddr::new(ip, TUYA_TCP_PORT), device.secret(), device.control_point)
        };

        let json = messages::query_payload(&secret.id, now);
        let (code, _seq, body) = exchange(addr, &secret, QUERY, 0, &json).await?;
        if code != STATUS && code != QUERY {
            return Ok(());
        }
        if let Some(value) = messages::extract_dp_bool(&body, control_point) {
            self.apply_observed_status(devices, index, value, now);
        }
        Ok(())
    }

    /// CONTROL exchange. The reply carrying the same code as CONTROL is
    /// discarded — devices lie in that frame — but the connection is kept
    /// open and read until the device's own unsolicited STATUS/QUERY push
    /// arrives (or `CONFIRM_WAIT` elapses), the same push a standing
    /// connection would observe on its own; see the teacher's persistent
    /// reader loop in rustuya's `device.rs` for the pattern this adapts to
    /// our one-connection-per-command shape. Without this, a pending
    /// command starves `apply_sense_schedule` of the `pending == 0` it
    /// needs to run, so `CONFIRMED` could never be observed from the live
    /// tick loop.
    async fn command(&self, devices: &mut DeviceTable, index: usize, now: u64) -> crate::error::Result<()> {
        let (addr, secret, control_point, commanded) = {
            let device = devices.get(index).ok_or(crate::error::CoreError::UnknownDevice(index))?;
            let ip = device.ip_address.ok_or(crate::error::CoreError::ConnectionFailed)?;
            (
                SocketAddr::new(ip, TUYA_TCP_PORT),
                device.secret(),
                device.control_point,
                device.commanded,
            )
        };
        if control_point == 0 {
            return Ok(());
        }

        let json = messages::control_payload(&secret.id, control_point, commanded, now);
        let observed = exchange_and_await_status(addr, &secret, &json, CONFIRM_WAIT).await?;
        if let Some(device) = devices.get_mut(index) {
            device.state = ControllerState::AwaitingConfirmation;
        }
        if let Some(body) = observed {
            if let Some(value) = messages::extract_dp_bool(&body, control_point) {
                self.apply_observed_status(devices, index, value, now);
            }
        }
        Ok(())
    }

    /// Apply a `STATUS`/`QUERY` observed value: confirmation, divergence
    /// ("changed"), or a plain sense update while idle.
    fn apply_observed_status(&self, devices: &mut DeviceTable, index: usize, value: bool, _now: u64) {
        let Some(device) = devices.get_mut(index) else {
            return;
        };
        let prior_status = device.status;

        if device.pending > 0 {
            if value == device.commanded {
                device.status = value;
                device.pending = 0;
                device.state = ControllerState::Idle;
                info!("device {index} ({}) confirmed {value}", device.id);
                let _ = self.events.send(Event::Confirmed(index));
                return;
            }
            if value != prior_status && value != device.commanded {
                device.status = value;
                device.commanded = value;
                device.pending = 0;
                device.state = ControllerState::Idle;
                info!("device {index} ({}) changed externally to {value}", device.id);
                let _ = self.events.send(Event::Changed(index));
                return;
            }
        } else if value != device.commanded && device.commanded == prior_status {
            // External override while idle: §8 scenario 6.
            device.status = value;
            device.commanded = value;
            info!("device {index} ({}) changed externally to {value}", device.id);
            let _ = self.events.send(Event::Changed(index));
            return;
        }

        device.status = value;
    }
}

async fn exchange(
    addr: SocketAddr,
    secret: &protocol::Secret,
    code: u32,
    seqno: u32,
    json: &[u8],
) -> crate::error::Result<(u32, u32, Vec<u8>)> {
    let mut stream = tokio::time::timeout(EXCHANGE_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| crate::error::CoreError::Timeout)??;

    let frame = protocol::encode_to_vec(secret, code, seqno, json);
    tokio::time::timeout(EXCHANGE_TIMEOUT, stream.write_all(&frame))
        .await
        .map_err(|_| crate::error::CoreError::Timeout)??;

    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(EXCHANGE_TIMEOUT, stream.read(&mut buf))
        .await
        .map_err(|_| crate::error::CoreError::Timeout)??;
    if n == 0 {
        return Err(crate::error::CoreError::ConnectionFailed);
    }
    buf.truncate(n);
    Ok(protocol::decode(&buf, Some(secret)))
}

/// Send a CONTROL frame, then keep reading on the same connection —
/// ignoring the CONTROL-coded echo — until a STATUS/QUERY push arrives or
/// `wait` elapses. Returns the pushed frame's body, or `None` if the
/// device never pushed one in time.
async fn exchange_and_await_status(
    addr: SocketAddr,
    secret: &protocol::Secret,
    json: &[u8],
    wait: Duration,
) -> crate::error::Result<Option<Vec<u8>>> {
    let mut stream = tokio::time::timeout(EXCHANGE_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| crate::error::CoreError::Timeout)??;

    let frame = protocol::encode_to_vec(secret, CONTROL, 0, json);
    tokio::time::timeout(EXCHANGE_TIMEOUT, stream.write_all(&frame))
        .await
        .map_err(|_| crate::error::CoreError::Timeout)??;

    let deadline = tokio::time::Instant::now() + wait;
    let mut buf = vec![0u8; 4096];
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        let n = match tokio::time::timeout(remaining, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => return Ok(None),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e.into()),
        };
        let (code, _seq, body) = protocol::decode(&buf[..n], Some(secret));
        if code == STATUS || code == QUERY {
            return Ok(Some(body));
        }
        // CONTROL echo or anything else observed first: keep listening.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use std::net::{IpAddr, Ipv4Addr};

    fn detected_device() -> Device {
        let mut device = Device::new("abc123", "Lamp", "0123456789abcdef");
        device.ip_address = Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42)));
        device.last_detected = 1;
        device.control_point = 20;
        device
    }

    #[test]
    fn set_on_unknown_device_returns_zero() {
        let (controller, _rx) = Controller::new();
        let mut devices = DeviceTable::new();
        assert_eq!(controller.set(&mut devices, 0, true, 0, "ui", 0), 0);
    }

    #[test]
    fn set_records_pending_window_and_pulse_deadline() {
        let (controller, _rx) = Controller::new();
        let mut devices = DeviceTable::new();
        devices.merge_config(vec![detected_device()]);

        assert_eq!(controller.set(&mut devices, 0, true, 3, "ui", 100), 1);
        let device = devices.get(0).unwrap();
        assert_eq!(device.pending, 110);
        assert_eq!(device.pulse_deadline, 103);
        assert_eq!(device.state, ControllerState::Commanding);
    }

    #[test]
    fn set_while_pending_only_updates_bookkeeping() {
        let (controller, _rx) = Controller::new();
        let mut devices = DeviceTable::new();
        devices.merge_config(vec![detected_device()]);
        controller.set(&mut devices, 0, true, 0, "ui", 100);
        let pending_after_first = devices.get(0).unwrap().pending;

        controller.set(&mut devices, 0, false, 0, "ui", 101);
        assert_eq!(devices.get(0).unwrap().pending, pending_after_first);
        assert!(!devices.get(0).unwrap().commanded);
    }

    #[test]
    fn confirmation_emits_confirmed_event_and_clears_pending() {
        let (controller, mut rx) = Controller::new();
        let mut devices = DeviceTable::new();
        devices.merge_config(vec![detected_device()]);
        controller.set(&mut devices, 0, true, 0, "ui", 100);

        controller.apply_observed_status(&mut devices, 0, true, 101);
        let device = devices.get(0).unwrap();
        assert!(device.status);
        assert_eq!(device.pending, 0);
        assert_eq!(rx.try_recv().unwrap(), Event::Confirmed(0));
    }

    #[test]
    fn disagreeing_response_emits_changed_and_adopts_value() {
        let (controller, mut rx) = Controller::new();
        let mut devices = DeviceTable::new();
        let mut device = detected_device();
        device.status = true;
        device.commanded = true;
        devices.merge_config(vec![device]);
        controller.set(&mut devices, 0, true, 0, "ui", 100);

        controller.apply_observed_status(&mut devices, 0, false, 101);
        let device = devices.get(0).unwrap();
        assert!(!device.status);
        assert!(!device.commanded);
        assert_eq!(device.pending, 0);
        assert_eq!(rx.try_recv().unwrap(), Event::Changed(0));
    }

    #[test]
    fn silence_marks_device_failed_and_resets_state() {
        let (controller, _rx) = Controller::new();
        let mut devices = DeviceTable::new();
        let mut device = detected_device();
        device.status = true;
        device.last_detected = 1;
        devices.merge_config(vec![device]);

        controller.apply_silence(&mut devices, 0, 1000);
        let device = devices.get(0).unwrap();
        assert_eq!(device.state, ControllerState::Silent);
        assert!(!device.status);
        assert_eq!(device.last_detected, 0);
        assert_eq!(controller.failure(&devices, 0), Some("silent"));
    }

    #[tokio::test]
    async fn command_observes_pushed_status_and_confirms_through_the_real_gate() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind(("127.0.0.1", TUYA_TCP_PORT)).await.unwrap();
        let secret = protocol::Secret::new("abc123", "0123456789abcdef", protocol::Version::V3_3);
        let server_secret = secret.clone();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await.unwrap(); // CONTROL frame, discarded

            let body = serde_json::json!({ "dps": { "20": true } }).to_string().into_bytes();
            let frame = protocol::encode_to_vec(&server_secret, STATUS, 0, &body);
            stream.write_all(&frame).await.unwrap();
        });

        let (controller, mut rx) = Controller::new();
        let mut devices = DeviceTable::new();
        let mut device = detected_device();
        device.ip_address = Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        devices.merge_config(vec![device]);

        controller.set(&mut devices, 0, true, 0, "ui", 100);
        controller.command(&mut devices, 0, 100).await.unwrap();

        let device = devices.get(0).unwrap();
        assert!(device.status);
        assert_eq!(device.pending, 0);
        assert_eq!(rx.try_recv().unwrap(), Event::Confirmed(0));
    }

    #[test]
    fn pulse_expiry_schedules_off_with_five_second_window() {
        let (controller, _rx) = Controller::new();
        let mut devices = DeviceTable::new();
        let mut device = detected_device();
        device.commanded = true;
        device.pulse_deadline = 3;
        devices.merge_config(vec![device]);

        controller.apply_pulse_expiry(&mut devices, 0, 3);
        let device = devices.get(0).unwrap();
        assert!(!device.commanded);
        assert_eq!(device.pending, 8);
        assert_eq!(device.pulse_deadline, 0);
    }
}
