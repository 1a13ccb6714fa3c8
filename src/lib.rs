//! # tuya_lan
//!
//! LAN-local discovery, monitoring, and on/off control of Tuya-family Wi-Fi
//! devices, without a vendor cloud dependency.
//!
//! The core is a wire codec (framing, AES-128-ECB encryption, CRC), a
//! per-device controller state machine (sense, command, retry, pulse,
//! silence), and a single-threaded cooperative event loop tying the two
//! together. The HTTP façade, config file I/O, and the standalone CLI tool
//! are collaborators built on top of that core.

pub mod config;
pub mod controller;
pub mod crypto;
pub mod device;
pub mod discovery;
pub mod error;
pub mod eventloop;
pub mod http;
pub mod messages;
pub mod model;
pub mod protocol;

pub use controller::{Controller, Event as ControllerEvent};
pub use device::{Device, DeviceTable};
pub use error::{CoreError, Result};
pub use model::{Model, ModelRegistry};
pub use protocol::{Secret, Version};
