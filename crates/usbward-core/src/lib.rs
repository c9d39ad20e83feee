//! usbward-core - protocol and policy types for the usbward daemon.
//!
//! This crate holds the pure-logic leaves of the USB device authorization
//! system: everything the daemon and its tests need that does not touch a
//! socket, a file, or a subprocess.
//!
//! # Modules
//!
//! - [`wire`]: the fixed-size tagged message model and its binary codec
//! - [`queue`]: the bounded inbound message queue
//! - [`classify`]: static device-category and interface-class tables
//! - [`consent`]: the structured consent-provider contract
//!
//! The daemon crate (`usbward-daemon`) layers the transport, the decision
//! engine, the fingerprint store, and the session loop on top of these
//! types.

pub mod classify;
pub mod consent;
pub mod queue;
pub mod wire;

pub use classify::DeviceCategory;
pub use queue::{MessageQueue, QueueFull, QUEUE_CAPACITY};
pub use wire::codec::{FP_RECORD_LEN, RECORD_LEN, WireError};
pub use wire::{DeviceHandle, FingerprintRecord, InterfaceMask, Message, Opcode, Payload};
