//! usbward-daemon - USB Device Authorization Daemon Library
//!
//! This library provides the daemon half of the USB device authorization
//! system: it receives device announcements from the kernel-side
//! enforcement point, asks an operator-facing consent front-end what the
//! device may do, and answers with per-interface authorization decisions.
//! Denied devices are handed to an external quarantine environment; decided
//! devices are remembered through a durable fingerprint store.
//!
//! # Runtime Requirements
//!
//! This crate requires a **multi-threaded tokio runtime**. The session loop
//! bridges the synchronous, blocking [`usbward_core::consent::ConsentProvider`]
//! call with `tokio::task::block_in_place`, which panics on a
//! single-threaded runtime. The `usbward-daemon` binary configures
//! `flavor = "multi_thread"`; do the same if you embed this library:
//!
//! ```rust,ignore
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() {
//!     // Use usbward-daemon components here
//! }
//! ```
//!
//! # Modules
//!
//! - [`channel`]: datagram transport to the kernel-side enforcement point
//! - [`engine`]: the policy decision engine (fail-open first contact,
//!   preserve-previous reconfirmation)
//! - [`frontend`]: subprocess consent front-end speaking JSON over
//!   stdin/stdout
//! - [`redirect`]: quarantine redirection for denied devices
//! - [`session`]: the session loop tying channel, queue, engine, store, and
//!   redirection together
//! - [`store`]: the append-only durable fingerprint store

pub mod channel;
pub mod engine;
pub mod frontend;
pub mod redirect;
pub mod session;
pub mod store;
