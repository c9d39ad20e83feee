//! Consent-provider contract.
//!
//! The decision engine never talks to an operator directly; it hands a
//! structured [`ConsentSummary`] to a [`ConsentProvider`] and receives a
//! structured [`ConsentReply`] back. This keeps the engine independent of
//! any particular front-end technology: the daemon ships a subprocess-based
//! provider, tests use scripted ones.
//!
//! The provider call is synchronous and externally timed: the engine applies
//! no timeout of its own, and a hung front-end stalls the session loop by
//! design.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-interface detail shown to the operator in professional mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDetail {
    /// Interface index within the announced configuration.
    pub index: u8,
    /// Raw USB interface class code.
    pub class: u8,
    /// Short class name (see [`crate::classify::class_name`]).
    pub class_name: String,
    /// Subclass code.
    pub subclass: u8,
    /// Protocol code.
    pub protocol: u8,
    /// Endpoint count.
    pub endpoints: u8,
    /// For reconfirmation requests: whether the previously computed policy
    /// enabled this interface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_enable: Option<bool>,
}

/// The previously computed policy attached to a reconfirmation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedPolicy {
    /// Previously decided limited-HID flag.
    pub limited_hid: bool,
    /// Security picture bound to the device's fingerprint.
    pub security_pic_index: u8,
    /// Previously resolved device description.
    pub description: String,
}

/// Structured device summary handed to the consent provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentSummary {
    /// Whether the operator runs in professional mode.
    pub professional: bool,
    /// Device configuration number.
    pub config_num: u8,
    /// Number of announced interfaces.
    pub interface_total_num: u8,
    /// Product string from the device descriptor.
    pub product: String,
    /// Manufacturer string from the device descriptor.
    pub manufacturer: String,
    /// Per-interface detail; populated only in professional mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceDetail>,
    /// Present only for reconfirmation requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<ProposedPolicy>,
}

/// Structured answer from the consent front-end.
///
/// Every field is optional on the wire; the engine substitutes its
/// documented defaults for anything absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentResponse {
    /// Professional mode: indices of the interfaces the operator approved.
    #[serde(default)]
    pub approved_interfaces: Vec<u8>,
    /// Simplified mode: the device description the operator chose.
    #[serde(default)]
    pub category: Option<String>,
    /// Professional mode: whether the limited HID driver was requested.
    #[serde(default)]
    pub limited_hid: bool,
    /// Security picture the operator bound to this device. Absent means
    /// "no selection" (default enable); an explicit 0 means refusal.
    #[serde(default)]
    pub security_pic_index: Option<u8>,
    /// Reconfirmation flows: whether the device stays enabled. Absent
    /// defaults to enabled.
    #[serde(default)]
    pub enable: Option<bool>,
}

/// Outcome of one consent request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentReply {
    /// The operator answered.
    Response(ConsentResponse),
    /// The operator dismissed the request without answering.
    Canceled,
}

/// Consent front-end failures.
///
/// Every variant is handled the same way by the engine: apply the
/// fail-safe default for the flow at hand. None of these propagate.
#[derive(Debug, Error)]
pub enum ConsentError {
    /// The front-end could not be launched.
    #[error("failed to launch consent front-end: {0}")]
    Launch(#[source] io::Error),

    /// I/O toward the front-end failed mid-exchange.
    #[error("consent front-end exchange failed: {0}")]
    Exchange(#[source] io::Error),

    /// The front-end exited unsuccessfully.
    #[error("consent front-end exited with status {status}")]
    Frontend {
        /// Exit status rendered for logging.
        status: String,
    },

    /// The front-end produced a response the daemon cannot parse.
    #[error("malformed consent response: {reason}")]
    Malformed {
        /// Parse failure detail.
        reason: String,
    },
}

/// Synchronous consent capability.
///
/// Implementations block until the operator answers, fails, or cancels;
/// the session loop accounts for that blocking.
pub trait ConsentProvider {
    /// Asks the operator to decide on the summarized device.
    ///
    /// # Errors
    ///
    /// Returns a [`ConsentError`] when the front-end cannot be reached or
    /// produces an unusable response. Callers treat errors as front-end
    /// failure and fall back to flow-specific defaults.
    fn request_consent(&mut self, summary: &ConsentSummary) -> Result<ConsentReply, ConsentError>;
}
