//! Quarantine redirection.
//!
//! When a reply denies a device (first-contact `disable`, or a
//! reconfirmation that came back disabled), the device is handed to an
//! external quarantine environment instead of normal operation. The
//! invocation is fire-and-forget: the device has already been denied, so a
//! failed hand-off is logged and never re-opens the decision.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, warn};
use usbward_core::wire::{Message, Opcode, Payload};

/// Vendor/product identity handed to the quarantine service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// USB vendor identifier.
    pub vendor_id: u16,
    /// USB product identifier.
    pub product_id: u16,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Redirection failures.
#[derive(Debug, Error)]
pub enum RedirectError {
    /// [`RedirectController::needs_redirect`] was asked about a reply that
    /// carries no redirect decision. Caller bug, not a runtime condition.
    #[error("reply opcode {0} carries no redirect decision")]
    UnsupportedOpcode(Opcode),

    /// The quarantine service could not be invoked.
    #[error("failed to invoke quarantine service: {0}")]
    Invoke(#[source] io::Error),
}

/// External quarantine environment.
pub trait QuarantineService: Send {
    /// Hands the device over for isolated handling. Fire-and-forget: the
    /// implementation must not block on the quarantine environment's
    /// completion.
    ///
    /// # Errors
    ///
    /// Returns [`RedirectError::Invoke`] when the hand-off itself cannot be
    /// started.
    fn redirect(&self, device: DeviceIdentity) -> Result<(), RedirectError>;
}

/// Quarantine service backed by an external command.
///
/// The command is spawned with the vendor and product identifiers as
/// arguments (`0x1234 0xabcd`) and is not waited on; the runtime reaps it
/// when it exits.
#[derive(Debug)]
pub struct CommandQuarantine {
    program: PathBuf,
}

impl CommandQuarantine {
    /// Creates a quarantine service invoking `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl QuarantineService for CommandQuarantine {
    fn redirect(&self, device: DeviceIdentity) -> Result<(), RedirectError> {
        let child = tokio::process::Command::new(&self.program)
            .arg(format!("{:#06x}", device.vendor_id))
            .arg(format!("{:#06x}", device.product_id))
            .spawn()
            .map_err(RedirectError::Invoke)?;
        debug!(
            program = %self.program.display(),
            device = %device,
            pid = child.id(),
            "quarantine hand-off started"
        );
        drop(child);
        Ok(())
    }
}

/// Inspects replies and drives the quarantine hand-off.
pub struct RedirectController {
    service: Box<dyn QuarantineService>,
}

impl RedirectController {
    /// Creates a controller around the given quarantine service.
    #[must_use]
    pub fn new(service: Box<dyn QuarantineService>) -> Self {
        Self { service }
    }

    /// Whether the given reply denies the device normal operation.
    ///
    /// # Errors
    ///
    /// Returns [`RedirectError::UnsupportedOpcode`] for replies other than
    /// `OperatorDecision` and `SecurityDecision`.
    pub fn needs_redirect(reply: &Message) -> Result<bool, RedirectError> {
        match &reply.payload {
            Payload::OperatorDecision(decision) => Ok(decision.disable),
            Payload::SecurityDecision(verdict) => Ok(!verdict.enable),
            _ => Err(RedirectError::UnsupportedOpcode(reply.opcode())),
        }
    }

    /// Hands the device to the quarantine service.
    ///
    /// Failures are logged only; the device keeps its (already denied)
    /// state either way.
    pub fn redirect(&self, device: DeviceIdentity) {
        match self.service.redirect(device) {
            Ok(()) => debug!(device = %device, "device redirected to quarantine"),
            Err(e) => warn!(device = %device, "quarantine redirection failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use usbward_core::wire::{
        DeviceHandle, InterfaceMask, OperatorDecision, SecurityDecision,
    };

    use super::*;

    fn decision_reply(disable: bool) -> Message {
        Message {
            config_num: 0,
            interface_total_num: 1,
            device_handle: DeviceHandle::ZERO,
            payload: Payload::OperatorDecision(OperatorDecision {
                interface_mask: InterfaceMask::first_enabled(1),
                disable,
                ..OperatorDecision::default()
            }),
        }
    }

    fn verdict_reply(enable: bool) -> Message {
        Message {
            config_num: 0,
            interface_total_num: 1,
            device_handle: DeviceHandle::ZERO,
            payload: Payload::SecurityDecision(SecurityDecision {
                decision: OperatorDecision::default(),
                enable,
            }),
        }
    }

    #[test]
    fn disable_drives_first_contact_redirect() {
        assert!(RedirectController::needs_redirect(&decision_reply(true)).unwrap());
        assert!(!RedirectController::needs_redirect(&decision_reply(false)).unwrap());
    }

    #[test]
    fn disabled_reconfirmation_drives_redirect() {
        assert!(RedirectController::needs_redirect(&verdict_reply(false)).unwrap());
        assert!(!RedirectController::needs_redirect(&verdict_reply(true)).unwrap());
    }

    #[test]
    fn non_decision_replies_are_a_caller_error() {
        let err = RedirectController::needs_redirect(&Message::bye()).unwrap_err();
        assert!(matches!(err, RedirectError::UnsupportedOpcode(Opcode::Bye)));
    }

    /// Quarantine stub recording the identities it was handed.
    struct Recording(Arc<Mutex<Vec<DeviceIdentity>>>);

    impl QuarantineService for Recording {
        fn redirect(&self, device: DeviceIdentity) -> Result<(), RedirectError> {
            self.0.lock().unwrap().push(device);
            Ok(())
        }
    }

    /// Quarantine stub that always fails to start.
    struct Broken;

    impl QuarantineService for Broken {
        fn redirect(&self, _device: DeviceIdentity) -> Result<(), RedirectError> {
            Err(RedirectError::Invoke(io::Error::new(
                io::ErrorKind::NotFound,
                "no such program",
            )))
        }
    }

    #[test]
    fn redirect_passes_the_device_identity_through() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let controller = RedirectController::new(Box::new(Recording(Arc::clone(&seen))));
        let identity = DeviceIdentity {
            vendor_id: 0x1d6b,
            product_id: 0x0002,
        };
        controller.redirect(identity);
        assert_eq!(seen.lock().unwrap().as_slice(), &[identity]);
    }

    #[test]
    fn redirect_failure_is_swallowed() {
        let controller = RedirectController::new(Box::new(Broken));
        // Must not panic or propagate.
        controller.redirect(DeviceIdentity {
            vendor_id: 1,
            product_id: 2,
        });
    }

    #[tokio::test]
    async fn command_quarantine_spawn_failure_reports_invoke() {
        let quarantine = CommandQuarantine::new("/nonexistent/usbward-quarantine");
        let err = quarantine
            .redirect(DeviceIdentity {
                vendor_id: 1,
                product_id: 2,
            })
            .unwrap_err();
        assert!(matches!(err, RedirectError::Invoke(_)));
    }

    #[tokio::test]
    async fn command_quarantine_spawns_fire_and_forget() {
        let quarantine = CommandQuarantine::new("true");
        quarantine
            .redirect(DeviceIdentity {
                vendor_id: 0x046d,
                product_id: 0xc077,
            })
            .unwrap();
    }
}
