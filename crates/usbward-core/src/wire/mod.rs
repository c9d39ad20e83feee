//! Wire message model for the kernel/daemon authorization protocol.
//!
//! Every exchange between the kernel-side enforcement point and the daemon is
//! one fixed-size, self-contained record. This module defines the decoded
//! model; [`codec`] owns the byte layout.
//!
//! # Message flow
//!
//! ```text
//! kernel side                              daemon
//!   |                                        |
//!   |  <-- Init { greeting } ----------------|   session open
//!   |  <-- FingerprintRestore (per record) --|   store resync
//!   |  -- Init { greeting } -->              |
//!   |                                        |
//!   |  -- DeviceAnnounce -->                 |   first contact
//!   |  <-- OperatorDecision -----------------|
//!   |                                        |
//!   |  -- SecurityAnnounce -->               |   reconfirmation
//!   |  <-- SecurityDecision -----------------|
//!   |                                        |
//!   |  -- FingerprintNotify -->              |   persistence, no reply
//!   |  -- Bye -->                            |   session close
//! ```
//!
//! # Invariants
//!
//! - [INV-WIRE-001] Exactly one payload variant exists per opcode; a decoded
//!   [`Message`] cannot carry a mismatched payload.
//! - [INV-WIRE-002] `interface_total_num` never exceeds [`MAX_INTERFACES`];
//!   decode rejects, and [`InterfaceList`] refuses construction, beyond it.
//! - [INV-WIRE-003] `device_handle` is opaque: the daemon echoes it verbatim
//!   and never interprets it.

pub mod codec;

use std::fmt;

use crate::classify::DeviceCategory;

/// Upper bound on interfaces per device configuration.
pub const MAX_INTERFACES: usize = 32;

/// Fixed length of the product/manufacturer/greeting string fields.
pub const STRING_FIELD_LEN: usize = 64;

/// Length of a device descriptor digest.
pub const FINGERPRINT_LEN: usize = 20;

/// Protocol opcodes, one per record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Session greeting, exchanged by both sides before policy traffic.
    Init = 0,
    /// Kernel announces a newly attached device.
    DeviceAnnounce = 1,
    /// Daemon's decision for a first-contact announcement.
    OperatorDecision = 2,
    /// Kernel ends the session.
    Bye = 3,
    /// Kernel proposes a previously computed policy for reconfirmation.
    SecurityAnnounce = 4,
    /// Daemon's reconfirmation verdict.
    SecurityDecision = 5,
    /// Kernel pushes a freshly computed fingerprint for persistence.
    FingerprintNotify = 6,
    /// Daemon restores one stored fingerprint to the kernel at startup.
    FingerprintRestore = 7,
}

impl Opcode {
    /// Decodes a wire opcode byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Init),
            1 => Some(Self::DeviceAnnounce),
            2 => Some(Self::OperatorDecision),
            3 => Some(Self::Bye),
            4 => Some(Self::SecurityAnnounce),
            5 => Some(Self::SecurityDecision),
            6 => Some(Self::FingerprintNotify),
            7 => Some(Self::FingerprintRestore),
            _ => None,
        }
    }

    /// The wire encoding of this opcode.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::DeviceAnnounce => "K2U",
            Self::OperatorDecision => "U2K",
            Self::Bye => "BYE",
            Self::SecurityAnnounce => "K2U_SEC",
            Self::SecurityDecision => "U2K_SEC",
            Self::FingerprintNotify => "K2U_SYN",
            Self::FingerprintRestore => "U2K_SYN",
        };
        f.write_str(name)
    }
}

/// Opaque device token owned by the kernel side.
///
/// Meaningful only to the peer; the daemon copies it from request to reply
/// and never looks inside.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceHandle([u8; 8]);

impl DeviceHandle {
    /// The all-zero handle, used where no device is in play (`Init`, `Bye`,
    /// fingerprint synchronization).
    pub const ZERO: Self = Self([0; 8]);

    /// Wraps a raw 8-byte token.
    #[must_use]
    pub const fn new(raw: [u8; 8]) -> Self {
        Self(raw)
    }

    /// The raw token bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// One interface descriptor as reported by device enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    /// USB base class code (see [`crate::classify::class`]).
    pub class: u8,
    /// Subclass code.
    pub subclass: u8,
    /// Protocol code.
    pub protocol: u8,
    /// Number of endpoints.
    pub endpoints: u8,
}

/// Ordered, bounded list of interface descriptors.
///
/// Construction is length-checked: a device claiming more than
/// [`MAX_INTERFACES`] interfaces is rejected rather than truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceList(Vec<InterfaceDescriptor>);

impl InterfaceList {
    /// Wraps a descriptor list, rejecting any over the interface bound.
    ///
    /// # Errors
    ///
    /// Returns [`codec::WireError::OversizedInterfaceList`] when the list
    /// exceeds [`MAX_INTERFACES`] entries.
    pub fn new(descriptors: Vec<InterfaceDescriptor>) -> Result<Self, codec::WireError> {
        if descriptors.len() > MAX_INTERFACES {
            return Err(codec::WireError::OversizedInterfaceList {
                len: descriptors.len(),
            });
        }
        Ok(Self(descriptors))
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The descriptor at `index`, if present.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&InterfaceDescriptor> {
        self.0.get(index)
    }

    /// Iterates the descriptors in wire order.
    pub fn iter(&self) -> impl Iterator<Item = &InterfaceDescriptor> {
        self.0.iter()
    }
}

/// Per-interface enable mask, one byte per interface slot.
///
/// Wire representation is a 32-byte array of 0/1 values; only the first
/// `interface_total_num` entries of a message are meaningful.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InterfaceMask([u8; MAX_INTERFACES]);

impl InterfaceMask {
    /// All interfaces disabled.
    #[must_use]
    pub const fn empty() -> Self {
        Self([0; MAX_INTERFACES])
    }

    /// Mask with the first `count` interfaces enabled; the fail-open shape.
    #[must_use]
    pub fn first_enabled(count: usize) -> Self {
        let mut mask = Self::empty();
        for slot in mask.0.iter_mut().take(count.min(MAX_INTERFACES)) {
            *slot = 1;
        }
        mask
    }

    /// Enables the interface at `index`. Out-of-range indices are ignored.
    pub fn enable(&mut self, index: usize) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = 1;
        }
    }

    /// Whether the interface at `index` is enabled.
    #[must_use]
    pub fn is_enabled(&self, index: usize) -> bool {
        self.0.get(index).is_some_and(|slot| *slot != 0)
    }

    /// Number of enabled interfaces.
    #[must_use]
    pub fn enabled_count(&self) -> usize {
        self.0.iter().filter(|slot| **slot != 0).count()
    }

    /// The raw 0/1 byte array as carried on the wire.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; MAX_INTERFACES] {
        &self.0
    }

    /// Builds a mask from wire bytes; nonzero bytes count as enabled.
    #[must_use]
    pub fn from_bytes(bytes: [u8; MAX_INTERFACES]) -> Self {
        let mut normalized = [0u8; MAX_INTERFACES];
        for (slot, byte) in normalized.iter_mut().zip(bytes) {
            *slot = u8::from(byte != 0);
        }
        Self(normalized)
    }
}

impl Default for InterfaceMask {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for InterfaceMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceMask(")?;
        for slot in self.0 {
            write!(f, "{slot}")?;
        }
        write!(f, ")")
    }
}

/// First-contact device announcement from the kernel side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceAnnounce {
    /// Product string from the device descriptor.
    pub product: String,
    /// Manufacturer string from the device descriptor.
    pub manufacturer: String,
    /// USB vendor identifier.
    pub vendor_id: u16,
    /// USB product identifier.
    pub product_id: u16,
    /// The announced interface descriptors.
    pub interfaces: InterfaceList,
}

/// The daemon's decision for a first-contact announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorDecision {
    /// Which announced interfaces may bind their drivers.
    pub interface_mask: InterfaceMask,
    /// Whether the capability-limited HID driver must be substituted.
    pub limited_hid: bool,
    /// Security picture chosen by the operator; 0 means undecided/disable.
    pub security_pic_index: u8,
    /// Device category resolved from the operator's description.
    pub description: DeviceCategory,
    /// Whether the device must be disabled outright.
    pub disable: bool,
}

impl Default for OperatorDecision {
    fn default() -> Self {
        Self {
            interface_mask: InterfaceMask::empty(),
            limited_hid: false,
            security_pic_index: 0,
            description: DeviceCategory::Unknown,
            disable: false,
        }
    }
}

/// Reconfirmation request: a device announcement plus the previously
/// computed policy proposal to confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityAnnounce {
    /// The device being reconfirmed.
    pub device: DeviceAnnounce,
    /// Previously computed interface mask.
    pub proposed_mask: InterfaceMask,
    /// Previously computed limited-HID flag.
    pub limited_hid: bool,
    /// Security picture bound to the device's fingerprint.
    pub security_pic_index: u8,
    /// Previously resolved device category.
    pub description: DeviceCategory,
}

/// Reconfirmation verdict: the (unchanged) policy plus the enable bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityDecision {
    /// The confirmed policy, copied from the proposal.
    pub decision: OperatorDecision,
    /// Whether the device may operate under that policy.
    pub enable: bool,
}

/// A persisted association between a device fingerprint and its decided
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintRecord {
    /// Digest over the device's descriptors.
    pub digest: [u8; FINGERPRINT_LEN],
    /// Decided interface mask.
    pub interface_mask: InterfaceMask,
    /// Decided limited-HID flag.
    pub limited_hid: bool,
    /// Security picture bound to this fingerprint; never 0 when persisted.
    pub security_pic_index: u8,
    /// Decided device category.
    pub description: DeviceCategory,
}

/// Message payload, keyed by opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Session greeting.
    Init {
        /// Free-form greeting string, logged by the receiver.
        greeting: String,
    },
    /// First-contact announcement.
    DeviceAnnounce(DeviceAnnounce),
    /// First-contact decision.
    OperatorDecision(OperatorDecision),
    /// Session close; no payload.
    Bye,
    /// Reconfirmation request.
    SecurityAnnounce(SecurityAnnounce),
    /// Reconfirmation verdict.
    SecurityDecision(SecurityDecision),
    /// Fingerprint to persist.
    FingerprintNotify(FingerprintRecord),
    /// Fingerprint restored from the store.
    FingerprintRestore(FingerprintRecord),
}

impl Payload {
    /// The opcode this payload travels under.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Init { .. } => Opcode::Init,
            Self::DeviceAnnounce(_) => Opcode::DeviceAnnounce,
            Self::OperatorDecision(_) => Opcode::OperatorDecision,
            Self::Bye => Opcode::Bye,
            Self::SecurityAnnounce(_) => Opcode::SecurityAnnounce,
            Self::SecurityDecision(_) => Opcode::SecurityDecision,
            Self::FingerprintNotify(_) => Opcode::FingerprintNotify,
            Self::FingerprintRestore(_) => Opcode::FingerprintRestore,
        }
    }
}

/// One protocol record, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Device configuration number, echoed into replies.
    pub config_num: u8,
    /// Number of meaningful interface slots; bounds all per-interface
    /// arrays. At most [`MAX_INTERFACES`].
    pub interface_total_num: u8,
    /// Opaque kernel-side device token, echoed into replies.
    pub device_handle: DeviceHandle,
    /// The opcode-specific payload.
    pub payload: Payload,
}

impl Message {
    /// The message's opcode.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        self.payload.opcode()
    }

    /// Builds a session greeting.
    #[must_use]
    pub fn init(greeting: impl Into<String>) -> Self {
        Self {
            config_num: 0,
            interface_total_num: 0,
            device_handle: DeviceHandle::ZERO,
            payload: Payload::Init {
                greeting: greeting.into(),
            },
        }
    }

    /// Builds a session-close record.
    #[must_use]
    pub const fn bye() -> Self {
        Self {
            config_num: 0,
            interface_total_num: 0,
            device_handle: DeviceHandle::ZERO,
            payload: Payload::Bye,
        }
    }

    /// Builds a store-restore record for one fingerprint.
    #[must_use]
    pub const fn fingerprint_restore(record: FingerprintRecord) -> Self {
        Self {
            config_num: 0,
            interface_total_num: 0,
            device_handle: DeviceHandle::ZERO,
            payload: Payload::FingerprintRestore(record),
        }
    }
}

impl fmt::Display for Message {
    /// Compact one-line rendering for debug logging.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} config={} ifaces={} handle={}",
            self.opcode(),
            self.config_num,
            self.interface_total_num,
            self.device_handle
        )?;
        match &self.payload {
            Payload::Init { greeting } => write!(f, " greeting={greeting:?}"),
            Payload::DeviceAnnounce(announce) => write!(
                f,
                " product={:?} manufacturer={:?} id={:04x}:{:04x}",
                announce.product, announce.manufacturer, announce.vendor_id, announce.product_id
            ),
            Payload::OperatorDecision(decision) => write!(
                f,
                " mask={:?} limited_hid={} pic={} desc={:?} disable={}",
                decision.interface_mask,
                decision.limited_hid,
                decision.security_pic_index,
                decision.description,
                decision.disable
            ),
            Payload::Bye => Ok(()),
            Payload::SecurityAnnounce(announce) => write!(
                f,
                " product={:?} id={:04x}:{:04x} mask={:?} limited_hid={} pic={} desc={:?}",
                announce.device.product,
                announce.device.vendor_id,
                announce.device.product_id,
                announce.proposed_mask,
                announce.limited_hid,
                announce.security_pic_index,
                announce.description
            ),
            Payload::SecurityDecision(verdict) => write!(
                f,
                " mask={:?} limited_hid={} pic={} enable={}",
                verdict.decision.interface_mask,
                verdict.decision.limited_hid,
                verdict.decision.security_pic_index,
                verdict.enable
            ),
            Payload::FingerprintNotify(record) | Payload::FingerprintRestore(record) => write!(
                f,
                " pic={} limited_hid={} desc={:?}",
                record.security_pic_index, record.limited_hid, record.description
            ),
        }
    }
}
