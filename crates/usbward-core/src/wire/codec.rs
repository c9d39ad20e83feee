//! Fixed-size record codec.
//!
//! Every record is exactly [`RECORD_LEN`] bytes regardless of opcode: a
//! 3-byte header, a payload area padded to the largest payload variant, and
//! the 8-byte opaque device handle. Multi-byte integers are little-endian.
//!
//! ```text
//! +--------+------------+---------------------+----------------+-----------+
//! | opcode | config_num | interface_total_num | payload (295B) | handle 8B |
//! +--------+------------+---------------------+----------------+-----------+
//!   1 byte    1 byte        1 byte              zero-padded
//! ```
//!
//! Decoding is all-or-nothing: a record either validates completely (exact
//! length, known opcode, interface count within bound) or is rejected with a
//! [`WireError`] and dropped by the caller. There is no partial or streaming
//! decode.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{
    DeviceAnnounce, DeviceHandle, FingerprintRecord, InterfaceDescriptor, InterfaceList,
    InterfaceMask, Message, Opcode, OperatorDecision, Payload, SecurityAnnounce, SecurityDecision,
    FINGERPRINT_LEN, MAX_INTERFACES, STRING_FIELD_LEN,
};
use crate::classify::DeviceCategory;

/// Total record length on the wire.
pub const RECORD_LEN: usize = HEADER_LEN + PAYLOAD_LEN + HANDLE_LEN;

/// Header length: opcode, config_num, interface_total_num.
const HEADER_LEN: usize = 3;

/// Opaque device handle length.
const HANDLE_LEN: usize = 8;

/// Payload area length: the largest payload variant (`SecurityAnnounce`).
pub const PAYLOAD_LEN: usize = SECURITY_ANNOUNCE_LEN;

/// `DeviceAnnounce` payload: two strings, 32 interface slots, two ids.
const DEVICE_ANNOUNCE_LEN: usize = 2 * STRING_FIELD_LEN + MAX_INTERFACES * 4 + 4;

/// `SecurityAnnounce` payload: an announce plus mask and three flag bytes.
const SECURITY_ANNOUNCE_LEN: usize = DEVICE_ANNOUNCE_LEN + MAX_INTERFACES + 3;

/// `OperatorDecision` payload: mask plus four flag bytes.
const OPERATOR_DECISION_LEN: usize = MAX_INTERFACES + 4;

/// `SecurityDecision` payload: a decision plus the enable byte.
const SECURITY_DECISION_LEN: usize = OPERATOR_DECISION_LEN + 1;

/// Fingerprint record length, shared with the durable store format.
pub const FP_RECORD_LEN: usize = FINGERPRINT_LEN + MAX_INTERFACES + 3;

// Layout invariants; a change to any constituent constant shows up here.
const _: () = assert!(RECORD_LEN == 306);
const _: () = assert!(PAYLOAD_LEN == 295);
const _: () = assert!(DEVICE_ANNOUNCE_LEN == 260);
const _: () = assert!(FP_RECORD_LEN == 55);
const _: () = assert!(STRING_FIELD_LEN <= PAYLOAD_LEN);

/// Decode failures. The caller's contract for every variant is the same:
/// drop the record and continue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Record is not exactly [`RECORD_LEN`] bytes.
    #[error("record length {len} bytes, expected exactly {RECORD_LEN}")]
    Length {
        /// Received length.
        len: usize,
    },

    /// The opcode byte is not a known protocol opcode.
    #[error("unknown opcode {opcode:#04x}")]
    UnknownOpcode {
        /// Received opcode byte.
        opcode: u8,
    },

    /// `interface_total_num` exceeds the per-device interface bound.
    #[error("interface count {count} exceeds the {MAX_INTERFACES}-interface bound")]
    InterfaceCount {
        /// Received count.
        count: u8,
    },

    /// An [`InterfaceList`] was constructed with too many descriptors.
    #[error("interface list of {len} entries exceeds the {MAX_INTERFACES}-interface bound")]
    OversizedInterfaceList {
        /// Attempted list length.
        len: usize,
    },
}

/// Encodes a message into one wire record.
///
/// Unused payload bytes are zero; the result is always [`RECORD_LEN`] bytes.
/// String fields longer than the 64-byte wire field are truncated to 63
/// bytes (the final byte is always NUL).
#[must_use]
pub fn encode(message: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(RECORD_LEN);
    buf.put_u8(message.opcode().as_u8());
    buf.put_u8(message.config_num);
    buf.put_u8(message.interface_total_num);

    let payload_start = buf.len();
    match &message.payload {
        Payload::Init { greeting } => put_string_field(&mut buf, greeting),
        Payload::DeviceAnnounce(announce) => put_device_announce(&mut buf, announce),
        Payload::OperatorDecision(decision) => put_operator_decision(&mut buf, decision),
        Payload::Bye => {}
        Payload::SecurityAnnounce(announce) => {
            put_device_announce(&mut buf, &announce.device);
            buf.put_slice(announce.proposed_mask.as_bytes());
            buf.put_u8(u8::from(announce.limited_hid));
            buf.put_u8(announce.security_pic_index);
            buf.put_u8(announce.description.id());
        }
        Payload::SecurityDecision(verdict) => {
            put_operator_decision(&mut buf, &verdict.decision);
            buf.put_u8(u8::from(verdict.enable));
        }
        Payload::FingerprintNotify(record) | Payload::FingerprintRestore(record) => {
            buf.put_slice(&record.to_bytes());
        }
    }
    let written = buf.len() - payload_start;
    buf.put_bytes(0, PAYLOAD_LEN - written);

    buf.put_slice(message.device_handle.as_bytes());
    debug_assert_eq!(buf.len(), RECORD_LEN);
    buf.freeze()
}

/// Decodes one wire record.
///
/// # Errors
///
/// Returns a [`WireError`] when the record length, opcode, or interface
/// count is invalid. A successful decode yields a [`Message`] whose payload
/// variant matches its opcode by construction.
pub fn decode(record: &[u8]) -> Result<Message, WireError> {
    if record.len() != RECORD_LEN {
        return Err(WireError::Length { len: record.len() });
    }

    let mut buf = record;
    let opcode_byte = buf.get_u8();
    let opcode = Opcode::from_u8(opcode_byte).ok_or(WireError::UnknownOpcode {
        opcode: opcode_byte,
    })?;
    let config_num = buf.get_u8();
    let interface_total_num = buf.get_u8();
    if usize::from(interface_total_num) > MAX_INTERFACES {
        return Err(WireError::InterfaceCount {
            count: interface_total_num,
        });
    }

    let (mut payload_buf, rest) = buf.split_at(PAYLOAD_LEN);
    let mut handle = [0u8; HANDLE_LEN];
    handle.copy_from_slice(rest);

    let payload = match opcode {
        Opcode::Init => Payload::Init {
            greeting: get_string_field(&mut payload_buf),
        },
        Opcode::DeviceAnnounce => {
            Payload::DeviceAnnounce(get_device_announce(&mut payload_buf, interface_total_num)?)
        }
        Opcode::OperatorDecision => {
            Payload::OperatorDecision(get_operator_decision(&mut payload_buf))
        }
        Opcode::Bye => Payload::Bye,
        Opcode::SecurityAnnounce => {
            let device = get_device_announce(&mut payload_buf, interface_total_num)?;
            let proposed_mask = get_mask(&mut payload_buf);
            let limited_hid = payload_buf.get_u8() != 0;
            let security_pic_index = payload_buf.get_u8();
            let description = DeviceCategory::from_id(payload_buf.get_u8());
            Payload::SecurityAnnounce(SecurityAnnounce {
                device,
                proposed_mask,
                limited_hid,
                security_pic_index,
                description,
            })
        }
        Opcode::SecurityDecision => {
            let decision = get_operator_decision(&mut payload_buf);
            let enable = payload_buf.get_u8() != 0;
            Payload::SecurityDecision(SecurityDecision { decision, enable })
        }
        Opcode::FingerprintNotify => {
            Payload::FingerprintNotify(get_fingerprint_record(&mut payload_buf))
        }
        Opcode::FingerprintRestore => {
            Payload::FingerprintRestore(get_fingerprint_record(&mut payload_buf))
        }
    };

    Ok(Message {
        config_num,
        interface_total_num,
        device_handle: DeviceHandle::new(handle),
        payload,
    })
}

impl FingerprintRecord {
    /// Serializes this record into the shared wire/store layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; FP_RECORD_LEN] {
        let mut bytes = [0u8; FP_RECORD_LEN];
        bytes[..FINGERPRINT_LEN].copy_from_slice(&self.digest);
        bytes[FINGERPRINT_LEN..FINGERPRINT_LEN + MAX_INTERFACES]
            .copy_from_slice(self.interface_mask.as_bytes());
        bytes[FP_RECORD_LEN - 3] = u8::from(self.limited_hid);
        bytes[FP_RECORD_LEN - 2] = self.security_pic_index;
        bytes[FP_RECORD_LEN - 1] = self.description.id();
        bytes
    }

    /// Deserializes a record from the shared wire/store layout.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; FP_RECORD_LEN]) -> Self {
        let mut digest = [0u8; FINGERPRINT_LEN];
        digest.copy_from_slice(&bytes[..FINGERPRINT_LEN]);
        let mut mask = [0u8; MAX_INTERFACES];
        mask.copy_from_slice(&bytes[FINGERPRINT_LEN..FINGERPRINT_LEN + MAX_INTERFACES]);
        Self {
            digest,
            interface_mask: InterfaceMask::from_bytes(mask),
            limited_hid: bytes[FP_RECORD_LEN - 3] != 0,
            security_pic_index: bytes[FP_RECORD_LEN - 2],
            description: DeviceCategory::from_id(bytes[FP_RECORD_LEN - 1]),
        }
    }
}

fn put_string_field(buf: &mut BytesMut, value: &str) {
    let bytes = value.as_bytes();
    let take = bytes.len().min(STRING_FIELD_LEN - 1);
    buf.put_slice(&bytes[..take]);
    buf.put_bytes(0, STRING_FIELD_LEN - take);
}

fn get_string_field(buf: &mut &[u8]) -> String {
    let (field, rest) = buf.split_at(STRING_FIELD_LEN);
    *buf = rest;
    let end = field.iter().position(|byte| *byte == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn put_device_announce(buf: &mut BytesMut, announce: &DeviceAnnounce) {
    put_string_field(buf, &announce.product);
    put_string_field(buf, &announce.manufacturer);
    for slot in 0..MAX_INTERFACES {
        let descriptor = announce
            .interfaces
            .get(slot)
            .copied()
            .unwrap_or_default();
        buf.put_u8(descriptor.class);
        buf.put_u8(descriptor.subclass);
        buf.put_u8(descriptor.protocol);
        buf.put_u8(descriptor.endpoints);
    }
    buf.put_u16_le(announce.vendor_id);
    buf.put_u16_le(announce.product_id);
}

fn get_device_announce(
    buf: &mut &[u8],
    interface_total_num: u8,
) -> Result<DeviceAnnounce, WireError> {
    let product = get_string_field(buf);
    let manufacturer = get_string_field(buf);
    let mut descriptors = Vec::with_capacity(usize::from(interface_total_num));
    for slot in 0..MAX_INTERFACES {
        let descriptor = InterfaceDescriptor {
            class: buf.get_u8(),
            subclass: buf.get_u8(),
            protocol: buf.get_u8(),
            endpoints: buf.get_u8(),
        };
        if slot < usize::from(interface_total_num) {
            descriptors.push(descriptor);
        }
    }
    let vendor_id = buf.get_u16_le();
    let product_id = buf.get_u16_le();
    Ok(DeviceAnnounce {
        product,
        manufacturer,
        vendor_id,
        product_id,
        interfaces: InterfaceList::new(descriptors)?,
    })
}

fn put_operator_decision(buf: &mut BytesMut, decision: &OperatorDecision) {
    buf.put_slice(decision.interface_mask.as_bytes());
    buf.put_u8(u8::from(decision.limited_hid));
    buf.put_u8(decision.security_pic_index);
    buf.put_u8(decision.description.id());
    buf.put_u8(u8::from(decision.disable));
}

fn get_operator_decision(buf: &mut &[u8]) -> OperatorDecision {
    let interface_mask = get_mask(buf);
    OperatorDecision {
        interface_mask,
        limited_hid: buf.get_u8() != 0,
        security_pic_index: buf.get_u8(),
        description: DeviceCategory::from_id(buf.get_u8()),
        disable: buf.get_u8() != 0,
    }
}

fn get_mask(buf: &mut &[u8]) -> InterfaceMask {
    let mut raw = [0u8; MAX_INTERFACES];
    buf.copy_to_slice(&mut raw);
    InterfaceMask::from_bytes(raw)
}

fn get_fingerprint_record(buf: &mut &[u8]) -> FingerprintRecord {
    let (field, rest) = buf.split_at(FP_RECORD_LEN);
    *buf = rest;
    let mut bytes = [0u8; FP_RECORD_LEN];
    bytes.copy_from_slice(field);
    FingerprintRecord::from_bytes(&bytes)
}
