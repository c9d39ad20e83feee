//! Static device classification tables.
//!
//! Translates between machine-readable USB interface classes and the
//! operator-facing device categories used by the simplified decision mode.
//! The tables are fixed at compile time, perform no I/O, and carry no mutable
//! state; they exist solely so the decision engine can turn "the operator says
//! this is a USB Mouse" into "interfaces of class HID or vendor-specific are
//! acceptable".
//!
//! # Category / class relationship
//!
//! Each category maps to a small set of legal interface classes. The
//! vendor-specific class is legal for every category that permits interfaces
//! at all: a vendor-specific interface cannot bind a generic class driver, so
//! it adds no generic attack surface beyond the vendor driver the operator
//! must install anyway. Two categories are deliberately empty:
//!
//! - [`DeviceCategory::Charger`]: a charge-only device has no business
//!   presenting any interface.
//! - [`DeviceCategory::Unknown`]: an unrecognized description grants nothing.

/// Well-known USB interface class codes (base class byte of the interface
/// descriptor).
pub mod class {
    /// Class is declared per interface rather than on the device.
    pub const PER_INTERFACE: u8 = 0x00;
    /// Audio devices (speakers, microphones, sound cards).
    pub const AUDIO: u8 = 0x01;
    /// Communications and CDC control.
    pub const COMM: u8 = 0x02;
    /// Human interface devices (keyboards, mice, game controllers).
    pub const HID: u8 = 0x03;
    /// Physical interface devices (force feedback).
    pub const PHYSICAL: u8 = 0x05;
    /// Still image capture (scanners, cameras in PTP mode).
    pub const STILL_IMAGE: u8 = 0x06;
    /// Printers.
    pub const PRINTER: u8 = 0x07;
    /// Mass storage.
    pub const MASS_STORAGE: u8 = 0x08;
    /// Hubs.
    pub const HUB: u8 = 0x09;
    /// CDC data.
    pub const CDC_DATA: u8 = 0x0a;
    /// Smart card readers.
    pub const SMART_CARD: u8 = 0x0b;
    /// Content security.
    pub const CONTENT_SECURITY: u8 = 0x0d;
    /// Video (webcams).
    pub const VIDEO: u8 = 0x0e;
    /// Wireless controllers (Bluetooth adapters, RF dongles).
    pub const WIRELESS_CONTROLLER: u8 = 0xe0;
    /// Miscellaneous.
    pub const MISC: u8 = 0xef;
    /// Application-specific.
    pub const APP_SPECIFIC: u8 = 0xfe;
    /// Vendor-specific; requires a vendor driver.
    pub const VENDOR_SPECIFIC: u8 = 0xff;
}

/// Short display names for interface classes, for the professional-mode
/// device summary.
const CLASS_NAMES: &[(u8, &str)] = &[
    (class::PER_INTERFACE, ">ifc"),
    (class::AUDIO, "audio"),
    (class::COMM, "comm."),
    (class::HID, "HID"),
    (class::PHYSICAL, "PID"),
    (class::STILL_IMAGE, "still"),
    (class::PRINTER, "print"),
    (class::MASS_STORAGE, "stor."),
    (class::HUB, "hub"),
    (class::CDC_DATA, "data"),
    (class::SMART_CARD, "scard"),
    (class::CONTENT_SECURITY, "c-sec"),
    (class::VIDEO, "video"),
    (class::WIRELESS_CONTROLLER, "wlcon"),
    (class::MISC, "misc"),
    (class::APP_SPECIFIC, "app."),
    (class::VENDOR_SPECIFIC, "vend."),
];

/// Returns the short display name for an interface class.
///
/// Unmatched classes render as `"unk."`.
#[must_use]
pub fn class_name(class: u8) -> &'static str {
    CLASS_NAMES
        .iter()
        .find(|(code, _)| *code == class)
        .map_or("unk.", |(_, name)| name)
}

/// Operator-facing device categories.
///
/// The discriminant doubles as the description index carried in wire
/// messages and fingerprint records; [`DeviceCategory::Unknown`] is the
/// catch-all and the value used whenever a description cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceCategory {
    /// Thumb drives, portable disks, SD readers.
    Storage = 0x00,
    /// Keyboards.
    Keyboard = 0x01,
    /// Mice.
    Mouse = 0x02,
    /// Joysticks and game controllers.
    Joystick = 0x03,
    /// Wireless adapters.
    Wireless = 0x04,
    /// Cellphones.
    Cellphone = 0x05,
    /// Tablets.
    Tablet = 0x06,
    /// Microphones.
    Microphone = 0x07,
    /// Sound cards, speakers, headphones.
    Sound = 0x08,
    /// Port-extension hubs.
    Hub = 0x09,
    /// Webcams and other video sources.
    Video = 0x0a,
    /// Headsets (audio plus controls).
    Headset = 0x0b,
    /// Charge-only devices.
    Charger = 0x0c,
    /// USB networking and communication devices.
    Communication = 0x0d,
    /// Printers.
    Printer = 0x0e,
    /// Scanners.
    Scanner = 0x0f,
    /// Catch-all for anything unrecognized.
    Unknown = 0xff,
}

/// One classification table row: category, operator-facing description, and
/// the interface classes a device of that category may legally present.
struct CategoryRow {
    category: DeviceCategory,
    description: &'static str,
    legal: &'static [u8],
}

/// The classification table. Order matters only in that `Unknown` is the
/// final, catch-all row.
const CATEGORY_TABLE: &[CategoryRow] = &[
    CategoryRow {
        category: DeviceCategory::Storage,
        description: "USB Storage (thumb drive, portable disk, SD reader)",
        legal: &[
            class::MASS_STORAGE,
            class::SMART_CARD,
            class::VENDOR_SPECIFIC,
        ],
    },
    CategoryRow {
        category: DeviceCategory::Keyboard,
        description: "USB Keyboard",
        legal: &[class::HID, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Mouse,
        description: "USB Mouse",
        legal: &[class::HID, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Joystick,
        description: "USB Joystick",
        legal: &[class::HID, class::PHYSICAL, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Wireless,
        description: "USB Wireless",
        legal: &[class::WIRELESS_CONTROLLER, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Cellphone,
        description: "USB Cellphone (iPhone, Nexus, Galaxy)",
        legal: &[class::MASS_STORAGE, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Tablet,
        description: "USB Tablet (iPad, Nexus, Tab)",
        legal: &[class::MASS_STORAGE, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Microphone,
        description: "USB Microphone",
        legal: &[class::AUDIO, class::HID, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Sound,
        description: "USB Sound (sound card, speaker, headphone)",
        legal: &[class::AUDIO, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Hub,
        description: "USB Hub (USB port extension)",
        legal: &[class::HUB, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Video,
        description: "USB Video (WebCam)",
        legal: &[class::VIDEO, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Headset,
        description: "USB Headset",
        legal: &[class::AUDIO, class::HID, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Charger,
        description: "USB Charger (E-cig, portable battery, toy)",
        legal: &[],
    },
    CategoryRow {
        category: DeviceCategory::Communication,
        description: "USB Communication (USB-USB networking, ATM/Ethernet)",
        legal: &[class::CDC_DATA, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Printer,
        description: "USB Printer",
        legal: &[class::PRINTER, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Scanner,
        description: "USB Scanner",
        legal: &[class::STILL_IMAGE, class::VENDOR_SPECIFIC],
    },
    CategoryRow {
        category: DeviceCategory::Unknown,
        description: "USB UNKNOWN",
        legal: &[],
    },
];

impl DeviceCategory {
    /// Every known category, `Unknown` last.
    pub const ALL: [Self; 17] = [
        Self::Storage,
        Self::Keyboard,
        Self::Mouse,
        Self::Joystick,
        Self::Wireless,
        Self::Cellphone,
        Self::Tablet,
        Self::Microphone,
        Self::Sound,
        Self::Hub,
        Self::Video,
        Self::Headset,
        Self::Charger,
        Self::Communication,
        Self::Printer,
        Self::Scanner,
        Self::Unknown,
    ];

    /// The numeric identifier carried on the wire as a description index.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Resolves a wire description index. Unmapped values collapse to
    /// [`DeviceCategory::Unknown`].
    #[must_use]
    pub fn from_id(id: u8) -> Self {
        Self::ALL
            .into_iter()
            .find(|category| category.id() == id)
            .unwrap_or(Self::Unknown)
    }

    /// Resolves an operator-facing description to a category.
    ///
    /// The match is exact but case-insensitive: `"USB Mouse"` and
    /// `"usb mouse"` resolve identically. Anything else yields
    /// [`DeviceCategory::Unknown`].
    #[must_use]
    pub fn from_description(description: &str) -> Self {
        CATEGORY_TABLE
            .iter()
            .find(|row| row.description.eq_ignore_ascii_case(description))
            .map_or(Self::Unknown, |row| row.category)
    }

    /// The operator-facing description string for this category.
    #[must_use]
    pub fn describe(self) -> &'static str {
        self.row().description
    }

    /// The interface classes a device of this category may legally present.
    ///
    /// At most 8 entries. Empty for [`DeviceCategory::Charger`] and
    /// [`DeviceCategory::Unknown`].
    #[must_use]
    pub fn legal_interfaces(self) -> &'static [u8] {
        self.row().legal
    }

    /// Whether the given interface class is legal for this category.
    #[must_use]
    pub fn permits_class(self, class: u8) -> bool {
        self.legal_interfaces().contains(&class)
    }

    /// Whether devices of this category must be driven by the
    /// capability-limited HID driver.
    #[must_use]
    pub const fn requires_limited_hid(self) -> bool {
        matches!(self, Self::Joystick | Self::Microphone | Self::Headset)
    }

    fn row(self) -> &'static CategoryRow {
        // The table covers every enum variant; the Unknown fallback keeps
        // this total if a row were ever dropped.
        CATEGORY_TABLE
            .iter()
            .find(|row| row.category == self)
            .unwrap_or(&CATEGORY_TABLE[CATEGORY_TABLE.len() - 1])
    }
}

impl std::fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Legal-interface rows never exceed the 8-entry bound.
    #[test]
    fn legal_rows_are_bounded() {
        for category in DeviceCategory::ALL {
            assert!(
                category.legal_interfaces().len() <= 8,
                "{category:?} row exceeds 8 legal classes"
            );
        }
    }

    #[test]
    fn description_round_trips_for_every_known_category() {
        for category in DeviceCategory::ALL {
            if category == DeviceCategory::Unknown {
                continue;
            }
            assert_eq!(
                DeviceCategory::from_description(category.describe()),
                category
            );
        }
    }

    #[test]
    fn description_lookup_is_case_insensitive() {
        assert_eq!(
            DeviceCategory::from_description("USB Mouse"),
            DeviceCategory::Mouse
        );
        assert_eq!(
            DeviceCategory::from_description("usb mouse"),
            DeviceCategory::Mouse
        );
        assert_eq!(
            DeviceCategory::from_description("USB MOUSE"),
            DeviceCategory::Mouse
        );
    }

    #[test]
    fn unresolved_descriptions_collapse_to_unknown() {
        assert_eq!(
            DeviceCategory::from_description("FireWire Camcorder"),
            DeviceCategory::Unknown
        );
        assert_eq!(DeviceCategory::from_description(""), DeviceCategory::Unknown);
    }

    #[test]
    fn charger_permits_no_interfaces() {
        assert!(DeviceCategory::Charger.legal_interfaces().is_empty());
        assert!(!DeviceCategory::Charger.permits_class(class::HID));
        assert!(!DeviceCategory::Charger.permits_class(class::VENDOR_SPECIFIC));
    }

    #[test]
    fn unknown_permits_no_interfaces() {
        assert!(DeviceCategory::Unknown.legal_interfaces().is_empty());
        assert!(!DeviceCategory::Unknown.permits_class(class::PER_INTERFACE));
    }

    #[test]
    fn vendor_specific_is_legal_everywhere_except_empty_rows() {
        for category in DeviceCategory::ALL {
            if category.legal_interfaces().is_empty() {
                continue;
            }
            assert!(
                category.permits_class(class::VENDOR_SPECIFIC),
                "{category:?} should permit vendor-specific interfaces"
            );
        }
    }

    #[test]
    fn limited_hid_categories() {
        assert!(DeviceCategory::Joystick.requires_limited_hid());
        assert!(DeviceCategory::Microphone.requires_limited_hid());
        assert!(DeviceCategory::Headset.requires_limited_hid());
        assert!(!DeviceCategory::Keyboard.requires_limited_hid());
        assert!(!DeviceCategory::Mouse.requires_limited_hid());
    }

    #[test]
    fn unmapped_ids_collapse_to_unknown() {
        assert_eq!(DeviceCategory::from_id(0x42), DeviceCategory::Unknown);
        assert_eq!(DeviceCategory::from_id(0x02), DeviceCategory::Mouse);
        assert_eq!(DeviceCategory::from_id(0xff), DeviceCategory::Unknown);
    }

    #[test]
    fn class_names_resolve() {
        assert_eq!(class_name(class::HID), "HID");
        assert_eq!(class_name(class::VENDOR_SPECIFIC), "vend.");
        assert_eq!(class_name(0x42), "unk.");
    }
}
