//! Policy decision engine.
//!
//! One run per inbound announcement, terminal in exactly one reply. The
//! engine asks the consent provider at most once, translates the answer
//! into an interface mask and driver flags, and falls back to documented
//! defaults when the front-end fails or the operator walks away:
//!
//! - **First contact** (`DeviceAnnounce` → `OperatorDecision`): fail *open*.
//!   A broken or dismissed front-end must not brick the keyboard the
//!   operator needs to fix it, so every announced interface is enabled and
//!   nothing else is granted (no limited-HID, no picture binding).
//! - **Reconfirmation** (`SecurityAnnounce` → `SecurityDecision`): preserve
//!   the previous configuration. The policy was already granted once; a
//!   front-end hiccup is no reason to re-litigate it, so the proposal is
//!   copied verbatim and only the enable bit comes from the operator
//!   (defaulting to enabled). This asymmetry with first contact is
//!   deliberate; keep it.
//!
//! The engine never touches the channel: it returns constructed replies and
//! leaves sending, redirection, and persistence to the session loop.
//!
//! # Decision modes
//!
//! *Simplified* mode asks the operator what the device *is* ("USB Mouse")
//! and derives the interface mask from the classification table. *Professional*
//! mode shows raw per-interface detail and takes per-interface approvals.
//!
//! # Benchmarking
//!
//! With a bench variant active the engine skips the consent provider
//! entirely and emits a canned decision (all-enabled or all-denied); used to
//! measure protocol round-trip cost without a human in the loop.

use tracing::{debug, warn};
use usbward_core::classify::{class_name, DeviceCategory};
use usbward_core::consent::{
    ConsentProvider, ConsentReply, ConsentResponse, ConsentSummary, InterfaceDetail,
    ProposedPolicy,
};
use usbward_core::wire::{
    DeviceAnnounce, InterfaceMask, Message, OperatorDecision, Payload, SecurityAnnounce,
    SecurityDecision,
};

/// How device decisions are presented to the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecisionMode {
    /// Category-driven decisions ("this is a USB Mouse").
    #[default]
    Simplified,
    /// Per-interface technical decisions.
    Professional,
}

/// Canned-decision variants for benchmarking runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchVariant {
    /// Enable everything immediately.
    Allow,
    /// Deny everything immediately (exercises the redirection path).
    Deny,
}

/// Engine configuration, fixed for the process lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    /// Decision presentation mode.
    pub mode: DecisionMode,
    /// Benchmarking variant, if any.
    pub bench: Option<BenchVariant>,
}

/// The decision engine. Stateless between runs; owns only its
/// configuration and a read-only view of the classification table.
#[derive(Debug)]
pub struct PolicyEngine {
    config: EngineConfig,
}

impl PolicyEngine {
    /// Creates an engine with the given configuration.
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// The configured decision mode.
    #[must_use]
    pub const fn mode(&self) -> DecisionMode {
        self.config.mode
    }

    /// Decides a first-contact announcement.
    ///
    /// Echoes `config_num`, `interface_total_num`, and the device handle
    /// from the request into the reply.
    pub fn decide_announce(
        &self,
        request: &Message,
        announce: &DeviceAnnounce,
        consent: &mut dyn ConsentProvider,
    ) -> Message {
        let total = request.interface_total_num;

        let decision = if let Some(variant) = self.config.bench {
            bench_decision(total, variant)
        } else {
            match consent.request_consent(&self.announce_summary(request, announce)) {
                Ok(ConsentReply::Response(response)) => {
                    self.decision_from_response(&response, announce, total)
                }
                Ok(ConsentReply::Canceled) => {
                    warn!("operator canceled, enabling the complete device");
                    fail_open_decision(total)
                }
                Err(e) => {
                    warn!("consent front-end failed ({e}), enabling the complete device");
                    fail_open_decision(total)
                }
            }
        };

        debug!(
            mask_enabled = decision.interface_mask.enabled_count(),
            limited_hid = decision.limited_hid,
            security_pic_index = decision.security_pic_index,
            disable = decision.disable,
            "first-contact decision"
        );
        reply_to(request, Payload::OperatorDecision(decision))
    }

    /// Decides a reconfirmation announcement.
    ///
    /// The proposed mask and flags are copied into the verdict
    /// unconditionally; only the enable bit is taken from the operator.
    pub fn decide_security(
        &self,
        request: &Message,
        announce: &SecurityAnnounce,
        consent: &mut dyn ConsentProvider,
    ) -> Message {
        let enable = if let Some(variant) = self.config.bench {
            matches!(variant, BenchVariant::Allow)
        } else {
            match consent.request_consent(&self.security_summary(request, announce)) {
                Ok(ConsentReply::Response(response)) => response.enable.unwrap_or(true),
                Ok(ConsentReply::Canceled) => {
                    warn!("operator canceled, enabling the device using the previous configuration");
                    true
                }
                Err(e) => {
                    warn!(
                        "consent front-end failed ({e}), enabling the device using the previous \
                         configuration"
                    );
                    true
                }
            }
        };

        let verdict = SecurityDecision {
            decision: OperatorDecision {
                interface_mask: announce.proposed_mask,
                limited_hid: announce.limited_hid,
                security_pic_index: announce.security_pic_index,
                description: announce.description,
                disable: false,
            },
            enable,
        };
        debug!(enable, "reconfirmation verdict");
        reply_to(request, Payload::SecurityDecision(verdict))
    }

    fn decision_from_response(
        &self,
        response: &ConsentResponse,
        announce: &DeviceAnnounce,
        total: u8,
    ) -> OperatorDecision {
        let mut decision = match self.config.mode {
            DecisionMode::Professional => professional_decision(response, total),
            DecisionMode::Simplified => simplified_decision(response, announce),
        };
        apply_security_picture(response.security_pic_index, &mut decision);
        decision
    }

    fn announce_summary(&self, request: &Message, announce: &DeviceAnnounce) -> ConsentSummary {
        ConsentSummary {
            professional: self.config.mode == DecisionMode::Professional,
            config_num: request.config_num,
            interface_total_num: request.interface_total_num,
            product: announce.product.clone(),
            manufacturer: announce.manufacturer.clone(),
            interfaces: self.interface_details(announce, None),
            proposal: None,
        }
    }

    fn security_summary(&self, request: &Message, announce: &SecurityAnnounce) -> ConsentSummary {
        ConsentSummary {
            professional: self.config.mode == DecisionMode::Professional,
            config_num: request.config_num,
            interface_total_num: request.interface_total_num,
            product: announce.device.product.clone(),
            manufacturer: announce.device.manufacturer.clone(),
            interfaces: self.interface_details(&announce.device, Some(&announce.proposed_mask)),
            proposal: Some(ProposedPolicy {
                limited_hid: announce.limited_hid,
                security_pic_index: announce.security_pic_index,
                description: announce.description.describe().to_string(),
            }),
        }
    }

    /// Per-interface detail for the summary; simplified mode deliberately
    /// withholds it so the operator reasons about the device, not its
    /// descriptors.
    fn interface_details(
        &self,
        announce: &DeviceAnnounce,
        proposed: Option<&InterfaceMask>,
    ) -> Vec<InterfaceDetail> {
        if self.config.mode != DecisionMode::Professional {
            return Vec::new();
        }
        announce
            .interfaces
            .iter()
            .enumerate()
            .map(|(index, descriptor)| InterfaceDetail {
                index: index as u8,
                class: descriptor.class,
                class_name: class_name(descriptor.class).to_string(),
                subclass: descriptor.subclass,
                protocol: descriptor.protocol,
                endpoints: descriptor.endpoints,
                proposed_enable: proposed.map(|mask| mask.is_enabled(index)),
            })
            .collect()
    }
}

/// Reply skeleton echoing the request's identity fields.
fn reply_to(request: &Message, payload: Payload) -> Message {
    Message {
        config_num: request.config_num,
        interface_total_num: request.interface_total_num,
        device_handle: request.device_handle,
        payload,
    }
}

/// The fail-open decision: every announced interface enabled, nothing else
/// granted.
fn fail_open_decision(total: u8) -> OperatorDecision {
    OperatorDecision {
        interface_mask: InterfaceMask::first_enabled(usize::from(total)),
        limited_hid: false,
        security_pic_index: 0,
        description: DeviceCategory::Unknown,
        disable: false,
    }
}

/// Canned benchmarking decision.
fn bench_decision(total: u8, variant: BenchVariant) -> OperatorDecision {
    let mut decision = fail_open_decision(total);
    decision.disable = matches!(variant, BenchVariant::Deny);
    decision
}

/// Professional mode: the operator approved individual interface indices.
/// Descriptions are not used in this mode.
fn professional_decision(response: &ConsentResponse, total: u8) -> OperatorDecision {
    let mut mask = InterfaceMask::empty();
    for &index in &response.approved_interfaces {
        if index < total {
            mask.enable(usize::from(index));
        }
    }
    OperatorDecision {
        interface_mask: mask,
        limited_hid: response.limited_hid,
        security_pic_index: 0,
        description: DeviceCategory::Unknown,
        disable: false,
    }
}

/// Simplified mode: resolve the operator's description to a category and
/// enable the announced interfaces whose class is legal for it.
fn simplified_decision(response: &ConsentResponse, announce: &DeviceAnnounce) -> OperatorDecision {
    let category = response
        .category
        .as_deref()
        .map_or(DeviceCategory::Unknown, DeviceCategory::from_description);
    if category == DeviceCategory::Unknown {
        warn!("device description unresolved, treating the device as unknown");
    }

    let mut mask = InterfaceMask::empty();
    for (index, descriptor) in announce.interfaces.iter().enumerate() {
        if category.permits_class(descriptor.class) {
            mask.enable(index);
        }
    }
    OperatorDecision {
        interface_mask: mask,
        limited_hid: category.requires_limited_hid(),
        security_pic_index: 0,
        description: category,
        disable: false,
    }
}

/// Folds the operator's security picture selection into the decision.
///
/// No selection defaults to "enabled, no picture bound" for usability; an
/// explicit index 0 is a refusal and disables the device.
fn apply_security_picture(selection: Option<u8>, decision: &mut OperatorDecision) {
    match selection {
        None => {
            decision.security_pic_index = 0;
            decision.disable = false;
        }
        Some(0) => {
            warn!("operator refused a security picture, the device will be disabled");
            decision.security_pic_index = 0;
            decision.disable = true;
        }
        Some(index) => {
            decision.security_pic_index = index;
            decision.disable = false;
        }
    }
}
