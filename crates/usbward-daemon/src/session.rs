//! Session loop.
//!
//! Owns the channel and the inbound queue for the lifetime of one kernel
//! session and drives everything else: decode, enqueue, drain, dispatch to
//! the decision engine or the fingerprint flow, send the reply, consult the
//! redirection controller.
//!
//! Processing is strictly sequential: one record is received, decoded, and
//! fully processed (including the potentially slow, blocking consent call)
//! before the loop waits for the next record. The transport never batches,
//! so the queue normally holds exactly one entry per drain cycle.
//!
//! # Session lifecycle
//!
//! 1. Bind the channel and open the fingerprint store.
//! 2. Send the `Init` greeting, replay the store outward oldest-first, and
//!    wait for the peer's `Init`.
//! 3. Loop: receive → decode → enqueue → drain → dispatch → reply.
//! 4. `Bye` ends the session cleanly; a transport failure ends it with an
//!    error. Either way the caller tears this session down and waits for
//!    the next one.

use std::path::Path;

use tracing::{debug, info, warn};
use usbward_core::consent::ConsentProvider;
use usbward_core::queue::MessageQueue;
use usbward_core::wire::{FingerprintRecord, Message, Opcode, Payload};

use crate::channel::{Channel, ChannelConfig, ChannelError};
use crate::engine::PolicyEngine;
use crate::redirect::{DeviceIdentity, RedirectController};
use crate::store::FingerprintStore;

/// Greeting carried in the daemon's `Init` record.
pub const GREETING: &str = "__hello_from_usbward__";

/// One kernel session: the bound channel, the inbound queue, and the
/// fingerprint store handle.
///
/// A store that fails to open degrades the session rather than ending it:
/// decisions still flow, fingerprint persistence is dropped with a warning.
pub struct Session {
    channel: Channel,
    queue: MessageQueue,
    store: Option<FingerprintStore>,
    debug_dump: bool,
}

impl Session {
    /// Binds the channel and opens the fingerprint store.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Bind`] when the local socket cannot be
    /// bound; the caller treats this as fatal. A store open failure is
    /// logged and tolerated.
    pub fn establish(
        channel_config: ChannelConfig,
        store_path: &Path,
        debug_dump: bool,
    ) -> Result<Self, ChannelError> {
        let channel = Channel::bind(channel_config)?;
        let store = match FingerprintStore::open(store_path) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("fingerprint store unavailable, continuing without persistence: {e}");
                None
            }
        };
        Ok(Self {
            channel,
            queue: MessageQueue::new(),
            store,
            debug_dump,
        })
    }

    /// Runs the session to completion.
    ///
    /// Returns `Ok(())` when the peer says `Bye`.
    ///
    /// # Errors
    ///
    /// Returns a transport-level [`ChannelError`]; the caller logs it and
    /// re-enters the accept/wait state with a fresh session.
    pub async fn run(
        &mut self,
        engine: &PolicyEngine,
        redirect: &RedirectController,
        consent: &mut dyn ConsentProvider,
    ) -> Result<(), ChannelError> {
        info!(
            local = %self.channel.local_path().display(),
            peer = %self.channel.peer_path().display(),
            "waiting for a new session"
        );

        if let Err(e) = self.channel.send(&Message::init(GREETING)).await {
            warn!("failed to send the init greeting: {e}");
        }
        self.resync_store().await;
        self.await_peer_init().await?;
        info!("session is up and running");

        let end = loop {
            let message = match self.channel.recv().await {
                Ok(message) => message,
                Err(e) if e.is_malformed() => {
                    warn!("dropping malformed record: {e}");
                    continue;
                }
                Err(e) => break Err(e),
            };
            if self.debug_dump {
                debug!(message = %message, "received");
            }

            if message.opcode() == Opcode::Bye {
                info!("got goodbye from the peer");
                break Ok(());
            }

            if let Err(e) = self.queue.push(message) {
                warn!("{e}, dropping message");
                continue;
            }

            for queued in self.queue.drain() {
                self.dispatch(queued, engine, redirect, consent).await;
            }
        };

        // Release any messages still queued on the way out.
        self.queue.clear();
        end
    }

    /// Releases the session's resources. The channel socket is removed on
    /// drop; the store close is explicit so its flush is ordered before
    /// shutdown completes.
    pub fn teardown(self) {
        if let Some(store) = self.store {
            store.close();
        }
    }

    async fn dispatch(
        &mut self,
        message: Message,
        engine: &PolicyEngine,
        redirect: &RedirectController,
        consent: &mut dyn ConsentProvider,
    ) {
        match &message.payload {
            Payload::FingerprintNotify(record) => self.persist_fingerprint(record),
            Payload::DeviceAnnounce(announce) => {
                let identity = DeviceIdentity {
                    vendor_id: announce.vendor_id,
                    product_id: announce.product_id,
                };
                // The consent call blocks until the operator answers; keep
                // the runtime's other workers usable meanwhile.
                let reply = tokio::task::block_in_place(|| {
                    engine.decide_announce(&message, announce, consent)
                });
                self.send_reply(reply, identity, redirect).await;
            }
            Payload::SecurityAnnounce(announce) => {
                let identity = DeviceIdentity {
                    vendor_id: announce.device.vendor_id,
                    product_id: announce.device.product_id,
                };
                let reply = tokio::task::block_in_place(|| {
                    engine.decide_security(&message, announce, consent)
                });
                self.send_reply(reply, identity, redirect).await;
            }
            Payload::Init { greeting } => {
                debug!(greeting = %greeting, "ignoring mid-session init");
            }
            // Daemon-originated opcodes have no business arriving inbound.
            Payload::OperatorDecision(_)
            | Payload::SecurityDecision(_)
            | Payload::FingerprintRestore(_)
            | Payload::Bye => {
                warn!(opcode = %message.opcode(), "unsupported inbound opcode, dropping");
            }
        }
    }

    async fn send_reply(
        &self,
        reply: Message,
        identity: DeviceIdentity,
        redirect: &RedirectController,
    ) {
        if self.debug_dump {
            debug!(reply = %reply, "sending reply");
        }
        if let Err(e) = self.channel.send(&reply).await {
            warn!("failed to send the reply: {e}");
        }
        match RedirectController::needs_redirect(&reply) {
            Ok(true) => {
                info!(device = %identity, "device denied, redirecting to quarantine");
                redirect.redirect(identity);
            }
            Ok(false) => {}
            Err(e) => warn!("{e}"),
        }
    }

    fn persist_fingerprint(&mut self, record: &FingerprintRecord) {
        let Some(store) = self.store.as_mut() else {
            warn!("fingerprint store is not open, dropping record");
            return;
        };
        match store.append(record) {
            Ok(()) => debug!(
                security_pic_index = record.security_pic_index,
                "fingerprint persisted"
            ),
            Err(e) => warn!("failed to persist fingerprint: {e}"),
        }
    }

    /// Replays every stored fingerprint to the peer, oldest-first.
    /// Best-effort: read or send failures end the replay with whatever was
    /// already pushed.
    async fn resync_store(&mut self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let records = match store.records() {
            Ok(records) => records,
            Err(e) => {
                warn!("fingerprint store resync failed: {e}");
                return;
            }
        };

        let mut pushed = 0u64;
        for record in records {
            match record {
                Ok(record) => {
                    if let Err(e) = self.channel.send(&Message::fingerprint_restore(record)).await
                    {
                        warn!("fingerprint resync send failed: {e}");
                        break;
                    }
                    pushed += 1;
                }
                Err(e) => {
                    warn!("fingerprint store read failed mid-resync: {e}");
                    break;
                }
            }
        }
        info!(records = pushed, "fingerprint store resynchronized");
    }

    /// Consumes the peer's `Init` response. Malformed records are dropped;
    /// an unexpected opcode is logged and discarded, matching the
    /// greeting-only contract of session establishment.
    async fn await_peer_init(&mut self) -> Result<(), ChannelError> {
        loop {
            match self.channel.recv().await {
                Ok(message) => {
                    if let Payload::Init { greeting } = &message.payload {
                        info!(greeting = %greeting, "got init response from the peer");
                    } else {
                        warn!(
                            opcode = %message.opcode(),
                            "expected the peer's init response, dropping record"
                        );
                    }
                    return Ok(());
                }
                Err(e) if e.is_malformed() => {
                    warn!("dropping malformed record during session setup: {e}");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;
    use tokio::net::UnixDatagram;
    use usbward_core::classify::{class, DeviceCategory};
    use usbward_core::consent::{ConsentError, ConsentReply, ConsentResponse, ConsentSummary};
    use usbward_core::wire::codec::{decode, encode, RECORD_LEN};
    use usbward_core::wire::{
        DeviceAnnounce, DeviceHandle, InterfaceDescriptor, InterfaceList, InterfaceMask,
    };

    use super::*;
    use crate::engine::{DecisionMode, EngineConfig};
    use crate::redirect::{QuarantineService, RedirectError};

    struct ScriptedConsent(ConsentResponse);

    impl ConsentProvider for ScriptedConsent {
        fn request_consent(
            &mut self,
            _summary: &ConsentSummary,
        ) -> Result<ConsentReply, ConsentError> {
            Ok(ConsentReply::Response(self.0.clone()))
        }
    }

    struct Recording(Arc<Mutex<Vec<DeviceIdentity>>>);

    impl QuarantineService for Recording {
        fn redirect(&self, device: DeviceIdentity) -> Result<(), RedirectError> {
            self.0.lock().unwrap().push(device);
            Ok(())
        }
    }

    struct Peer {
        socket: UnixDatagram,
        daemon_path: std::path::PathBuf,
    }

    impl Peer {
        fn bind(dir: &TempDir, config: &ChannelConfig) -> Self {
            Self {
                socket: UnixDatagram::bind(dir.path().join("peer.sock")).unwrap(),
                daemon_path: config.local_path.clone(),
            }
        }

        async fn recv(&self) -> Message {
            let mut buf = [0u8; RECORD_LEN];
            let (len, _) = self.socket.recv_from(&mut buf).await.unwrap();
            decode(&buf[..len]).unwrap()
        }

        async fn send(&self, message: &Message) {
            self.socket
                .send_to(&encode(message), &self.daemon_path)
                .await
                .unwrap();
        }
    }

    fn mouse_announce_message() -> Message {
        Message {
            config_num: 1,
            interface_total_num: 2,
            device_handle: DeviceHandle::new([0xca, 0xfe, 0, 0, 0, 0, 0, 1]),
            payload: Payload::DeviceAnnounce(DeviceAnnounce {
                product: "Optical Mouse".to_string(),
                manufacturer: "Example Corp".to_string(),
                vendor_id: 0x046d,
                product_id: 0xc077,
                interfaces: InterfaceList::new(vec![
                    InterfaceDescriptor {
                        class: class::HID,
                        subclass: 1,
                        protocol: 2,
                        endpoints: 1,
                    },
                    InterfaceDescriptor {
                        class: class::VENDOR_SPECIFIC,
                        subclass: 0,
                        protocol: 0,
                        endpoints: 2,
                    },
                ])
                .unwrap(),
            }),
        }
    }

    fn test_record(pic: u8) -> FingerprintRecord {
        FingerprintRecord {
            digest: [pic; 20],
            interface_mask: InterfaceMask::first_enabled(2),
            limited_hid: false,
            security_pic_index: pic,
            description: DeviceCategory::Mouse,
        }
    }

    fn fingerprint_notify(record: FingerprintRecord) -> Message {
        Message {
            config_num: 0,
            interface_total_num: 0,
            device_handle: DeviceHandle::ZERO,
            payload: Payload::FingerprintNotify(record),
        }
    }

    struct Fixture {
        _tmp: TempDir,
        session: Session,
        peer: Peer,
        engine: PolicyEngine,
        redirect: RedirectController,
        redirected: Arc<Mutex<Vec<DeviceIdentity>>>,
        store_path: std::path::PathBuf,
    }

    fn fixture(seed_records: &[FingerprintRecord]) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let config = ChannelConfig::new(
            tmp.path().join("daemon.sock"),
            tmp.path().join("peer.sock"),
        );
        let store_path = tmp.path().join("fingerprints.dat");
        {
            let mut store = FingerprintStore::open(&store_path).unwrap();
            for record in seed_records {
                store.append(record).unwrap();
            }
        }
        let peer = Peer::bind(&tmp, &config);
        let session = Session::establish(config, &store_path, true).unwrap();
        let redirected = Arc::new(Mutex::new(Vec::new()));
        Fixture {
            session,
            peer,
            engine: PolicyEngine::new(EngineConfig {
                mode: DecisionMode::Simplified,
                bench: None,
            }),
            redirect: RedirectController::new(Box::new(Recording(Arc::clone(&redirected)))),
            redirected,
            store_path,
            _tmp: tmp,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn announce_to_decision_round_trip() {
        let mut fx = fixture(&[test_record(4)]);
        let mut consent = ScriptedConsent(ConsentResponse {
            category: Some("USB Mouse".to_string()),
            security_pic_index: Some(3),
            ..ConsentResponse::default()
        });

        let peer = fx.peer;
        let driver = async move {
            // Greeting, then the seeded store record, then our init reply.
            let greeting = peer.recv().await;
            assert_eq!(greeting.opcode(), Opcode::Init);

            let restored = peer.recv().await;
            let Payload::FingerprintRestore(record) = restored.payload else {
                panic!("expected a fingerprint restore, got {restored}");
            };
            assert_eq!(record, test_record(4));

            peer.send(&Message::init("__hello_from_kernel__")).await;

            let request = mouse_announce_message();
            peer.send(&request).await;
            let reply = peer.recv().await;
            assert_eq!(reply.opcode(), Opcode::OperatorDecision);
            assert_eq!(reply.config_num, request.config_num);
            assert_eq!(reply.interface_total_num, request.interface_total_num);
            assert_eq!(reply.device_handle, request.device_handle);
            let Payload::OperatorDecision(decision) = reply.payload else {
                unreachable!()
            };
            assert!(decision.interface_mask.is_enabled(0));
            assert!(decision.interface_mask.is_enabled(1));
            assert_eq!(decision.security_pic_index, 3);
            assert!(!decision.disable);

            peer.send(&Message::bye()).await;
        };

        let (run, ()) = tokio::join!(
            fx.session.run(&fx.engine, &fx.redirect, &mut consent),
            driver
        );
        run.unwrap();
        assert!(fx.redirected.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn refused_device_is_redirected() {
        let mut fx = fixture(&[]);
        // Explicit picture index 0 is a refusal: disable and quarantine.
        let mut consent = ScriptedConsent(ConsentResponse {
            category: Some("USB Mouse".to_string()),
            security_pic_index: Some(0),
            ..ConsentResponse::default()
        });

        let peer = fx.peer;
        let driver = async move {
            peer.recv().await; // greeting
            peer.send(&Message::init("__hello_from_kernel__")).await;

            peer.send(&mouse_announce_message()).await;
            let reply = peer.recv().await;
            let Payload::OperatorDecision(decision) = reply.payload else {
                unreachable!()
            };
            assert!(decision.disable);

            peer.send(&Message::bye()).await;
        };

        let (run, ()) = tokio::join!(
            fx.session.run(&fx.engine, &fx.redirect, &mut consent),
            driver
        );
        run.unwrap();
        assert_eq!(
            fx.redirected.lock().unwrap().as_slice(),
            &[DeviceIdentity {
                vendor_id: 0x046d,
                product_id: 0xc077,
            }]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fingerprint_notify_is_persisted() {
        let mut fx = fixture(&[]);
        let mut consent = ScriptedConsent(ConsentResponse::default());

        let peer = fx.peer;
        let driver = async move {
            peer.recv().await; // greeting
            peer.send(&Message::init("__hello_from_kernel__")).await;

            peer.send(&fingerprint_notify(test_record(9))).await;

            // A zero-index record must be refused by the store.
            peer.send(&fingerprint_notify(test_record(0))).await;

            peer.send(&Message::bye()).await;
        };

        let (run, ()) = tokio::join!(
            fx.session.run(&fx.engine, &fx.redirect, &mut consent),
            driver
        );
        run.unwrap();
        fx.session.teardown();

        let store = FingerprintStore::open(&fx.store_path).unwrap();
        let persisted: Vec<_> = store
            .records()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(persisted, vec![test_record(9)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_records_do_not_end_the_session() {
        let mut fx = fixture(&[]);
        let mut consent = ScriptedConsent(ConsentResponse::default());

        let peer = fx.peer;
        let driver = async move {
            peer.recv().await; // greeting
            peer.send(&Message::init("__hello_from_kernel__")).await;

            // Garbage between valid records is dropped silently.
            peer.socket
                .send_to(&[0xff; 40], &peer.daemon_path)
                .await
                .unwrap();

            peer.send(&mouse_announce_message()).await;
            let reply = peer.recv().await;
            assert_eq!(reply.opcode(), Opcode::OperatorDecision);

            peer.send(&Message::bye()).await;
        };

        let (run, ()) = tokio::join!(
            fx.session.run(&fx.engine, &fx.redirect, &mut consent),
            driver
        );
        run.unwrap();
    }
}
