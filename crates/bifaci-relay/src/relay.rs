//! [`RelaySwitch`]: the mirror image of `bifaci_host::PluginHost` — routes
//! engine-originated REQs to upstream "master" relays instead of
//! subprocess plugins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bifaci_core::{
    decode_manifest, respond_to_identity_request, verify_identity, CapabilityMatcher, CoreError,
    ExactMatch, FrameReader, FrameWriter, SeqAssigner,
};
use bifaci_proto::{Frame, FrameType, Limits, MessageId, CAP_IDENTITY};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;

/// Identifies one attached master for the lifetime of the switch.
pub type MasterId = u64;

type DynRead = Box<dyn AsyncRead + Unpin + Send>;
type DynWrite = Box<dyn AsyncWrite + Unpin + Send>;

struct MasterEntry {
    writer: Mutex<FrameWriter<DynWrite>>,
    alive: Arc<AtomicBool>,
    manifest: Vec<String>,
    reader_task: JoinHandle<()>,
}

/// Relay-side router: attaches upstream master relays (verifying their
/// identity and negotiating limits with each), aggregates their
/// capability manifests, and forwards REQs down to whichever master
/// serves the requested capability.
///
/// Identity verification requests addressed to this switch itself
/// (rather than forwarded downstream) are answered locally, the same way
/// `InProcessPluginHost` answers them — a relay doesn't need a master
/// attached just to prove it's alive.
pub struct RelaySwitch<M: CapabilityMatcher = ExactMatch> {
    next_id: AtomicU64,
    entries: RwLock<HashMap<MasterId, Arc<MasterEntry>>>,
    pending: Arc<Mutex<HashMap<MessageId, MasterId>>>,
    matcher: M,
    local_limits: Limits,
    negotiated_limits: Mutex<Limits>,
    outbound_tx: mpsc::Sender<Frame>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
}

impl RelaySwitch<ExactMatch> {
    /// Create a switch using [`ExactMatch`] capability matching.
    #[must_use]
    pub fn new(config: impl Into<RelayConfig>) -> Self {
        Self::with_matcher(config, ExactMatch)
    }
}

impl<M: CapabilityMatcher> RelaySwitch<M> {
    /// Create a switch using a custom capability matcher.
    #[must_use]
    pub fn with_matcher(config: impl Into<RelayConfig>, matcher: M) -> Self {
        let local_limits = config.into().limits;
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        Self {
            next_id: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            matcher,
            local_limits,
            negotiated_limits: Mutex::new(local_limits),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }

    /// Attach a master relay over a full-duplex byte stream pair.
    ///
    /// A master announces itself unprompted: the first frame it
    /// sends must be RELAY_NOTIFY, carrying its manifest and limits —
    /// there is no HELLO handshake on this side. The switch then confirms
    /// the master is a genuine Bifaci peer via fixed-nonce identity
    /// verification. The switch's overall negotiated limits shrink to the
    /// componentwise minimum across every attached master.
    ///
    /// # Errors
    /// [`RelayError::IdentityFailed`] if identity verification fails,
    /// [`RelayError::Core`] wrapping [`CoreError::UnexpectedFrameType`] if
    /// the first frame isn't RELAY_NOTIFY, or a transport/protocol
    /// failure.
    pub async fn add_master(&self, reader: DynRead, writer: DynWrite) -> Result<MasterId, RelayError> {
        let mut frame_reader = FrameReader::new(reader, self.local_limits.max_frame);
        let mut frame_writer = FrameWriter::new(writer, self.local_limits.max_frame);

        let notify = frame_reader.read_frame().await?.ok_or(CoreError::HandshakeClosed)?;
        if notify.frame_type != FrameType::RelayNotify {
            return Err(CoreError::UnexpectedFrameType {
                expected: FrameType::RelayNotify,
                got: notify.frame_type,
            }
            .into());
        }
        let manifest = match &notify.manifest {
            Some(bytes) => decode_manifest(bytes)?,
            None => Vec::new(),
        };
        let master_limits = notify.limits();

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut seq = SeqAssigner::new();
        verify_identity(&mut frame_reader, &mut frame_writer, &mut seq, MessageId::Uuid([0u8; 16]))
            .await
            .map_err(|_| RelayError::IdentityFailed)?;

        let negotiated_for_master = {
            let mut negotiated = self.negotiated_limits.lock().await;
            *negotiated = Limits::negotiate(*negotiated, master_limits);
            *negotiated
        };

        let entry_writer = Mutex::new(FrameWriter::new(
            frame_writer.into_inner(),
            negotiated_for_master.max_frame,
        ));

        let pending = self.pending.clone();
        let outbound_tx = self.outbound_tx.clone();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_task = alive.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match frame_reader.read_frame().await {
                    Ok(Some(frame)) => {
                        if outbound_tx.send(frame).await.is_err() {
                            break;
                        }
                    },
                    Ok(None) | Err(_) => break,
                }
            }
            alive_for_task.store(false, Ordering::SeqCst);
            warn!(master_id = id, "master connection closed");

            let mut pending = pending.lock().await;
            let dead_ids: Vec<MessageId> = pending
                .iter()
                .filter(|(_, owner)| **owner == id)
                .map(|(req_id, _)| *req_id)
                .collect();
            for req_id in dead_ids {
                pending.remove(&req_id);
                let err =
                    Frame::err(req_id, Some(req_id), "PLUGIN_DIED", "master connection closed");
                let _ = outbound_tx.send(err).await;
            }
        });

        let entry = Arc::new(MasterEntry { writer: entry_writer, alive, manifest, reader_task });

        self.entries.write().await.insert(id, entry);
        info!(master_id = id, "master attached");
        Ok(id)
    }

    /// Capability URNs aggregated across all live masters, with
    /// [`CAP_IDENTITY`] first if any master (or the switch itself) offers
    /// it.
    pub async fn capabilities(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut caps: Vec<String> = entries
            .values()
            .filter(|e| e.alive.load(Ordering::SeqCst))
            .flat_map(|e| e.manifest.iter().cloned())
            .collect();
        caps.sort_unstable();
        caps.dedup();
        caps.retain(|c| c != CAP_IDENTITY);
        let mut out = vec![CAP_IDENTITY.to_string()];
        out.extend(caps);
        out
    }

    /// Limits negotiated across every attached master (and this switch's
    /// own configured limits if none are attached yet).
    pub async fn negotiated_limits(&self) -> Limits {
        *self.negotiated_limits.lock().await
    }

    fn resolve(&self, entries: &HashMap<MasterId, Arc<MasterEntry>>, requested: &str) -> Option<MasterId> {
        let mut ids: Vec<&MasterId> = entries.keys().collect();
        ids.sort_unstable();
        let mut best: Option<(MasterId, usize)> = None;
        for &id in ids {
            let entry = &entries[&id];
            if !entry.alive.load(Ordering::SeqCst) {
                continue;
            }
            for cap in &entry.manifest {
                if self.matcher.accepts(cap, requested) {
                    let specificity = self.matcher.specificity(cap);
                    match best {
                        Some((_, best_specificity)) if best_specificity >= specificity => {},
                        _ => best = Some((id, specificity)),
                    }
                }
            }
        }
        best.map(|(id, _)| id)
    }

    /// Drive the switch: read frames from the downstream engine on
    /// `engine_reader`, route REQs to the matching master (or answer
    /// identity verification locally), and forward responses back out on
    /// `engine_writer`, until the engine closes the connection.
    ///
    /// # Errors
    /// [`RelayError::Core`] on a transport/protocol failure from the
    /// engine side.
    pub async fn run<R, W>(
        &self,
        engine_reader: &mut FrameReader<R>,
        engine_writer: &mut FrameWriter<W>,
    ) -> Result<(), RelayError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut outbound_rx =
            self.outbound_rx.lock().await.take().expect("RelaySwitch::run called more than once");
        let mut identity_seq = SeqAssigner::new();

        loop {
            tokio::select! {
                incoming = engine_reader.read_frame() => {
                    match incoming? {
                        Some(frame) => {
                            self.route_from_engine(frame, engine_reader, engine_writer, &mut identity_seq).await?;
                        },
                        None => break,
                    }
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(frame) => engine_writer.write_frame(&frame).await?,
                        None => break,
                    }
                }
            }
        }

        *self.outbound_rx.lock().await = Some(outbound_rx);
        Ok(())
    }

    async fn route_from_engine<R, W>(
        &self,
        frame: Frame,
        engine_reader: &mut FrameReader<R>,
        engine_writer: &mut FrameWriter<W>,
        identity_seq: &mut SeqAssigner,
    ) -> Result<(), RelayError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if frame.frame_type == FrameType::Req && frame.cap.as_deref() == Some(CAP_IDENTITY) {
            respond_to_identity_request(engine_reader, engine_writer, identity_seq, frame.id)
                .await?;
            return Ok(());
        }

        let master_id = match frame.frame_type {
            FrameType::Req => {
                let cap = frame.cap.clone().unwrap_or_default();
                let entries = self.entries.read().await;
                match self.resolve(&entries, &cap) {
                    Some(id) => {
                        self.pending.lock().await.insert(frame.id, id);
                        Some(id)
                    },
                    None => {
                        drop(entries);
                        let err = Frame::err(
                            frame.id,
                            Some(frame.id),
                            "NO_HANDLER",
                            format!("no master serves {cap}"),
                        );
                        engine_writer.write_frame(&err).await?;
                        None
                    },
                }
            },
            // Continuations, ERR, HEARTBEAT, etc. route by request id, like
            // a REQ's in-flight continuation.
            _ => {
                let key = frame.routing_id.unwrap_or(frame.id);
                let owner = self.pending.lock().await.get(&key).copied();
                if matches!(frame.frame_type, FrameType::End | FrameType::Err) {
                    self.pending.lock().await.remove(&key);
                }
                owner
            },
        };

        if let Some(id) = master_id {
            self.send_to_master(id, &frame).await;
        }
        Ok(())
    }

    /// Forward a single frame directly to `master`, bypassing the
    /// engine-facing routing loop. Exposed for RELAY_STATE/heartbeat
    /// fan-out from outside [`Self::run`].
    pub async fn send_to_master(&self, master: MasterId, frame: &Frame) {
        let entry = self.entries.read().await.get(&master).cloned();
        if let Some(entry) = entry {
            let mut writer = entry.writer.lock().await;
            if writer.write_frame(frame).await.is_err() {
                entry.alive.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Detach every master and stop their reader tasks.
    pub async fn shutdown(&self) {
        let mut entries = self.entries.write().await;
        for (_, entry) in entries.drain() {
            entry.reader_task.abort();
        }
    }
}
