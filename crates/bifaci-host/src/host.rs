//! [`PluginHost`]: routes engine-originated REQs to subprocess plugins,
//! each speaking Bifaci over its stdio pipes.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bifaci_core::{perform_handshake, CapabilityMatcher, ExactMatch, FrameReader, FrameWriter, SeqAssigner};
use bifaci_proto::{Frame, FrameType, Limits, MessageId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use crate::config::HostConfig;
use crate::error::HostError;
use crate::registry::PluginRegistry;

/// Identifies one attached plugin for the lifetime of the host.
pub type PluginId = u64;

type DynRead = Box<dyn AsyncRead + Unpin + Send>;
type DynWrite = Box<dyn AsyncWrite + Unpin + Send>;

struct PluginEntry {
    writer: Mutex<FrameWriter<DynWrite>>,
    seq: Mutex<SeqAssigner>,
    alive: AtomicBool,
}

/// A registered-but-not-yet-spawned plugin: a binary path plus the
/// capabilities it's known to serve.
struct PendingPlugin {
    program: String,
    caps: Vec<String>,
}

/// An item crossing from a plugin reader task (or the attach path) to
/// [`PluginHost::run`]'s select loop.
enum Outbound {
    /// A frame to forward to the engine, tagged with the plugin that
    /// produced it.
    Frame(PluginId, Frame),
    /// The set of live capabilities changed (a plugin attached, spawned,
    /// or died); `run` should invoke its `capsCallback`, if any.
    CapsChanged,
}

/// Engine-facing plugin host.
///
/// Owns the set of attached plugins, routes each REQ to the plugin whose
/// manifest matches its capability (lazily spawning subprocess plugins
/// registered via [`Self::register_plugin`] or eagerly via
/// [`Self::spawn_plugin`]), and forwards follow-on frames (CHUNK,
/// STREAM_START/END, END, ERR, LOG) to whichever plugin owns the
/// request. If a plugin's connection dies mid-request, the host
/// synthesizes a `PLUGIN_DIED` ERR to the engine for every request still
/// open on it.
pub struct PluginHost<M: CapabilityMatcher = ExactMatch> {
    next_id: AtomicU64,
    entries: RwLock<HashMap<PluginId, Arc<PluginEntry>>>,
    registry: Mutex<PluginRegistry>,
    pending_plugins: Mutex<Vec<PendingPlugin>>,
    pending: Arc<Mutex<HashMap<MessageId, PluginId>>>,
    matcher: M,
    local_limits: Limits,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
}

impl PluginHost<ExactMatch> {
    /// Create a host using [`ExactMatch`] capability matching.
    #[must_use]
    pub fn new(config: impl Into<HostConfig>) -> Self {
        Self::with_matcher(config, ExactMatch)
    }
}

impl<M: CapabilityMatcher> PluginHost<M> {
    /// Create a host using a custom capability matcher.
    #[must_use]
    pub fn with_matcher(config: impl Into<HostConfig>, matcher: M) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        Self {
            next_id: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
            registry: Mutex::new(PluginRegistry::new()),
            pending_plugins: Mutex::new(Vec::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            matcher,
            local_limits: config.into().limits,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }

    /// Pre-register a plugin binary and its advertised capabilities
    /// without attaching it. The first REQ for one of `known_caps` spawns
    /// and attaches `program` (no arguments); a spawn failure surfaces as
    /// an ERR(code=`SPAWN_FAILED`) frame to the engine rather than a
    /// returned error.
    pub async fn register_plugin(&self, program: impl Into<String>, known_caps: Vec<String>) {
        self.pending_plugins.lock().await.push(PendingPlugin { program: program.into(), caps: known_caps });
    }

    /// Spawn `program` as a subprocess plugin and attach it over its
    /// stdin/stdout.
    ///
    /// # Errors
    /// [`HostError::Spawn`] if the process fails to start,
    /// [`HostError::MissingStdio`] if its pipes aren't available, or the
    /// handshake failures from [`Self::attach_plugin`].
    pub async fn spawn_plugin(
        &self,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Result<PluginId, HostError> {
        let program = program.into();
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HostError::Spawn { program: program.clone(), source })?;

        let stdin = child.stdin.take().ok_or_else(|| HostError::MissingStdio(program.clone()))?;
        let stdout = child.stdout.take().ok_or_else(|| HostError::MissingStdio(program.clone()))?;

        let id = self.attach_plugin(Box::new(stdout), Box::new(stdin)).await?;
        // The child itself isn't polled for exit here: a dead process closes
        // its stdout, which the reader task below observes as EOF.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(id)
    }

    /// Attach an already-running plugin over an arbitrary full-duplex byte
    /// stream pair (used directly by tests; [`Self::spawn_plugin`] calls
    /// this after launching a subprocess).
    ///
    /// Performs the host side of the handshake, which requires the peer's
    /// HELLO to carry a manifest.
    ///
    /// # Errors
    /// Propagates handshake failures from `bifaci-core`.
    pub async fn attach_plugin(
        &self,
        reader: DynRead,
        writer: DynWrite,
    ) -> Result<PluginId, HostError> {
        let mut frame_reader = FrameReader::new(reader, self.local_limits.max_frame);
        let mut frame_writer = FrameWriter::new(writer, self.local_limits.max_frame);

        let handshake =
            perform_handshake(&mut frame_reader, &mut frame_writer, self.local_limits, None, true)
                .await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(PluginEntry {
            writer: Mutex::new(FrameWriter::new(
                frame_writer.into_inner(),
                handshake.limits.max_frame,
            )),
            seq: Mutex::new(SeqAssigner::new()),
            alive: AtomicBool::new(true),
        });

        self.entries.write().await.insert(id, entry.clone());
        self.registry.lock().await.register(id, handshake.manifest);
        info!(plugin_id = id, "plugin attached");

        let pending = self.pending.clone();
        let entry_for_reader = entry.clone();
        let outbound_tx = self.outbound_tx.clone();
        let _ = outbound_tx.send(Outbound::CapsChanged).await;

        tokio::spawn(async move {
            loop {
                match frame_reader.read_frame().await {
                    Ok(Some(frame)) => match frame.frame_type {
                        FrameType::Hello => {}, // handshake already complete; drop
                        FrameType::Heartbeat => {
                            let echo = Frame::heartbeat(frame.id);
                            let mut writer = entry_for_reader.writer.lock().await;
                            if writer.write_frame(&echo).await.is_err() {
                                entry_for_reader.alive.store(false, Ordering::SeqCst);
                                break;
                            }
                        },
                        _ => {
                            if outbound_tx.send(Outbound::Frame(id, frame)).await.is_err() {
                                break;
                            }
                        },
                    },
                    Ok(None) | Err(_) => break,
                }
            }
            entry_for_reader.alive.store(false, Ordering::SeqCst);
            warn!(plugin_id = id, "plugin connection closed");
            let _ = outbound_tx.send(Outbound::CapsChanged).await;

            let mut pending = pending.lock().await;
            let dead_ids: Vec<MessageId> = pending
                .iter()
                .filter(|(_, owner)| **owner == id)
                .map(|(req_id, _)| *req_id)
                .collect();
            for req_id in dead_ids {
                pending.remove(&req_id);
                let err =
                    Frame::err(req_id, Some(req_id), "PLUGIN_DIED", "plugin connection closed");
                let _ = outbound_tx.send(Outbound::Frame(id, err)).await;
            }
        });

        Ok(id)
    }

    /// Capability URNs offered by currently live plugins.
    pub async fn capabilities(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let registry = self.registry.lock().await;
        registry
            .all_capabilities()
            .into_iter()
            .filter(|cap| {
                registry
                    .resolve(cap, &self.matcher)
                    .is_some_and(|id| entries.get(&id).is_some_and(|e| e.alive.load(Ordering::SeqCst)))
            })
            .collect()
    }

    /// Find the binary path of a pending (not-yet-attached) registration
    /// whose known caps best match `requested`, by the same
    /// closest-specificity/first-registration-wins rule as the attached
    /// registry.
    async fn resolve_pending(&self, requested: &str) -> Option<String> {
        let pending = self.pending_plugins.lock().await;
        let mut best: Option<(usize, usize)> = None;
        for (i, reg) in pending.iter().enumerate() {
            for offered in &reg.caps {
                if self.matcher.accepts(offered, requested) {
                    let specificity = self.matcher.specificity(offered);
                    match best {
                        Some((_, best_specificity)) if best_specificity >= specificity => {},
                        _ => best = Some((i, specificity)),
                    }
                }
            }
        }
        best.map(|(i, _)| pending[i].program.clone())
    }

    /// Resolve `cap` to a plugin for a REQ, spawning a pending
    /// registration on first use.
    ///
    /// `Ok` is an already-attached or freshly-spawned plugin.
    /// `Err(None)` is no handler at all, attached or pending.
    /// `Err(Some(message))` is a pending registration matched but the
    /// lazy spawn failed.
    async fn resolve_for_req(&self, cap: &str) -> Result<PluginId, Option<String>> {
        if let Some(id) = self.registry.lock().await.resolve(cap, &self.matcher) {
            return Ok(id);
        }
        let program = self.resolve_pending(cap).await.ok_or(None)?;
        self.spawn_plugin(program, Vec::new()).await.map_err(|e| Some(e.to_string()))
    }

    /// Drive the host: read frames from the engine on `engine_reader`,
    /// route them to plugins, and forward plugin responses back out on
    /// `engine_writer`, until the engine closes the connection.
    /// `caps_callback`, if given, is invoked whenever the live capability
    /// set changes; a `Some` return is wrapped in a RELAY_STATE frame and
    /// written to `engine_writer`.
    ///
    /// # Errors
    /// [`HostError::Core`] on a transport/protocol failure from the engine
    /// side. Plugin-side failures are reported to the engine as
    /// `PLUGIN_DIED` ERR frames rather than returned here.
    pub async fn run<R, W>(
        &self,
        engine_reader: &mut FrameReader<R>,
        engine_writer: &mut FrameWriter<W>,
        caps_callback: Option<&(dyn Fn() -> Option<Vec<u8>> + Send + Sync)>,
    ) -> Result<(), HostError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut outbound_rx =
            self.outbound_rx.lock().await.take().expect("PluginHost::run called more than once");

        loop {
            tokio::select! {
                incoming = engine_reader.read_frame() => {
                    match incoming? {
                        Some(frame) => self.route_from_engine(frame, engine_writer).await?,
                        None => break,
                    }
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(Outbound::Frame(_plugin_id, frame)) => engine_writer.write_frame(&frame).await?,
                        Some(Outbound::CapsChanged) => {
                            if let Some(bytes) = caps_callback.and_then(|cb| cb()) {
                                engine_writer.write_frame(&Frame::relay_state(bytes)).await?;
                            }
                        },
                        None => break,
                    }
                }
            }
        }

        *self.outbound_rx.lock().await = Some(outbound_rx);
        Ok(())
    }

    async fn route_from_engine<W>(
        &self,
        frame: Frame,
        engine_writer: &mut FrameWriter<W>,
    ) -> Result<(), HostError>
    where
        W: AsyncWrite + Unpin,
    {
        let plugin_id = match frame.frame_type {
            FrameType::Req => {
                let cap = frame.cap.clone().unwrap_or_default();
                match self.resolve_for_req(&cap).await {
                    Ok(id) => {
                        self.pending.lock().await.insert(frame.id, id);
                        Some(id)
                    },
                    Err(None) => {
                        let err = Frame::err(
                            frame.id,
                            Some(frame.id),
                            "NO_HANDLER",
                            format!("no plugin registered for {cap}"),
                        );
                        engine_writer.write_frame(&err).await?;
                        None
                    },
                    Err(Some(spawn_error)) => {
                        warn!(cap = %cap, error = %spawn_error, "lazy plugin spawn failed");
                        let err = Frame::err(frame.id, Some(frame.id), "SPAWN_FAILED", spawn_error);
                        engine_writer.write_frame(&err).await?;
                        None
                    },
                }
            },
            FrameType::Heartbeat => {
                let key = frame.routing_id.unwrap_or(frame.id);
                let owner = self.pending.lock().await.get(&key).copied();
                if owner.is_none() {
                    engine_writer.write_frame(&Frame::heartbeat(frame.id)).await?;
                }
                owner
            },
            _ => {
                let key = frame.routing_id.unwrap_or(frame.id);
                let owner = self.pending.lock().await.get(&key).copied();
                if matches!(frame.frame_type, FrameType::End | FrameType::Err) {
                    self.pending.lock().await.remove(&key);
                }
                owner
            },
        };

        if let Some(id) = plugin_id {
            self.forward_to_plugin(id, &frame).await;
        }
        Ok(())
    }

    async fn forward_to_plugin(&self, id: PluginId, frame: &Frame) {
        let entry = self.entries.read().await.get(&id).cloned();
        if let Some(entry) = entry {
            let mut writer = entry.writer.lock().await;
            if writer.write_frame(frame).await.is_err() {
                entry.alive.store(false, Ordering::SeqCst);
            }
        }
    }
}
