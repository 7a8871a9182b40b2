//! [`InProcessPluginHost`]: routes REQs to capability handlers linked
//! directly into the engine binary, with no subprocess and no wire
//! encoding between the handler and the router.

use std::sync::Arc;

use async_trait::async_trait;
use bifaci_core::{CapabilityMatcher, ExactMatch, FrameReader, FrameWriter, SeqAssigner};
use bifaci_proto::{Frame, FrameType, Limits, CAP_IDENTITY};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::HostError;

/// A capability implementation that runs in the same process as the
/// router, receiving the fully-reassembled request bytes and returning
/// the fully-assembled response bytes.
#[async_trait]
pub trait InProcessHandler: Send + Sync {
    /// Handle one request for `capability`, given the concatenated bytes
    /// of its single argument stream. Returns the response bytes to chunk
    /// back, or an error message to report as an ERR frame.
    async fn handle(&self, capability: &str, request: Vec<u8>) -> Result<Vec<u8>, String>;
}

struct EchoHandler;

#[async_trait]
impl InProcessHandler for EchoHandler {
    async fn handle(&self, _capability: &str, request: Vec<u8>) -> Result<Vec<u8>, String> {
        Ok(request)
    }
}

/// Routes REQs to in-process handlers by closest-specificity capability
/// match (same rule as [`crate::PluginHost`]'s registry). Pre-registers an
/// echo handler for [`CAP_IDENTITY`], since identity verification is just
/// "send the nonce back unchanged".
pub struct InProcessPluginHost<M: CapabilityMatcher = ExactMatch> {
    handlers: RwLock<Vec<(String, Arc<dyn InProcessHandler>)>>,
    matcher: M,
    local_limits: Limits,
}

impl InProcessPluginHost<ExactMatch> {
    /// Create a host using [`ExactMatch`] capability matching, with the
    /// built-in identity handler already registered.
    #[must_use]
    pub fn new(local_limits: Limits) -> Self {
        Self::with_matcher(local_limits, ExactMatch)
    }
}

impl<M: CapabilityMatcher> InProcessPluginHost<M> {
    /// Create a host using a custom capability matcher.
    #[must_use]
    pub fn with_matcher(local_limits: Limits, matcher: M) -> Self {
        let host = Self { handlers: RwLock::new(Vec::new()), matcher, local_limits };
        host
    }

    /// Register `handler` to serve `capability`. Earlier registrations
    /// win ties in specificity.
    pub async fn register_handler(
        &self,
        capability: impl Into<String>,
        handler: Arc<dyn InProcessHandler>,
    ) {
        self.handlers.write().await.push((capability.into(), handler));
    }

    /// Capability URNs currently served.
    pub async fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> =
            self.handlers.read().await.iter().map(|(cap, _)| cap.clone()).collect();
        caps.sort_unstable();
        caps.dedup();
        caps
    }

    async fn resolve(&self, requested: &str) -> Option<Arc<dyn InProcessHandler>> {
        let handlers = self.handlers.read().await;
        let mut best: Option<(usize, usize)> = None; // (index, specificity)
        for (i, (offered, _)) in handlers.iter().enumerate() {
            if self.matcher.accepts(offered, requested) {
                let specificity = self.matcher.specificity(offered);
                match best {
                    Some((_, best_specificity)) if best_specificity >= specificity => {},
                    _ => best = Some((i, specificity)),
                }
            }
        }
        best.map(|(i, _)| handlers[i].1.clone())
    }

    /// Drive the host: first advertises its capabilities with a
    /// RELAY_NOTIFY (identity capability listed first), then reads REQs
    /// from `reader`, dispatches each to its matching handler, and writes
    /// the chunked response (or an ERR) to `writer`, until the peer closes
    /// the connection.
    ///
    /// # Errors
    /// [`HostError::Core`] on a transport/protocol failure.
    pub async fn run<R, W>(
        &self,
        reader: &mut FrameReader<R>,
        writer: &mut FrameWriter<W>,
    ) -> Result<(), HostError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut caps = self.capabilities().await;
        caps.retain(|cap| cap != CAP_IDENTITY);
        caps.insert(0, CAP_IDENTITY.to_string());
        let notify = Frame::relay_notify(bifaci_core::encode_manifest(&caps), self.local_limits);
        writer.write_frame(&notify).await?;

        let mut seq = SeqAssigner::new();
        loop {
            let Some(req) = reader.read_frame().await? else { break };
            if req.frame_type != FrameType::Req {
                warn!(frame_type = ?req.frame_type, "ignoring non-REQ frame at top level");
                continue;
            }
            let cap = req.cap.clone().unwrap_or_default();
            let req_id = req.id;

            let mut payload = Vec::new();
            loop {
                let Some(frame) = reader.read_frame().await? else { break };
                match frame.frame_type {
                    FrameType::StreamStart => {},
                    FrameType::Chunk => {
                        frame.verify_chunk()?;
                        payload.extend(frame.payload.unwrap_or_default());
                    },
                    FrameType::StreamEnd => break,
                    _ => continue,
                }
            }

            let handler = self.resolve(&cap).await;
            match handler {
                None => {
                    let err = Frame::err(
                        req_id,
                        Some(req_id),
                        "NO_HANDLER",
                        format!("no in-process handler for {cap}"),
                    );
                    writer.write_frame(&err).await?;
                },
                Some(handler) => match handler.handle(&cap, payload).await {
                    Ok(response) => {
                        writer
                            .write_stream(
                                &mut seq,
                                req_id,
                                Some(req_id),
                                "result",
                                "application/octet-stream",
                                None,
                                &response,
                                self.local_limits.max_chunk,
                            )
                            .await?;
                        let mut end = Frame::end(req_id, Some(req_id), None);
                        end.seq = seq.next(bifaci_core::FlowKey(req_id, Some(req_id)));
                        writer.write_frame(&end).await?;
                    },
                    Err(message) => {
                        let err = Frame::err(req_id, Some(req_id), "HANDLER_ERROR", message);
                        writer.write_frame(&err).await?;
                    },
                },
            }
        }
        Ok(())
    }
}

impl Default for InProcessPluginHost<ExactMatch> {
    fn default() -> Self {
        let host = Self::new(Limits::default());
        host
    }
}

/// Helper for callers building an [`InProcessPluginHost`] with the
/// identity capability pre-registered (most callers want this).
pub async fn new_with_identity(local_limits: Limits) -> InProcessPluginHost<ExactMatch> {
    let host = InProcessPluginHost::new(local_limits);
    host.register_handler(CAP_IDENTITY, Arc::new(EchoHandler)).await;
    host
}

#[cfg(test)]
mod tests {
    use bifaci_proto::MessageId;
    use tokio::io::duplex;

    use super::*;

    struct UppercaseHandler;

    #[async_trait]
    impl InProcessHandler for UppercaseHandler {
        async fn handle(&self, _capability: &str, request: Vec<u8>) -> Result<Vec<u8>, String> {
            Ok(String::from_utf8_lossy(&request).to_uppercase().into_bytes())
        }
    }

    #[tokio::test]
    async fn dispatches_request_to_registered_handler() {
        let host = new_with_identity(Limits::default()).await;
        host.register_handler("urn:cap:upper", Arc::new(UppercaseHandler)).await;

        let (client, server) = duplex(1 << 16);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let limits = Limits::default();

        let server_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(server_read, limits.max_frame);
            let mut writer = FrameWriter::new(server_write, limits.max_frame);
            host.run(&mut reader, &mut writer).await
        });

        let mut client_reader = FrameReader::new(client_read, limits.max_frame);
        let mut client_writer = FrameWriter::new(client_write, limits.max_frame);

        let notify = client_reader.read_frame().await.unwrap().unwrap();
        assert_eq!(notify.frame_type, FrameType::RelayNotify);

        let req_id = MessageId::Uint(1);
        client_writer.write_frame(&Frame::req(req_id, "urn:cap:upper")).await.unwrap();
        client_writer
            .write_frame(&Frame::stream_start(req_id, Some(req_id), "arg", "text/plain"))
            .await
            .unwrap();
        client_writer
            .write_frame(&Frame::chunk(req_id, Some(req_id), "arg", 0, b"hello".to_vec()))
            .await
            .unwrap();
        client_writer
            .write_frame(&Frame::stream_end(req_id, Some(req_id), "arg", 1))
            .await
            .unwrap();

        let mut response = Vec::new();
        loop {
            let frame = client_reader.read_frame().await.unwrap().unwrap();
            match frame.frame_type {
                FrameType::StreamStart | FrameType::StreamEnd => {},
                FrameType::Chunk => response.extend(frame.payload.unwrap()),
                FrameType::End => break,
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(response, b"HELLO");

        drop(client_writer);
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn identity_capability_echoes_the_nonce() {
        let host = new_with_identity(Limits::default()).await;
        let (client, server) = duplex(1 << 16);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let limits = Limits::default();

        let server_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(server_read, limits.max_frame);
            let mut writer = FrameWriter::new(server_write, limits.max_frame);
            host.run(&mut reader, &mut writer).await
        });

        let mut client_reader = FrameReader::new(client_read, limits.max_frame);
        let mut client_writer = FrameWriter::new(client_write, limits.max_frame);

        let notify = client_reader.read_frame().await.unwrap().unwrap();
        assert_eq!(notify.frame_type, FrameType::RelayNotify);
        assert_eq!(
            bifaci_core::decode_manifest(notify.manifest.as_deref().unwrap()).unwrap(),
            vec![CAP_IDENTITY.to_string()]
        );

        let req_id = MessageId::Uint(1);
        client_writer.write_frame(&Frame::req(req_id, CAP_IDENTITY)).await.unwrap();
        client_writer
            .write_frame(&Frame::stream_start(req_id, Some(req_id), "arg", "application/octet-stream"))
            .await
            .unwrap();
        client_writer
            .write_frame(&Frame::chunk(
                req_id,
                Some(req_id),
                "arg",
                0,
                bifaci_proto::IDENTITY_NONCE.to_vec(),
            ))
            .await
            .unwrap();
        client_writer
            .write_frame(&Frame::stream_end(req_id, Some(req_id), "arg", 1))
            .await
            .unwrap();

        let mut response = Vec::new();
        loop {
            let frame = client_reader.read_frame().await.unwrap().unwrap();
            match frame.frame_type {
                FrameType::StreamStart | FrameType::StreamEnd => {},
                FrameType::Chunk => response.extend(frame.payload.unwrap()),
                FrameType::End => break,
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(response, bifaci_proto::IDENTITY_NONCE.as_slice());

        drop(client_writer);
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_capability_returns_no_handler_error() {
        let host = InProcessPluginHost::new(Limits::default());
        let (client, server) = duplex(1 << 16);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let limits = Limits::default();

        let server_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(server_read, limits.max_frame);
            let mut writer = FrameWriter::new(server_write, limits.max_frame);
            host.run(&mut reader, &mut writer).await
        });

        let mut client_reader = FrameReader::new(client_read, limits.max_frame);
        let mut client_writer = FrameWriter::new(client_write, limits.max_frame);

        let notify = client_reader.read_frame().await.unwrap().unwrap();
        assert_eq!(notify.frame_type, FrameType::RelayNotify);

        let req_id = MessageId::Uint(1);
        client_writer.write_frame(&Frame::req(req_id, "urn:cap:missing")).await.unwrap();
        client_writer
            .write_frame(&Frame::stream_end(req_id, Some(req_id), "arg", 0))
            .await
            .unwrap();

        let frame = client_reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Err);
        assert_eq!(frame.code.as_deref(), Some("NO_HANDLER"));

        drop(client_writer);
        server_task.await.unwrap().unwrap();
    }
}
