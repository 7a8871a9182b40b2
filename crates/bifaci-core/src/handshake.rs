//! HELLO handshake: limit negotiation plus, for the plugin role, a
//! mandatory capability manifest.

use bifaci_proto::{Frame, FrameType, Limits};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::CoreError;
use crate::io::{FrameReader, FrameWriter};
use crate::manifest::{decode_manifest, encode_manifest};

/// Outcome of a completed handshake: the negotiated limits and the peer's
/// advertised capabilities (empty if the peer didn't send a manifest and
/// one wasn't required).
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResult {
    /// Componentwise-minimum limits both sides agreed to operate under.
    pub limits: Limits,
    /// Capability URNs the peer offered in its HELLO.
    pub manifest: Vec<String>,
}

/// Exchange HELLO frames with a peer and negotiate limits.
///
/// Sends our own HELLO (with `local_manifest` if given) and reads the
/// peer's in reply. If `require_peer_manifest` is set (the peer is
/// expected to be in the plugin role), a HELLO without a manifest is a
/// [`CoreError::ManifestRequired`] failure.
///
/// # Errors
/// [`CoreError::ExpectedHello`] if the peer's first frame isn't HELLO,
/// [`CoreError::ManifestRequired`] if a mandatory manifest is absent,
/// [`CoreError::HandshakeClosed`] if the peer closes before replying, or
/// the usual transport/protocol errors.
pub async fn perform_handshake<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    local_limits: Limits,
    local_manifest: Option<Vec<String>>,
    require_peer_manifest: bool,
) -> Result<HandshakeResult, CoreError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let hello = match local_manifest {
        Some(caps) => Frame::hello_with_manifest(local_limits, encode_manifest(&caps)),
        None => Frame::hello(local_limits),
    };
    writer.write_frame(&hello).await?;

    let peer_hello = reader.read_frame().await?.ok_or(CoreError::HandshakeClosed)?;
    if peer_hello.frame_type != FrameType::Hello {
        return Err(CoreError::ExpectedHello(peer_hello.frame_type));
    }

    let manifest = match &peer_hello.manifest {
        Some(bytes) => decode_manifest(bytes)?,
        None if require_peer_manifest => return Err(CoreError::ManifestRequired),
        None => Vec::new(),
    };

    let limits = Limits::negotiate(local_limits, peer_hello.limits());
    debug!(?limits, manifest_len = manifest.len(), "handshake complete");

    Ok(HandshakeResult { limits, manifest })
}

#[cfg(test)]
mod tests {
    use bifaci_proto::MessageId;
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn host_and_plugin_negotiate_limits_and_exchange_manifest() {
        let (host_stream, plugin_stream) = duplex(1 << 16);
        let (host_read, host_write) = tokio::io::split(host_stream);
        let (plugin_read, plugin_write) = tokio::io::split(plugin_stream);

        let host_limits = Limits::new(1000, 100, 64);
        let plugin_limits = Limits::new(800, 150, 32);

        let host_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(host_read, host_limits.max_frame);
            let mut writer = FrameWriter::new(host_write, host_limits.max_frame);
            perform_handshake(&mut reader, &mut writer, host_limits, None, true).await
        });

        let plugin_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(plugin_read, plugin_limits.max_frame);
            let mut writer = FrameWriter::new(plugin_write, plugin_limits.max_frame);
            perform_handshake(
                &mut reader,
                &mut writer,
                plugin_limits,
                Some(vec!["urn:cap:echo".to_string()]),
                false,
            )
            .await
        });

        let host_result = host_task.await.unwrap().unwrap();
        let plugin_result = plugin_task.await.unwrap().unwrap();

        assert_eq!(host_result.limits, Limits::new(800, 100, 32));
        assert_eq!(plugin_result.limits, Limits::new(800, 100, 32));
        assert_eq!(host_result.manifest, vec!["urn:cap:echo".to_string()]);
        assert_eq!(plugin_result.manifest, Vec::<String>::new());
    }

    #[tokio::test]
    async fn missing_mandatory_manifest_is_rejected() {
        let (a, b) = duplex(1 << 16);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        let limits = Limits::default();

        let host_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(a_read, limits.max_frame);
            let mut writer = FrameWriter::new(a_write, limits.max_frame);
            perform_handshake(&mut reader, &mut writer, limits, None, true).await
        });
        let plugin_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(b_read, limits.max_frame);
            let mut writer = FrameWriter::new(b_write, limits.max_frame);
            // Plugin forgets its manifest.
            perform_handshake(&mut reader, &mut writer, limits, None, false).await
        });

        let host_result = host_task.await.unwrap();
        let _ = plugin_task.await.unwrap();
        assert!(matches!(host_result, Err(CoreError::ManifestRequired)));
    }

    #[tokio::test]
    async fn non_hello_first_frame_is_rejected() {
        let (a, b) = duplex(1 << 16);
        let limits = Limits::default();
        let mut writer = FrameWriter::new(a, limits.max_frame);
        let bogus = Frame::req(MessageId::Uint(1), "urn:cap:echo");

        let write_task = tokio::spawn(async move { writer.write_frame(&bogus).await });
        let mut reader = FrameReader::new(b, limits.max_frame);
        let mut dummy_writer = FrameWriter::new(tokio::io::sink(), limits.max_frame);
        let result =
            perform_handshake(&mut reader, &mut dummy_writer, limits, None, false).await;
        write_task.await.unwrap().unwrap();

        assert!(matches!(result, Err(CoreError::ExpectedHello(FrameType::Req))));
    }
}
