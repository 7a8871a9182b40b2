//! Identity verification: a REQ to [`bifaci_proto::CAP_IDENTITY`]
//! that expects the fixed nonce echoed back, framed as one
//! STREAM_START + CHUNK + STREAM_END + END in each direction.
//!
//! `bifaci-relay` uses this to confirm a newly attached master is really
//! speaking Bifaci (and not, say, an unrelated process that happened to
//! accept the connection) before trusting its manifest.

use bifaci_proto::{Frame, FrameType, MessageId, CAP_IDENTITY, IDENTITY_NONCE};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::CoreError;
use crate::io::{FrameReader, FrameWriter};
use crate::seq::{FlowKey, SeqAssigner};

const IDENTITY_STREAM_ID: &str = "identity";
const IDENTITY_MEDIA_URN: &str = "application/octet-stream";

/// Issue a REQ for [`CAP_IDENTITY`], send the fixed nonce as its one
/// stream, and confirm the peer echoes it back before the request closes
/// with END.
///
/// # Errors
/// [`CoreError::IdentityMismatch`] if the echoed payload differs from
/// [`IDENTITY_NONCE`], if the peer answers with ERR, or the usual
/// transport/protocol errors.
pub async fn verify_identity<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    seq: &mut SeqAssigner,
    req_id: MessageId,
) -> Result<(), CoreError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let flow = FlowKey(req_id, Some(req_id));

    let mut req = Frame::req(req_id, CAP_IDENTITY);
    req.seq = seq.next(flow);
    writer.write_frame(&req).await?;

    writer
        .write_stream(
            seq,
            req_id,
            Some(req_id),
            IDENTITY_STREAM_ID,
            IDENTITY_MEDIA_URN,
            None,
            IDENTITY_NONCE.as_slice(),
            u64::MAX,
        )
        .await?;

    let mut end = Frame::end(req_id, Some(req_id), None);
    end.seq = seq.next(flow);
    writer.write_frame(&end).await?;

    let mut echoed = Vec::new();
    loop {
        let frame = reader.read_frame().await?.ok_or(CoreError::HandshakeClosed)?;
        match frame.frame_type {
            FrameType::StreamStart | FrameType::StreamEnd => {},
            FrameType::Chunk => {
                frame.verify_chunk()?;
                echoed.extend(frame.payload.unwrap_or_default());
            },
            FrameType::End => break,
            FrameType::Err => return Err(CoreError::IdentityMismatch),
            _ => continue,
        }
    }

    if echoed == IDENTITY_NONCE.as_slice() {
        Ok(())
    } else {
        Err(CoreError::IdentityMismatch)
    }
}

/// Serve one identity REQ as the responding side: the caller has already
/// consumed the REQ frame itself; this reads the caller's stream and
/// echoes it back verbatim, then closes with END.
///
/// # Errors
/// Transport/protocol errors from the underlying I/O.
pub async fn respond_to_identity_request<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    seq: &mut SeqAssigner,
    req_id: MessageId,
) -> Result<(), CoreError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let flow = FlowKey(req_id, Some(req_id));
    let mut payload = Vec::new();
    loop {
        let frame = reader.read_frame().await?.ok_or(CoreError::HandshakeClosed)?;
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

    writer
        .write_stream(
            seq,
            req_id,
            Some(req_id),
            IDENTITY_STREAM_ID,
            IDENTITY_MEDIA_URN,
            None,
            &payload,
            u64::MAX,
        )
        .await?;

    let mut end = Frame::end(req_id, Some(req_id), None);
    end.seq = seq.next(flow);
    writer.write_frame(&end).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn matching_nonce_verifies() {
        let (client, server) = duplex(1 << 16);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let limits = bifaci_proto::Limits::default();

        let client_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(client_read, limits.max_frame);
            let mut writer = FrameWriter::new(client_write, limits.max_frame);
            let mut seq = SeqAssigner::new();
            verify_identity(&mut reader, &mut writer, &mut seq, MessageId::Uint(1)).await
        });
        let server_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(server_read, limits.max_frame);
            let mut writer = FrameWriter::new(server_write, limits.max_frame);
            let mut seq = SeqAssigner::new();
            respond_to_identity_request(&mut reader, &mut writer, &mut seq, MessageId::Uint(1))
                .await
        });

        assert!(client_task.await.unwrap().is_ok());
        assert!(server_task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn wrong_echo_is_rejected() {
        let (client, server) = duplex(1 << 16);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write_raw) = tokio::io::split(server);
        let limits = bifaci_proto::Limits::default();
        let id = MessageId::Uint(1);

        let client_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(client_read, limits.max_frame);
            let mut writer = FrameWriter::new(client_write, limits.max_frame);
            let mut seq = SeqAssigner::new();
            verify_identity(&mut reader, &mut writer, &mut seq, id).await
        });

        // Drain the caller's REQ/STREAM_START/CHUNK/STREAM_END/END, then
        // echo back garbage instead.
        let mut reader = FrameReader::new(server_read, limits.max_frame);
        for _ in 0..5 {
            reader.read_frame().await.unwrap();
        }
        let mut writer = FrameWriter::new(&mut server_write_raw, limits.max_frame);
        let mut seq = SeqAssigner::new();
        writer
            .write_stream(&mut seq, id, Some(id), "identity", "application/octet-stream", None, b"wrong", u64::MAX)
            .await
            .unwrap();
        let flow = FlowKey(id, Some(id));
        let mut end = Frame::end(id, Some(id), None);
        end.seq = seq.next(flow);
        writer.write_frame(&end).await.unwrap();

        assert!(matches!(client_task.await.unwrap(), Err(CoreError::IdentityMismatch)));
    }
}
