//! Length-prefixed framed I/O over an arbitrary async byte stream.

use bifaci_proto::{Frame, MessageId, LENGTH_PREFIX_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::CoreError;
use crate::seq::{FlowKey, SeqAssigner};

/// Reads length-prefixed CBOR frames off an [`AsyncRead`].
pub struct FrameReader<R> {
    inner: R,
    max_frame: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `inner`, rejecting any frame whose declared or actual length
    /// exceeds `max_frame`.
    pub fn new(inner: R, max_frame: u64) -> Self {
        Self { inner, max_frame }
    }

    /// Read one frame. Returns `Ok(None)` on a clean EOF at a frame
    /// boundary (the peer closed the stream); any other I/O failure,
    /// including an EOF mid-frame, is an error.
    ///
    /// # Errors
    /// [`CoreError::Protocol`] on a malformed frame or a declared length
    /// over `max_frame`; [`CoreError::Transport`] on I/O failure.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CoreError> {
        let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as u64;
        if len > self.max_frame {
            return Err(bifaci_proto::ProtoError::FrameTooLarge { len, limit: self.max_frame }.into());
        }

        let mut body = vec![0u8; len as usize];
        self.inner.read_exact(&mut body).await?;
        let frame = Frame::decode(&body)?;
        trace!(frame_type = ?frame.frame_type, seq = frame.seq, "read_frame");
        Ok(Some(frame))
    }
}

/// Writes length-prefixed CBOR frames to an [`AsyncWrite`].
pub struct FrameWriter<W> {
    inner: W,
    max_frame: u64,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap `inner`, rejecting any frame that encodes larger than
    /// `max_frame`.
    pub fn new(inner: W, max_frame: u64) -> Self {
        Self { inner, max_frame }
    }

    /// Encode and write one frame.
    ///
    /// # Errors
    /// [`CoreError::Protocol`] if the frame exceeds `max_frame`;
    /// [`CoreError::Transport`] on I/O failure.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), CoreError> {
        let body = frame.encode()?;
        let len = body.len() as u64;
        if len > self.max_frame {
            return Err(bifaci_proto::ProtoError::FrameTooLarge { len, limit: self.max_frame }.into());
        }
        self.inner.write_all(&(len as u32).to_be_bytes()).await?;
        self.inner.write_all(&body).await?;
        trace!(frame_type = ?frame.frame_type, seq = frame.seq, "write_frame");
        Ok(())
    }

    /// Split `data` into CHUNK frames bounded by `max_chunk` bytes and
    /// write them, assigning each a real sequence number from `seq`. Does
    /// not frame the stream with STREAM_START/STREAM_END — see
    /// [`Self::write_stream`] for that.
    ///
    /// # Errors
    /// As [`Self::write_frame`].
    pub async fn write_chunked(
        &mut self,
        seq: &mut SeqAssigner,
        id: MessageId,
        routing_id: Option<MessageId>,
        stream_id: &str,
        content_type: Option<String>,
        data: &[u8],
        max_chunk: u64,
    ) -> Result<(), CoreError> {
        let flow = FlowKey(id, routing_id);
        for mut frame in Frame::chunks_for(id, routing_id, stream_id, content_type, data, max_chunk) {
            frame.seq = seq.next(flow);
            self.write_frame(&frame).await?;
        }
        Ok(())
    }

    /// Write a complete stream: STREAM_START, the CHUNK sequence for
    /// `data`, then STREAM_END carrying the resulting chunk count.
    ///
    /// # Errors
    /// As [`Self::write_frame`].
    #[allow(clippy::too_many_arguments)]
    pub async fn write_stream(
        &mut self,
        seq: &mut SeqAssigner,
        id: MessageId,
        routing_id: Option<MessageId>,
        stream_id: &str,
        media_urn: &str,
        content_type: Option<String>,
        data: &[u8],
        max_chunk: u64,
    ) -> Result<(), CoreError> {
        let flow = FlowKey(id, routing_id);

        let mut start = Frame::stream_start(id, routing_id, stream_id, media_urn);
        start.seq = seq.next(flow);
        self.write_frame(&start).await?;

        let chunks = Frame::chunks_for(id, routing_id, stream_id, content_type, data, max_chunk);
        let chunk_count = chunks.len() as u64;
        for mut frame in chunks {
            frame.seq = seq.next(flow);
            self.write_frame(&frame).await?;
        }

        let mut end = Frame::stream_end(id, routing_id, stream_id, chunk_count);
        end.seq = seq.next(flow);
        self.write_frame(&end).await?;
        Ok(())
    }

    /// Flush any buffered output to the underlying stream.
    ///
    /// # Errors
    /// [`CoreError::Transport`] on I/O failure.
    pub async fn flush(&mut self) -> Result<(), CoreError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Recover the underlying stream, e.g. to rewrap it at a different
    /// `max_frame` once limits have been renegotiated.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use bifaci_proto::{Limits, MessageId};
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn write_then_read_single_frame() {
        let (client, server) = duplex(4096);
        let mut writer = FrameWriter::new(client, Limits::default().max_frame);
        let mut reader = FrameReader::new(server, Limits::default().max_frame);

        let frame = Frame::req(MessageId::Uint(1), "urn:cap:echo");
        writer.write_frame(&frame).await.unwrap();

        let got = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(got, frame);
    }

    #[tokio::test]
    async fn clean_close_yields_none() {
        let (client, server) = duplex(64);
        drop(client);
        let mut reader = FrameReader::new(server, Limits::default().max_frame);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_stream_reassembles_to_original_bytes() {
        let (client, server) = duplex(1 << 20);
        let mut writer = FrameWriter::new(client, Limits::default().max_frame);
        let mut reader = FrameReader::new(server, Limits::default().max_frame);
        let mut seq = SeqAssigner::new();

        let id = MessageId::Uint(1);
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        writer
            .write_stream(&mut seq, id, None, "s0", "application/octet-stream", None, &data, 8)
            .await
            .unwrap();

        let mut reassembled = Vec::new();
        loop {
            let frame = reader.read_frame().await.unwrap().unwrap();
            match frame.frame_type {
                bifaci_proto::FrameType::StreamStart => {},
                bifaci_proto::FrameType::Chunk => {
                    frame.verify_chunk().unwrap();
                    reassembled.extend(frame.payload.unwrap());
                },
                bifaci_proto::FrameType::StreamEnd => break,
                other => panic!("unexpected frame type {other:?}"),
            }
        }
        assert_eq!(reassembled, data);
    }

    #[tokio::test]
    async fn write_stream_seq_is_monotonic_across_the_whole_stream() {
        let (client, server) = duplex(1 << 20);
        let mut writer = FrameWriter::new(client, Limits::default().max_frame);
        let mut reader = FrameReader::new(server, Limits::default().max_frame);
        let mut seq = SeqAssigner::new();

        let id = MessageId::Uint(1);
        writer.write_stream(&mut seq, id, None, "s0", "text/plain", None, b"abcdefgh", 3).await.unwrap();

        let mut seqs = Vec::new();
        loop {
            let frame = reader.read_frame().await.unwrap().unwrap();
            let done = frame.frame_type == bifaci_proto::FrameType::StreamEnd;
            seqs.push(frame.seq);
            if done {
                break;
            }
        }
        let expected: Vec<u64> = (0..seqs.len() as u64).collect();
        assert_eq!(seqs, expected);
    }

    #[tokio::test]
    async fn oversized_incoming_frame_is_rejected() {
        let (mut client, server) = duplex(1 << 20);
        let mut reader = FrameReader::new(server, 16);
        client.write_all(&100u32.to_be_bytes()).await.unwrap();
        client.write_all(&vec![0u8; 100]).await.unwrap();
        assert!(matches!(
            reader.read_frame().await,
            Err(CoreError::Protocol(bifaci_proto::ProtoError::FrameTooLarge { .. }))
        ));
    }

    #[tokio::test]
    async fn oversized_outgoing_frame_is_rejected() {
        let (client, _server) = duplex(1 << 20);
        let mut writer = FrameWriter::new(client, 8);
        let frame = Frame::chunk(MessageId::Uint(1), None, "s0", 0, vec![0u8; 100]);
        assert!(matches!(
            writer.write_frame(&frame).await,
            Err(CoreError::Protocol(bifaci_proto::ProtoError::FrameTooLarge { .. }))
        ));
    }
}
