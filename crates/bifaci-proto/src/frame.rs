//! `Frame`: the single wire unit.
//!
//! A frame is a CBOR map keyed by small integers. Fields that have no
//! dedicated top-level key (ERR's `code`/`message`, LOG's `level`,
//! HEARTBEAT's load gauges, HELLO's limits and manifest, ...) are
//! per-type auxiliary data carried inside the `meta` map at key 5 rather
//! than assigned individual top-level keys, so they nest under the one
//! key reserved for that purpose.

use std::collections::BTreeMap;

use ciborium::value::{Integer, Value};

use crate::checksum::compute_checksum;
use crate::error::ProtoError;
use crate::frame_type::FrameType;
use crate::limits::Limits;
use crate::message_id::MessageId;

/// Current wire protocol version. The only value `Frame::decode` accepts.
pub const PROTOCOL_VERSION: u16 = 2;

/// Size in bytes of the big-endian length prefix in front of every
/// frame's CBOR body on the wire.
pub const LENGTH_PREFIX_SIZE: usize = 4;

mod key {
    pub const VERSION: i128 = 0;
    pub const FRAME_TYPE: i128 = 1;
    pub const ID: i128 = 2;
    pub const SEQ: i128 = 3;
    pub const CONTENT_TYPE: i128 = 4;
    pub const META: i128 = 5;
    pub const PAYLOAD: i128 = 6;
    pub const LEN: i128 = 7;
    pub const OFFSET: i128 = 8;
    pub const EOF: i128 = 9;
    pub const CAP: i128 = 10;
    pub const STREAM_ID: i128 = 11;
    pub const MEDIA_URN: i128 = 12;
    pub const ROUTING_ID: i128 = 13;
    pub const CHUNK_INDEX: i128 = 14;
    pub const CHUNK_COUNT: i128 = 15;
    pub const CHECKSUM: i128 = 16;
}

mod meta_key {
    pub const CODE: &str = "code";
    pub const MESSAGE: &str = "message";
    pub const LEVEL: &str = "level";
    pub const CPU_LOAD: &str = "cpuLoad";
    pub const MEM_LOAD: &str = "memLoad";
    pub const MAX_FRAME: &str = "maxFrame";
    pub const MAX_CHUNK: &str = "maxChunk";
    pub const MAX_REORDER_BUFFER: &str = "maxReorderBuffer";
    pub const MANIFEST: &str = "manifest";
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub version: u16,
    pub frame_type: FrameType,
    pub id: MessageId,
    pub seq: u64,
    pub routing_id: Option<MessageId>,
    pub content_type: Option<String>,
    pub stream_id: Option<String>,
    pub media_urn: Option<String>,
    pub cap: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub len: Option<u64>,
    pub offset: Option<u64>,
    pub eof: Option<bool>,
    pub chunk_index: Option<u64>,
    pub chunk_count: Option<u64>,
    pub checksum: Option<u64>,
    pub code: Option<String>,
    pub message: Option<String>,
    pub level: Option<String>,
    pub cpu_load: Option<f64>,
    pub mem_load: Option<f64>,
    pub max_frame: Option<u64>,
    pub max_chunk: Option<u64>,
    pub max_reorder_buffer: Option<u64>,
    pub manifest: Option<Vec<u8>>,
}

impl Frame {
    fn bare(frame_type: FrameType, id: MessageId) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            frame_type,
            id,
            seq: 0,
            routing_id: None,
            content_type: None,
            stream_id: None,
            media_urn: None,
            cap: None,
            payload: None,
            len: None,
            offset: None,
            eof: None,
            chunk_index: None,
            chunk_count: None,
            checksum: None,
            code: None,
            message: None,
            level: None,
            cpu_load: None,
            mem_load: None,
            max_frame: None,
            max_chunk: None,
            max_reorder_buffer: None,
            manifest: None,
        }
    }

    /// HELLO carrying only limits (the host side of the handshake).
    #[must_use]
    pub fn hello(limits: Limits) -> Self {
        let mut f = Self::bare(FrameType::Hello, MessageId::ZERO);
        f.max_frame = Some(limits.max_frame);
        f.max_chunk = Some(limits.max_chunk);
        f.max_reorder_buffer = Some(limits.max_reorder_buffer);
        f
    }

    /// HELLO embedding a non-empty manifest (the plugin side of the handshake).
    #[must_use]
    pub fn hello_with_manifest(limits: Limits, manifest: Vec<u8>) -> Self {
        let mut f = Self::hello(limits);
        f.manifest = Some(manifest);
        f
    }

    /// REQ carrying a capability URN.
    #[must_use]
    pub fn req(id: MessageId, cap: impl Into<String>) -> Self {
        let mut f = Self::bare(FrameType::Req, id);
        f.cap = Some(cap.into());
        f
    }

    /// Opens one argument/result stream within a request.
    #[must_use]
    pub fn stream_start(
        id: MessageId,
        routing_id: Option<MessageId>,
        stream_id: impl Into<String>,
        media_urn: impl Into<String>,
    ) -> Self {
        let mut f = Self::bare(FrameType::StreamStart, id);
        f.routing_id = routing_id;
        f.stream_id = Some(stream_id.into());
        f.media_urn = Some(media_urn.into());
        f
    }

    /// One chunk of a stream's payload, checksum computed automatically.
    #[must_use]
    pub fn chunk(
        id: MessageId,
        routing_id: Option<MessageId>,
        stream_id: impl Into<String>,
        chunk_index: u64,
        payload: Vec<u8>,
    ) -> Self {
        let mut f = Self::bare(FrameType::Chunk, id);
        f.routing_id = routing_id;
        f.stream_id = Some(stream_id.into());
        f.chunk_index = Some(chunk_index);
        f.checksum = Some(compute_checksum(&payload));
        f.payload = Some(payload);
        f
    }

    /// Like [`Frame::chunk`] but with an explicit byte offset within the
    /// stream (used when chunks are delivered out of sequence order).
    #[must_use]
    pub fn chunk_with_offset(
        id: MessageId,
        routing_id: Option<MessageId>,
        stream_id: impl Into<String>,
        chunk_index: u64,
        offset: u64,
        payload: Vec<u8>,
    ) -> Self {
        let mut f = Self::chunk(id, routing_id, stream_id, chunk_index, payload);
        f.offset = Some(offset);
        f
    }

    /// Closes one stream within a request.
    #[must_use]
    pub fn stream_end(
        id: MessageId,
        routing_id: Option<MessageId>,
        stream_id: impl Into<String>,
        chunk_count: u64,
    ) -> Self {
        let mut f = Self::bare(FrameType::StreamEnd, id);
        f.routing_id = routing_id;
        f.stream_id = Some(stream_id.into());
        f.chunk_count = Some(chunk_count);
        f
    }

    /// Terminal frame closing the whole request across every stream.
    #[must_use]
    pub fn end(id: MessageId, routing_id: Option<MessageId>, payload: Option<Vec<u8>>) -> Self {
        let mut f = Self::bare(FrameType::End, id);
        f.routing_id = routing_id;
        f.payload = payload;
        f.eof = Some(true);
        f
    }

    /// Terminal error frame closing the request.
    #[must_use]
    pub fn err(
        id: MessageId,
        routing_id: Option<MessageId>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut f = Self::bare(FrameType::Err, id);
        f.routing_id = routing_id;
        f.code = Some(code.into());
        f.message = Some(message.into());
        f
    }

    /// Out-of-band log line.
    #[must_use]
    pub fn log(
        id: MessageId,
        routing_id: Option<MessageId>,
        level: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut f = Self::bare(FrameType::Log, id);
        f.routing_id = routing_id;
        f.level = Some(level.into());
        f.message = Some(message.into());
        f
    }

    /// Keepalive; bypasses flow ordering entirely.
    #[must_use]
    pub fn heartbeat(id: MessageId) -> Self {
        Self::bare(FrameType::Heartbeat, id)
    }

    /// Relay advertisement: manifest + limits. `id = uint(0)`.
    #[must_use]
    pub fn relay_notify(manifest: Vec<u8>, limits: Limits) -> Self {
        let mut f = Self::bare(FrameType::RelayNotify, MessageId::ZERO);
        f.manifest = Some(manifest);
        f.max_frame = Some(limits.max_frame);
        f.max_chunk = Some(limits.max_chunk);
        f.max_reorder_buffer = Some(limits.max_reorder_buffer);
        f
    }

    /// Relay resource report. `id = uint(0)`.
    #[must_use]
    pub fn relay_state(payload: Vec<u8>) -> Self {
        let mut f = Self::bare(FrameType::RelayState, MessageId::ZERO);
        f.payload = Some(payload);
        f
    }

    /// True for frame types ordered by `SeqAssigner`/`ReorderBuffer`.
    #[must_use]
    pub fn is_flow_frame(&self) -> bool {
        self.frame_type.is_flow_frame()
    }

    /// Read the limits embedded on a HELLO or RELAY_NOTIFY frame, falling
    /// back to the default for any field the peer omitted.
    #[must_use]
    pub fn limits(&self) -> Limits {
        let defaults = Limits::default();
        Limits::new(
            self.max_frame.unwrap_or(defaults.max_frame),
            self.max_chunk.unwrap_or(defaults.max_chunk),
            self.max_reorder_buffer.unwrap_or(defaults.max_reorder_buffer),
        )
    }

    /// Verify a CHUNK's payload against its declared FNV-1a checksum.
    pub fn verify_chunk(&self) -> Result<(), ProtoError> {
        let payload = self.payload.as_deref().unwrap_or(&[]);
        let actual = compute_checksum(payload);
        match self.checksum {
            Some(expected) if expected == actual => Ok(()),
            Some(expected) => Err(ProtoError::ChecksumMismatch { expected, actual }),
            None => Err(ProtoError::InvalidFrame("chunk missing checksum".into())),
        }
    }

    /// Split `data` into a sequence of CHUNK frames of at most `max_chunk`
    /// bytes each. `seq` is left at 0 on every
    /// returned frame; `SeqAssigner` assigns the real value at output.
    /// Empty input yields exactly one chunk with `len=0` and `eof=true`.
    #[must_use]
    pub fn chunks_for(
        id: MessageId,
        routing_id: Option<MessageId>,
        stream_id: impl Into<String>,
        content_type: Option<String>,
        data: &[u8],
        max_chunk: u64,
    ) -> Vec<Frame> {
        let stream_id = stream_id.into();
        if data.is_empty() {
            let mut f = Self::chunk(id, routing_id, stream_id, 0, Vec::new());
            f.len = Some(0);
            f.content_type = content_type;
            f.eof = Some(true);
            return vec![f];
        }

        let max_chunk = usize::try_from(max_chunk.max(1)).unwrap_or(usize::MAX);
        let total_len = data.len() as u64;
        let mut frames: Vec<Frame> = data
            .chunks(max_chunk)
            .enumerate()
            .map(|(i, part)| {
                Self::chunk(id, routing_id, stream_id.clone(), i as u64, part.to_vec())
            })
            .collect();

        if let Some(first) = frames.first_mut() {
            first.len = Some(total_len);
            first.content_type = content_type;
        }
        if let Some(last) = frames.last_mut() {
            last.eof = Some(true);
        }
        frames
    }

    /// Encode this frame to its CBOR body (no length prefix).
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let mut entries = Vec::new();
        entries.push((int_key(key::VERSION), Value::Integer(Integer::from(self.version))));
        entries.push((
            int_key(key::FRAME_TYPE),
            Value::Integer(Integer::from(self.frame_type.to_u8())),
        ));
        entries.push((int_key(key::ID), self.id.to_cbor()));
        entries.push((int_key(key::SEQ), Value::Integer(Integer::from(self.seq))));
        push_opt_text(&mut entries, key::CONTENT_TYPE, &self.content_type);
        push_opt_bytes(&mut entries, key::PAYLOAD, &self.payload);
        push_opt_u64(&mut entries, key::LEN, self.len);
        push_opt_u64(&mut entries, key::OFFSET, self.offset);
        push_opt_bool(&mut entries, key::EOF, self.eof);
        push_opt_text(&mut entries, key::CAP, &self.cap);
        push_opt_text(&mut entries, key::STREAM_ID, &self.stream_id);
        push_opt_text(&mut entries, key::MEDIA_URN, &self.media_urn);
        if let Some(routing_id) = self.routing_id {
            entries.push((int_key(key::ROUTING_ID), routing_id.to_cbor()));
        }
        push_opt_u64(&mut entries, key::CHUNK_INDEX, self.chunk_index);
        push_opt_u64(&mut entries, key::CHUNK_COUNT, self.chunk_count);
        push_opt_u64(&mut entries, key::CHECKSUM, self.checksum);

        let meta = self.encode_meta();
        if !meta.is_empty() {
            entries.push((int_key(key::META), Value::Map(meta)));
        }

        let mut body = Vec::new();
        ciborium::ser::into_writer(&Value::Map(entries), &mut body)
            .map_err(|e| ProtoError::InvalidFrame(format!("cbor encode failed: {e}")))?;
        Ok(body)
    }

    fn encode_meta(&self) -> Vec<(Value, Value)> {
        let mut meta = Vec::new();
        push_opt_text_meta(&mut meta, meta_key::CODE, &self.code);
        push_opt_text_meta(&mut meta, meta_key::MESSAGE, &self.message);
        push_opt_text_meta(&mut meta, meta_key::LEVEL, &self.level);
        if let Some(v) = self.cpu_load {
            meta.push((Value::Text(meta_key::CPU_LOAD.into()), Value::Float(v)));
        }
        if let Some(v) = self.mem_load {
            meta.push((Value::Text(meta_key::MEM_LOAD.into()), Value::Float(v)));
        }
        if let Some(v) = self.max_frame {
            meta.push((Value::Text(meta_key::MAX_FRAME.into()), Value::Integer(Integer::from(v))));
        }
        if let Some(v) = self.max_chunk {
            meta.push((Value::Text(meta_key::MAX_CHUNK.into()), Value::Integer(Integer::from(v))));
        }
        if let Some(v) = self.max_reorder_buffer {
            meta.push((
                Value::Text(meta_key::MAX_REORDER_BUFFER.into()),
                Value::Integer(Integer::from(v)),
            ));
        }
        if let Some(ref v) = self.manifest {
            meta.push((Value::Text(meta_key::MANIFEST.into()), Value::Bytes(v.clone())));
        }
        meta
    }

    /// Decode a CBOR body (as produced by [`Frame::encode`]) back into a
    /// frame, enforcing each frame type's required-field rules.
    pub fn decode(body: &[u8]) -> Result<Frame, ProtoError> {
        let value: Value = ciborium::de::from_reader(body)
            .map_err(|e| ProtoError::InvalidFrame(format!("cbor decode failed: {e}")))?;
        let Value::Map(entries) = value else {
            return Err(ProtoError::InvalidFrame("frame is not a CBOR map".into()));
        };
        let map = to_int_map(entries)?;

        let version = get_u64(&map, key::VERSION, "version")? as u16;
        if version != PROTOCOL_VERSION {
            return Err(ProtoError::InvalidFrame(format!("unsupported version {version}")));
        }
        let raw_type = get_u64(&map, key::FRAME_TYPE, "frameType")?;
        let frame_type = u8::try_from(raw_type)
            .ok()
            .and_then(FrameType::from_u8)
            .ok_or_else(|| ProtoError::InvalidFrame(format!("unknown frameType {raw_type}")))?;
        let id_value = map
            .get(&key::ID)
            .ok_or_else(|| ProtoError::InvalidFrame("missing field id".into()))?;
        let id = MessageId::from_cbor(id_value)?;

        let mut frame = Self::bare(frame_type, id);
        frame.version = version;
        frame.seq = map.get(&key::SEQ).map(as_u64).transpose()?.unwrap_or(0);
        frame.content_type = get_opt_text(&map, key::CONTENT_TYPE)?;
        frame.payload = get_opt_bytes(&map, key::PAYLOAD)?;
        frame.len = get_opt_u64(&map, key::LEN)?;
        frame.offset = get_opt_u64(&map, key::OFFSET)?;
        frame.eof = get_opt_bool(&map, key::EOF)?;
        frame.cap = get_opt_text(&map, key::CAP)?;
        frame.stream_id = get_opt_text(&map, key::STREAM_ID)?;
        frame.media_urn = get_opt_text(&map, key::MEDIA_URN)?;
        frame.routing_id = map.get(&key::ROUTING_ID).map(MessageId::from_cbor).transpose()?;
        frame.chunk_index = get_opt_u64(&map, key::CHUNK_INDEX)?;
        frame.chunk_count = get_opt_u64(&map, key::CHUNK_COUNT)?;
        frame.checksum = get_opt_u64(&map, key::CHECKSUM)?;

        if let Some(Value::Map(meta_entries)) = map.get(&key::META) {
            frame.decode_meta(meta_entries)?;
        }

        if frame_type == FrameType::Chunk {
            if frame.chunk_index.is_none() {
                return Err(ProtoError::InvalidFrame("chunk missing chunkIndex".into()));
            }
            if frame.checksum.is_none() {
                return Err(ProtoError::InvalidFrame("chunk missing checksum".into()));
            }
        }
        if frame_type == FrameType::StreamEnd && frame.chunk_count.is_none() {
            return Err(ProtoError::InvalidFrame("streamEnd missing chunkCount".into()));
        }

        Ok(frame)
    }

    fn decode_meta(&mut self, entries: &[(Value, Value)]) -> Result<(), ProtoError> {
        let meta: BTreeMap<&str, &Value> = entries
            .iter()
            .filter_map(|(k, v)| match k {
                Value::Text(s) => Some((s.as_str(), v)),
                _ => None,
            })
            .collect();
        if let Some(v) = meta.get(meta_key::CODE) {
            self.code = Some(as_text(v)?);
        }
        if let Some(v) = meta.get(meta_key::MESSAGE) {
            self.message = Some(as_text(v)?);
        }
        if let Some(v) = meta.get(meta_key::LEVEL) {
            self.level = Some(as_text(v)?);
        }
        if let Some(v) = meta.get(meta_key::CPU_LOAD) {
            self.cpu_load = Some(as_f64(v)?);
        }
        if let Some(v) = meta.get(meta_key::MEM_LOAD) {
            self.mem_load = Some(as_f64(v)?);
        }
        if let Some(v) = meta.get(meta_key::MAX_FRAME) {
            self.max_frame = Some(as_u64(v)?);
        }
        if let Some(v) = meta.get(meta_key::MAX_CHUNK) {
            self.max_chunk = Some(as_u64(v)?);
        }
        if let Some(v) = meta.get(meta_key::MAX_REORDER_BUFFER) {
            self.max_reorder_buffer = Some(as_u64(v)?);
        }
        if let Some(v) = meta.get(meta_key::MANIFEST) {
            self.manifest = Some(as_bytes(v)?);
        }
        Ok(())
    }
}

fn int_key(k: i128) -> Value {
    Value::Integer(Integer::from(k))
}

fn to_int_map(entries: Vec<(Value, Value)>) -> Result<BTreeMap<i128, Value>, ProtoError> {
    let mut map = BTreeMap::new();
    for (k, v) in entries {
        let Value::Integer(i) = k else {
            return Err(ProtoError::InvalidFrame("frame map key is not an integer".into()));
        };
        map.insert(i.into(), v);
    }
    Ok(map)
}

fn as_u64(value: &Value) -> Result<u64, ProtoError> {
    match value {
        Value::Integer(i) => {
            let n: i128 = (*i).into();
            u64::try_from(n).map_err(|_| ProtoError::InvalidFrame("integer out of range".into()))
        },
        _ => Err(ProtoError::InvalidFrame("expected integer".into())),
    }
}

fn as_f64(value: &Value) -> Result<f64, ProtoError> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Integer(i) => {
            let n: i128 = (*i).into();
            Ok(n as f64)
        },
        _ => Err(ProtoError::InvalidFrame("expected float".into())),
    }
}

fn as_text(value: &Value) -> Result<String, ProtoError> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        _ => Err(ProtoError::InvalidFrame("expected text".into())),
    }
}

fn as_bytes(value: &Value) -> Result<Vec<u8>, ProtoError> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        _ => Err(ProtoError::InvalidFrame("expected bytes".into())),
    }
}

fn as_bool(value: &Value) -> Result<bool, ProtoError> {
    match value {
        Value::Bool(b) => Ok(*b),
        _ => Err(ProtoError::InvalidFrame("expected bool".into())),
    }
}

fn get_u64(map: &BTreeMap<i128, Value>, k: i128, name: &str) -> Result<u64, ProtoError> {
    map.get(&k)
        .ok_or_else(|| ProtoError::InvalidFrame(format!("missing field {name}")))
        .and_then(as_u64)
}

fn get_opt_u64(map: &BTreeMap<i128, Value>, k: i128) -> Result<Option<u64>, ProtoError> {
    map.get(&k).map(as_u64).transpose()
}

fn get_opt_bool(map: &BTreeMap<i128, Value>, k: i128) -> Result<Option<bool>, ProtoError> {
    map.get(&k).map(as_bool).transpose()
}

fn get_opt_text(map: &BTreeMap<i128, Value>, k: i128) -> Result<Option<String>, ProtoError> {
    map.get(&k).map(as_text).transpose()
}

fn get_opt_bytes(map: &BTreeMap<i128, Value>, k: i128) -> Result<Option<Vec<u8>>, ProtoError> {
    map.get(&k).map(as_bytes).transpose()
}

fn push_opt_text(entries: &mut Vec<(Value, Value)>, k: i128, v: &Option<String>) {
    if let Some(s) = v {
        entries.push((int_key(k), Value::Text(s.clone())));
    }
}

fn push_opt_bytes(entries: &mut Vec<(Value, Value)>, k: i128, v: &Option<Vec<u8>>) {
    if let Some(b) = v {
        entries.push((int_key(k), Value::Bytes(b.clone())));
    }
}

fn push_opt_u64(entries: &mut Vec<(Value, Value)>, k: i128, v: Option<u64>) {
    if let Some(n) = v {
        entries.push((int_key(k), Value::Integer(Integer::from(n))));
    }
}

fn push_opt_bool(entries: &mut Vec<(Value, Value)>, k: i128, v: Option<bool>) {
    if let Some(b) = v {
        entries.push((int_key(k), Value::Bool(b)));
    }
}

fn push_opt_text_meta(entries: &mut Vec<(Value, Value)>, name: &str, v: &Option<String>) {
    if let Some(s) = v {
        entries.push((Value::Text(name.into()), Value::Text(s.clone())));
    }
}
