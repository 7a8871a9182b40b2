//! Manifest codec: the capability list carried as an opaque JSON array of
//! URN strings inside HELLO/RELAY_NOTIFY `manifest` bytes.

use crate::error::CoreError;

/// Encode a list of capability URNs as the JSON array the core treats as
/// opaque bytes on the wire.
#[must_use]
pub fn encode_manifest(caps: &[String]) -> Vec<u8> {
    serde_json::to_vec(caps).expect("Vec<String> always serializes")
}

/// Decode a manifest's bytes back into its capability URN list.
///
/// # Errors
/// [`CoreError::Protocol`] wrapping an `InvalidFrame` if the bytes are not
/// a JSON array of strings.
pub fn decode_manifest(bytes: &[u8]) -> Result<Vec<String>, CoreError> {
    serde_json::from_slice(bytes).map_err(|e| {
        bifaci_proto::ProtoError::InvalidFrame(format!("manifest is not a JSON string array: {e}"))
            .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_capability_list() {
        let caps = vec!["urn:cap:a".to_string(), "urn:cap:b".to_string()];
        let bytes = encode_manifest(&caps);
        assert_eq!(decode_manifest(&bytes).unwrap(), caps);
    }

    #[test]
    fn empty_list_roundtrips() {
        let bytes = encode_manifest(&[]);
        assert_eq!(decode_manifest(&bytes).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode_manifest(b"not json").is_err());
    }
}
