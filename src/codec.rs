//! CBOR codec for [`crate::protocol::Envelope`].
//!
//! The transport collaborator already delivers discrete `(neighbor, bytes)`
//! messages (it owns framing, see §6 of the design) so this module only
//! handles the CBOR <-> `Envelope` conversion, not length-prefixing.

use crate::{error::OverlayError, protocol::Envelope};

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, OverlayError> {
    let mut buf = Vec::new();
    ciborium::into_writer(envelope, &mut buf).map_err(|e| OverlayError::Codec(e.to_string()))?;
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, OverlayError> {
    ciborium::from_reader(bytes).map_err(|e| OverlayError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Cmd;
    use serde_json::json;

    #[test]
    fn round_trips_an_envelope() {
        let env = Envelope::request(Cmd::PingPong, json!({"ping": 1000}), 123_456_789);
        let bytes = encode(&env).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(&[0xff, 0x00, 0x01]).is_err());
    }
}
