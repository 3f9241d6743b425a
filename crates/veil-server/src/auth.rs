//! Request authentication for the HTTP transport.
//!
//! The platform signs `timestamp ‖ body` with Ed25519. Verification runs
//! over the literal bytes received, never a re-serialized copy, and a
//! request failing verification is rejected before any parsing touches
//! its body. Malformed hex, malformed keys, or any verification failure
//! resolve to `false`; nothing throws past this boundary.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Header carrying the hex signature.
pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";

/// Header carrying the timestamp the signature covers.
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

/// Parse a hex-encoded Ed25519 public key. `None` on malformed input.
pub fn parse_public_key(public_key_hex: &str) -> Option<VerifyingKey> {
    let bytes = hex::decode(public_key_hex).ok()?;
    let bytes: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// Verify `signature_hex` over `timestamp ‖ raw_body`.
pub fn verify(
    raw_body: &[u8],
    signature_hex: &str,
    timestamp: &str,
    public_key: &VerifyingKey,
) -> bool {
    let Ok(signature_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&signature_bytes) else {
        return false;
    };

    let mut message = Vec::with_capacity(timestamp.len() + raw_body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(raw_body);

    public_key.verify(&message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn sign(key: &SigningKey, timestamp: &str, body: &[u8]) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        hex::encode(key.sign(&message).to_bytes())
    }

    #[test]
    fn valid_signature_verifies() {
        let key = signing_key(1);
        let body = br#"{"type":1}"#;
        let timestamp = "1700000000";
        let signature = sign(&key, timestamp, body);

        assert!(verify(body, &signature, timestamp, &key.verifying_key()));
    }

    #[test]
    fn tampered_body_or_timestamp_fails() {
        let key = signing_key(2);
        let body = br#"{"type":2}"#;
        let timestamp = "1700000000";
        let signature = sign(&key, timestamp, body);
        let public = key.verifying_key();

        let mut flipped = body.to_vec();
        flipped[3] ^= 0x01;
        assert!(!verify(&flipped, &signature, timestamp, &public));
        assert!(!verify(body, &signature, "1700000001", &public));
    }

    #[test]
    fn wrong_key_fails() {
        let key = signing_key(3);
        let other = signing_key(4);
        let body = b"payload";
        let signature = sign(&key, "123", body);

        assert!(!verify(body, &signature, "123", &other.verifying_key()));
    }

    #[test]
    fn malformed_inputs_fail_without_panicking() {
        let key = signing_key(5).verifying_key();
        assert!(!verify(b"body", "not-hex", "123", &key));
        assert!(!verify(b"body", "abcd", "123", &key)); // wrong length
        assert!(parse_public_key("zz").is_none());
        assert!(parse_public_key("abcd").is_none());
    }

    #[test]
    fn public_key_round_trips_through_hex() {
        let key = signing_key(6).verifying_key();
        let parsed = parse_public_key(&hex::encode(key.to_bytes())).unwrap();
        assert_eq!(parsed, key);
    }
}
