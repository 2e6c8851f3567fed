//! HMAC signatures for handshakes and webhook verification.
//!
//! The same HMAC-SHA256-over-comma-joined-fields construction is used for
//! both signaling and media handshakes.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn hmac_hex(key: &[u8], message: &[u8]) -> String {
    // HMAC can take a key of any size; new_from_slice only fails for
    // variable-output MACs, which Hmac<Sha256> is not.
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Computes the handshake signature over `"<clientId>,<meetingUuid>,<streamId>"`
pub fn sign(client_id: &str, meeting_uuid: &str, stream_id: &str, client_secret: &str) -> String {
    let message = format!("{},{},{}", client_id, meeting_uuid, stream_id);
    hmac_hex(client_secret.as_bytes(), message.as_bytes())
}

/// Reply body for an `endpoint.url_validation` webhook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResponse {
    #[serde(rename = "plainToken")]
    pub plain_token: String,
    #[serde(rename = "encryptedToken")]
    pub encrypted_token: String,
}

/// Builds the synchronous URL-validation reply
pub fn validation_response(plain_token: &str, secret_token: &str) -> ValidationResponse {
    ValidationResponse {
        plain_token: plain_token.to_string(),
        encrypted_token: hmac_hex(secret_token.as_bytes(), plain_token.as_bytes()),
    }
}

/// Verifies a webhook signature header.
///
/// The vendor signs `v0:<timestamp>:<rawBody>` with the secret token and
/// sends the result as `v0=<hex>`. The comparison goes through
/// `Mac::verify_slice`, which is constant-time.
pub fn verify_webhook(raw_body: &str, timestamp: &str, signature: &str, secret_token: &str) -> bool {
    let Some(received_hex) = signature.strip_prefix("v0=") else {
        return false;
    };
    let Ok(received) = hex::decode(received_hex) else {
        return false;
    };

    let message = format!("v0:{}:{}", timestamp, raw_body);
    let mut mac = HmacSha256::new_from_slice(secret_token.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    mac.verify_slice(&received).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_matches_reference_vector() {
        assert_eq!(
            sign("client0", "uuid-42", "stream-7", "secret0"),
            "4cb4664915e2fabd588cf07d84f380a916c9cf40d6df6f8b062efed825982e4f"
        );
    }

    #[test]
    fn test_sign_is_deterministic() {
        let a = sign("c", "m", "s", "k");
        let b = sign("c", "m", "s", "k");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sign("c", "m", "s", "other"));
    }

    #[test]
    fn test_validation_response_reference_vector() {
        let response = validation_response("abc123", "s");
        assert_eq!(response.plain_token, "abc123");
        assert_eq!(
            response.encrypted_token,
            "98a67abc7dc8e094098463fcecc56f07d3a485853a8890c79f78161e26fc5a87"
        );
    }

    #[test]
    fn test_validation_response_idempotent() {
        assert_eq!(
            validation_response("token", "secret"),
            validation_response("token", "secret")
        );
    }

    #[test]
    fn test_webhook_verification_reference_vector() {
        let body = r#"{"event":"x"}"#;
        let sig = "v0=67db58c5cf544da273f7139bb12d722e02d905e02a133c8630ae15cf2e068381";
        assert!(verify_webhook(body, "1700000000", sig, "tok"));
        assert!(!verify_webhook(body, "1700000001", sig, "tok"));
        assert!(!verify_webhook(body, "1700000000", sig, "wrong"));
        assert!(!verify_webhook(body, "1700000000", "v0=deadbeef", "tok"));
    }

    #[test]
    fn test_webhook_verification_rejects_malformed_headers() {
        let body = r#"{"event":"x"}"#;
        // Digest without the version prefix
        assert!(!verify_webhook(
            body,
            "1700000000",
            "67db58c5cf544da273f7139bb12d722e02d905e02a133c8630ae15cf2e068381",
            "tok"
        ));
        assert!(!verify_webhook(body, "1700000000", "v0=not-hex", "tok"));
        assert!(!verify_webhook(body, "1700000000", "", "tok"));
    }

    #[test]
    fn test_validation_serializes_vendor_field_names() {
        let response = validation_response("p", "s");
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("plainToken").is_some());
        assert!(json.get("encryptedToken").is_some());
    }
}
