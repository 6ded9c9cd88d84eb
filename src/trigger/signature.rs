use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex hmac of the body>`.
pub const SIGNATURE_HEADER: &str = "x-drci-signature-256";

/// Verify the HMAC-SHA256 signature of a trigger request.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(AppError::TriggerVerification(
            "No trigger secret configured".to_string(),
        ));
    }

    let signature_hex = signature_header
        .trim()
        .strip_prefix("sha256=")
        .ok_or_else(|| AppError::TriggerVerification("Missing sha256= prefix".to_string()))?;

    let signature_bytes = hex::decode(signature_hex)
        .map_err(|e| AppError::TriggerVerification(format!("Invalid hex in signature: {e}")))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::TriggerVerification(format!("Invalid HMAC key: {e}")))?;
    mac.update(payload);

    mac.verify_slice(&signature_bytes)
        .map_err(|_| AppError::TriggerVerification("Signature mismatch".to_string()))
}

/// `sha256=<hex>` header value for `payload`, as a scheduler would send it.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::TriggerVerification(format!("Invalid HMAC key: {e}")))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
