// [libs/gateway/payments/src/crypto.rs]
//! EOA signature recovery and canonical payment identity (§3, §4.K).
//!
//! The authorization digest here is a simplified stand-in for the full
//! EIP-712 typed-data domain separator a production x402 facilitator
//! would use — it covers the same fields (`from, to, value, valid_after,
//! valid_before, nonce, chain_id`) folded through Keccak256, which is
//! enough to exercise ecrecover and the verification state machine
//! without pulling in a full ABI-encoding dependency.

use hounfour_gateway_models::PaymentAuthorization;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use sha2::{Digest as Sha2Digest, Sha256};
use sha3::{Digest as Sha3Digest, Keccak256};

/// Keccak256 over the fields EIP-3009 signs, folded with `chain_id`.
pub fn authorization_digest(auth: &PaymentAuthorization, chain_id: u64) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(chain_id.to_be_bytes());
    hasher.update(auth.from.to_lowercase().as_bytes());
    hasher.update(auth.to.to_lowercase().as_bytes());
    hasher.update(auth.value.as_bytes());
    hasher.update(auth.valid_after.to_be_bytes());
    hasher.update(auth.valid_before.to_be_bytes());
    hasher.update(strip_0x(&auth.nonce).as_bytes());
    hasher.finalize().into()
}

fn strip_0x(hex_str: &str) -> &str {
    hex_str.strip_prefix("0x").unwrap_or(hex_str)
}

/// Recovers the 20-byte Ethereum address (lowercase, `0x`-prefixed) that
/// produced `(v, r, s)` over `digest`, Ethereum's `v = 27/28` convention.
pub fn ecrecover_address(digest: &[u8; 32], v: u8, r: &str, s: &str) -> Result<String, String> {
    let secp = Secp256k1::new();
    let recovery_id = RecoveryId::from_i32((v as i32) - 27).map_err(|e| e.to_string())?;

    let r_bytes = hex::decode(strip_0x(r)).map_err(|e| e.to_string())?;
    let s_bytes = hex::decode(strip_0x(s)).map_err(|e| e.to_string())?;
    let mut compact = [0u8; 64];
    if r_bytes.len() != 32 || s_bytes.len() != 32 {
        return Err("r/s must each be 32 bytes".to_string());
    }
    compact[..32].copy_from_slice(&r_bytes);
    compact[32..].copy_from_slice(&s_bytes);

    let signature = RecoverableSignature::from_compact(&compact, recovery_id).map_err(|e| e.to_string())?;
    let message = Message::from_digest_slice(digest).map_err(|e| e.to_string())?;
    let public_key = secp.recover_ecdsa(&message, &signature).map_err(|e| e.to_string())?;

    let uncompressed = public_key.serialize_uncompressed();
    let mut hasher = Keccak256::new();
    hasher.update(&uncompressed[1..]); // drop the 0x04 prefix byte
    let hash = hasher.finalize();
    Ok(format!("0x{}", hex::encode(&hash[12..])))
}

/// `pid_` + `SHA-256(chain_id:from_lc:to_lc:nonce:value:valid_before)` (§3).
pub fn payment_id(auth: &PaymentAuthorization, chain_id: u64) -> String {
    let canonical = format!(
        "{}:{}:{}:{}:{}:{}",
        chain_id,
        auth.from.to_lowercase(),
        auth.to.to_lowercase(),
        auth.nonce,
        auth.value,
        auth.valid_before
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("pid_{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{PublicKey, SecretKey};

    fn sign(digest: &[u8; 32], secret: &SecretKey) -> (u8, String, String) {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(digest).unwrap();
        let (recovery_id, compact) = secp.sign_ecdsa_recoverable(&message, secret).serialize_compact();
        let r = hex::encode(&compact[..32]);
        let s = hex::encode(&compact[32..]);
        let v = 27 + recovery_id.to_i32() as u8;
        (v, r, s)
    }

    fn address_from_public_key(public_key: &PublicKey) -> String {
        let uncompressed = public_key.serialize_uncompressed();
        let mut hasher = Keccak256::new();
        hasher.update(&uncompressed[1..]);
        let hash = hasher.finalize();
        format!("0x{}", hex::encode(&hash[12..]))
    }

    #[test]
    fn ecrecover_round_trips_a_freshly_signed_authorization() {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let public_key = PublicKey::from_secret_key(&secp, &secret);
        let signer_address = address_from_public_key(&public_key);

        let auth = PaymentAuthorization {
            from: signer_address.clone(),
            to: "0x000000000000000000000000000000000000aa".to_string(),
            value: "1000000".to_string(),
            valid_after: 0,
            valid_before: 9_999_999_999,
            nonce: "0x01".repeat(32 / 2),
            v: 0,
            r: String::new(),
            s: String::new(),
        };
        let digest = authorization_digest(&auth, 8453);
        let (v, r, s) = sign(&digest, &secret);

        let recovered = ecrecover_address(&digest, v, &r, &s).unwrap();
        assert_eq!(recovered, signer_address.to_lowercase());
    }

    #[test]
    fn payment_id_is_deterministic_and_prefixed() {
        let auth = PaymentAuthorization {
            from: "0xAAA".to_string(),
            to: "0xBBB".to_string(),
            value: "1000".to_string(),
            valid_after: 0,
            valid_before: 100,
            nonce: "0x01".to_string(),
            v: 27,
            r: "r".to_string(),
            s: "s".to_string(),
        };
        let id1 = payment_id(&auth, 8453);
        let id2 = payment_id(&auth, 8453);
        assert_eq!(id1, id2);
        assert!(id1.starts_with("pid_"));
    }
}
