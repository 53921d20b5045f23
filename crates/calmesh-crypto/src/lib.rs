//! CalMesh Crypto - Encrypted token envelopes
//!
//! **Security invariant: token plaintext never leaves this module except
//! through [`decrypt`], and every failure is the single opaque
//! `CalError::CryptoFailure`.**
//!
//! Two-level AES-256-GCM: each envelope seals the token JSON under a fresh
//! per-account data encryption key (DEK), and seals the DEK itself under the
//! process master key. Key rotation re-wraps only the DEK, leaving the token
//! ciphertext untouched; DEK backups carry only the wrapped DEK.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use calmesh_types::{AccountId, CalError, Result};

const DEK_LEN: usize = 32;
const IV_LEN: usize = 12;

/// Plaintext OAuth tokens, zeroized on drop
#[derive(Debug, Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch millis when the access token expires
    #[zeroize(skip)]
    pub expiry: i64,
}

/// The persisted 4-field envelope, stored as JSON verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub iv: String,
    pub ciphertext: String,
    pub encrypted_dek: String,
    pub dek_iv: String,
}

/// A DEK backup record; carries no token ciphertext
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DekBackup {
    pub account_id: AccountId,
    pub encrypted_dek: String,
    pub dek_iv: String,
    pub backed_up_at: i64,
}

/// A resolved 32-byte master key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Resolve key material from a configured secret.
    ///
    /// Accepted shapes, detected in order: 64 hex chars (decoded), base64 of
    /// exactly 32 bytes (decoded), anything else (SHA-256 of the UTF-8
    /// bytes). Every shape yields a usable 32-byte key, so configuration can
    /// carry either real key material or an arbitrary secret string.
    pub fn from_secret(secret: &str) -> Self {
        if secret.len() == 64 {
            if let Ok(bytes) = hex::decode(secret) {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                return Self(key);
            }
        }
        if let Ok(bytes) = B64.decode(secret) {
            if bytes.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                return Self(key);
            }
        }
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self(key)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new_from_slice(&self.0).expect("32-byte key is always valid for AES-256")
    }
}

fn fresh_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

fn decode_b64(field: &str) -> Result<Vec<u8>> {
    B64.decode(field).map_err(|_| CalError::CryptoFailure)
}

/// Seal a token set into a fresh envelope.
///
/// IVs and the DEK are fresh random per call, so identical inputs yield
/// differing ciphertexts.
pub fn encrypt(master: &MasterKey, tokens: &TokenSet) -> Result<Envelope> {
    let mut dek = fresh_bytes::<DEK_LEN>();
    let iv = fresh_bytes::<IV_LEN>();
    let dek_iv = fresh_bytes::<IV_LEN>();

    let plaintext = serde_json::to_vec(tokens).map_err(|_| CalError::CryptoFailure)?;

    let dek_cipher =
        Aes256Gcm::new_from_slice(&dek).expect("32-byte key is always valid for AES-256");
    let ciphertext = dek_cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
        .map_err(|_| CalError::CryptoFailure)?;

    let encrypted_dek = master
        .cipher()
        .encrypt(Nonce::from_slice(&dek_iv), dek.as_slice())
        .map_err(|_| CalError::CryptoFailure)?;

    dek.zeroize();

    Ok(Envelope {
        iv: B64.encode(iv),
        ciphertext: B64.encode(ciphertext),
        encrypted_dek: B64.encode(encrypted_dek),
        dek_iv: B64.encode(dek_iv),
    })
}

fn unwrap_dek(master: &MasterKey, envelope: &Envelope) -> Result<Vec<u8>> {
    let dek_iv = decode_b64(&envelope.dek_iv)?;
    let encrypted_dek = decode_b64(&envelope.encrypted_dek)?;
    if dek_iv.len() != IV_LEN {
        return Err(CalError::CryptoFailure);
    }
    let dek = master
        .cipher()
        .decrypt(Nonce::from_slice(&dek_iv), encrypted_dek.as_slice())
        .map_err(|_| CalError::CryptoFailure)?;
    if dek.len() != DEK_LEN {
        return Err(CalError::CryptoFailure);
    }
    Ok(dek)
}

/// Open an envelope. Fails with `CryptoFailure` on any bit tamper, wrong
/// master, or wrong DEK; no plaintext or partial result leaks on failure.
pub fn decrypt(master: &MasterKey, envelope: &Envelope) -> Result<TokenSet> {
    let mut dek = unwrap_dek(master, envelope)?;

    let iv = decode_b64(&envelope.iv)?;
    let ciphertext = decode_b64(&envelope.ciphertext)?;
    if iv.len() != IV_LEN {
        dek.zeroize();
        return Err(CalError::CryptoFailure);
    }

    let dek_cipher =
        Aes256Gcm::new_from_slice(&dek).expect("32-byte key is always valid for AES-256");
    dek.zeroize();

    let mut plaintext = dek_cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
        .map_err(|_| CalError::CryptoFailure)?;

    let tokens = serde_json::from_slice(&plaintext).map_err(|_| CalError::CryptoFailure);
    plaintext.zeroize();
    tokens
}

/// Re-wrap the DEK under a new master key.
///
/// The token `iv`/`ciphertext` pair is byte-identical across the rotation;
/// only `encryptedDek`/`dekIv` change, with a fresh IV.
pub fn re_encrypt_dek(
    old_master: &MasterKey,
    new_master: &MasterKey,
    envelope: &Envelope,
) -> Result<Envelope> {
    let mut dek = unwrap_dek(old_master, envelope)?;

    let dek_iv = fresh_bytes::<IV_LEN>();
    let encrypted_dek = new_master
        .cipher()
        .encrypt(Nonce::from_slice(&dek_iv), dek.as_slice())
        .map_err(|_| CalError::CryptoFailure)?;
    dek.zeroize();

    Ok(Envelope {
        iv: envelope.iv.clone(),
        ciphertext: envelope.ciphertext.clone(),
        encrypted_dek: B64.encode(encrypted_dek),
        dek_iv: B64.encode(dek_iv),
    })
}

/// Extract the wrapped DEK for offsite backup. The backup must not include
/// `iv`/`ciphertext`.
pub fn extract_dek_backup(
    account_id: AccountId,
    envelope: &Envelope,
    backed_up_at: i64,
) -> DekBackup {
    DekBackup {
        account_id,
        encrypted_dek: envelope.encrypted_dek.clone(),
        dek_iv: envelope.dek_iv.clone(),
        backed_up_at,
    }
}

/// Restore a wrapped DEK from backup, preserving `iv`/`ciphertext`
pub fn restore_dek_from_backup(envelope: &Envelope, backup: &DekBackup) -> Envelope {
    Envelope {
        iv: envelope.iv.clone(),
        ciphertext: envelope.ciphertext.clone(),
        encrypted_dek: backup.encrypted_dek.clone(),
        dek_iv: backup.dek_iv.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> TokenSet {
        TokenSet {
            access_token: "ya29.A".into(),
            refresh_token: "1//R".into(),
            expiry: 1_771_581_600_000,
        }
    }

    fn master() -> MasterKey {
        MasterKey::from_secret("test-master-secret")
    }

    #[test]
    fn test_round_trip() {
        let m = master();
        let envelope = encrypt(&m, &tokens()).unwrap();
        let out = decrypt(&m, &envelope).unwrap();
        assert_eq!(out.access_token, "ya29.A");
        assert_eq!(out.refresh_token, "1//R");
        assert_eq!(out.expiry, 1_771_581_600_000);
    }

    #[test]
    fn test_fresh_ivs_per_call() {
        let m = master();
        let a = encrypt(&m, &tokens()).unwrap();
        let b = encrypt(&m, &tokens()).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.encrypted_dek, b.encrypted_dek);
    }

    #[test]
    fn test_wrong_master_fails() {
        let envelope = encrypt(&master(), &tokens()).unwrap();
        let wrong = MasterKey::from_secret("another-secret");
        assert!(matches!(
            decrypt(&wrong, &envelope),
            Err(CalError::CryptoFailure)
        ));
    }

    fn flip_one_bit(field: &str) -> String {
        let mut bytes = B64.decode(field).unwrap();
        bytes[0] ^= 0x01;
        B64.encode(bytes)
    }

    #[test]
    fn test_single_bit_tamper_fails() {
        let m = master();
        let envelope = encrypt(&m, &tokens()).unwrap();

        for field in ["iv", "ciphertext", "encryptedDek", "dekIv"] {
            let mut tampered = envelope.clone();
            match field {
                "iv" => tampered.iv = flip_one_bit(&tampered.iv),
                "ciphertext" => tampered.ciphertext = flip_one_bit(&tampered.ciphertext),
                "encryptedDek" => tampered.encrypted_dek = flip_one_bit(&tampered.encrypted_dek),
                _ => tampered.dek_iv = flip_one_bit(&tampered.dek_iv),
            }
            assert!(
                matches!(decrypt(&m, &tampered), Err(CalError::CryptoFailure)),
                "tampered {field} must fail"
            );
        }
    }

    #[test]
    fn test_rotation_preserves_token_ciphertext() {
        let old = master();
        let new = MasterKey::from_secret("rotated-secret");
        let envelope = encrypt(&old, &tokens()).unwrap();
        let rotated = re_encrypt_dek(&old, &new, &envelope).unwrap();

        assert_eq!(rotated.iv, envelope.iv);
        assert_eq!(rotated.ciphertext, envelope.ciphertext);
        assert_ne!(rotated.encrypted_dek, envelope.encrypted_dek);
        assert_ne!(rotated.dek_iv, envelope.dek_iv);

        // Old master no longer opens it; new one does
        assert!(decrypt(&old, &rotated).is_err());
        assert_eq!(decrypt(&new, &rotated).unwrap().refresh_token, "1//R");
    }

    #[test]
    fn test_dek_backup_restore() {
        let m = master();
        let account_id = AccountId::new();
        let envelope = encrypt(&m, &tokens()).unwrap();
        let backup = extract_dek_backup(account_id, &envelope, 42);

        assert_eq!(backup.account_id, account_id);
        assert_eq!(backup.backed_up_at, 42);
        let backup_json = serde_json::to_string(&backup).unwrap();
        assert!(!backup_json.contains(&envelope.ciphertext));

        // Corrupt the live DEK fields, then restore from backup
        let mut broken = envelope.clone();
        broken.encrypted_dek = flip_one_bit(&broken.encrypted_dek);
        assert!(decrypt(&m, &broken).is_err());

        let restored = restore_dek_from_backup(&broken, &backup);
        assert_eq!(restored.iv, envelope.iv);
        assert_eq!(restored.ciphertext, envelope.ciphertext);
        assert_eq!(decrypt(&m, &restored).unwrap().access_token, "ya29.A");
    }

    #[test]
    fn test_master_key_shapes() {
        // 64 hex chars decode as raw key material
        let hex_secret = "a".repeat(64);
        let from_hex = MasterKey::from_secret(&hex_secret);
        // base64 of 32 bytes decodes as raw key material
        let b64_secret = B64.encode([7u8; 32]);
        let from_b64 = MasterKey::from_secret(&b64_secret);
        // arbitrary strings hash
        let hashed = MasterKey::from_secret("passphrase");

        let t = tokens();
        for key in [&from_hex, &from_b64, &hashed] {
            let envelope = encrypt(key, &t).unwrap();
            assert_eq!(decrypt(key, &envelope).unwrap().access_token, "ya29.A");
        }
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = encrypt(&master(), &tokens()).unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        for field in ["iv", "ciphertext", "encryptedDek", "dekIv"] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
    }
}
