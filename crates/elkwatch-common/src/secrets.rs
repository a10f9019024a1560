use anyhow::{anyhow, bail, Result};
use base64::{engine::general_purpose, Engine as _};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

const ENCRYPTED_PREFIX: &str = "enc:";

/// Returns true when the value carries the encrypted-at-rest prefix.
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// Transparent AES-256-GCM encryption for secret fields (webhook URLs,
/// data-source passwords).
///
/// Without a configured key the cipher is a pass-through: values are stored
/// and returned as-is. With a key, `maybe_encrypt` produces
/// `enc:<base64(nonce || ciphertext || tag)>` and `maybe_decrypt` reverses
/// it. Plaintext values stay readable either way, so the key can be rolled
/// out without rewriting existing rows.
pub struct SecretCipher {
    key_bytes: Option<Vec<u8>>,
}

impl SecretCipher {
    pub fn new(key_bytes: Option<Vec<u8>>) -> Result<Self> {
        if let Some(key) = &key_bytes {
            if key.len() != 32 {
                bail!(
                    "encryption key must be 32 bytes (got {})",
                    key.len()
                );
            }
        }
        Ok(Self { key_bytes })
    }

    /// Pass-through cipher with no key configured.
    pub fn disabled() -> Self {
        Self { key_bytes: None }
    }

    /// Encrypts the value when a key is configured. Empty and
    /// already-encrypted values are returned unchanged.
    pub fn maybe_encrypt(&self, value: &str) -> Result<String> {
        if value.is_empty() || is_encrypted(value) {
            return Ok(value.to_string());
        }
        let Some(key_bytes) = &self.key_bytes else {
            return Ok(value.to_string());
        };

        let unbound_key = UnboundKey::new(&AES_256_GCM, key_bytes)
            .map_err(|_| anyhow!("invalid encryption key"))?;
        let key = LessSafeKey::new(unbound_key);

        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| anyhow!("failed to generate nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = value.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| anyhow!("encryption failed"))?;

        // nonce (12 bytes) + ciphertext + tag
        let mut payload = nonce_bytes.to_vec();
        payload.extend_from_slice(&in_out);
        Ok(format!(
            "{ENCRYPTED_PREFIX}{}",
            general_purpose::STANDARD_NO_PAD.encode(&payload)
        ))
    }

    /// Decrypts an `enc:`-prefixed value. Plaintext values are returned
    /// unchanged; an encrypted value with no configured key is an error.
    pub fn maybe_decrypt(&self, value: &str) -> Result<String> {
        if value.is_empty() || !is_encrypted(value) {
            return Ok(value.to_string());
        }
        let Some(key_bytes) = &self.key_bytes else {
            bail!("encrypted value present but APP_ENCRYPTION_KEY is not configured");
        };

        let raw = &value[ENCRYPTED_PREFIX.len()..];
        let payload = general_purpose::STANDARD_NO_PAD
            .decode(raw)
            .or_else(|_| general_purpose::STANDARD.decode(raw))
            .map_err(|e| anyhow!("decode encrypted payload: {e}"))?;

        if payload.len() < NONCE_LEN + aead::AES_256_GCM.tag_len() {
            bail!("encrypted payload too short");
        }

        let unbound_key = UnboundKey::new(&AES_256_GCM, key_bytes)
            .map_err(|_| anyhow!("invalid encryption key"))?;
        let key = LessSafeKey::new(unbound_key);

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| anyhow!("invalid nonce"))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| anyhow!("decryption failed"))?;

        Ok(String::from_utf8(plaintext.to_vec())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::new(Some(vec![42u8; 32])).unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let c = cipher();
        let secret = "https://open.larksuite.com/bot/v2/hook/abc123";
        let encrypted = c.maybe_encrypt(secret).unwrap();

        assert_ne!(encrypted, secret);
        assert!(is_encrypted(&encrypted));

        let decrypted = c.maybe_decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, secret);
    }

    #[test]
    fn plaintext_passes_through_decrypt() {
        let c = cipher();
        assert_eq!(c.maybe_decrypt("plain-value").unwrap(), "plain-value");
        assert_eq!(c.maybe_decrypt("").unwrap(), "");
    }

    #[test]
    fn encrypt_is_noop_without_key() {
        let c = SecretCipher::disabled();
        assert_eq!(c.maybe_encrypt("secret").unwrap(), "secret");
    }

    #[test]
    fn decrypt_fails_without_key() {
        let with_key = cipher();
        let encrypted = with_key.maybe_encrypt("secret").unwrap();

        let without_key = SecretCipher::disabled();
        assert!(without_key.maybe_decrypt(&encrypted).is_err());
    }

    #[test]
    fn decrypt_fails_with_wrong_key() {
        let a = SecretCipher::new(Some(vec![1u8; 32])).unwrap();
        let b = SecretCipher::new(Some(vec![2u8; 32])).unwrap();

        let encrypted = a.maybe_encrypt("secret").unwrap();
        assert!(b.maybe_decrypt(&encrypted).is_err());
    }

    #[test]
    fn already_encrypted_is_not_double_encrypted() {
        let c = cipher();
        let once = c.maybe_encrypt("secret").unwrap();
        let twice = c.maybe_encrypt(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_short_key() {
        assert!(SecretCipher::new(Some(vec![0u8; 16])).is_err());
    }
}
