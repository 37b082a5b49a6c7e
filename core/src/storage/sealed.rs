//! Per-record authenticated encryption over a [`SecretStore`].
//!
//! ```text
//! key    = HKDF-SHA256(salt = "obscura-storage-v1", ikm = seed, info = "record-key")
//! record = nonce[12] || AES-256-GCM(key, nonce, json, aad = storage key)
//! ```
//!
//! Binding the storage key as AAD means a record copied under another name
//! fails to open.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use obscura_keychain::Seed;
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::error::StorageError;
use crate::storage::{SecretStore, StorageResult};

const NONCE_BYTES: usize = 12;
const KEY_SALT: &[u8] = b"obscura-storage-v1";
const KEY_INFO: &[u8] = b"record-key";

/// Record key for the sealed store, bound to the wallet seed.
pub fn derive_storage_key(seed: &Seed) -> StorageResult<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(Some(KEY_SALT), seed.as_bytes());
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(KEY_INFO, &mut okm[..])
        .map_err(|e| StorageError::Serialization(format!("hkdf: {e}")))?;
    Ok(okm)
}

pub struct SealedStore {
    inner: Arc<dyn SecretStore>,
    aead: Aes256Gcm,
    rmw: Mutex<()>,
}

impl SealedStore {
    pub fn new(inner: Arc<dyn SecretStore>, key: &[u8; 32]) -> Self {
        Self {
            inner,
            aead: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            rmw: Mutex::new(()),
        }
    }

    pub fn from_seed(inner: Arc<dyn SecretStore>, seed: &Seed) -> StorageResult<Self> {
        let key = derive_storage_key(seed)?;
        Ok(Self::new(inner, &key))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        self.read(key).await
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let _guard = self.rmw.lock().await;
        self.write(key, value).await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        let _guard = self.rmw.lock().await;
        self.inner.delete(key).await
    }

    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys().await
    }

    /// Keys starting with `prefix`.
    pub async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = self.inner.keys().await?;
        keys.retain(|k| k.starts_with(prefix));
        Ok(keys)
    }

    /// Read-modify-write under the store guard. Leaving `None` in the slot
    /// deletes the record.
    pub async fn update<T, R, F>(&self, key: &str, f: F) -> StorageResult<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut Option<T>) -> R,
    {
        let _guard = self.rmw.lock().await;
        let mut slot: Option<T> = self.read(key).await?;
        let out = f(&mut slot);
        match &slot {
            Some(value) => self.write(key, value).await?,
            None => {
                self.inner.delete(key).await?;
            }
        }
        Ok(out)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let Some(sealed) = self.inner.get(key).await? else {
            return Ok(None);
        };
        if sealed.len() < NONCE_BYTES {
            return Err(StorageError::Corrupt(key.to_string()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_BYTES);
        let plaintext = Zeroizing::new(
            self.aead
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: ciphertext,
                        aad: key.as_bytes(),
                    },
                )
                .map_err(|_| StorageError::Corrupt(key.to_string()))?,
        );
        serde_json::from_slice(&plaintext)
            .map(Some)
            .map_err(|e| StorageError::Serialization(format!("{key}: {e}")))
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(value)
                .map_err(|e| StorageError::Serialization(format!("{key}: {e}")))?,
        );
        let mut nonce = [0u8; NONCE_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .aead
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext[..],
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StorageError::Serialization(format!("{key}: encryption failed")))?;

        let mut record = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        record.extend_from_slice(&nonce);
        record.extend_from_slice(&ciphertext);
        self.inner.put(key, &record).await
    }
}

impl std::fmt::Debug for SealedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pending {
        block: u64,
        note: String,
    }

    fn store() -> (Arc<MemoryStore>, SealedStore) {
        let raw = Arc::new(MemoryStore::new());
        let sealed = SealedStore::new(raw.clone(), &[7u8; 32]);
        (raw, sealed)
    }

    #[tokio::test]
    async fn test_json_roundtrip_is_encrypted_at_rest() {
        let (raw, sealed) = store();
        let value = Pending {
            block: 12,
            note: "visible?".into(),
        };
        sealed.put_json("account.0.pending", &value).await.unwrap();

        let bytes = raw.get("account.0.pending").await.unwrap().unwrap();
        assert!(!bytes.windows(8).any(|w| w == b"visible?"));
        assert_eq!(
            sealed.get_json::<Pending>("account.0.pending").await.unwrap(),
            Some(value)
        );
    }

    #[tokio::test]
    async fn test_record_bound_to_key_name() {
        let (raw, sealed) = store();
        sealed.put_json("a", &1u64).await.unwrap();
        let bytes = raw.get("a").await.unwrap().unwrap();
        raw.put("b", &bytes).await.unwrap();
        assert!(matches!(
            sealed.get_json::<u64>("b").await,
            Err(StorageError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_key_is_corrupt() {
        let (raw, sealed) = store();
        sealed.put_json("a", &1u64).await.unwrap();
        let other = SealedStore::new(raw, &[8u8; 32]);
        assert!(matches!(
            other.get_json::<u64>("a").await,
            Err(StorageError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_update() {
        let (_, sealed) = store();
        let n = sealed
            .update("counter", |slot: &mut Option<u64>| {
                *slot = Some(slot.unwrap_or(0) + 1);
                slot.unwrap_or(0)
            })
            .await
            .unwrap();
        assert_eq!(n, 1);

        sealed
            .update("counter", |slot: &mut Option<u64>| *slot = None)
            .await
            .unwrap();
        assert_eq!(sealed.get_json::<u64>("counter").await.unwrap(), None);
        assert!(sealed.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keys_with_prefix() {
        let (_, sealed) = store();
        sealed.put_json("order.a", &1u8).await.unwrap();
        sealed.put_json("order.b", &2u8).await.unwrap();
        sealed.put_json("account.0.pending", &3u8).await.unwrap();
        assert_eq!(
            sealed.keys_with_prefix("order.").await.unwrap(),
            vec!["order.a", "order.b"]
        );
    }

    #[test]
    fn test_storage_key_depends_on_seed() {
        let a = derive_storage_key(&Seed::from_bytes(&[1u8; 64]).unwrap()).unwrap();
        let b = derive_storage_key(&Seed::from_bytes(&[2u8; 64]).unwrap()).unwrap();
        assert_ne!(*a, *b);
    }
}
