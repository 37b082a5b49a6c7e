//! Key manager
//!
//! Owns the password-sealed wallet records in the raw store and, once
//! unlocked, the HD wallet plus the [`SealedStore`] keyed from its seed.
//!
//! ```text
//! wallet.hd_seed          EncryptedSeedRecord (type "hd_seed")
//! wallet.legacy_key       EncryptedSeedRecord (type "legacy_key"), pre-HD installs
//! wallet.legacy_key.bak   legacy record kept after migration
//! ```

use std::sync::Arc;

use k256::SecretKey;
use obscura_address::Address;
use obscura_keychain::{
    Account, EncryptedSeedRecord, HdWallet, KdfParams, Mnemonic, address_of, open_legacy_key,
    open_seed, seal_legacy_key,
};
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::error::{ClientError, Result, StorageError};
use crate::prover::run_blocking;
use crate::storage::{SealedStore, SecretStore};

pub const HD_SEED_KEY: &str = "wallet.hd_seed";
pub const LEGACY_KEY: &str = "wallet.legacy_key";
pub const LEGACY_BACKUP_KEY: &str = "wallet.legacy_key.bak";

struct Unlocked {
    wallet: HdWallet,
    sealed: Arc<SealedStore>,
}

/// Outcome of [`KeyManager::migrate_to_hd`].
#[derive(Debug)]
pub struct MigrationReport {
    /// Shown to the user once; the only way to recover the new wallet.
    pub mnemonic: Mnemonic,
    pub legacy_address: Address,
    pub hd_address: Address,
}

pub struct KeyManager {
    store: Arc<dyn SecretStore>,
    kdf: KdfParams,
    unlocked: RwLock<Option<Unlocked>>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn SecretStore>, kdf: KdfParams) -> Self {
        Self {
            store,
            kdf,
            unlocked: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    pub async fn has_wallet(&self) -> Result<bool> {
        Ok(self.store.get(HD_SEED_KEY).await?.is_some())
    }

    pub async fn has_legacy(&self) -> Result<bool> {
        Ok(self.store.get(LEGACY_KEY).await?.is_some())
    }

    pub async fn is_unlocked(&self) -> bool {
        self.unlocked.read().await.is_some()
    }

    /// Generate a fresh wallet, seal it under `password` and unlock it.
    pub async fn create(&self, password: &str, entropy_bits: usize) -> Result<Mnemonic> {
        self.ensure_no_wallet().await?;
        let mut wallet = HdWallet::new();
        let mnemonic = wallet.generate(entropy_bits, "")?;
        self.persist_and_install(wallet, password).await?;
        log::info!("created {}-word wallet", mnemonic.word_count());
        Ok(mnemonic)
    }

    /// Recover a wallet from its mnemonic and seal it under `password`.
    pub async fn restore(&self, phrase: &str, password: &str) -> Result<()> {
        self.ensure_no_wallet().await?;
        let mut wallet = HdWallet::new();
        wallet.restore(phrase, "")?;
        self.persist_and_install(wallet, password).await?;
        log::info!("restored wallet from mnemonic");
        Ok(())
    }

    pub async fn unlock(&self, password: &str) -> Result<()> {
        let record = self
            .read_record(HD_SEED_KEY)
            .await?
            .ok_or_else(|| ClientError::State("no wallet in store".into()))?;
        let password = Zeroizing::new(password.to_string());
        let wallet =
            run_blocking(move || Ok(HdWallet::unlock(&record, &password)?)).await?;
        self.install(wallet).await?;
        log::info!("wallet unlocked");
        Ok(())
    }

    /// Forget all key material held in memory.
    pub async fn lock(&self) {
        if self.unlocked.write().await.take().is_some() {
            log::info!("wallet locked");
        }
    }

    /// Account `index`, derived on first use.
    pub async fn account(&self, index: u32) -> Result<Account> {
        let mut guard = self.unlocked.write().await;
        let unlocked = guard.as_mut().ok_or_else(locked)?;
        Ok(unlocked.wallet.derive_account(index)?.clone())
    }

    pub async fn sealed_store(&self) -> Result<Arc<SealedStore>> {
        let guard = self.unlocked.read().await;
        Ok(guard.as_ref().ok_or_else(locked)?.sealed.clone())
    }

    /// SHA-256 of the unlocked seed.
    pub async fn seed_digest(&self) -> Result<[u8; 32]> {
        let guard = self.unlocked.read().await;
        Ok(guard.as_ref().ok_or_else(locked)?.wallet.seed()?.digest())
    }

    /// Store a pre-HD single key under `password`.
    pub async fn import_legacy(&self, key: &SecretKey, password: &str) -> Result<Address> {
        if self.has_legacy().await? {
            return Err(ClientError::State("a legacy key is already stored".into()));
        }
        let address = address_of(&key.public_key());
        let key = key.clone();
        let password = Zeroizing::new(password.to_string());
        let kdf = self.kdf;
        let record = run_blocking(move || Ok(seal_legacy_key(&key, &password, kdf)?)).await?;
        self.write_record(LEGACY_KEY, &record).await?;
        log::info!("imported legacy key for {}", address);
        Ok(address)
    }

    /// Replace the legacy key with a fresh HD wallet.
    ///
    /// The HD record is written and read back before the legacy record is
    /// moved to its backup slot. Any failure rolls the store back to the
    /// legacy-only layout.
    pub async fn migrate_to_hd(&self, password: &str) -> Result<MigrationReport> {
        let legacy_record = self
            .read_record(LEGACY_KEY)
            .await?
            .ok_or_else(|| ClientError::State("no legacy key to migrate".into()))?;
        self.ensure_no_wallet().await?;

        let pw = Zeroizing::new(password.to_string());
        let legacy_key = {
            let record = legacy_record.clone();
            let pw = pw.clone();
            run_blocking(move || Ok(open_legacy_key(&record, &pw)?)).await?
        };
        let legacy_address = address_of(&legacy_key.public_key());

        let mut wallet = HdWallet::new();
        let mnemonic = wallet.generate_default()?;
        let hd_address = wallet.derive_account(0)?.address();
        let expected = wallet.seed()?.digest();
        let record = self.seal_wallet(&wallet, &pw).await?;

        log::info!("migrating legacy key {} to HD wallet", legacy_address);
        if let Err(e) = self
            .commit_migration(&record, &legacy_record, expected, &pw)
            .await
        {
            log::warn!("migration failed, rolling back: {}", e);
            self.rollback_migration(&legacy_record).await;
            return Err(e);
        }

        self.install(wallet).await?;
        log::info!("migration complete: {} -> {}", legacy_address, hd_address);
        Ok(MigrationReport {
            mnemonic,
            legacy_address,
            hd_address,
        })
    }

    async fn commit_migration(
        &self,
        hd_record: &EncryptedSeedRecord,
        legacy_record: &EncryptedSeedRecord,
        expected_digest: [u8; 32],
        password: &Zeroizing<String>,
    ) -> Result<()> {
        self.write_record(HD_SEED_KEY, hd_record).await?;

        let stored = self
            .read_record(HD_SEED_KEY)
            .await?
            .ok_or_else(|| ClientError::State("hd record vanished after write".into()))?;
        let pw = password.clone();
        let digest = run_blocking(move || Ok(open_seed(&stored, &pw)?.digest())).await?;
        if digest != expected_digest {
            return Err(ClientError::Storage(StorageError::Corrupt(
                HD_SEED_KEY.to_string(),
            )));
        }

        self.write_record(LEGACY_BACKUP_KEY, legacy_record).await?;
        self.store.delete(LEGACY_KEY).await?;
        Ok(())
    }

    /// Best effort: every step is attempted even if an earlier one fails.
    async fn rollback_migration(&self, legacy_record: &EncryptedSeedRecord) {
        if let Err(e) = self.store.delete(HD_SEED_KEY).await {
            log::warn!("rollback: could not remove {}: {}", HD_SEED_KEY, e);
        }
        if let Err(e) = self.write_record(LEGACY_KEY, legacy_record).await {
            log::warn!("rollback: could not restore {}: {}", LEGACY_KEY, e);
        }
        if let Err(e) = self.store.delete(LEGACY_BACKUP_KEY).await {
            log::warn!("rollback: could not remove {}: {}", LEGACY_BACKUP_KEY, e);
        }
    }

    async fn ensure_no_wallet(&self) -> Result<()> {
        if self.has_wallet().await? {
            return Err(ClientError::State("a wallet already exists".into()));
        }
        Ok(())
    }

    async fn seal_wallet(
        &self,
        wallet: &HdWallet,
        password: &Zeroizing<String>,
    ) -> Result<EncryptedSeedRecord> {
        let seed = wallet.seed()?.clone();
        let pw = password.clone();
        let kdf = self.kdf;
        run_blocking(move || Ok(obscura_keychain::seal_seed(&seed, &pw, kdf)?)).await
    }

    async fn persist_and_install(&self, wallet: HdWallet, password: &str) -> Result<()> {
        let record = self
            .seal_wallet(&wallet, &Zeroizing::new(password.to_string()))
            .await?;
        self.write_record(HD_SEED_KEY, &record).await?;
        self.install(wallet).await
    }

    async fn install(&self, wallet: HdWallet) -> Result<()> {
        let sealed = SealedStore::from_seed(self.store.clone(), wallet.seed()?)?;
        *self.unlocked.write().await = Some(Unlocked {
            wallet,
            sealed: Arc::new(sealed),
        });
        Ok(())
    }

    async fn read_record(&self, key: &str) -> Result<Option<EncryptedSeedRecord>> {
        let Some(bytes) = self.store.get(key).await? else {
            return Ok(None);
        };
        let json = std::str::from_utf8(&bytes)
            .map_err(|e| StorageError::Serialization(format!("{key}: {e}")))?;
        Ok(Some(EncryptedSeedRecord::from_json(json)?))
    }

    async fn write_record(&self, key: &str, record: &EncryptedSeedRecord) -> Result<()> {
        let json = record.to_json()?;
        self.store.put(key, json.as_bytes()).await?;
        Ok(())
    }
}

fn locked() -> ClientError {
    ClientError::State("wallet is locked".into())
}
