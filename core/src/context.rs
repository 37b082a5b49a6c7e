use std::sync::Arc;

use obscura_config::{CommitmentSchemeToml, ObscuraConfig};
use obscura_keychain::KdfParams;
use obscura_privacy::{CommitmentEngine, NullifierEngine, SchemeKind};

use crate::error::Result;
use crate::keepers::{KeeperDirectory, LedgerKeeperDirectory};
use crate::ledger::{InMemoryLedger, Ledger, RpcLedger};
use crate::nullifiers::NullifierTracker;
use crate::prover::{MockProver, Prover};
use crate::retry::RetryPolicy;
use crate::storage::{FileStore, SecretStore};
use crate::wallet::KeyManager;

/// Everything the orchestrators share. Cheap to clone.
#[derive(Clone)]
pub struct ClientContext {
    pub config: Arc<ObscuraConfig>,
    pub ledger: Arc<dyn Ledger>,
    pub keys: Arc<KeyManager>,
    pub prover: Arc<dyn Prover>,
    pub commitments: CommitmentEngine,
    pub nullifiers: NullifierEngine,
    pub tracker: Arc<NullifierTracker>,
    pub retry: RetryPolicy,
    pub keepers: Arc<dyn KeeperDirectory>,
}

impl ClientContext {
    pub fn new(
        config: ObscuraConfig,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn SecretStore>,
        prover: Arc<dyn Prover>,
    ) -> Self {
        let kind = scheme_kind(config.features.commitment_scheme);
        let retry = RetryPolicy::from(&config.retry);
        let keys = KeyManager::new(store, KdfParams::new(config.storage.kdf_iterations));
        let keepers = Arc::new(LedgerKeeperDirectory::new(ledger.clone(), retry));
        Self {
            config: Arc::new(config),
            ledger,
            keys: Arc::new(keys),
            prover,
            commitments: CommitmentEngine::with_kind(kind),
            nullifiers: NullifierEngine::with_kind(kind),
            tracker: Arc::new(NullifierTracker::new()),
            retry,
            keepers,
        }
    }

    /// File store at `storage.path`; in-memory ledger in dev mode, JSON-RPC
    /// otherwise.
    pub async fn from_config(config: ObscuraConfig) -> Result<Self> {
        let store = Arc::new(FileStore::open(&config.storage.path).await?);
        let ledger: Arc<dyn Ledger> = if config.features.dev_mode {
            log::warn!("dev mode: using in-memory ledger");
            Arc::new(InMemoryLedger::new(
                config.protocol.commit_reveal_delay_blocks,
            ))
        } else {
            Arc::new(RpcLedger::new(&config.ledger)?)
        };
        Ok(Self::new(config, ledger, store, Arc::new(MockProver::new())))
    }

    pub fn with_keeper_directory(mut self, keepers: Arc<dyn KeeperDirectory>) -> Self {
        self.keepers = keepers;
        self
    }

    pub fn reveal_delay(&self) -> u64 {
        self.config.protocol.commit_reveal_delay_blocks
    }
}

pub fn scheme_kind(toml: CommitmentSchemeToml) -> SchemeKind {
    match toml {
        CommitmentSchemeToml::Poseidon => SchemeKind::Poseidon,
        CommitmentSchemeToml::Keccak => SchemeKind::Keccak,
    }
}
