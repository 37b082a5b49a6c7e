//! Obscura client engine
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          ClientContext                               │
//! │                                                                      │
//! │  KeyManager ──▶ SealedStore ──▶ SecretStore (FileStore | MemoryStore) │
//! │      │                                                               │
//! │      ▼                                                               │
//! │  AccountOrchestrator ──┐                                             │
//! │  OrderOrchestrator ────┼──▶ Prover (spawn_blocking)                  │
//! │                        ├──▶ KeeperDirectory ──┐                      │
//! │                        └──▶ Ledger ◀──────────┘                      │
//! │                             (RpcLedger | InMemoryLedger)             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod error;
pub mod keepers;
pub mod ledger;
pub mod nullifiers;
pub mod orchestrator;
pub mod prover;
pub mod retry;
pub mod storage;
pub mod wallet;

pub use context::ClientContext;
pub use error::{ClientError, LedgerError, Result, StorageError};
pub use keepers::{KeeperCandidate, KeeperDirectory, LedgerKeeperDirectory, select_keeper};
pub use ledger::{
    InMemoryLedger, KeeperInfo, Ledger, PrivateOrderSubmission, Receipt, RpcLedger, TxHash,
};
pub use nullifiers::{NullifierTracker, Reservation};
pub use orchestrator::{
    AccountOrchestrator, AccountState, ActiveAccount, OrderId, OrderOrchestrator, OrderRecord,
    OrderState, PendingCommit,
};
pub use prover::{MockProver, Proof, Prover};
pub use retry::RetryPolicy;
pub use storage::{FileStore, MemoryStore, SealedStore, SecretStore};
pub use wallet::{KeyManager, MigrationReport};
