//! Trading Orchestrators
//!
//! ```text
//! account:  NoAccount ──commit──▶ CommitPending ──delay──▶ RevealReady ──reveal──▶ AccountActive
//!               ▲                      │
//!               └────────cancel────────┘
//!
//! order:    Built ─▶ Committed ─▶ KeeperSelected ─▶ Encrypted ─▶ Submitted ─┬─▶ Executed
//!                                                                            └─▶ Expired
//! ```
//!
//! Every transition is persisted in the sealed store before the next one
//! starts, so a retried call resumes with the same nonce, commitment,
//! nullifier and ciphertext.

pub mod account;
pub mod order;

use std::time::{SystemTime, UNIX_EPOCH};

pub use account::{AccountOrchestrator, AccountState, ActiveAccount, PendingCommit};
pub use order::{OrderId, OrderOrchestrator, OrderRecord, OrderState};

/// Seconds since the unix epoch.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
