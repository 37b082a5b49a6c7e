//! Keeper discovery and selection.
//!
//! Candidates are read page by page from the active list, never the whole
//! registry. Selection picks the highest `reputation × success rate` among
//! active, unslashed keepers with a usable encryption key.

use std::sync::Arc;

use async_trait::async_trait;
use obscura_address::Address;
use obscura_privacy::KeeperPublicKey;

use crate::error::{ClientError, Result};
use crate::ledger::{KeeperInfo, Ledger};
use crate::retry::RetryPolicy;

/// Success rate assumed for keepers without history.
pub const DEFAULT_SUCCESS_RATE: f64 = 0.5;

/// Paginated, indexed view of the keeper registry.
#[async_trait]
pub trait KeeperDirectory: Send + Sync {
    /// Up to `limit` entries starting at active-list index `start`. A short
    /// page means the list is exhausted.
    async fn page(&self, start: u64, limit: usize) -> Result<Vec<(Address, KeeperInfo)>>;
}

/// Directory backed by the ledger's `activeKeeperList` and `keepers` views.
pub struct LedgerKeeperDirectory {
    ledger: Arc<dyn Ledger>,
    retry: RetryPolicy,
}

impl LedgerKeeperDirectory {
    pub fn new(ledger: Arc<dyn Ledger>, retry: RetryPolicy) -> Self {
        Self { ledger, retry }
    }
}

#[async_trait]
impl KeeperDirectory for LedgerKeeperDirectory {
    async fn page(&self, start: u64, limit: usize) -> Result<Vec<(Address, KeeperInfo)>> {
        let mut out = Vec::with_capacity(limit);
        for index in start..start + limit as u64 {
            let entry = self
                .retry
                .run("activeKeeperList", || async {
                    self.ledger
                        .active_keeper_list(index)
                        .await
                        .map_err(ClientError::from)
                })
                .await?;
            let Some(address) = entry else { break };
            let info = self
                .retry
                .run("keepers", || async {
                    self.ledger.keepers(&address).await.map_err(ClientError::from)
                })
                .await?;
            out.push((address, info));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeeperCandidate {
    pub address: Address,
    pub public_key: KeeperPublicKey,
    pub score: f64,
}

pub fn success_rate(info: &KeeperInfo) -> f64 {
    let total = info.successful_batches.saturating_add(info.failed_batches);
    if total == 0 {
        DEFAULT_SUCCESS_RATE
    } else {
        info.successful_batches as f64 / total as f64
    }
}

pub fn score(info: &KeeperInfo) -> f64 {
    info.reputation_score as f64 * success_rate(info)
}

/// Why a keeper was passed over, if it was.
fn ineligible(info: &KeeperInfo) -> Option<&'static str> {
    if !info.is_active {
        Some("inactive")
    } else if info.is_slashed {
        Some("slashed")
    } else {
        None
    }
}

/// Pick a keeper from at most `sample_size` candidates, fetched `page_size`
/// at a time. Ties go to the first candidate seen.
pub async fn select_keeper(
    directory: &dyn KeeperDirectory,
    sample_size: usize,
    page_size: usize,
) -> Result<KeeperCandidate> {
    let page_size = page_size.max(1);
    let mut best: Option<KeeperCandidate> = None;
    let mut seen = 0usize;

    while seen < sample_size {
        let want = page_size.min(sample_size - seen);
        let page = directory.page(seen as u64, want).await?;
        let exhausted = page.len() < want;
        seen += page.len();

        for (address, info) in page {
            if let Some(reason) = ineligible(&info) {
                log::debug!("skipping keeper {}: {}", address, reason);
                continue;
            }
            let public_key = match KeeperPublicKey::from_sec1_bytes(&info.public_key) {
                Ok(pk) => pk,
                Err(e) => {
                    log::warn!("skipping keeper {}: {}", address, e);
                    continue;
                }
            };
            let candidate = KeeperCandidate {
                address,
                public_key,
                score: score(&info),
            };
            if best.as_ref().is_none_or(|b| candidate.score > b.score) {
                best = Some(candidate);
            }
        }

        if exhausted {
            break;
        }
    }

    let chosen = best.ok_or_else(|| {
        ClientError::Counterparty(format!("no eligible keeper among {seen} candidates"))
    })?;
    log::info!("selected keeper {} (score {:.3})", chosen.address, chosen.score);
    Ok(chosen)
}
