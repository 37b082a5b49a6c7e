use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use obscura_privacy::{Nullifier, ensure_distinct};

use crate::error::{ClientError, Result};
use crate::ledger::Ledger;

/// Client-side view of nullifier usage.
///
/// The ledger's used set is authoritative. The tracker only remembers which
/// nullifiers this process currently has in flight, so a retried operation
/// never races a second submission of the same nullifier.
#[derive(Default)]
pub struct NullifierTracker {
    in_flight: DashMap<Nullifier, Instant>,
}

impl NullifierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_used(&self, ledger: &dyn Ledger, nullifier: &Nullifier) -> Result<bool> {
        Ok(ledger.used_nullifiers(nullifier).await?)
    }

    /// Batch query. Duplicates are rejected before any ledger call.
    pub async fn are_used(
        &self,
        ledger: &dyn Ledger,
        nullifiers: &[Nullifier],
    ) -> Result<Vec<(Nullifier, bool)>> {
        ensure_distinct(nullifiers)?;
        let mut out = Vec::with_capacity(nullifiers.len());
        for n in nullifiers {
            out.push((*n, ledger.used_nullifiers(n).await?));
        }
        Ok(out)
    }

    /// Claim `nullifier` for one in-flight operation. The claim lasts until
    /// the returned guard is dropped, including when the owning future is
    /// cancelled mid-await.
    pub fn reserve(&self, nullifier: &Nullifier) -> Result<Reservation<'_>> {
        match self.in_flight.entry(*nullifier) {
            Entry::Occupied(_) => Err(ClientError::Replay(format!(
                "{} is already in flight",
                nullifier
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Ok(Reservation {
                    tracker: self,
                    nullifier: *nullifier,
                })
            }
        }
    }

    pub fn is_in_flight(&self, nullifier: &Nullifier) -> bool {
        self.in_flight.contains_key(nullifier)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// An in-flight claim on one nullifier.
#[must_use = "the nullifier is released as soon as the reservation is dropped"]
pub struct Reservation<'a> {
    tracker: &'a NullifierTracker,
    nullifier: Nullifier,
}

impl Reservation<'_> {
    pub fn nullifier(&self) -> &Nullifier {
        &self.nullifier
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.tracker.in_flight.remove(&self.nullifier);
    }
}
