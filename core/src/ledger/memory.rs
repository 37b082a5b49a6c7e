//! Deterministic contract double for tests and dev mode.
//!
//! Enforces the same rules the ledger contract does: commit-reveal delay,
//! committer identity, nullifier uniqueness and active keeper bookkeeping.
//! Blocks only advance through [`InMemoryLedger::advance_blocks`]; every write
//! is mined in the current block.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use k256::SecretKey;
use obscura_address::Address;
use obscura_field::FieldElement;
use obscura_keychain::address_of;
use obscura_privacy::{Commitment, Nullifier, commit_hash};
use tokio::sync::Mutex;

use crate::error::LedgerError;
use crate::ledger::{KeeperInfo, Ledger, LedgerResult, PrivateOrderSubmission, Receipt, TxHash};
use crate::prover::Proof;

#[derive(Debug, Clone, Copy)]
struct CommitEntry {
    committer: Address,
    block: u64,
}

#[derive(Debug, Default)]
struct State {
    block: u64,
    tx_count: u64,
    balances: HashMap<Address, u128>,
    commits: HashMap<[u8; 32], CommitEntry>,
    accounts: HashMap<Commitment, Address>,
    used_nullifiers: HashSet<Nullifier>,
    open_orders: HashSet<Nullifier>,
    submissions: Vec<PrivateOrderSubmission>,
    keepers: HashMap<Address, KeeperInfo>,
    active_keepers: Vec<Address>,
    fail_next: u32,
}

pub struct InMemoryLedger {
    reveal_delay: u64,
    state: Mutex<State>,
}

impl InMemoryLedger {
    pub fn new(reveal_delay: u64) -> Self {
        Self {
            reveal_delay,
            state: Mutex::new(State {
                block: 1,
                ..State::default()
            }),
        }
    }

    pub async fn advance_blocks(&self, n: u64) -> u64 {
        let mut state = self.state.lock().await;
        state.block += n;
        state.block
    }

    pub async fn register_keeper(&self, address: Address, info: KeeperInfo) {
        let mut state = self.state.lock().await;
        if info.is_active && !state.active_keepers.contains(&address) {
            state.active_keepers.push(address);
        }
        state.keepers.insert(address, info);
    }

    /// Keeper settled the order: it is no longer valid.
    pub async fn execute_order(&self, nullifier: &Nullifier) -> bool {
        self.state.lock().await.open_orders.remove(nullifier)
    }

    /// The next `n` calls fail with a transport error.
    pub async fn fail_next_calls(&self, n: u32) {
        self.state.lock().await.fail_next = n;
    }

    pub async fn balance_of(&self, address: &Address) -> u128 {
        self.state
            .lock()
            .await
            .balances
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    pub async fn is_account_active(&self, commitment: &Commitment) -> bool {
        self.state.lock().await.accounts.contains_key(commitment)
    }

    pub async fn submissions(&self) -> Vec<PrivateOrderSubmission> {
        self.state.lock().await.submissions.clone()
    }

    /// Mark a nullifier as spent out of band.
    pub async fn spend_nullifier(&self, nullifier: Nullifier) {
        self.state.lock().await.used_nullifiers.insert(nullifier);
    }
}

impl State {
    fn check_transport(&mut self) -> LedgerResult<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(LedgerError::Transport("injected failure".into()));
        }
        Ok(())
    }

    fn mine(&mut self, from: &Address) -> Receipt {
        self.tx_count += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"obscura-memory-tx");
        hasher.update(&self.tx_count.to_be_bytes());
        hasher.update(from.as_bytes());
        Receipt {
            tx_hash: TxHash(*hasher.finalize().as_bytes()),
            block_number: self.block,
        }
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn block_number(&self) -> LedgerResult<u64> {
        let mut state = self.state.lock().await;
        state.check_transport()?;
        Ok(state.block)
    }

    async fn deposit(&self, signer: &SecretKey, amount: u128) -> LedgerResult<Receipt> {
        let from = &address_of(&signer.public_key());
        let mut state = self.state.lock().await;
        state.check_transport()?;
        if amount == 0 {
            return Err(LedgerError::Reverted("zero deposit".into()));
        }
        let balance = state.balances.entry(*from).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Reverted("balance overflow".into()))?;
        Ok(state.mine(from))
    }

    async fn withdraw(
        &self,
        signer: &SecretKey,
        amount: u128,
        nullifier: &Nullifier,
        proof: &Proof,
    ) -> LedgerResult<Receipt> {
        let from = &address_of(&signer.public_key());
        let mut state = self.state.lock().await;
        state.check_transport()?;
        if proof.is_empty() {
            return Err(LedgerError::Reverted("invalid proof".into()));
        }
        if state.used_nullifiers.contains(nullifier) {
            return Err(LedgerError::NullifierUsed(nullifier.to_hex()));
        }
        let balance = state.balances.get(from).copied().unwrap_or(0);
        let remaining = balance
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::Reverted("insufficient balance".into()))?;
        state.balances.insert(*from, remaining);
        state.used_nullifiers.insert(*nullifier);
        Ok(state.mine(from))
    }

    async fn commit_trading_account(
        &self,
        signer: &SecretKey,
        commit_hash: &[u8; 32],
    ) -> LedgerResult<Receipt> {
        let from = &address_of(&signer.public_key());
        let mut state = self.state.lock().await;
        state.check_transport()?;
        let block = state.block;
        // re-committing the same hash keeps the original block
        state.commits.entry(*commit_hash).or_insert(CommitEntry {
            committer: *from,
            block,
        });
        Ok(state.mine(from))
    }

    async fn reveal_trading_account(
        &self,
        signer: &SecretKey,
        commitment: &Commitment,
        nonce: &FieldElement,
        proof: &Proof,
    ) -> LedgerResult<Receipt> {
        let from = &address_of(&signer.public_key());
        let mut state = self.state.lock().await;
        state.check_transport()?;
        if proof.is_empty() {
            return Err(LedgerError::Reverted("invalid proof".into()));
        }
        let hash = commit_hash(commitment, nonce, from);
        let entry = state
            .commits
            .get(&hash)
            .copied()
            .ok_or_else(|| LedgerError::Reverted("no matching commit".into()))?;
        if entry.committer != *from {
            return Err(LedgerError::Reverted("not the committer".into()));
        }
        if state.block < entry.block + self.reveal_delay {
            return Err(LedgerError::Reverted("reveal too early".into()));
        }
        state.commits.remove(&hash);
        state.accounts.insert(*commitment, *from);
        Ok(state.mine(from))
    }

    async fn submit_order_private(
        &self,
        signer: &SecretKey,
        submission: &PrivateOrderSubmission,
    ) -> LedgerResult<Receipt> {
        let from = &address_of(&signer.public_key());
        let mut state = self.state.lock().await;
        state.check_transport()?;
        if submission.proof.is_empty() {
            return Err(LedgerError::Reverted("invalid proof".into()));
        }
        if !state.accounts.contains_key(&submission.account_commitment) {
            return Err(LedgerError::Reverted("unknown trading account".into()));
        }
        if !state.used_nullifiers.insert(submission.nullifier) {
            return Err(LedgerError::NullifierUsed(submission.nullifier.to_hex()));
        }
        state.open_orders.insert(submission.nullifier);
        state.submissions.push(submission.clone());
        Ok(state.mine(from))
    }

    async fn used_nullifiers(&self, nullifier: &Nullifier) -> LedgerResult<bool> {
        let mut state = self.state.lock().await;
        state.check_transport()?;
        Ok(state.used_nullifiers.contains(nullifier))
    }

    async fn is_order_valid(&self, nullifier: &Nullifier) -> LedgerResult<bool> {
        let mut state = self.state.lock().await;
        state.check_transport()?;
        Ok(state.open_orders.contains(nullifier))
    }

    async fn keepers(&self, keeper: &Address) -> LedgerResult<KeeperInfo> {
        let mut state = self.state.lock().await;
        state.check_transport()?;
        state
            .keepers
            .get(keeper)
            .cloned()
            .ok_or_else(|| LedgerError::Reverted(format!("unknown keeper {keeper}")))
    }

    async fn active_keeper_list(&self, index: u64) -> LedgerResult<Option<Address>> {
        let mut state = self.state.lock().await;
        state.check_transport()?;
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| state.active_keepers.get(i).copied()))
    }
}
