//! Trading account lifecycle: commit, wait, reveal.

use k256::SecretKey;
use obscura_address::Address;
use obscura_field::FieldElement;
use obscura_keychain::{Account, address_of};
use obscura_privacy::{Commitment, Nullifier, commit_hash, random_nonce};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::ledger::TxHash;
use crate::orchestrator::now_secs;
use crate::prover::{RevealInputs, WithdrawInputs, run_blocking};
use crate::storage::SealedStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    NoAccount,
    CommitPending,
    RevealReady,
    AccountActive,
}

/// A submitted commit awaiting its reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommit {
    pub account_index: u32,
    pub committer: Address,
    pub commitment: Commitment,
    pub nonce: FieldElement,
    #[serde(with = "hex")]
    pub commit_hash: [u8; 32],
    pub block_number: u64,
    pub created_at: u64,
    pub tx_hash: TxHash,
}

/// A revealed trading account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAccount {
    pub account_index: u32,
    pub owner: Address,
    pub commitment: Commitment,
    pub nonce: FieldElement,
    pub revealed_at: u64,
    pub tx_hash: TxHash,
    /// Withdrawals landed so far; seeds the next withdrawal nullifier.
    #[serde(default)]
    pub withdrawals: u64,
}

pub(crate) fn pending_key(index: u32) -> String {
    format!("account.{index}.pending")
}

pub(crate) fn active_key(index: u32) -> String {
    format!("account.{index}.active")
}

pub(crate) async fn load_active(
    sealed: &SealedStore,
    index: u32,
) -> Result<Option<ActiveAccount>> {
    Ok(sealed.get_json(&active_key(index)).await?)
}

/// Drives one HD account through commit-reveal.
///
/// Calls on the same orchestrator are serialized; use one instance per
/// account index.
pub struct AccountOrchestrator {
    ctx: ClientContext,
    index: u32,
    lock: Mutex<()>,
}

impl AccountOrchestrator {
    pub fn new(ctx: ClientContext, index: u32) -> Self {
        Self {
            ctx,
            index,
            lock: Mutex::new(()),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub async fn pending(&self) -> Result<Option<PendingCommit>> {
        let sealed = self.ctx.keys.sealed_store().await?;
        Ok(sealed.get_json(&pending_key(self.index)).await?)
    }

    pub async fn active(&self) -> Result<Option<ActiveAccount>> {
        let sealed = self.ctx.keys.sealed_store().await?;
        load_active(&sealed, self.index).await
    }

    pub async fn state(&self) -> Result<AccountState> {
        if self.active().await?.is_some() {
            return Ok(AccountState::AccountActive);
        }
        let Some(pending) = self.pending().await? else {
            return Ok(AccountState::NoAccount);
        };
        if self.blocks_remaining(&pending).await? == 0 {
            Ok(AccountState::RevealReady)
        } else {
            Ok(AccountState::CommitPending)
        }
    }

    /// Submit a commit hash for this account. An existing pending commit is
    /// returned as is.
    pub async fn commit(&self) -> Result<PendingCommit> {
        let _guard = self.lock.lock().await;
        let sealed = self.ctx.keys.sealed_store().await?;

        if load_active(&sealed, self.index).await?.is_some() {
            return Err(ClientError::State(format!(
                "account {} is already active",
                self.index
            )));
        }
        if let Some(pending) = sealed.get_json(&pending_key(self.index)).await? {
            log::debug!("account {}: reusing pending commit", self.index);
            return Ok(pending);
        }

        let account = self.ctx.keys.account(self.index).await?;
        let committer = account.address();
        let signer = account.private_key();
        let nonce = random_nonce(&mut rand::rngs::OsRng);
        let commitment = self
            .ctx
            .commitments
            .account_commitment(&account.trading_secret(), &nonce);
        let hash = commit_hash(&commitment, &nonce, &committer);

        // the same hash may be committed twice without effect
        let receipt = self
            .ctx
            .retry
            .run("commitTradingAccount", || async {
                self.ctx
                    .ledger
                    .commit_trading_account(signer, &hash)
                    .await
                    .map_err(ClientError::from)
            })
            .await?;

        // the reveal delay counts from the block the commit was mined in
        let pending = PendingCommit {
            account_index: self.index,
            committer,
            commitment,
            nonce,
            commit_hash: hash,
            block_number: receipt.block_number,
            created_at: now_secs(),
            tx_hash: receipt.tx_hash,
        };
        sealed.put_json(&pending_key(self.index), &pending).await?;
        log::info!(
            "account {}: committed at block {} ({})",
            self.index,
            receipt.block_number,
            receipt.tx_hash
        );
        Ok(pending)
    }

    /// Reveal, signed by the account's own key.
    pub async fn reveal(&self) -> Result<ActiveAccount> {
        let account = self.ctx.keys.account(self.index).await?;
        self.reveal_as(account.private_key()).await
    }

    /// Reveal the pending commit, signed by `signer`.
    pub async fn reveal_as(&self, signer: &SecretKey) -> Result<ActiveAccount> {
        let sender: Address = address_of(&signer.public_key());
        let _guard = self.lock.lock().await;
        let sealed = self.ctx.keys.sealed_store().await?;

        if let Some(active) = load_active(&sealed, self.index).await? {
            return Ok(active);
        }
        let pending: PendingCommit = sealed
            .get_json(&pending_key(self.index))
            .await?
            .ok_or_else(|| {
                ClientError::State(format!("account {} has no pending commit", self.index))
            })?;

        if sender != pending.committer {
            return Err(ClientError::Validation(format!(
                "reveal must come from committer {}, not {}",
                pending.committer, sender
            )));
        }
        let remaining = self.blocks_remaining(&pending).await?;
        if remaining > 0 {
            return Err(ClientError::Timing { remaining });
        }

        let inputs = RevealInputs {
            commitment: pending.commitment,
            nonce: pending.nonce.clone(),
            committer: pending.committer,
        };
        let prover = self.ctx.prover.clone();
        let proof = run_blocking(move || prover.prove_reveal(&inputs)).await?;

        let tx_hash = self
            .ctx
            .retry
            .run("revealTradingAccount", || async {
                self.ctx
                    .ledger
                    .reveal_trading_account(signer, &pending.commitment, &pending.nonce, &proof)
                    .await
                    .map_err(ClientError::from)
            })
            .await?
            .tx_hash;

        let active = ActiveAccount {
            account_index: self.index,
            owner: pending.committer,
            commitment: pending.commitment,
            nonce: pending.nonce.clone(),
            revealed_at: now_secs(),
            tx_hash,
            withdrawals: 0,
        };
        sealed.put_json(&active_key(self.index), &active).await?;
        sealed.delete(&pending_key(self.index)).await?;
        log::info!("account {}: active ({})", self.index, tx_hash);
        Ok(active)
    }

    /// Poll the chain until the reveal is allowed, then reveal. Returns
    /// `None` if `cancel` fires first; the pending commit is left untouched.
    pub async fn wait_and_reveal(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ActiveAccount>> {
        let poll = self.ctx.config.protocol.block_poll_interval();
        loop {
            match self.state().await? {
                AccountState::AccountActive => return self.active().await,
                AccountState::RevealReady => return self.reveal().await.map(Some),
                AccountState::NoAccount => {
                    return Err(ClientError::State(format!(
                        "account {} has no pending commit",
                        self.index
                    )));
                }
                AccountState::CommitPending => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            log::info!("account {}: wait for reveal cancelled", self.index);
                            return Ok(None);
                        }
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }
    }

    /// Abandon an unrevealed commit. Returns whether one existed.
    pub async fn cancel(&self) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let sealed = self.ctx.keys.sealed_store().await?;
        let removed = sealed.delete(&pending_key(self.index)).await?;
        if removed {
            log::info!("account {}: pending commit abandoned", self.index);
        }
        Ok(removed)
    }

    /// Not retried: a lost response could otherwise deposit twice.
    pub async fn deposit(&self, amount: u128) -> Result<TxHash> {
        if amount == 0 {
            return Err(ClientError::Validation("deposit amount must be positive".into()));
        }
        let account = self.ctx.keys.account(self.index).await?;
        let receipt = self.ctx.ledger.deposit(account.private_key(), amount).await?;
        log::info!(
            "account {}: deposited {} ({})",
            self.index,
            amount,
            receipt.tx_hash
        );
        Ok(receipt.tx_hash)
    }

    /// Withdraw from the active trading account. Each withdrawal spends a
    /// fresh account nullifier, which the ledger records.
    pub async fn withdraw(&self, amount: u128) -> Result<TxHash> {
        if amount == 0 {
            return Err(ClientError::Validation("withdraw amount must be positive".into()));
        }
        let _guard = self.lock.lock().await;
        let sealed = self.ctx.keys.sealed_store().await?;
        let mut active = load_active(&sealed, self.index).await?.ok_or_else(|| {
            ClientError::State(format!("account {} is not active", self.index))
        })?;
        let account = self.ctx.keys.account(self.index).await?;
        let secret = account.trading_secret();

        // skip nullifiers a withdrawal that landed without being recorded here
        // already spent
        let nullifier = loop {
            let nonce = FieldElement::from_u64(active.withdrawals + 1);
            let n = self
                .ctx
                .nullifiers
                .account_nullifier(&secret, &active.commitment, &nonce);
            let used = self
                .ctx
                .retry
                .run("usedNullifiers", || async {
                    self.ctx.tracker.is_used(self.ctx.ledger.as_ref(), &n).await
                })
                .await?;
            if !used {
                break n;
            }
            log::warn!(
                "account {}: withdrawal nullifier {} already spent, advancing",
                self.index,
                n
            );
            active.withdrawals += 1;
        };

        let claim = self.ctx.tracker.reserve(&nullifier)?;
        let tx = self.send_withdrawal(&account, &active, nullifier, amount).await;
        drop(claim);
        let tx = tx?;

        active.withdrawals += 1;
        sealed.put_json(&active_key(self.index), &active).await?;
        log::info!("account {}: withdrew {} ({})", self.index, amount, tx);
        Ok(tx)
    }

    async fn send_withdrawal(
        &self,
        account: &Account,
        active: &ActiveAccount,
        nullifier: Nullifier,
        amount: u128,
    ) -> Result<TxHash> {
        let recipient = account.address();
        let inputs = WithdrawInputs {
            account_commitment: active.commitment,
            nullifier,
            amount,
            recipient,
        };
        let prover = self.ctx.prover.clone();
        let proof = run_blocking(move || prover.prove_withdraw(&inputs)).await?;
        let receipt = self
            .ctx
            .ledger
            .withdraw(account.private_key(), amount, &nullifier, &proof)
            .await?;
        Ok(receipt.tx_hash)
    }

    async fn block_number(&self) -> Result<u64> {
        self.ctx
            .retry
            .run("blockNumber", || async {
                self.ctx.ledger.block_number().await.map_err(ClientError::from)
            })
            .await
    }

    async fn blocks_remaining(&self, pending: &PendingCommit) -> Result<u64> {
        let current = self.block_number().await?;
        let elapsed = current.saturating_sub(pending.block_number);
        Ok(self.ctx.reveal_delay().saturating_sub(elapsed))
    }
}
