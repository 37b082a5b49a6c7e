//! Private order submission pipeline.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use k256::SecretKey;
use obscura_address::Address;
use obscura_field::FieldElement;
use obscura_keychain::Account;
use obscura_privacy::{
    Commitment, EncryptedOrder, KeeperPublicKey, Nullifier, OrderEnvelope, OrderPayload,
    encrypt_for_keeper, random_nonce,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::keepers::select_keeper;
use crate::ledger::{PrivateOrderSubmission, TxHash};
use crate::orchestrator::account::{ActiveAccount, load_active};
use crate::orchestrator::now_secs;
use crate::prover::{OrderInputs, Proof, run_blocking};
use crate::storage::SealedStore;

/// Stable identity of a logical order: the same account, client sequence
/// number and order always map to the same id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(#[serde(with = "hex")] pub [u8; 32]);

impl OrderId {
    pub fn derive(account_index: u32, client_seq: u64, order: &OrderPayload) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"obscura-order");
        hasher.update(&account_index.to_be_bytes());
        hasher.update(&client_seq.to_be_bytes());
        hasher.update(&order.to_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderId({})", self.to_hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Built,
    Committed,
    KeeperSelected,
    Encrypted,
    Submitted,
    Executed,
    Expired,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Executed | OrderState::Expired)
    }
}

/// Persisted progress of one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub account_index: u32,
    pub state: OrderState,
    pub order: OrderPayload,
    pub nonce: FieldElement,
    pub order_commitment: Option<Commitment>,
    pub nullifier: Option<Nullifier>,
    pub keeper: Option<Address>,
    pub keeper_public_key: Option<KeeperPublicKey>,
    pub encrypted_order: Option<EncryptedOrder>,
    pub tx_hash: Option<TxHash>,
    pub submitted_at: Option<u64>,
    pub updated_at: u64,
}

impl OrderRecord {
    fn new(order_id: OrderId, account_index: u32, order: OrderPayload) -> Self {
        Self {
            order_id,
            account_index,
            state: OrderState::Built,
            order,
            nonce: random_nonce(&mut rand::rngs::OsRng),
            order_commitment: None,
            nullifier: None,
            keeper: None,
            keeper_public_key: None,
            encrypted_order: None,
            tx_hash: None,
            submitted_at: None,
            updated_at: now_secs(),
        }
    }
}

fn order_key(id: &OrderId) -> String {
    format!("order.{}", id.to_hex())
}

fn missing(field: &str, id: &OrderId) -> ClientError {
    ClientError::State(format!("order {id} record has no {field}"))
}

/// Builds, encrypts and submits orders for one trading account.
pub struct OrderOrchestrator {
    ctx: ClientContext,
    account_index: u32,
    locks: DashMap<OrderId, Arc<Mutex<()>>>,
}

impl OrderOrchestrator {
    pub fn new(ctx: ClientContext, account_index: u32) -> Self {
        Self {
            ctx,
            account_index,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, id: OrderId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }

    /// Drop the lock of a finished order unless another task still holds or
    /// waits on it.
    fn forget_lock(&self, id: &OrderId) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Orders that currently have a lock entry.
    pub fn locked_orders(&self) -> usize {
        self.locks.len()
    }

    pub async fn get(&self, id: &OrderId) -> Result<Option<OrderRecord>> {
        let sealed = self.ctx.keys.sealed_store().await?;
        Ok(sealed.get_json(&order_key(id)).await?)
    }

    /// Every order record for this account, any state.
    pub async fn list(&self) -> Result<Vec<OrderRecord>> {
        let sealed = self.ctx.keys.sealed_store().await?;
        let mut out = Vec::new();
        for key in sealed.keys_with_prefix("order.").await? {
            if let Some(record) = sealed.get_json::<OrderRecord>(&key).await? {
                if record.account_index == self.account_index {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }

    /// Run `order` through the pipeline up to `Submitted`.
    ///
    /// `client_seq` distinguishes otherwise identical orders. Calling again
    /// with the same arguments resumes the persisted record instead of
    /// minting a new nonce or nullifier.
    pub async fn submit(&self, order: OrderPayload, client_seq: u64) -> Result<OrderRecord> {
        order.validate()?;
        let sealed = self.ctx.keys.sealed_store().await?;
        let active = load_active(&sealed, self.account_index)
            .await?
            .ok_or_else(|| {
                ClientError::State(format!(
                    "account {} has no active trading account",
                    self.account_index
                ))
            })?;
        let account = self.ctx.keys.account(self.account_index).await?;

        let id = OrderId::derive(self.account_index, client_seq, &order);
        let record = {
            let lock = self.lock_for(id);
            let _guard = lock.lock().await;

            let mut record = match sealed.get_json::<OrderRecord>(&order_key(&id)).await? {
                Some(record) => {
                    log::debug!("order {}: resuming from {:?}", id, record.state);
                    record
                }
                None => {
                    let mut record = OrderRecord::new(id, self.account_index, order);
                    self.save(&sealed, &mut record).await?;
                    record
                }
            };

            while record.state < OrderState::Submitted {
                self.step(&sealed, &account, &active, &mut record).await?;
            }
            record
        };
        if record.state.is_terminal() {
            self.forget_lock(&id);
        }
        Ok(record)
    }

    async fn step(
        &self,
        sealed: &SealedStore,
        account: &Account,
        active: &ActiveAccount,
        record: &mut OrderRecord,
    ) -> Result<()> {
        let id = record.order_id;
        match record.state {
            OrderState::Built => {
                let commitment = self
                    .ctx
                    .commitments
                    .order_commitment(&record.order, &record.nonce);
                let nullifier = self.ctx.nullifiers.order_nullifier(
                    &account.trading_secret(),
                    &commitment,
                    &record.nonce,
                );
                record.order_commitment = Some(commitment);
                record.nullifier = Some(nullifier);
                record.state = OrderState::Committed;
                log::debug!("order {}: committed, nullifier {}", id, nullifier);
            }
            OrderState::Committed => {
                let nullifier = record.nullifier.ok_or_else(|| missing("nullifier", &id))?;
                if self.is_spent(&nullifier).await? {
                    return Err(ClientError::Replay(nullifier.to_hex()));
                }
                let keeper = select_keeper(
                    self.ctx.keepers.as_ref(),
                    self.ctx.config.keepers.sample_size,
                    self.ctx.config.keepers.page_size,
                )
                .await?;
                record.keeper = Some(keeper.address);
                record.keeper_public_key = Some(keeper.public_key);
                record.state = OrderState::KeeperSelected;
            }
            OrderState::KeeperSelected => {
                let keeper_pk = record
                    .keeper_public_key
                    .ok_or_else(|| missing("keeper key", &id))?;
                let envelope = OrderEnvelope::new(
                    &self.ctx.commitments,
                    record.order,
                    record.nonce.clone(),
                );
                let encrypted = encrypt_for_keeper(&envelope, &keeper_pk, account.private_key())?;
                record.encrypted_order = Some(encrypted);
                record.state = OrderState::Encrypted;
            }
            OrderState::Encrypted => {
                let tx_hash = self.send(account.private_key(), active, record).await?;
                record.tx_hash = tx_hash;
                record.submitted_at = Some(now_secs());
                record.state = OrderState::Submitted;
                match tx_hash {
                    Some(tx) => log::info!("order {}: submitted ({})", id, tx),
                    None => log::info!("order {}: already on the ledger", id),
                }
            }
            OrderState::Submitted | OrderState::Executed | OrderState::Expired => return Ok(()),
        }
        self.save(sealed, record).await
    }

    /// Submit the encrypted order under the nullifier's in-flight claim.
    /// `None` means an earlier attempt already landed and the transaction
    /// hash was lost.
    async fn send(
        &self,
        signer: &SecretKey,
        active: &ActiveAccount,
        record: &OrderRecord,
    ) -> Result<Option<TxHash>> {
        let id = record.order_id;
        let nullifier = record.nullifier.ok_or_else(|| missing("nullifier", &id))?;
        let order_commitment = record
            .order_commitment
            .ok_or_else(|| missing("commitment", &id))?;
        let encrypted_order = record
            .encrypted_order
            .clone()
            .ok_or_else(|| missing("ciphertext", &id))?;

        let _claim = self.ctx.tracker.reserve(&nullifier)?;
        let submission = PrivateOrderSubmission {
            proof: Proof(Vec::new()),
            nullifier,
            account_commitment: active.commitment,
            order_commitment,
            encrypted_order,
        };
        self.send_reserved(signer, submission).await
    }

    async fn send_reserved(
        &self,
        signer: &SecretKey,
        mut submission: PrivateOrderSubmission,
    ) -> Result<Option<TxHash>> {
        let nullifier = submission.nullifier;
        if self.is_spent(&nullifier).await? {
            return Ok(None);
        }
        let inputs = OrderInputs {
            account_commitment: submission.account_commitment,
            order_commitment: submission.order_commitment,
            nullifier,
        };
        let prover = self.ctx.prover.clone();
        submission.proof = run_blocking(move || prover.prove_order(&inputs)).await?;

        let sent = self
            .ctx
            .retry
            .run("submitOrderPrivate", || async {
                self.ctx
                    .ledger
                    .submit_order_private(signer, &submission)
                    .await
                    .map_err(ClientError::from)
            })
            .await;
        match sent {
            Ok(receipt) => Ok(Some(receipt.tx_hash)),
            // a retried submission whose first attempt landed
            Err(ClientError::Replay(reason)) => {
                if self.is_spent(&nullifier).await? {
                    Ok(None)
                } else {
                    Err(ClientError::Replay(reason))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Move a submitted order to `Executed` once the ledger no longer holds
    /// it, or to `Expired` once it outlives the configured TTL.
    pub async fn refresh(&self, id: &OrderId) -> Result<OrderRecord> {
        let record = {
            let lock = self.lock_for(*id);
            let _guard = lock.lock().await;
            self.refresh_locked(id).await?
        };
        if record.state.is_terminal() {
            self.forget_lock(id);
        }
        Ok(record)
    }

    async fn refresh_locked(&self, id: &OrderId) -> Result<OrderRecord> {
        let sealed = self.ctx.keys.sealed_store().await?;
        let mut record: OrderRecord = sealed
            .get_json(&order_key(id))
            .await?
            .ok_or_else(|| ClientError::State(format!("unknown order {id}")))?;
        if record.state != OrderState::Submitted {
            return Ok(record);
        }

        let nullifier = record.nullifier.ok_or_else(|| missing("nullifier", id))?;
        let valid = self
            .ctx
            .retry
            .run("isOrderValid", || async {
                self.ctx
                    .ledger
                    .is_order_valid(&nullifier)
                    .await
                    .map_err(ClientError::from)
            })
            .await?;

        let ttl = self.ctx.config.protocol.order_ttl_secs;
        let age = now_secs().saturating_sub(record.submitted_at.unwrap_or(record.updated_at));
        if !valid {
            record.state = OrderState::Executed;
        } else if age >= ttl {
            record.state = OrderState::Expired;
        } else {
            return Ok(record);
        }
        log::info!("order {}: {:?}", id, record.state);
        self.save(&sealed, &mut record).await?;
        Ok(record)
    }

    async fn is_spent(&self, nullifier: &Nullifier) -> Result<bool> {
        self.ctx
            .retry
            .run("usedNullifiers", || async {
                self.ctx
                    .tracker
                    .is_used(self.ctx.ledger.as_ref(), nullifier)
                    .await
            })
            .await
    }

    async fn save(&self, sealed: &SealedStore, record: &mut OrderRecord) -> Result<()> {
        record.updated_at = now_secs();
        sealed.put_json(&order_key(&record.order_id), record).await?;
        Ok(())
    }
}
