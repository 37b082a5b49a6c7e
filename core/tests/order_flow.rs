//! Private order pipeline against the in-memory ledger.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use k256::SecretKey;
use obscura_address::Address;
use obscura_config::{CommitmentSchemeToml, ObscuraConfig};
use obscura_core::ledger::LedgerResult;
use obscura_core::{
    AccountOrchestrator, ClientContext, ClientError, InMemoryLedger, KeeperInfo, Ledger,
    MemoryStore, MockProver, OrderId, OrderOrchestrator, OrderState, PrivateOrderSubmission,
    Proof, Receipt,
};
use obscura_field::FieldElement;
use obscura_privacy::{
    Commitment, ENCRYPTED_ORDER_SIZE, KeeperSecret, Nullifier, OrderFlags, OrderPayload,
    decrypt_for_keeper,
};

const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// In-memory ledger whose order submissions can be made to hang.
struct StallingLedger {
    inner: Arc<InMemoryLedger>,
    stall_submits: AtomicBool,
}

#[async_trait]
impl Ledger for StallingLedger {
    async fn block_number(&self) -> LedgerResult<u64> {
        self.inner.block_number().await
    }

    async fn deposit(&self, signer: &SecretKey, amount: u128) -> LedgerResult<Receipt> {
        self.inner.deposit(signer, amount).await
    }

    async fn withdraw(
        &self,
        signer: &SecretKey,
        amount: u128,
        nullifier: &Nullifier,
        proof: &Proof,
    ) -> LedgerResult<Receipt> {
        self.inner.withdraw(signer, amount, nullifier, proof).await
    }

    async fn commit_trading_account(
        &self,
        signer: &SecretKey,
        commit_hash: &[u8; 32],
    ) -> LedgerResult<Receipt> {
        self.inner.commit_trading_account(signer, commit_hash).await
    }

    async fn reveal_trading_account(
        &self,
        signer: &SecretKey,
        commitment: &Commitment,
        nonce: &FieldElement,
        proof: &Proof,
    ) -> LedgerResult<Receipt> {
        self.inner
            .reveal_trading_account(signer, commitment, nonce, proof)
            .await
    }

    async fn submit_order_private(
        &self,
        signer: &SecretKey,
        submission: &PrivateOrderSubmission,
    ) -> LedgerResult<Receipt> {
        if self.stall_submits.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.submit_order_private(signer, submission).await
    }

    async fn used_nullifiers(&self, nullifier: &Nullifier) -> LedgerResult<bool> {
        self.inner.used_nullifiers(nullifier).await
    }

    async fn is_order_valid(&self, nullifier: &Nullifier) -> LedgerResult<bool> {
        self.inner.is_order_valid(nullifier).await
    }

    async fn keepers(&self, keeper: &Address) -> LedgerResult<KeeperInfo> {
        self.inner.keepers(keeper).await
    }

    async fn active_keeper_list(&self, index: u64) -> LedgerResult<Option<Address>> {
        self.inner.active_keeper_list(index).await
    }
}

struct Harness {
    ctx: ClientContext,
    ledger: Arc<InMemoryLedger>,
    gate: Arc<StallingLedger>,
}

impl Harness {
    async fn new(order_ttl_secs: u64) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut config = ObscuraConfig::default();
        config.features.commitment_scheme = CommitmentSchemeToml::Keccak;
        config.storage.kdf_iterations = 1_000;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 4;
        config.protocol.order_ttl_secs = order_ttl_secs;

        let ledger = Arc::new(InMemoryLedger::new(2));
        let gate = Arc::new(StallingLedger {
            inner: ledger.clone(),
            stall_submits: AtomicBool::new(false),
        });
        let ctx = ClientContext::new(
            config,
            gate.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(MockProver::new()),
        );
        ctx.keys.restore(PHRASE, "pw").await.unwrap();
        Self { ctx, ledger, gate }
    }

    async fn activate(&self, index: u32) {
        let account = AccountOrchestrator::new(self.ctx.clone(), index);
        account.commit().await.unwrap();
        self.ledger.advance_blocks(2).await;
        account.reveal().await.unwrap();
    }

    async fn add_keeper(&self, tag: u8, reputation: u64, ok: u64, failed: u64) -> KeeperSecret {
        let secret = KeeperSecret::generate(&mut rand::rngs::OsRng);
        let info = KeeperInfo {
            public_key: secret.public_key().to_compressed().to_vec(),
            reputation_score: reputation,
            successful_batches: ok,
            failed_batches: failed,
            is_active: true,
            is_slashed: false,
        };
        self.ledger.register_keeper(Address([tag; 20]), info).await;
        secret
    }

    fn orders(&self) -> OrderOrchestrator {
        OrderOrchestrator::new(self.ctx.clone(), 0)
    }
}

fn long_limit(size: u128) -> OrderPayload {
    OrderPayload {
        market: 3,
        size,
        price: 30_000,
        flags: OrderFlags::new(true, false, false),
        leverage: 10,
        take_profit: 33_000,
        stop_loss: 29_000,
    }
}

#[tokio::test]
async fn test_submit_reaches_best_keeper() {
    let h = Harness::new(3600).await;
    h.activate(0).await;
    h.add_keeper(1, 100, 1, 1).await;
    let best = h.add_keeper(2, 100, 9, 1).await;

    let record = h.orders().submit(long_limit(5), 1).await.unwrap();
    assert_eq!(record.state, OrderState::Submitted);
    assert_eq!(record.keeper, Some(Address([2; 20])));
    assert!(record.tx_hash.is_some());

    let submissions = h.ledger.submissions().await;
    assert_eq!(submissions.len(), 1);
    let sent = &submissions[0];
    assert_eq!(Some(sent.nullifier), record.nullifier);
    assert_eq!(sent.encrypted_order.as_bytes().len(), ENCRYPTED_ORDER_SIZE);

    let envelope = decrypt_for_keeper(&sent.encrypted_order, &best).unwrap();
    assert_eq!(envelope.order, long_limit(5));
    assert!(envelope.verify(&h.ctx.commitments));
    assert_eq!(Some(envelope.commitment), record.order_commitment);
}

#[tokio::test]
async fn test_resubmit_is_idempotent() {
    let h = Harness::new(3600).await;
    h.activate(0).await;
    h.add_keeper(1, 10, 1, 0).await;
    let orders = h.orders();

    let first = orders.submit(long_limit(5), 7).await.unwrap();
    let again = orders.submit(long_limit(5), 7).await.unwrap();
    assert_eq!(first.nullifier, again.nullifier);
    assert_eq!(first.tx_hash, again.tx_hash);
    assert_eq!(h.ledger.submissions().await.len(), 1);

    let other = orders.submit(long_limit(5), 8).await.unwrap();
    assert_ne!(other.nullifier, first.nullifier);
    assert_eq!(orders.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_no_keeper_then_resume() {
    let h = Harness::new(3600).await;
    h.activate(0).await;
    let orders = h.orders();

    let err = orders.submit(long_limit(5), 1).await.unwrap_err();
    assert!(matches!(err, ClientError::Counterparty(_)), "{err}");

    let id = OrderId::derive(0, 1, &long_limit(5));
    let stalled = orders.get(&id).await.unwrap().unwrap();
    assert_eq!(stalled.state, OrderState::Committed);

    h.add_keeper(1, 10, 0, 0).await;
    let record = orders.submit(long_limit(5), 1).await.unwrap();
    assert_eq!(record.state, OrderState::Submitted);
    assert_eq!(record.nullifier, stalled.nullifier);
    assert_eq!(record.nonce, stalled.nonce);
}

#[tokio::test]
async fn test_spent_nullifier_is_replay() {
    let h = Harness::new(3600).await;
    h.activate(0).await;
    let orders = h.orders();

    orders.submit(long_limit(5), 1).await.unwrap_err();
    let id = OrderId::derive(0, 1, &long_limit(5));
    let nullifier = orders.get(&id).await.unwrap().unwrap().nullifier.unwrap();

    h.ledger.spend_nullifier(nullifier).await;
    h.add_keeper(1, 10, 0, 0).await;
    let err = orders.submit(long_limit(5), 1).await.unwrap_err();
    assert!(matches!(err, ClientError::Replay(_)), "{err}");
    assert!(h.ledger.submissions().await.is_empty());
}

#[tokio::test]
async fn test_refresh_executed() {
    let h = Harness::new(3600).await;
    h.activate(0).await;
    h.add_keeper(1, 10, 0, 0).await;
    let orders = h.orders();

    let record = orders.submit(long_limit(5), 1).await.unwrap();
    let refreshed = orders.refresh(&record.order_id).await.unwrap();
    assert_eq!(refreshed.state, OrderState::Submitted);

    assert!(h.ledger.execute_order(&record.nullifier.unwrap()).await);
    let refreshed = orders.refresh(&record.order_id).await.unwrap();
    assert_eq!(refreshed.state, OrderState::Executed);
    assert!(refreshed.state.is_terminal());
}

#[tokio::test]
async fn test_finished_orders_release_their_locks() {
    let h = Harness::new(3600).await;
    h.activate(0).await;
    h.add_keeper(1, 10, 0, 0).await;
    let orders = h.orders();

    let a = orders.submit(long_limit(5), 1).await.unwrap();
    let b = orders.submit(long_limit(6), 2).await.unwrap();
    assert_eq!(orders.locked_orders(), 2);

    // still open: the lock stays
    orders.refresh(&a.order_id).await.unwrap();
    assert_eq!(orders.locked_orders(), 2);

    h.ledger.execute_order(&a.nullifier.unwrap()).await;
    h.ledger.execute_order(&b.nullifier.unwrap()).await;
    orders.refresh(&a.order_id).await.unwrap();
    orders.refresh(&b.order_id).await.unwrap();
    assert_eq!(orders.locked_orders(), 0);

    // refreshing or resubmitting a finished order does not bring it back
    assert!(orders.refresh(&a.order_id).await.unwrap().state.is_terminal());
    assert!(orders.submit(long_limit(5), 1).await.unwrap().state.is_terminal());
    assert_eq!(orders.locked_orders(), 0);
}

#[tokio::test]
async fn test_cancelled_submit_frees_nullifier() {
    let h = Harness::new(3600).await;
    h.activate(0).await;
    h.add_keeper(1, 10, 0, 0).await;
    let orders = h.orders();

    h.gate.stall_submits.store(true, Ordering::SeqCst);
    let stalled =
        tokio::time::timeout(Duration::from_millis(50), orders.submit(long_limit(5), 1)).await;
    assert!(stalled.is_err());
    assert_eq!(h.ctx.tracker.in_flight_count(), 0);

    let id = OrderId::derive(0, 1, &long_limit(5));
    let pending = orders.get(&id).await.unwrap().unwrap();
    assert_eq!(pending.state, OrderState::Encrypted);

    h.gate.stall_submits.store(false, Ordering::SeqCst);
    let record = orders.submit(long_limit(5), 1).await.unwrap();
    assert_eq!(record.state, OrderState::Submitted);
    assert_eq!(record.nullifier, pending.nullifier);
    assert_eq!(h.ledger.submissions().await.len(), 1);
}

#[tokio::test]
async fn test_refresh_expired() {
    let h = Harness::new(0).await;
    h.activate(0).await;
    h.add_keeper(1, 10, 0, 0).await;
    let orders = h.orders();

    let record = orders.submit(long_limit(5), 1).await.unwrap();
    let refreshed = orders.refresh(&record.order_id).await.unwrap();
    assert_eq!(refreshed.state, OrderState::Expired);
}

#[tokio::test]
async fn test_requires_active_account() {
    let h = Harness::new(3600).await;
    h.add_keeper(1, 10, 0, 0).await;
    let err = h.orders().submit(long_limit(5), 1).await.unwrap_err();
    assert!(matches!(err, ClientError::State(_)), "{err}");
}

#[tokio::test]
async fn test_invalid_order_rejected_early() {
    let h = Harness::new(3600).await;
    h.activate(0).await;
    let err = h.orders().submit(long_limit(0), 1).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)), "{err}");
}

#[tokio::test]
async fn test_unknown_order_refresh() {
    let h = Harness::new(3600).await;
    let err = h.orders().refresh(&OrderId([0; 32])).await.unwrap_err();
    assert!(matches!(err, ClientError::State(_)), "{err}");
}
