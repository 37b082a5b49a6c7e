//! Ethereum JSON-RPC binding of the ledger contract.
//!
//! Views go through `eth_call` against `latest`. Writes are signed locally
//! with the account key and sent raw, then the receipt is polled until the
//! transaction is mined.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, MiddlewareError, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, H160, H256, TransactionReceipt, TransactionRequest, U64};
use k256::SecretKey;
use obscura_address::Address;
use obscura_config::LedgerConfig;
use obscura_field::FieldElement;
use obscura_privacy::{Commitment, Nullifier};
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::error::{ClientError, LedgerError};
use crate::ledger::abi;
use crate::ledger::{KeeperInfo, Ledger, LedgerResult, PrivateOrderSubmission, Receipt, TxHash};
use crate::prover::Proof;

/// Standard JSON-RPC code for `execution reverted`.
const EXECUTION_REVERTED: i64 = 3;

pub struct RpcLedger {
    provider: Provider<Http>,
    contract: H160,
    chain_id: OnceCell<u64>,
    request_timeout: Duration,
    receipt_timeout: Duration,
    poll_interval: Duration,
}

impl RpcLedger {
    pub fn new(config: &LedgerConfig) -> Result<Self, ClientError> {
        let contract: Address = config.contract_address.parse()?;
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str()).map_err(|e| {
            ClientError::Validation(format!("invalid rpc url {:?}: {e}", config.rpc_url))
        })?;

        log::info!("ledger rpc {} contract {}", config.rpc_url, contract);

        Ok(Self {
            provider,
            contract: abi::to_h160(&contract),
            chain_id: OnceCell::new_with(config.chain_id),
            request_timeout: config.request_timeout(),
            receipt_timeout: config.receipt_timeout(),
            poll_interval: config.receipt_poll_interval(),
        })
    }

    pub fn contract(&self) -> Address {
        abi::from_h160(self.contract)
    }

    async fn timed<T, E, F>(&self, what: &str, fut: F) -> LedgerResult<T>
    where
        E: MiddlewareError,
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(map_middleware_error),
            Err(_) => Err(LedgerError::Transport(format!(
                "{what} timed out after {:?}",
                self.request_timeout
            ))),
        }
    }

    async fn chain_id(&self) -> LedgerResult<u64> {
        self.chain_id
            .get_or_try_init(|| async {
                let id = self.timed("eth_chainId", self.provider.get_chainid()).await?;
                log::debug!("ledger chain id {}", id);
                Ok::<_, LedgerError>(id.low_u64())
            })
            .await
            .copied()
    }

    async fn call(&self, what: &str, data: Vec<u8>) -> LedgerResult<Vec<u8>> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.contract)
            .data(Bytes::from(data))
            .into();
        let out = self.timed(what, self.provider.call(&tx, None)).await?;
        Ok(out.to_vec())
    }

    async fn send(&self, what: &str, signer: &SecretKey, data: Vec<u8>) -> LedgerResult<Receipt> {
        let chain_id = self.chain_id().await?;
        let wallet = LocalWallet::from_bytes(signer.to_bytes().as_slice())
            .map_err(|e| LedgerError::Transport(format!("unusable signing key: {e}")))?
            .with_chain_id(chain_id);
        let from = wallet.address();
        let client = SignerMiddleware::new(self.provider.clone(), wallet);

        let tx = TransactionRequest::new()
            .from(from)
            .to(self.contract)
            .data(Bytes::from(data));
        let pending = self.timed(what, client.send_transaction(tx, None)).await?;
        let tx_hash = pending.tx_hash();
        log::debug!("{} sent from {:?}: {:?}", what, from, tx_hash);

        self.wait_for_receipt(what, tx_hash).await
    }

    async fn wait_for_receipt(&self, what: &str, tx_hash: H256) -> LedgerResult<Receipt> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            let receipt = self
                .timed(
                    "eth_getTransactionReceipt",
                    self.provider.get_transaction_receipt(tx_hash),
                )
                .await?;
            if let Some(mined) = receipt.and_then(into_receipt) {
                let mined = mined?;
                log::debug!("{} mined in block {}", what, mined.block_number);
                return Ok(mined);
            }
            if Instant::now() >= deadline {
                return Err(LedgerError::Transport(format!(
                    "{what} {tx_hash:?} not mined within {:?}",
                    self.receipt_timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn block_number(&self) -> LedgerResult<u64> {
        let n = self
            .timed("eth_blockNumber", self.provider.get_block_number())
            .await?;
        Ok(n.as_u64())
    }

    async fn deposit(&self, signer: &SecretKey, amount: u128) -> LedgerResult<Receipt> {
        let data = abi::encode_call(abi::DEPOSIT, &[abi::uint(amount)]);
        self.send("deposit", signer, data).await
    }

    async fn withdraw(
        &self,
        signer: &SecretKey,
        amount: u128,
        nullifier: &Nullifier,
        proof: &Proof,
    ) -> LedgerResult<Receipt> {
        let data = abi::encode_call(
            abi::WITHDRAW,
            &[
                abi::uint(amount),
                abi::word(nullifier.as_bytes()),
                abi::bytes(proof.as_bytes()),
            ],
        );
        self.send("withdraw", signer, data).await
    }

    async fn commit_trading_account(
        &self,
        signer: &SecretKey,
        commit_hash: &[u8; 32],
    ) -> LedgerResult<Receipt> {
        let data = abi::encode_call(abi::COMMIT_TRADING_ACCOUNT, &[abi::word(commit_hash)]);
        self.send("commitTradingAccount", signer, data).await
    }

    async fn reveal_trading_account(
        &self,
        signer: &SecretKey,
        commitment: &Commitment,
        nonce: &FieldElement,
        proof: &Proof,
    ) -> LedgerResult<Receipt> {
        let data = abi::encode_call(
            abi::REVEAL_TRADING_ACCOUNT,
            &[
                abi::word(commitment.as_bytes()),
                abi::field(nonce),
                abi::bytes(proof.as_bytes()),
            ],
        );
        self.send("revealTradingAccount", signer, data).await
    }

    async fn submit_order_private(
        &self,
        signer: &SecretKey,
        submission: &PrivateOrderSubmission,
    ) -> LedgerResult<Receipt> {
        let data = abi::encode_call(
            abi::SUBMIT_ORDER_PRIVATE,
            &[
                abi::bytes(submission.proof.as_bytes()),
                abi::word(submission.nullifier.as_bytes()),
                abi::word(submission.account_commitment.as_bytes()),
                abi::word(submission.order_commitment.as_bytes()),
                abi::bytes(submission.encrypted_order.as_bytes()),
            ],
        );
        self.send("submitOrderPrivate", signer, data).await
    }

    async fn used_nullifiers(&self, nullifier: &Nullifier) -> LedgerResult<bool> {
        let data = abi::encode_call(abi::USED_NULLIFIERS, &[abi::word(nullifier.as_bytes())]);
        abi::decode_bool(&self.call("usedNullifiers", data).await?)
    }

    async fn is_order_valid(&self, nullifier: &Nullifier) -> LedgerResult<bool> {
        let data = abi::encode_call(abi::IS_ORDER_VALID, &[abi::word(nullifier.as_bytes())]);
        abi::decode_bool(&self.call("isOrderValid", data).await?)
    }

    async fn keepers(&self, keeper: &Address) -> LedgerResult<KeeperInfo> {
        let data = abi::encode_call(abi::KEEPERS, &[abi::address(keeper)]);
        abi::decode_keeper_info(&self.call("keepers", data).await?)
    }

    async fn active_keeper_list(&self, index: u64) -> LedgerResult<Option<Address>> {
        let data = abi::encode_call(abi::ACTIVE_KEEPER_LIST, &[abi::uint(index.into())]);
        match self.call("activeKeeperList", data).await {
            Ok(out) => {
                let addr = abi::decode_address(&out)?;
                Ok((!addr.is_zero()).then_some(addr))
            }
            // out-of-bounds array access reverts
            Err(LedgerError::Reverted(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// `None` while the receipt has no block yet.
fn into_receipt(receipt: TransactionReceipt) -> Option<LedgerResult<Receipt>> {
    let block = receipt.block_number?;
    let tx_hash = TxHash(receipt.transaction_hash.0);
    if receipt.status == Some(U64::zero()) {
        return Some(Err(LedgerError::Reverted(format!(
            "{tx_hash} reverted in block {block}"
        ))));
    }
    Some(Ok(Receipt {
        tx_hash,
        block_number: block.as_u64(),
    }))
}

fn map_middleware_error<E: MiddlewareError>(err: E) -> LedgerError {
    match err.as_error_response() {
        Some(rpc) => map_rpc_error(rpc.code, rpc.message.clone()),
        None => match err.as_serde_error() {
            Some(e) => LedgerError::Decode(e.to_string()),
            None => LedgerError::Transport(err.to_string()),
        },
    }
}

fn map_rpc_error(code: i64, message: String) -> LedgerError {
    let lower = message.to_ascii_lowercase();
    if code == EXECUTION_REVERTED || lower.contains("revert") {
        if lower.contains("nullifier") {
            LedgerError::NullifierUsed(message)
        } else {
            LedgerError::Reverted(message)
        }
    } else {
        LedgerError::Rpc { code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use ethers::abi::Token;
    use obscura_keychain::address_of;
    use serde_json::{Value, json};

    type Reply = Result<Value, (i64, String)>;
    type Handler = dyn Fn(&str, &Value) -> Reply + Send + Sync;

    /// Local JSON-RPC endpoint that records every request.
    struct MockNode {
        calls: Mutex<Vec<(String, Value)>>,
        handler: Box<Handler>,
    }

    impl MockNode {
        fn methods(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(m, _)| m.clone())
                .collect()
        }

        fn params_of(&self, method: &str) -> Option<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|(m, _)| m == method)
                .map(|(_, p)| p.clone())
        }
    }

    async fn serve_rpc(State(node): State<Arc<MockNode>>, Json(req): Json<Value>) -> Json<Value> {
        let method = req["method"].as_str().unwrap_or_default().to_string();
        let params = req["params"].clone();
        node.calls.lock().unwrap().push((method.clone(), params.clone()));
        let body = match (node.handler)(&method, &params) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": req["id"], "result": result }),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": { "code": code, "message": message }
            }),
        };
        Json(body)
    }

    async fn spawn_node(
        handler: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    ) -> (Arc<MockNode>, String) {
        let node = Arc::new(MockNode {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        });
        let app = Router::new()
            .route("/", post(serve_rpc))
            .with_state(node.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (node, format!("http://{addr}"))
    }

    fn ledger_for(url: &str, receipt_timeout_secs: u64) -> RpcLedger {
        RpcLedger::new(&LedgerConfig {
            rpc_url: url.to_string(),
            contract_address: Address([0x33; 20]).to_hex(),
            chain_id: Some(31337),
            request_timeout_secs: 5,
            receipt_timeout_secs,
            receipt_poll_interval_ms: 10,
        })
        .unwrap()
    }

    fn signer() -> SecretKey {
        SecretKey::from_slice(&[0x42; 32]).unwrap()
    }

    const TX: &str = "0xabababababababababababababababababababababababababababababababab";

    /// Answers the calls a signed send makes around the raw transaction.
    fn chain_defaults(method: &str) -> Reply {
        let result = match method {
            "eth_chainId" => json!("0x7a69"),
            "eth_getTransactionCount" => json!("0x0"),
            "eth_gasPrice" => json!("0x1"),
            "eth_estimateGas" => json!("0x5208"),
            "eth_blockNumber" => json!("0x10"),
            "eth_sendRawTransaction" => json!(TX),
            _ => return Err((-32601, format!("method {method} not found"))),
        };
        Ok(result)
    }

    fn receipt(status: u64, block: u64) -> Value {
        json!({
            "transactionHash": TX,
            "transactionIndex": "0x0",
            "blockHash": format!("0x{}", "11".repeat(32)),
            "blockNumber": format!("0x{block:x}"),
            "from": format!("0x{}", "22".repeat(20)),
            "to": format!("0x{}", "33".repeat(20)),
            "cumulativeGasUsed": "0x5208",
            "gasUsed": "0x5208",
            "contractAddress": null,
            "logs": [],
            "status": format!("0x{status:x}"),
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "type": "0x0",
            "effectiveGasPrice": "0x1"
        })
    }

    fn hex_data(data: &[u8]) -> Value {
        json!(format!("0x{}", hex::encode(data)))
    }

    fn call_data(params: &Value) -> String {
        let tx = &params[0];
        let data = tx["data"].as_str().or(tx["input"].as_str()).unwrap_or_default();
        data.trim_start_matches("0x").to_string()
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            map_rpc_error(3, "execution reverted: nullifier used".into()),
            LedgerError::NullifierUsed(_)
        ));
        assert!(matches!(
            map_rpc_error(-32000, "execution reverted: reveal too early".into()),
            LedgerError::Reverted(_)
        ));
        assert!(matches!(
            map_rpc_error(-32601, "method not found".into()),
            LedgerError::Rpc { code: -32601, .. }
        ));
    }

    #[test]
    fn test_new_rejects_bad_contract() {
        let cfg = LedgerConfig {
            contract_address: "0x1234".into(),
            ..LedgerConfig::default()
        };
        assert!(matches!(
            RpcLedger::new(&cfg),
            Err(ClientError::Validation(_))
        ));

        let cfg = LedgerConfig {
            rpc_url: "not a url".into(),
            ..LedgerConfig::default()
        };
        assert!(matches!(
            RpcLedger::new(&cfg),
            Err(ClientError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_is_signed_and_waits_for_block() {
        let polls = Arc::new(Mutex::new(0u32));
        let seen = polls.clone();
        let (node, url) = spawn_node(move |method, _| {
            if method == "eth_getTransactionReceipt" {
                let mut n = seen.lock().unwrap();
                *n += 1;
                // pending twice, then mined
                return Ok(if *n < 3 { Value::Null } else { receipt(1, 42) });
            }
            chain_defaults(method)
        })
        .await;
        let ledger = ledger_for(&url, 5);

        let mined = ledger
            .commit_trading_account(&signer(), &[7u8; 32])
            .await
            .unwrap();
        assert_eq!(mined.tx_hash, TxHash([0xab; 32]));
        assert_eq!(mined.block_number, 42);
        assert_eq!(*polls.lock().unwrap(), 3);

        let methods = node.methods();
        assert!(methods.contains(&"eth_sendRawTransaction".to_string()));
        assert!(!methods.contains(&"eth_sendTransaction".to_string()));

        // the nonce is looked up for the account key, not a node account
        let expected = address_of(&signer().public_key()).to_hex().to_lowercase();
        let params = node.params_of("eth_getTransactionCount").unwrap();
        assert_eq!(params[0].as_str().unwrap().to_lowercase(), expected);
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_error() {
        let (node, url) = spawn_node(|method, _| {
            if method == "eth_getTransactionReceipt" {
                return Ok(receipt(0, 9));
            }
            chain_defaults(method)
        })
        .await;
        let ledger = ledger_for(&url, 5);

        let err = ledger.deposit(&signer(), 10).await.unwrap_err();
        assert!(matches!(err, LedgerError::Reverted(_)), "{err}");
        assert!(node.methods().contains(&"eth_getTransactionReceipt".to_string()));
    }

    #[tokio::test]
    async fn test_spent_nullifier_rejected_before_sending() {
        let (node, url) = spawn_node(|method, _| {
            if method == "eth_estimateGas" {
                return Err((EXECUTION_REVERTED, "execution reverted: nullifier already used".into()));
            }
            chain_defaults(method)
        })
        .await;
        let ledger = ledger_for(&url, 5);

        let err = ledger
            .withdraw(&signer(), 5, &Nullifier([9u8; 32]), &Proof(vec![1u8; 32]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NullifierUsed(_)), "{err}");
        assert!(!node.methods().contains(&"eth_sendRawTransaction".to_string()));
    }

    #[tokio::test]
    async fn test_unmined_transaction_times_out() {
        let (_node, url) = spawn_node(|method, _| {
            if method == "eth_getTransactionReceipt" {
                return Ok(Value::Null);
            }
            chain_defaults(method)
        })
        .await;
        let ledger = ledger_for(&url, 1);

        let err = ledger.deposit(&signer(), 10).await.unwrap_err();
        assert!(matches!(err, LedgerError::Transport(_)), "{err}");
    }

    #[tokio::test]
    async fn test_views() {
        let keeper = Address([0x44; 20]);
        let (_node, url) = spawn_node(move |method, params| {
            if method != "eth_call" {
                return chain_defaults(method);
            }
            let data = call_data(params);
            let sel = &data[..8.min(data.len())];
            if sel == hex::encode(abi::selector(abi::USED_NULLIFIERS)) {
                Ok(hex_data(&ethers::abi::encode(&[Token::Bool(true)])))
            } else if sel == hex::encode(abi::selector(abi::IS_ORDER_VALID)) {
                Ok(hex_data(&ethers::abi::encode(&[Token::Bool(false)])))
            } else if sel == hex::encode(abi::selector(abi::KEEPERS)) {
                Ok(hex_data(&ethers::abi::encode(&[
                    Token::Bytes(vec![2u8; 33]),
                    abi::uint(75),
                    abi::uint(3),
                    abi::uint(1),
                    Token::Bool(true),
                    Token::Bool(false),
                ])))
            } else if sel == hex::encode(abi::selector(abi::ACTIVE_KEEPER_LIST)) {
                // index is the last byte of the single argument word
                if data.ends_with("00") {
                    Ok(hex_data(&ethers::abi::encode(&[abi::address(&keeper)])))
                } else {
                    Err((EXECUTION_REVERTED, "execution reverted".into()))
                }
            } else {
                Err((EXECUTION_REVERTED, "execution reverted".into()))
            }
        })
        .await;
        let ledger = ledger_for(&url, 5);

        assert_eq!(ledger.block_number().await.unwrap(), 16);
        assert!(ledger.used_nullifiers(&Nullifier([1u8; 32])).await.unwrap());
        assert!(!ledger.is_order_valid(&Nullifier([1u8; 32])).await.unwrap());

        let info = ledger.keepers(&keeper).await.unwrap();
        assert_eq!(info.public_key, vec![2u8; 33]);
        assert_eq!(info.reputation_score, 75);
        assert!(info.is_active);

        assert_eq!(ledger.active_keeper_list(0).await.unwrap(), Some(keeper));
        assert_eq!(ledger.active_keeper_list(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let ledger = ledger_for(&format!("http://{addr}"), 1);
        let err = ledger.block_number().await.unwrap_err();
        assert!(matches!(err, LedgerError::Transport(_)), "{err}");
        assert!(ClientError::from(err).is_retryable());
    }
}
