use std::collections::HashMap;

use crate::account::Account;
use crate::error::{KeychainError, Result};
use crate::hd::HdNode;
use crate::mnemonic::{DEFAULT_ENTROPY_BITS, Mnemonic, Seed};
use crate::vault::{self, EncryptedSeedRecord, KdfParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletState {
    Uninitialized,
    Initialized,
    AccountReady,
}

struct Unlocked {
    mnemonic: Option<Mnemonic>,
    seed: Seed,
    master: HdNode,
}

/// HD wallet: one seed, many accounts.
///
/// `Uninitialized -> generate | restore -> Initialized -> derive_account -> AccountReady`
#[derive(Default)]
pub struct HdWallet {
    inner: Option<Unlocked>,
    accounts: HashMap<u32, Account>,
}

impl HdWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WalletState {
        match (&self.inner, self.accounts.is_empty()) {
            (None, _) => WalletState::Uninitialized,
            (Some(_), true) => WalletState::Initialized,
            (Some(_), false) => WalletState::AccountReady,
        }
    }

    /// Fresh mnemonic; returns it so the caller can show it once.
    pub fn generate(&mut self, entropy_bits: usize, passphrase: &str) -> Result<Mnemonic> {
        self.ensure_uninitialized()?;
        let mnemonic = Mnemonic::generate(entropy_bits)?;
        self.install(Some(mnemonic.clone()), mnemonic.to_seed(passphrase))?;
        log::info!("generated {}-word wallet", mnemonic.word_count());
        Ok(mnemonic)
    }

    pub fn generate_default(&mut self) -> Result<Mnemonic> {
        self.generate(DEFAULT_ENTROPY_BITS, "")
    }

    pub fn restore(&mut self, phrase: &str, passphrase: &str) -> Result<()> {
        self.ensure_uninitialized()?;
        let mnemonic = Mnemonic::parse(phrase)?;
        let seed = mnemonic.to_seed(passphrase);
        self.install(Some(mnemonic), seed)?;
        log::info!("restored wallet from mnemonic");
        Ok(())
    }

    /// Initialize from an already stretched seed (e.g. an unlocked vault).
    pub fn from_seed(seed: Seed) -> Result<Self> {
        let mut wallet = Self::new();
        wallet.install(None, seed)?;
        Ok(wallet)
    }

    pub fn unlock(record: &EncryptedSeedRecord, password: &str) -> Result<Self> {
        Self::from_seed(vault::open_seed(record, password)?)
    }

    pub fn seal(&self, password: &str, params: KdfParams) -> Result<EncryptedSeedRecord> {
        vault::seal_seed(&self.unlocked()?.seed, password, params)
    }

    /// Account `index`, derived once and cached.
    pub fn derive_account(&mut self, index: u32) -> Result<&Account> {
        let unlocked = self.inner.as_ref().ok_or(KeychainError::NotInitialized)?;
        if !self.accounts.contains_key(&index) {
            let account = Account::derive(&unlocked.master, index)?;
            log::info!("account {} ready: {}", index, account.address());
            self.accounts.insert(index, account);
        }
        self.accounts.get(&index).ok_or(KeychainError::NotInitialized)
    }

    pub fn account(&self, index: u32) -> Option<&Account> {
        self.accounts.get(&index)
    }

    pub fn account_mut(&mut self, index: u32) -> Option<&mut Account> {
        self.accounts.get_mut(&index)
    }

    pub fn mnemonic(&self) -> Option<&Mnemonic> {
        self.inner.as_ref().and_then(|u| u.mnemonic.as_ref())
    }

    pub fn seed(&self) -> Result<&Seed> {
        Ok(&self.unlocked()?.seed)
    }

    pub fn master(&self) -> Result<&HdNode> {
        Ok(&self.unlocked()?.master)
    }

    /// Drop all key material and return to `Uninitialized`.
    pub fn lock(&mut self) {
        self.inner = None;
        self.accounts.clear();
    }

    fn install(&mut self, mnemonic: Option<Mnemonic>, seed: Seed) -> Result<()> {
        let master = HdNode::master(seed.as_bytes())?;
        self.inner = Some(Unlocked {
            mnemonic,
            seed,
            master,
        });
        self.accounts.clear();
        Ok(())
    }

    fn ensure_uninitialized(&self) -> Result<()> {
        match self.inner {
            Some(_) => Err(KeychainError::AlreadyInitialized),
            None => Ok(()),
        }
    }

    fn unlocked(&self) -> Result<&Unlocked> {
        self.inner.as_ref().ok_or(KeychainError::NotInitialized)
    }
}

impl std::fmt::Debug for HdWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdWallet")
            .field("state", &self.state())
            .field("accounts", &self.accounts.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABANDON_12: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_state_machine() {
        let mut wallet = HdWallet::new();
        assert_eq!(wallet.state(), WalletState::Uninitialized);
        assert_eq!(
            wallet.derive_account(0).unwrap_err(),
            KeychainError::NotInitialized
        );

        wallet.restore(ABANDON_12, "").unwrap();
        assert_eq!(wallet.state(), WalletState::Initialized);
        assert_eq!(
            wallet.restore(ABANDON_12, "").unwrap_err(),
            KeychainError::AlreadyInitialized
        );

        wallet.derive_account(0).unwrap();
        assert_eq!(wallet.state(), WalletState::AccountReady);

        wallet.lock();
        assert_eq!(wallet.state(), WalletState::Uninitialized);
        assert!(wallet.seed().is_err());
    }

    #[test]
    fn test_restore_golden_account() {
        let mut wallet = HdWallet::new();
        wallet.restore(ABANDON_12, "").unwrap();
        let account = wallet.derive_account(0).unwrap();
        assert_eq!(
            account.address().to_checksum(),
            "0x6C2eC97C44eEcea72Cf1bb034194669728ACB04E"
        );
    }

    #[test]
    fn test_account_cache() {
        let mut wallet = HdWallet::new();
        wallet.generate(128, "").unwrap();
        let first = wallet.derive_account(5).unwrap().address();
        wallet.account_mut(5).unwrap().reveal_addresses(3).unwrap();
        // cached entry keeps revealed addresses
        assert_eq!(wallet.derive_account(5).unwrap().addresses().len(), 3);
        assert_eq!(wallet.account(5).unwrap().address(), first);
    }

    #[test]
    fn test_seal_unlock() {
        let mut wallet = HdWallet::new();
        let mnemonic = wallet.generate(256, "extra").unwrap();
        assert_eq!(mnemonic.word_count(), 24);
        let addr = wallet.derive_account(2).unwrap().address();

        let record = wallet.seal("pw", KdfParams::new(1_000)).unwrap();
        let mut unlocked = HdWallet::unlock(&record, "pw").unwrap();
        assert!(unlocked.mnemonic().is_none());
        assert_eq!(unlocked.derive_account(2).unwrap().address(), addr);

        assert_eq!(
            HdWallet::unlock(&record, "wrong").unwrap_err(),
            KeychainError::Authentication
        );
    }
}
