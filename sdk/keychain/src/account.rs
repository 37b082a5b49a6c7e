use k256::{PublicKey, SecretKey};
use obscura_address::Address;
use obscura_field::FieldElement;

use crate::error::Result;
use crate::hd::{ChildNumber, DerivationPath, HdNode};

/// A trading account at `m/44'/60'/index'`.
///
/// The account key is the first external address `m/44'/60'/index'/0/0`.
/// Further addresses on the external chain are revealed on demand.
#[derive(Debug, Clone)]
pub struct Account {
    index: u32,
    path: DerivationPath,
    key: HdNode,
    external: HdNode,
    addresses: Vec<Address>,
}

impl Account {
    pub fn derive(master: &HdNode, index: u32) -> Result<Self> {
        let path = DerivationPath::bip44(index, 0)?;
        let external_path: DerivationPath = format!("m/44'/60'/{index}'/0").parse()?;
        let external = master.derive_path(&external_path)?;
        let key = external.derive_child(ChildNumber::normal(0)?)?;
        let addresses = vec![key.address()];

        log::debug!("derived account {} at {}", index, path);

        Ok(Self {
            index,
            path,
            key,
            external,
            addresses,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    pub fn address(&self) -> Address {
        self.addresses[0]
    }

    pub fn private_key(&self) -> &SecretKey {
        self.key.private_key()
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    pub fn node(&self) -> &HdNode {
        &self.key
    }

    /// Secret used for account commitments and nullifiers.
    pub fn trading_secret(&self) -> FieldElement {
        self.key.trading_secret()
    }

    /// Addresses revealed so far, in index order.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Address at external index `j`. Does not record it as revealed.
    pub fn derive_address(&self, j: u32) -> Result<Address> {
        if let Some(addr) = self.addresses.get(j as usize) {
            return Ok(*addr);
        }
        Ok(self.external.derive_child(ChildNumber::normal(j)?)?.address())
    }

    /// Extend the revealed set to at least `count` addresses.
    pub fn reveal_addresses(&mut self, count: u32) -> Result<&[Address]> {
        while (self.addresses.len() as u32) < count {
            let next = self.addresses.len() as u32;
            let node = self.external.derive_child(ChildNumber::normal(next)?)?;
            self.addresses.push(node.address());
        }
        Ok(&self.addresses)
    }
}
