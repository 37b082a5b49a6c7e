use std::sync::Arc;

use anyhow::{Context, Result, bail};
use obscura_config::ObscuraConfig;
use obscura_core::{FileStore, KeyManager};
use obscura_keychain::KdfParams;

use crate::{password, read_line};

async fn key_manager() -> Result<KeyManager> {
    let config = ObscuraConfig::load()?;
    let store = FileStore::open(&config.storage.path)
        .await
        .with_context(|| format!("opening wallet storage at {}", config.storage.path))?;
    log::debug!("wallet storage at {}", store.dir().display());
    Ok(KeyManager::new(
        Arc::new(store),
        KdfParams::new(config.storage.kdf_iterations),
    ))
}

async fn unlocked() -> Result<KeyManager> {
    let keys = key_manager().await?;
    if !keys.has_wallet().await? {
        bail!("no wallet found; run `obscura wallet new` or `obscura wallet restore`");
    }
    keys.unlock(&password()?).await?;
    Ok(keys)
}

pub async fn run(args: &[String]) -> Result<()> {
    match args.first().map(String::as_str) {
        Some("new") => {
            let words: usize = match args.get(1) {
                Some(w) => w.parse().context("word count must be a number")?,
                None => 24,
            };
            new(words).await
        }
        Some("restore") => restore().await,
        Some("show") => show().await,
        Some("migrate") => migrate().await,
        _ => {
            println!("Usage: wallet <new [words] | restore | show | migrate>");
            Ok(())
        }
    }
}

async fn new(words: usize) -> Result<()> {
    if !matches!(words, 12 | 15 | 18 | 21 | 24) {
        bail!("word count must be 12, 15, 18, 21 or 24");
    }
    let keys = key_manager().await?;
    let pw = password()?;

    println!("🔐 Generating new wallet...");
    let mnemonic = keys.create(&pw, words * 32 / 3).await?;
    let address = keys.account(0).await?.address();

    println!("✅ Wallet created");
    println!();
    println!("Write these words down. They are shown only once:");
    println!();
    for (i, word) in mnemonic.words().enumerate() {
        println!("  {:>2}. {}", i + 1, word);
    }
    println!();
    println!("🔑 Account 0: {}", address);
    Ok(())
}

async fn restore() -> Result<()> {
    let keys = key_manager().await?;
    let phrase = read_line("📝 Mnemonic: ")?;
    let pw = password()?;
    keys.restore(&phrase, &pw).await?;
    println!("✅ Wallet restored");
    println!("🔑 Account 0: {}", keys.account(0).await?.address());
    Ok(())
}

async fn show() -> Result<()> {
    let keys = unlocked().await?;
    let digest = keys.seed_digest().await?;
    println!("Seed fingerprint: {}", hex::encode(&digest[..4]));
    for index in 0..3 {
        let account = keys.account(index).await?;
        println!("  {}  {}", account.path(), account.address());
    }
    Ok(())
}

async fn migrate() -> Result<()> {
    let keys = key_manager().await?;
    if !keys.has_legacy().await? {
        bail!("no legacy key to migrate");
    }
    let pw = password()?;
    let report = keys.migrate_to_hd(&pw).await?;

    println!("✅ Migrated {} to a new HD wallet", report.legacy_address);
    println!();
    println!("Write these words down. They are shown only once:");
    println!();
    for (i, word) in report.mnemonic.words().enumerate() {
        println!("  {:>2}. {}", i + 1, word);
    }
    println!();
    println!("🔑 Account 0: {}", report.hd_address);
    println!("The legacy key is kept, still sealed, as a backup record.");
    Ok(())
}

pub async fn account(index: &str, addresses: Option<&str>) -> Result<()> {
    let index: u32 = index.parse().context("account index must be a number")?;
    let count: u32 = match addresses {
        Some(n) => n.parse().context("address count must be a number")?,
        None => 1,
    };
    if count == 0 || count > 100 {
        bail!("address count must be between 1 and 100");
    }

    let keys = unlocked().await?;
    let mut account = keys.account(index).await?;
    println!("Account {}", account.index());
    println!("  path:    {}", account.path());
    println!("  pubkey:  0x{}", hex::encode(account.node().compressed_public_key()));
    for (j, address) in account.reveal_addresses(count)?.iter().enumerate() {
        println!("  /0/{:<4} {}", j, address);
    }
    Ok(())
}
