use std::fs::{self, OpenOptions};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Result, bail};
use obscura_privacy::KeeperSecret;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Writes a fresh keeper decryption key as hex and prints its public half,
/// which is what gets registered on chain.
pub fn keygen(filename: Option<String>) -> Result<()> {
    let key_path = PathBuf::from(filename.unwrap_or_else(|| "keeper.key".to_string()));

    if key_path.exists() {
        bail!(
            "File {} already exists. Remove it first or use a different filename.",
            key_path.display()
        );
    }
    if let Some(parent) = key_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    println!("🔐 Generating keeper key...");
    let secret = KeeperSecret::generate(&mut OsRng);
    let encoded = Zeroizing::new(hex::encode(secret.to_bytes().as_slice()));

    let mut f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&key_path)?;

    #[cfg(unix)]
    {
        // rw-------
        let mut perms = f.metadata()?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&key_path, perms)?;
    }

    f.write_all(encoded.as_bytes())?;
    f.write_all(b"\n")?;

    println!("✅ Wrote keeper key to {}", key_path.display());
    println!("🔑 Public key: {}", secret.public_key().to_hex());
    Ok(())
}
