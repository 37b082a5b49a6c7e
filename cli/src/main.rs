mod keeper;
mod wallet;

use std::env;
use std::io::{self, BufRead, Write};

use obscura_address::Address;
use obscura_config::ObscuraConfig;
use obscura_field::FieldElement;
use obscura_privacy::{Commitment, commit_hash};
use zeroize::Zeroizing;

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let cmd = &args[1];

    let result = match cmd.as_str() {
        "wallet" => wallet::run(&args[2..]).await,
        "account" => {
            if args.len() < 3 {
                println!("Usage: account <index> [addresses]");
                return;
            }
            wallet::account(&args[2], args.get(3).map(String::as_str)).await
        }
        "keeper" => match args.get(2).map(String::as_str) {
            Some("keygen") => keeper::keygen(args.get(3).cloned()),
            _ => {
                println!("Usage: keeper keygen [filename]");
                return;
            }
        },
        "commit-hash" => {
            if args.len() < 5 {
                println!("Usage: commit-hash <commitment> <nonce> <address>");
                return;
            }
            print_commit_hash(&args[2], &args[3], &args[4])
        }
        "config" => match args.get(2).map(String::as_str) {
            Some("sample") => {
                print!("{}", ObscuraConfig::generate_sample());
                Ok(())
            }
            _ => {
                println!("Usage: config sample");
                return;
            }
        },
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        _ => {
            println!("❌ Unknown command: {}", cmd);
            println!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Obscura CLI - private perpetual trading client");
    println!();
    println!("USAGE:");
    println!("  obscura <command> [args]");
    println!();
    println!("WALLET COMMANDS:");
    println!("  wallet new [words]               Create an HD wallet (12-24 words, default 24)");
    println!("  wallet restore                   Restore from a mnemonic read on stdin");
    println!("  wallet show                      Unlock and print the wallet summary");
    println!("  wallet migrate                   Move a legacy single key to a new HD wallet");
    println!("  account <index> [addresses]      Print an account and its first addresses");
    println!();
    println!("PROTOCOL COMMANDS:");
    println!("  keeper keygen [filename]         Generate a keeper encryption key");
    println!("  commit-hash <c> <nonce> <addr>   Compute keccak256(c || nonce || addr)");
    println!();
    println!("OTHER COMMANDS:");
    println!("  config sample                    Print a sample config.toml");
    println!("  help                             Show this help message");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("  OBSCURA_CONFIG       Config file path");
    println!("  OBSCURA_DATA_DIR     Wallet storage directory");
    println!("  OBSCURA_PASSWORD     Wallet password (prompted on stdin otherwise)");
    println!("  RUST_LOG             Log level (debug/info/warn/error)");
}

fn print_commit_hash(commitment: &str, nonce: &str, address: &str) -> anyhow::Result<()> {
    let commitment = Commitment::from_hex(commitment)?;
    let nonce = FieldElement::from_hex(nonce)?;
    let address: Address = address.parse()?;
    println!("0x{}", hex::encode(commit_hash(&commitment, &nonce, &address)));
    Ok(())
}

/// One line from stdin, prompt on stderr.
pub(crate) fn read_line(prompt: &str) -> anyhow::Result<Zeroizing<String>> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    let mut line = Zeroizing::new(String::new());
    io::stdin().lock().read_line(&mut line)?;
    Ok(Zeroizing::new(line.trim().to_string()))
}

pub(crate) fn password() -> anyhow::Result<Zeroizing<String>> {
    match env::var("OBSCURA_PASSWORD") {
        Ok(pw) => Ok(Zeroizing::new(pw)),
        Err(_) => read_line("🔐 Password: "),
    }
}
