//! Developer CLI for Selfkit.
//!
//! Runs the identity core against a file-backed vault and a file-backed
//! secure store under the platform data directory. The file-backed secure
//! store cannot enforce biometric prompts, so this binary is for
//! development and inspection only.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{eyre, WrapErr};
use secrecy::SecretString;
use selfkit_core::secure_store::{FsSecureStore, SecureKeyStore};
use selfkit_core::storage::{AtomicBlobStore, FsBlobStore};
use selfkit_core::{
    spawn_in_process_sandbox, AccountPatch, AccountSessionManager, Audience, AuthGate,
    ChallengeSigner, Did, IdentityEngine, VaultCodec,
};

#[derive(Parser)]
#[command(name = "selfkit", about = "Self-sovereign identity developer CLI", version)]
struct Cli {
    /// Data directory. Defaults to <platform data dir>/selfkit.
    #[arg(long, env = "SELFKIT_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new account and log into it.
    Create {
        /// Display name for the account.
        name: String,
        /// How key retrieval is gated: PIN or BIOMETRIC.
        #[arg(long, default_value = "PIN")]
        gate: AuthGate,
        /// PIN for PIN-gated accounts.
        #[arg(long)]
        pin: Option<String>,
    },
    /// List all known accounts.
    List,
    /// Log into an existing account by DID.
    Login {
        /// The account's DID.
        did: String,
        /// PIN for PIN-gated accounts.
        #[arg(long)]
        pin: Option<String>,
    },
    /// Log out of the current account.
    Logout,
    /// Show the current account, if any.
    Whoami,
    /// Sign a challenge with the current account's identity key.
    Sign {
        /// The challenge to sign.
        challenge: String,
        /// Emit only the relying-party response (signature and public key).
        #[arg(long)]
        external: bool,
        /// PIN, if the session needs re-authentication.
        #[arg(long)]
        pin: Option<String>,
    },
    /// Rename an account.
    Rename {
        /// The account's DID.
        did: String,
        /// New display name.
        name: String,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .ok_or_else(|| eyre!("no platform data directory available"))?
            .join("selfkit"),
    };
    tracing::debug!(dir = %data_dir.display(), "opening data directory");

    let store = Arc::new(FsBlobStore::new(data_dir.join("vault")).wrap_err("opening vault store")?)
        as Arc<dyn AtomicBlobStore>;
    let secure = Arc::new(
        FsSecureStore::new(data_dir.join("secure")).wrap_err("opening secure store")?,
    ) as Arc<dyn SecureKeyStore>;
    let bridge = Arc::new(spawn_in_process_sandbox());
    let engine = IdentityEngine::new(bridge, VaultCodec::new(Arc::clone(&store)), secure);
    let manager = Arc::new(AccountSessionManager::new(engine, store));
    manager.init().await.wrap_err("loading accounts")?;

    match cli.command {
        Command::Create { name, gate, pin } => {
            let pin = secret(pin);
            let account = manager
                .create_account(&name, gate, pin.as_ref())
                .await
                .wrap_err("creating account")?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        Command::List => {
            let accounts = manager.list_accounts().await;
            println!("{}", serde_json::to_string_pretty(&accounts)?);
        }
        Command::Login { did, pin } => {
            let did = parse_did(&did)?;
            let pin = secret(pin);
            let account = manager
                .switch_account(&did, pin.as_ref())
                .await
                .wrap_err("logging in")?;
            println!("logged in as {} ({})", account.display_name, account.id);
        }
        Command::Logout => {
            manager.logout().await.wrap_err("logging out")?;
            println!("logged out");
        }
        Command::Whoami => match manager.current_account().await {
            Some(account) => println!("{}", serde_json::to_string_pretty(&account)?),
            None => println!("not logged in"),
        },
        Command::Sign {
            challenge,
            external,
            pin,
        } => {
            let account = manager
                .current_account()
                .await
                .ok_or_else(|| eyre!("not logged in"))?;
            let audience = if external {
                Audience::External
            } else {
                Audience::FirstParty
            };
            let pin = secret(pin);
            let signed = ChallengeSigner::new(Arc::clone(&manager))
                .sign_challenge(&account.id, &challenge, audience, pin.as_ref())
                .await
                .wrap_err("signing challenge")?;
            println!("{}", serde_json::to_string_pretty(&signed)?);
        }
        Command::Rename { did, name } => {
            let did = parse_did(&did)?;
            let patch = AccountPatch {
                display_name: Some(name),
                ..AccountPatch::default()
            };
            let account = manager
                .update_account(&did, patch, None)
                .await
                .wrap_err("renaming account")?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
    }
    Ok(())
}

fn parse_did(s: &str) -> eyre::Result<Did> {
    Did::parse(s).map_err(|raw| eyre!("not a DID: {raw}"))
}

fn secret(pin: Option<String>) -> Option<SecretString> {
    pin.map(SecretString::from)
}
