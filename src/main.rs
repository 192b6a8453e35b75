//! token-forge command line
//!
//! Drives the mint orchestrator against an RPC endpoint, or against an
//! in-process ledger with `--dry-run`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solana_sdk::{
    native_token::LAMPORTS_PER_SOL,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use token_forge::config::Config;
use token_forge::ledger::{InMemoryLedger, Ledger, RpcLedger};
use token_forge::metrics::metrics;
use token_forge::orchestrator::{MintOrchestrator, WithdrawOutcome};
use token_forge::tx_builder::layout::compute_layout;
use token_forge::wallet::{load_keypair, KeypairSource, Wallet};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "token-forge.toml", env = "TOKEN_FORGE_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print the metrics registry after the command
    #[arg(long)]
    print_metrics: bool,

    /// Run against a fresh in-process ledger with a throwaway payer
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print size and rent funding for the configured mint
    Layout,
    /// Create the configured mint
    CreateMint {
        /// Keypair file for the new mint; a fresh key is generated otherwise
        #[arg(long)]
        mint_keypair: Option<PathBuf>,
        /// Also initialize the transfer hook's extra-account list
        #[arg(long)]
        init_hook: bool,
    },
    /// Decode a mint and its extensions
    Inspect {
        #[arg(long)]
        mint: String,
    },
    /// Mint supply into an owner's associated token account
    MintTo {
        #[arg(long)]
        mint: String,
        #[arg(long)]
        amount: u64,
        /// Defaults to the payer
        #[arg(long)]
        owner: Option<String>,
    },
    /// Transfer from the payer's account, paying the transfer fee
    Transfer {
        #[arg(long)]
        mint: String,
        /// Destination owner
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Expected fee; the transfer is refused locally if it differs
        #[arg(long)]
        fee: Option<u64>,
    },
    /// Withdraw withheld fees into an owner's associated token account
    WithdrawWithheld {
        #[arg(long)]
        mint: String,
        /// Defaults to the payer
        #[arg(long)]
        destination_owner: Option<String>,
    },
    /// Initialize the transfer hook's extra-account list for a mint
    InitHookAccounts {
        #[arg(long)]
        mint: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs);

    let config = load_config(&args.config)?;
    config.validate().context("Invalid configuration")?;

    let result = if args.dry_run {
        let ledger = InMemoryLedger::new();
        let payer = Keypair::new();
        ledger.airdrop(&payer.pubkey(), 100 * LAMPORTS_PER_SOL);
        if let Some(program) = &config.mint.transfer_hook_program {
            ledger.deploy_program(&parse_pubkey(program)?);
        }
        info!(payer = %payer.pubkey(), "Dry run against in-process ledger");
        run(&config, ledger, Wallet::from_keypair(payer), args.command).await
    } else {
        let wallet = Wallet::load(&config.wallet.source()).context("Failed to load wallet")?;
        info!(wallet = %wallet.pubkey(), rpc = %config.rpc.url, "Using RPC ledger");
        let ledger = RpcLedger::new(
            config.rpc.url.clone(),
            config.rpc.commitment_config()?,
            config.rpc.confirm_timeout(),
        );
        run(&config, ledger, wallet, args.command).await
    };

    if args.print_metrics {
        print!("{}", metrics().render()?);
    }
    result
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "token_forge=debug,info"
    } else {
        "token_forge=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        warn!("Config file '{}' not found, using defaults", path.display());
        dotenvy::dotenv().ok();
        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

fn parse_pubkey(value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).with_context(|| format!("Invalid address '{value}'"))
}

async fn run<L: Ledger>(
    config: &Config,
    ledger: L,
    wallet: Wallet,
    command: Command,
) -> Result<()> {
    let payer = wallet.pubkey();
    let orchestrator = MintOrchestrator::new(ledger, wallet)
        .with_max_accounts_per_tx(config.withdraw.max_accounts_per_tx);

    match command {
        Command::Layout => {
            let mint_config = config.mint.to_mint_configuration(Pubkey::new_unique(), payer)?;
            let layout = compute_layout(orchestrator.ledger(), mint_config.extensions()).await?;
            println!("{}", serde_json::to_string_pretty(&layout)?);
        }
        Command::CreateMint {
            mint_keypair,
            init_hook,
        } => {
            let mint_keypair = match mint_keypair {
                Some(path) => load_keypair(&KeypairSource::File(path))
                    .context("Failed to load mint keypair")?,
                None => Keypair::new(),
            };
            let mint_config = config
                .mint
                .to_mint_configuration(mint_keypair.pubkey(), payer)?;
            let created = orchestrator.create_mint(&mint_config, &mint_keypair).await?;
            println!("mint:      {}", created.mint);
            println!("signature: {}", created.signature);
            if init_hook && config.mint.transfer_hook_program.is_some() {
                let signature = orchestrator.initialize_hook_accounts(&created.mint).await?;
                println!("hook accounts: {signature}");
            }
            print!("{}", orchestrator.inspect_mint(&created.mint).await?);
        }
        Command::Inspect { mint } => {
            print!("{}", orchestrator.inspect_mint(&parse_pubkey(&mint)?).await?);
        }
        Command::MintTo {
            mint,
            amount,
            owner,
        } => {
            let mint = parse_pubkey(&mint)?;
            let owner = owner.as_deref().map(parse_pubkey).transpose()?.unwrap_or(payer);
            let account = orchestrator.ensure_token_account(&mint, &owner).await?;
            let signature = orchestrator.mint_to(&mint, &account, amount).await?;
            println!("minted {amount} to {account}: {signature}");
        }
        Command::Transfer {
            mint,
            to,
            amount,
            fee,
        } => {
            let mint = parse_pubkey(&mint)?;
            let destination_owner = parse_pubkey(&to)?;
            let destination = orchestrator
                .ensure_token_account(&mint, &destination_owner)
                .await?;
            let receipt = orchestrator
                .transfer_with_fee(&mint, orchestrator.payer_keypair(), &destination, amount, fee)
                .await?;
            println!(
                "transferred {} (fee {}, net {}) to {}: {}",
                amount,
                receipt.quote.fee,
                receipt.quote.net_amount(),
                destination,
                receipt.signature
            );
        }
        Command::WithdrawWithheld {
            mint,
            destination_owner,
        } => {
            let mint = parse_pubkey(&mint)?;
            let owner = destination_owner
                .as_deref()
                .map(parse_pubkey)
                .transpose()?
                .unwrap_or(payer);
            let destination = orchestrator.ensure_token_account(&mint, &owner).await?;
            match orchestrator.withdraw_withheld(&mint, &destination).await? {
                WithdrawOutcome::NothingToWithdraw => println!("nothing to withdraw"),
                WithdrawOutcome::Withdrawn {
                    signatures,
                    accounts,
                    total,
                } => {
                    println!("withdrew {total} from {accounts} accounts into {destination}");
                    for signature in signatures {
                        println!("  {signature}");
                    }
                }
            }
        }
        Command::InitHookAccounts { mint } => {
            let signature = orchestrator
                .initialize_hook_accounts(&parse_pubkey(&mint)?)
                .await?;
            println!("hook accounts: {signature}");
        }
    }
    Ok(())
}
