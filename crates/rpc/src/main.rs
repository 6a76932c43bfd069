//! Custody CLI - Main entry point

use clap::{Parser, Subcommand};
use custody_rpc::{commands, AppContext};
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "custody")]
#[command(about = "Multi-signature approval engine for custody funds", long_about = None)]
struct Cli {
    /// Data directory path
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    /// Config file (defaults to <data>/custody.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an outgoing transfer
    Create {
        /// Amount to send
        amount: Decimal,
        /// Destination address
        destination: String,
        /// Source wallet ID
        #[arg(long, default_value = "HOT")]
        wallet: String,
        /// payment, rebalance, withdrawal or emergency
        #[arg(long = "type", default_value = "payment")]
        tx_type: String,
        /// Free-text note (up to 64 characters)
        #[arg(long)]
        memo: Option<String>,
    },

    /// Credit funds to a source wallet
    Deposit {
        wallet: String,
        amount: Decimal,
    },

    /// Wallet balances and reservations
    Balance,

    /// Guardian roster with approval counts
    Guardians,

    /// Issue a challenge for a transaction
    Challenge {
        /// Transaction ID
        tx: String,
    },

    /// Submit a guardian's authenticator code
    Approve {
        tx: String,
        guardian: String,
        code: String,
    },

    /// Execute a transaction that reached quorum
    Execute { tx: String },

    /// Show one transaction
    Status { tx: String },

    /// List transactions
    List {
        /// Only this state (e.g. awaiting_approvals)
        #[arg(long)]
        state: Option<String>,
    },

    /// Expire transactions past their deadline
    Sweep,

    /// Activate emergency mode
    Emergency { guardian: String },

    /// Lift emergency mode
    Lift { guardian: String },

    /// Print a guardian's current authenticator code (development)
    Code {
        guardian: String,
        /// Derive from this transaction's active challenge
        #[arg(long)]
        tx: Option<String>,
    },

    /// Transaction counts per state
    Stats,

    /// Audit log operations
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Run the background expiry sweep until Ctrl-C
    Serve,
}

#[derive(Subcommand)]
enum AuditAction {
    /// Verify the hash chain
    Verify,

    /// Append new records to a JSONL journal directory
    Export {
        #[arg(default_value = "./data/audit")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let ctx = AppContext::new(&cli.data, cli.config.as_deref())?;

    match cli.command {
        Commands::Create {
            amount,
            destination,
            wallet,
            tx_type,
            memo,
        } => {
            commands::create_transfer(&ctx, amount, &destination, &wallet, &tx_type, memo.as_deref())?;
        }

        Commands::Deposit { wallet, amount } => {
            commands::deposit(&ctx, &wallet, amount)?;
        }

        Commands::Balance => {
            commands::balances(&ctx)?;
        }

        Commands::Guardians => {
            commands::guardians(&ctx)?;
        }

        Commands::Challenge { tx } => {
            commands::challenge(&ctx, &tx)?;
        }

        Commands::Approve { tx, guardian, code } => {
            commands::approve(&ctx, &tx, &guardian, &code)?;
        }

        Commands::Execute { tx } => {
            commands::execute(&ctx, &tx).await?;
        }

        Commands::Status { tx } => {
            commands::status(&ctx, &tx)?;
        }

        Commands::List { state } => {
            commands::list(&ctx, state.as_deref())?;
        }

        Commands::Sweep => {
            commands::sweep(&ctx)?;
        }

        Commands::Emergency { guardian } => {
            commands::emergency(&ctx, &guardian)?;
        }

        Commands::Lift { guardian } => {
            commands::lift(&ctx, &guardian)?;
        }

        Commands::Code { guardian, tx } => {
            commands::code(&ctx, &guardian, tx.as_deref())?;
        }

        Commands::Stats => {
            commands::stats(&ctx)?;
        }

        Commands::Audit { action } => match action {
            AuditAction::Verify => {
                commands::audit_verify(&ctx)?;
            }
            AuditAction::Export { dir } => {
                commands::audit_export(&ctx, &dir)?;
            }
        },

        Commands::Serve => {
            commands::serve(&ctx).await?;
        }
    }

    Ok(())
}
