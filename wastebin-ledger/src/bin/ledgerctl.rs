//! Operator CLI for the wastebin ledger
//!
//! Opens the ledger store, runs one operation, prints the result as JSON.

use anyhow::Context;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;
use wastebin_ledger::{Config, Ledger, User};

#[derive(Parser)]
#[command(name = "ledgerctl")]
#[command(about = "Smart bin deposit, points and reward ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (defaults to environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the RocksDB data directory
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a bin
    CreateBin {
        /// Capacity in weight units
        capacity: Decimal,

        /// Initial weight
        #[arg(long, default_value = "0")]
        weight: Decimal,
    },

    /// List bins
    ListBins,

    /// Replace a bin's capacity and weight
    UpdateBin {
        /// Bin ID
        id: Uuid,
        /// New capacity
        capacity: Decimal,
        /// New current weight
        weight: Decimal,
    },

    /// Delete a bin
    DeleteBin {
        /// Bin ID
        id: Uuid,
    },

    /// Record a deposit into a bin
    Deposit {
        /// Bin ID
        bin_id: Uuid,
        /// Deposited weight
        weight: Decimal,
    },

    /// List deposits
    ListDeposits {
        /// Only deposits into this bin
        #[arg(long)]
        bin: Option<Uuid>,
    },

    /// Register a user
    RegisterUser {
        /// Email address
        email: String,
        /// Password
        password: String,
    },

    /// List users
    ListUsers,

    /// Delete a user
    DeleteUser {
        /// Email address
        email: String,
    },

    /// Check a user's credential
    VerifyCredentials {
        /// Email address
        email: String,
        /// Password
        password: String,
    },

    /// Credit points to a user
    GrantPoints {
        /// Email address
        email: String,
        /// Points to credit
        points: u64,
        /// Replay-safe key for this grant
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Remove points from a user
    DebitPoints {
        /// Email address
        email: String,
        /// Points to remove
        points: u64,
    },

    /// Redeem points for a reward
    Redeem {
        /// Email address
        email: String,
        /// Points the reward costs
        points_required: u64,
        /// Value credited to the user
        amount: Decimal,
    },

    /// List rewards
    ListRewards {
        /// Only rewards of this user
        #[arg(long)]
        email: Option<String>,
    },

    /// Show a user's points balance
    GetPoints {
        /// Email address
        email: String,
    },

    /// Show approximate record counts
    Stats,
}

/// User as shown to operators, without the credential hash
#[derive(Serialize)]
struct UserView {
    id: Uuid,
    email: String,
    points: u64,
    amount: Decimal,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email.to_string(),
            points: user.points,
            amount: user.amount,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{}", out);
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::from_env()?,
    };

    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let ledger = Ledger::open(config).await.context("Failed to open ledger")?;

    match cli.command {
        Commands::CreateBin { capacity, weight } => {
            print_json(&ledger.create_bin(capacity, weight).await?)?;
        }
        Commands::ListBins => {
            print_json(&ledger.list_bins().await?)?;
        }
        Commands::UpdateBin {
            id,
            capacity,
            weight,
        } => {
            print_json(&ledger.update_bin(id, capacity, weight).await?)?;
        }
        Commands::DeleteBin { id } => {
            ledger.delete_bin(id).await?;
            print_json(&serde_json::json!({ "deleted": id }))?;
        }
        Commands::Deposit { bin_id, weight } => {
            print_json(&ledger.record_deposit(bin_id, weight).await?)?;
        }
        Commands::ListDeposits { bin } => {
            let deposits = match bin {
                Some(bin_id) => ledger.list_bin_deposits(bin_id).await?,
                None => ledger.list_deposits().await?,
            };
            print_json(&deposits)?;
        }
        Commands::RegisterUser { email, password } => {
            let user = ledger.register_user(&email, &password).await?;
            print_json(&UserView::from(user))?;
        }
        Commands::ListUsers => {
            let users: Vec<UserView> = ledger
                .list_users()
                .await?
                .into_iter()
                .map(UserView::from)
                .collect();
            print_json(&users)?;
        }
        Commands::DeleteUser { email } => {
            ledger.delete_user(&email).await?;
            print_json(&serde_json::json!({ "deleted": email }))?;
        }
        Commands::VerifyCredentials { email, password } => {
            let user = ledger.verify_credentials(&email, &password).await?;
            print_json(&UserView::from(user))?;
        }
        Commands::GrantPoints {
            email,
            points,
            idempotency_key,
        } => {
            let balance = ledger
                .grant_points(&email, points, idempotency_key.as_deref())
                .await?;
            print_json(&balance)?;
        }
        Commands::DebitPoints { email, points } => {
            print_json(&ledger.debit_points(&email, points).await?)?;
        }
        Commands::Redeem {
            email,
            points_required,
            amount,
        } => {
            print_json(&ledger.redeem(&email, points_required, amount).await?)?;
        }
        Commands::ListRewards { email } => {
            let rewards = match email {
                Some(email) => ledger.list_user_rewards(&email).await?,
                None => ledger.list_rewards().await?,
            };
            print_json(&rewards)?;
        }
        Commands::GetPoints { email } => {
            let points = ledger.get_points(&email).await?;
            print_json(&serde_json::json!({ "email": email, "points": points }))?;
        }
        Commands::Stats => {
            print_json(&ledger.stats()?)?;
        }
    }

    Ok(())
}
