// [apps/gateway/src/bin/hounfour-admin.rs]
//! Operational CLI for the gateway's durable state: ledger recomputation/
//! inspection and fencing-token diagnostics. Parallel to the teacher's
//! `seed`/`migrator` style bins — a thin `clap` front end over the same
//! component crates the gateway process itself uses.

use clap::{Parser, Subcommand};
use hounfour_gateway::GatewayConfig;
use hounfour_gateway_ledger::{Ledger, LedgerConfig};
use hounfour_gateway_shared_store::{LocalSharedStore, SharedStore};

#[derive(Parser)]
#[command(name = "hounfour-admin", about = "Operational tooling for the Hounfour gateway's durable state")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ledger inspection and recomputation.
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
    /// Fencing-token diagnostics.
    Fencing {
        #[command(subcommand)]
        action: FencingAction,
    },
}

#[derive(Subcommand)]
enum LedgerAction {
    /// Recompute a tenant's running totals from its NDJSON ledger file.
    Recompute { tenant: String },
    /// Print every ledger entry recorded for a tenant.
    Scan { tenant: String },
}

#[derive(Subcommand)]
enum FencingAction {
    /// Issue and report the next fencing token for an environment.
    ///
    /// Only the in-process `LocalSharedStore` fallback is wired (§5), so
    /// this reads against a fresh store scoped to this process — useful
    /// for exercising the fencing primitive, not for inspecting state a
    /// live gateway process is holding. A Redis-backed `SharedStore`
    /// would make this command meaningful across processes.
    Inspect { environment: String },
}

#[tokio::main]
async fn main() {
    hounfour_gateway_telemetry::init_tracing("hounfour-admin");
    let cli = Cli::parse();

    match cli.command {
        Commands::Ledger { action } => run_ledger(action).await,
        Commands::Fencing { action } => run_fencing(action).await,
    }
}

fn ledger_for_config() -> Ledger {
    let config = GatewayConfig::from_env().unwrap_or_else(|err| {
        eprintln!("warning: falling back to default ledger path, config load failed: {err}");
        GatewayConfig {
            node_env: "development".to_string(),
            jwt_algorithm: hounfour_gateway::config::JwtAlgorithm::Es256,
            cheval_hmac_secret: Vec::new(),
            cheval_hmac_secret_prev: None,
            redis_url: None,
            otlp_endpoint: None,
            arrakis_billing_url: None,
            usd_usdc_exchange_rate: 1.0,
            beta_bypass_addresses: Vec::new(),
            budgets: Default::default(),
            ledger_base_dir: "./ledger-data".into(),
            checkpoint_path: "./ledger-data/checkpoint.json".into(),
        }
    });
    Ledger::new(LedgerConfig {
        base_dir: config.ledger_base_dir,
        ..Default::default()
    })
}

async fn run_ledger(action: LedgerAction) {
    let ledger = ledger_for_config();
    match action {
        LedgerAction::Recompute { tenant } => match ledger.recompute(&tenant).await {
            Ok(totals) => println!(
                "tenant={tenant} entries={} total_cost_micro={}",
                totals.entry_count, totals.total_cost_micro
            ),
            Err(err) => {
                eprintln!("recompute failed for {tenant}: {err}");
                std::process::exit(1);
            }
        },
        LedgerAction::Scan { tenant } => match ledger.scan_entries(&tenant).await {
            Ok(entries) => {
                for entry in entries {
                    println!(
                        "{} {} {}:{} total_cost_micro={}",
                        entry.timestamp, entry.trace_id, entry.provider, entry.model, entry.total_cost_micro
                    );
                }
            }
            Err(err) => {
                eprintln!("scan failed for {tenant}: {err}");
                std::process::exit(1);
            }
        },
    }
}

async fn run_fencing(action: FencingAction) {
    match action {
        FencingAction::Inspect { environment } => {
            let store = LocalSharedStore::new();
            match store.fence_acquire(&environment).await {
                Ok(token) => println!("environment={environment} next_token={}", token.value()),
                Err(err) => {
                    eprintln!("fence_acquire failed for {environment}: {err}");
                    std::process::exit(1);
                }
            }
        }
    }
}
