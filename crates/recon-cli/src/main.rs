use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use recon_authz::Role;
use rust_decimal::Decimal;

#[derive(Parser)]
#[command(name = "recon")]
#[command(about = "Card reconciliation engine operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Match run lifecycle commands
    Run {
        #[command(subcommand)]
        cmd: RunCmd,
    },

    /// Ruleset administration
    Ruleset {
        #[command(subcommand)]
        cmd: RulesetCmd,
    },

    /// Audit trail inspection
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum RunCmd {
    /// Start a matching run for a business date.
    Start {
        #[arg(long)]
        business_date: NaiveDate,
        #[arg(long)]
        scope_filter: Option<String>,
        /// Operator login recorded as the run's creator.
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Show the latest run status for a business date.
    Status {
        #[arg(long)]
        business_date: NaiveDate,
    },
}

#[derive(Subcommand)]
enum RulesetCmd {
    /// List all rulesets, most recent first.
    List,
    /// Activate a new ruleset version.
    Put {
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        amount_tolerance: Decimal,
        #[arg(long)]
        date_window_days: i32,
        #[arg(long)]
        score_threshold: f64,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Re-verify the hash chain over every audit event.
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let cli = Cli::parse();

    // Every subcommand here is an operational action run by an operator
    // with shell access; it runs as admin rather than resolving an
    // `X-User`-style login, which only exists at the HTTP boundary.
    let admin_roles = [Role::Admin];

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = recon_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = recon_db::status(&pool).await?;
                    println!("db_ok={} has_txns_table={}", s.ok, s.has_txns_table);
                }
                DbCmd::Migrate => {
                    recon_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Run { cmd } => {
            let pool = recon_db::connect_from_env().await?;
            match cmd {
                RunCmd::Start { business_date, scope_filter, actor } => {
                    let outcome = recon_db::runs::run_matching(
                        &pool,
                        &actor,
                        None,
                        &admin_roles,
                        business_date,
                        scope_filter,
                    )
                    .await?;
                    println!("run_id={}", outcome.run_id);
                    println!("ruleset_version={}", outcome.ruleset_version);
                    println!("matches_created={}", outcome.matches_created);
                    println!("exceptions_created={}", outcome.exceptions_created);
                }
                RunCmd::Status { business_date } => {
                    match recon_db::runs::latest_run_status(&pool, &admin_roles, business_date).await? {
                        Some(run) => {
                            println!("run_id={}", run.id);
                            println!("status={}", run.status.as_str());
                            println!("ruleset_version={}", run.ruleset_version);
                        }
                        None => println!("no run found for {business_date}"),
                    }
                }
            }
        }

        Commands::Ruleset { cmd } => {
            let pool = recon_db::connect_from_env().await?;
            match cmd {
                RulesetCmd::List => {
                    let rulesets = recon_db::rulesets::get_rulesets(&pool, &admin_roles).await?;
                    for r in rulesets {
                        println!(
                            "{} active={} amount_tolerance={} date_window_days={} score_threshold={}",
                            r.version, r.is_active, r.payload.amount_tolerance, r.payload.date_window_days,
                            r.payload.score_threshold
                        );
                    }
                }
                RulesetCmd::Put { version, amount_tolerance, date_window_days, score_threshold } => {
                    let payload = recon_schemas::RulesetPayload {
                        amount_tolerance,
                        date_window_days,
                        score_threshold,
                    };
                    let ruleset = recon_db::rulesets::put_ruleset(&pool, &admin_roles, version, payload).await?;
                    println!("activated version={}", ruleset.version);
                }
            }
        }

        Commands::Audit { cmd } => {
            let pool = recon_db::connect_from_env().await?;
            match cmd {
                AuditCmd::Verify => {
                    match recon_db::audit::verify_chain(&pool).await? {
                        recon_audit::VerifyResult::Valid { rows } => {
                            println!("valid=true rows_checked={rows}");
                        }
                        recon_audit::VerifyResult::Broken { index, reason } => {
                            println!("valid=false broken_at_index={index} reason={reason}");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
