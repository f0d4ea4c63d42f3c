//! VLCP Wallet & Contract Gateway entry point.
//!
//! One binary, two roles. `serve` exposes the read-only mirror API over
//! the SQLite store. Every other subcommand opens a wallet session
//! against the injected-provider bridge, drives the VLCP contracts, and
//! mirrors confirmed state into the same store.

mod abi;
mod api;
mod config;
mod context;
mod courses;
mod db;
mod errors;
mod notify;
mod provider;
mod registry;
mod reputation;
mod scholar;
mod session;
#[cfg(test)]
mod testutil;
mod tickets;
mod units;
mod zakat;

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Deployments};
use crate::context::GatewayContext;
use crate::courses::CourseService;
use crate::notify::Notifier;
use crate::provider::{HttpWalletProvider, WalletProvider};
use crate::registry::ContractRegistry;
use crate::reputation::ReputationService;
use crate::scholar::ScholarService;
use crate::session::{network_name, SessionSnapshot, WalletSession};
use crate::tickets::TicketService;
use crate::units::format_units;
use crate::zakat::ZakatService;

#[derive(Parser, Debug)]
#[command(name = "vlcp-gateway")]
#[command(about = "VLCP wallet & contract gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the read-only mirror API
    Serve,
    /// Connect the wallet session and print it
    Connect {
        /// Ask the wallet to switch to this chain id after connecting
        #[arg(long)]
        chain: Option<u64>,
        /// Keep following account and chain changes until Ctrl-C
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
    /// Reputation points
    #[command(subcommand)]
    Reputation(ReputationCmd),
    /// Scholar verification registry
    #[command(subcommand)]
    Scholar(ScholarCmd),
    /// Zakat donation pool
    #[command(subcommand)]
    Zakat(ZakatCmd),
    /// Course catalog and enrollment
    #[command(subcommand)]
    Course(CourseCmd),
    /// Webinar ticket NFTs
    #[command(subcommand)]
    Nft(NftCmd),
}

#[derive(Subcommand, Debug)]
enum ReputationCmd {
    /// Read the connected wallet's reputation total
    Fetch,
    /// Award reputation points to an address
    Award {
        #[arg(long)]
        target: Address,
        #[arg(long)]
        amount: u64,
    },
}

#[derive(Subcommand, Debug)]
enum ScholarCmd {
    /// Check whether the connected wallet is a verified scholar
    Status,
    /// Verify a scholar on chain
    Verify {
        #[arg(long)]
        scholar: Address,
        /// Credential metadata kept in the verification record
        #[arg(long)]
        metadata: String,
    },
    /// Revoke a scholar's verification
    Revoke {
        #[arg(long)]
        scholar: Address,
    },
}

#[derive(Subcommand, Debug)]
enum ZakatCmd {
    /// Show pool totals and the wallet's EDU balance
    Status,
    /// Donate EDU tokens to the pool
    Donate {
        /// Amount in whole EDU, e.g. "2.5"
        #[arg(long)]
        amount: String,
    },
    /// Withdraw EDU from the pool to an address
    Withdraw {
        #[arg(long)]
        to: Address,
        /// Amount in whole EDU
        #[arg(long)]
        amount: String,
    },
}

#[derive(Subcommand, Debug)]
enum CourseCmd {
    /// List active courses from the mirror
    List,
    /// Create a course on chain
    Create {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// IPFS hash of the course content
        #[arg(long, default_value = "")]
        ipfs_hash: String,
        /// Price in whole EDU
        #[arg(long)]
        price: String,
    },
    /// Enroll in a course, paying its price in EDU
    Enroll {
        #[arg(long)]
        course_id: i64,
        /// Course price in smallest token units, as listed
        #[arg(long)]
        price_wei: String,
    },
}

#[derive(Subcommand, Debug)]
enum NftCmd {
    /// List the connected wallet's webinar tickets
    List,
    /// Mint a webinar ticket NFT
    Mint {
        #[arg(long)]
        to: Address,
        #[arg(long)]
        title: String,
        /// Webinar date, RFC 3339
        #[arg(long)]
        date: String,
        #[arg(long, default_value = "")]
        metadata_uri: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (RUST_LOG controls verbosity)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.validate()?;

    match cli.command {
        Command::Serve => serve(&config).await?,
        Command::Connect { chain, watch } => connect(&config, chain, watch).await?,
        Command::Reputation(cmd) => {
            let (ctx, _provider) = open_gateway(&config).await?;
            let service = ReputationService::new(ctx);
            match cmd {
                ReputationCmd::Fetch => {
                    let points = service.refresh().await?;
                    println!("{points} reputation points");
                }
                ReputationCmd::Award { target, amount } => {
                    let receipt = service.award(target, amount).await?;
                    info!(
                        "✓ Awarded {amount} reputation points to {target} (tx {})",
                        receipt.tx_hash
                    );
                }
            }
        }
        Command::Scholar(cmd) => {
            let (ctx, _provider) = open_gateway(&config).await?;
            let service = ScholarService::new(ctx);
            match cmd {
                ScholarCmd::Status => {
                    let verified = service.check().await?;
                    println!(
                        "{}",
                        if verified {
                            "verified scholar"
                        } else {
                            "not verified"
                        }
                    );
                }
                ScholarCmd::Verify { scholar, metadata } => {
                    let receipt = service.verify(scholar, &metadata).await?;
                    info!("✓ Scholar {scholar} verified (tx {})", receipt.tx_hash);
                }
                ScholarCmd::Revoke { scholar } => {
                    let receipt = service.revoke(scholar).await?;
                    info!(
                        "✓ Scholar {scholar} verification revoked (tx {})",
                        receipt.tx_hash
                    );
                }
            }
        }
        Command::Zakat(cmd) => {
            let (ctx, _provider) = open_gateway(&config).await?;
            let service = ZakatService::new(ctx);
            match cmd {
                ZakatCmd::Status => {
                    let summary = service.refresh().await?;
                    println!("your donations   {} EDU", summary.user_donations);
                    println!("pool total       {} EDU", summary.total_donations);
                    println!("EDU balance      {}", summary.token_balance);
                }
                ZakatCmd::Donate { amount } => {
                    let receipt = service.donate(&amount).await?;
                    info!(
                        "✓ Donated {amount} EDU to the zakat pool (tx {})",
                        receipt.tx_hash
                    );
                }
                ZakatCmd::Withdraw { to, amount } => {
                    let receipt = service.withdraw(to, &amount).await?;
                    info!("✓ Withdrew {amount} EDU to {to} (tx {})", receipt.tx_hash);
                }
            }
        }
        Command::Course(cmd) => {
            let (ctx, _provider) = open_gateway(&config).await?;
            let service = CourseService::new(ctx);
            match cmd {
                CourseCmd::List => {
                    let courses = service.refresh().await?;
                    if courses.is_empty() {
                        println!("no active courses");
                    }
                    for course in courses {
                        let id = course
                            .contract_course_id
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "?".to_string());
                        println!(
                            "#{id} {} ({} EDU){}",
                            course.title,
                            course.price_display,
                            if course.blockchain_created {
                                ""
                            } else {
                                " [off-chain]"
                            },
                        );
                    }
                }
                CourseCmd::Create {
                    title,
                    description,
                    ipfs_hash,
                    price,
                } => {
                    let receipt = service
                        .create(&title, &description, &ipfs_hash, &price)
                        .await?;
                    info!("✓ Course \"{title}\" created (tx {})", receipt.tx_hash);
                }
                CourseCmd::Enroll {
                    course_id,
                    price_wei,
                } => {
                    let receipt = service.enroll(course_id, &price_wei).await?;
                    info!("✓ Enrolled in course {course_id} (tx {})", receipt.tx_hash);
                }
            }
        }
        Command::Nft(cmd) => {
            let (ctx, _provider) = open_gateway(&config).await?;
            let service = TicketService::new(ctx);
            match cmd {
                NftCmd::List => {
                    let tickets = service.refresh().await?;
                    if tickets.is_empty() {
                        println!("no webinar tickets");
                    }
                    for ticket in tickets {
                        let date = ticket
                            .webinar_date
                            .map(|d| format!(" ({d})"))
                            .unwrap_or_default();
                        println!("#{} {}{date}", ticket.token_id, ticket.webinar_title);
                    }
                }
                NftCmd::Mint {
                    to,
                    title,
                    date,
                    metadata_uri,
                } => {
                    let receipt = service.mint(to, &title, &date, &metadata_uri).await?;
                    info!("✓ Webinar ticket minted to {to} (tx {})", receipt.tx_hash);
                }
            }
        }
    }

    Ok(())
}

/// Run the mirror REST API. Read-only; writes happen through the wallet
/// subcommands and land in the same database.
async fn serve(config: &Config) -> anyhow::Result<()> {
    let pool = db::init_pool(&config.database_url).await?;
    let state = Arc::new(api::ApiState { pool });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/courses", get(api::get_courses))
        .route("/profiles/:address", get(api::get_profile))
        .route(
            "/profiles/:address/verifications",
            get(api::get_verifications),
        )
        .route("/profiles/:address/nfts", get(api::get_nfts))
        .route("/profiles/:address/donations", get(api::get_donations))
        .route("/profiles/:address/enrollments", get(api::get_enrollments))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("Mirror API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Connect and print the session; with `--watch`, keep following wallet
/// changes until interrupted.
async fn connect(config: &Config, chain: Option<u64>, watch: bool) -> anyhow::Result<()> {
    let (ctx, provider) = open_gateway(config).await?;

    if let Some(target) = chain {
        if ctx.session.snapshot().await.chain_id != Some(target) {
            ctx.session.switch_chain(target).await?;
            ctx.session.refresh().await?;
        }
    }
    print_session(&ctx.session.snapshot().await);

    if !watch {
        return Ok(());
    }

    let _pump = HttpWalletProvider::spawn_event_pump(
        provider,
        Duration::from_secs(config.session_poll_secs),
    );
    let _watcher = ctx.session.spawn_watcher();
    let mut changes = ctx.session.subscribe();

    info!("Watching for wallet changes; Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(snapshot) => print_session(&snapshot),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

/// Build the full gateway: provider bridge, session, contract registry,
/// and mirror pool. Fails if the wallet grants no account, since every
/// caller needs one to act.
async fn open_gateway(
    config: &Config,
) -> anyhow::Result<(Arc<GatewayContext>, Arc<HttpWalletProvider>)> {
    let provider = Arc::new(HttpWalletProvider::detect(config)?);
    let wallet: Arc<dyn WalletProvider> = provider.clone();

    let notifier = Notifier::default();
    let session = Arc::new(WalletSession::new(wallet.clone(), notifier.clone()));

    let deployments = Deployments::load(&config.deployments_file)?;
    if deployments.is_empty() {
        warn!(
            "No contract deployments in {}; contract operations will report the missing contract",
            config.deployments_file
        );
    }
    let registry = ContractRegistry::new(
        wallet,
        deployments,
        Duration::from_secs(config.receipt_poll_secs),
    );

    let pool = db::init_pool(&config.database_url).await?;

    let snapshot = session.connect().await?;
    if !snapshot.is_connected() {
        anyhow::bail!("wallet returned no accounts; unlock the wallet bridge and retry");
    }

    Ok((
        Arc::new(GatewayContext {
            session,
            registry,
            pool,
            notifier,
        }),
        provider,
    ))
}

fn print_session(snapshot: &SessionSnapshot) {
    match snapshot.account {
        Some(account) => {
            let chain_id = snapshot.chain_id.unwrap_or_default();
            println!("account   {account}");
            println!("network   {} (chain {chain_id})", network_name(chain_id));
            if let Some(balance) = snapshot.balance {
                println!("balance   {}", format_units(balance, 18));
            }
            if !snapshot.network_supported {
                println!("warning   unsupported network");
            }
        }
        None => println!("wallet disconnected"),
    }
}
