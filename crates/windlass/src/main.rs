#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use tracing_subscriber::prelude::*;

mod amount;
mod blocktime;
mod cli_output;
mod config;
mod doctor;
mod errors;
mod evm;
mod fsutil;
mod gate;
mod generation;
mod paths;
mod positions;
mod queue;
mod resolver;
mod retry;
mod routes;
mod scan;
mod store;
mod tracked;
mod txbuild;
mod vault;
mod venues;
mod wad;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliRoute {
    AaveWsteth,
    AaveWeeth,
    MorphoWsteth,
    MorphoWeeth,
}

impl From<CliRoute> for routes::RouteKey {
    fn from(v: CliRoute) -> Self {
        match v {
            CliRoute::AaveWsteth => Self::AaveWsteth,
            CliRoute::AaveWeeth => Self::AaveWeeth,
            CliRoute::MorphoWsteth => Self::MorphoWsteth,
            CliRoute::MorphoWeeth => Self::MorphoWeeth,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "windlass", version)]
struct Cli {
    /// Wallet address to resolve against (overrides the configured default).
    #[arg(long, global = true)]
    wallet: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve every known position for the wallet into one JSON report.
    Positions,

    /// Read the yield vault: balances, price per share, and APR estimates.
    Vault,

    /// Walk transfer logs for position tokens the wallet currently holds.
    Scan {
        /// Stop once this many token ids are found (defaults to the
        /// wallet's on-chain position count).
        #[arg(long)]
        expected: Option<u64>,
    },

    /// Locate the first block at or after `now - window` by timestamp.
    BlockAt {
        /// Window length in seconds.
        #[arg(long, default_value_t = vault::TRAILING_WINDOW_SECS)]
        window: u64,
    },

    /// Maintain the locally tracked position token ids.
    Track {
        #[command(subcommand)]
        cmd: TrackCommand,
    },

    /// Build unsigned transactions for an external signer.
    Prepare {
        #[command(subcommand)]
        cmd: PrepareCommand,
    },

    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print a quick self-diagnostic report (safe to paste; contains no secrets).
    Doctor {
        /// Emit JSON to stdout (machine-readable).
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum TrackCommand {
    /// Print the tracked token ids, most recently added first.
    List,

    /// Pin a position token id.
    Add { id: u64 },

    /// Unpin a position token id.
    Remove { id: u64 },

    /// Pin every position opened by a past transaction.
    FromTx { tx: String },
}

#[derive(Subcommand, Debug)]
enum PrepareCommand {
    /// Approve the route's aave reserve token for its receiver.
    ApproveCollateral {
        #[arg(long, value_enum)]
        route: CliRoute,

        /// Amount in collateral units, e.g. "1.5".
        #[arg(long)]
        amount: String,
    },

    /// Authorize the morpho receiver to manage the wallet's morpho position.
    Authorize,

    /// Revoke the morpho receiver's authorization.
    Revoke,

    /// Open a position by migrating the wallet's venue collateral and debt.
    Open {
        #[arg(long, value_enum)]
        route: CliRoute,

        /// Principal to borrow, in loan-asset units.
        #[arg(long)]
        principal: String,

        /// Collateral to migrate, in collateral units.
        #[arg(long)]
        collateral: String,
    },

    /// Settle a position and repay its debt.
    Settle {
        /// Position token id.
        #[arg(long)]
        id: u64,

        /// Emit the transaction even when the settle gate reports blockers.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Deposit assets into the vault (preceded by an approval when needed).
    Deposit {
        /// Amount in vault-asset units.
        #[arg(long)]
        amount: String,
    },

    /// Withdraw assets from the vault.
    Withdraw {
        /// Amount in vault-asset units.
        #[arg(long)]
        amount: String,
    },
}

fn init_logging(paths: &paths::WindlassPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("windlass.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// The configuration every networked command sees: the stored file (or
/// its initialized default) with the `--wallet` override applied.
fn load_config(
    paths: &paths::WindlassPaths,
    wallet: Option<&str>,
) -> eyre::Result<config::WindlassConfig> {
    let mut cfg = store::ConfigStore::new(paths).load_or_init_default()?;
    if let Some(addr) = wallet {
        cfg.wallet.address = Some(evm::parse_address(addr).context("parse --wallet")?);
    }
    Ok(cfg)
}

fn parse_positive_amount(s: &str, decimals: u8) -> eyre::Result<alloy::primitives::U256> {
    let amount = amount::parse_amount_ui(s, decimals)?;
    if amount.is_zero() {
        return Err(errors::WindlassError::InvalidInput(format!(
            "amount '{s}' must be greater than zero"
        ))
        .into());
    }
    Ok(amount)
}

async fn run_positions(
    paths: &paths::WindlassPaths,
    cfg: &config::WindlassConfig,
) -> eyre::Result<()> {
    let tracked = tracked::TrackedIds::load(&paths.tracked_ids_path());
    let resolver = resolver::Resolver::new(cfg);
    let pass = resolver.begin().await?;
    let report = resolver::load_positions(&resolver, &pass, cfg, &tracked).await?;
    cli_output::print_positions(&mut std::io::stdout().lock(), &report)
}

async fn run_vault(cfg: &config::WindlassConfig) -> eyre::Result<()> {
    let resolver = resolver::Resolver::new(cfg);
    let pass = resolver.begin().await?;
    let overview = resolver::load_vault_overview(&resolver, &pass, cfg).await?;
    cli_output::print_vault(&mut std::io::stdout().lock(), &overview)
}

async fn run_scan(cfg: &config::WindlassConfig, expected: Option<u64>) -> eyre::Result<()> {
    let resolver = resolver::Resolver::new(cfg);
    let pass = resolver.begin().await?;
    let (wallet, outcome) =
        resolver::scan_wallet_positions(&resolver, &pass, cfg, expected).await?;
    cli_output::print_scan(&mut std::io::stdout().lock(), wallet, pass.latest, &outcome)
}

async fn run_block_at(cfg: &config::WindlassConfig, window: u64) -> eyre::Result<()> {
    let resolver = resolver::Resolver::new(cfg);
    let pass = resolver.begin().await?;
    let start = blocktime::block_at_window_start(&pass.node, pass.latest, window).await?;
    cli_output::print_block_at(&mut std::io::stdout().lock(), window, pass.latest, &start)
}

async fn run_track(
    paths: &paths::WindlassPaths,
    wallet: Option<&str>,
    cmd: TrackCommand,
) -> eyre::Result<()> {
    let mut tracked = tracked::TrackedIds::load(&paths.tracked_ids_path());
    match cmd {
        TrackCommand::List => {}
        TrackCommand::Add { id } => {
            if id == 0 {
                return Err(errors::WindlassError::InvalidInput(
                    "token id must be a positive integer".to_owned(),
                )
                .into());
            }
            if tracked.add(id) {
                tracked.save()?;
            }
        }
        TrackCommand::Remove { id } => {
            if tracked.remove(id) {
                tracked.save()?;
            }
        }
        TrackCommand::FromTx { tx } => {
            let hash = evm::parse_tx_hash(&tx)?;
            let cfg = load_config(paths, wallet)?;
            let market = errors::require_configured(cfg.contracts.market, "contracts.market")?;
            let resolver = resolver::Resolver::new(&cfg);
            let pass = resolver.begin().await?;
            let ids = txbuild::opened_token_ids_from_receipt(&pass.node, market, hash).await?;
            if ids.is_empty() {
                eyre::bail!("transaction {tx} opened no positions on the configured market");
            }
            let mut added = false;
            for id in ids {
                added |= tracked.add(id);
            }
            if added {
                tracked.save()?;
            }
        }
    }
    cli_output::print_tracked_ids(&mut std::io::stdout().lock(), tracked.ids())
}

async fn prepare_approve_collateral(
    cfg: &config::WindlassConfig,
    key: routes::RouteKey,
    amount: &str,
) -> eyre::Result<()> {
    if key.venue() != routes::Venue::Aave {
        return Err(errors::WindlassError::InvalidInput(format!(
            "route {key} has no reserve token to approve; morpho routes use prepare authorize"
        ))
        .into());
    }
    let resolver = resolver::Resolver::new(cfg);
    let pass = resolver.begin().await?;
    let ctx = resolver::load_open_context(&resolver, &pass, cfg, key).await?;
    let Some(reserve_token) = ctx.collateral_reserve_token else {
        eyre::bail!("could not resolve the aave reserve token for {key}");
    };
    let amount = parse_positive_amount(amount, ctx.collateral_decimals)?;
    let display =
        cli_output::amount_display(Some(amount), ctx.collateral_decimals, ctx.route.collateral_symbol);
    let tx = txbuild::approve_collateral_tx(reserve_token, ctx.route.receiver, amount, &display);
    cli_output::print_prepare(&mut std::io::stdout().lock(), &[tx], &[], None)
}

fn prepare_authorization(cfg: &config::WindlassConfig, enable: bool) -> eyre::Result<()> {
    let core = errors::require_configured(cfg.contracts.morpho, "contracts.morpho")?;
    let receiver =
        errors::require_configured(cfg.contracts.morpho_receiver, "contracts.morpho_receiver")?;
    let tx = txbuild::set_authorization_tx(core, receiver, enable);
    cli_output::print_prepare(&mut std::io::stdout().lock(), &[tx], &[], None)
}

async fn prepare_open(
    cfg: &config::WindlassConfig,
    key: routes::RouteKey,
    principal: &str,
    collateral: &str,
) -> eyre::Result<()> {
    let resolver = resolver::Resolver::new(cfg);
    let pass = resolver.begin().await?;
    let ctx = resolver::load_open_context(&resolver, &pass, cfg, key).await?;

    let principal = amount::parse_amount_ui(principal, ctx.loan_decimals)?;
    let collateral_amount = amount::parse_amount_ui(collateral, ctx.collateral_decimals)?;
    if principal.is_zero() || collateral_amount.is_zero() {
        return Err(errors::WindlassError::InvalidInput(
            "principal and collateral must both be greater than zero".to_owned(),
        )
        .into());
    }

    let assessment = gate::assess_open(
        principal,
        ctx.available_liquidity,
        collateral_amount,
        &ctx.conditions,
    );
    if assessment.effective_principal.is_zero() {
        eyre::bail!("principal becomes zero after liquidity cap");
    }
    if assessment.is_blocked() {
        let reasons: Vec<String> = assessment.blockers.iter().map(ToString::to_string).collect();
        eyre::bail!("cannot open a {key} position: {}", reasons.join("; "));
    }

    let callback_data = match ctx.route.venue {
        routes::Venue::Aave => {
            let Some(reserve_token) = ctx.collateral_reserve_token else {
                eyre::bail!("could not resolve the aave reserve token for {key}");
            };
            txbuild::aave_callback_data(ctx.route.collateral_token, reserve_token, collateral_amount)
        }
        routes::Venue::Morpho => {
            let Some(params) = &ctx.morpho_params else {
                eyre::bail!("could not read morpho market params for {key}");
            };
            txbuild::morpho_callback_data(params, collateral_amount)
        }
    };

    let principal_display = cli_output::amount_display(
        Some(assessment.effective_principal),
        ctx.loan_decimals,
        "WETH",
    );
    let collateral_display = cli_output::amount_display(
        Some(collateral_amount),
        ctx.collateral_decimals,
        ctx.route.collateral_symbol,
    );

    let mut notes = Vec::new();
    if assessment.capped {
        notes.push(format!(
            "principal reduced to available liquidity: {principal_display}"
        ));
    }
    if let Some(rate) = ctx.borrow_rate_bps {
        notes.push(format!(
            "current borrow rate: {}",
            wad::format_bps_percent(Some(rate))
        ));
    }

    let suggested = cli_output::SuggestedSizing {
        principal: cli_output::amount_display(
            ctx.venue_debt.map(|debt| debt.min(ctx.available_liquidity)),
            ctx.loan_decimals,
            "WETH",
        ),
        collateral: cli_output::amount_display(
            ctx.venue_collateral.map(gate::suggested_collateral),
            ctx.collateral_decimals,
            ctx.route.collateral_symbol,
        ),
    };

    let route_name = key.to_string();
    let tx = txbuild::open_position_tx(&txbuild::OpenRequest {
        market: ctx.market,
        principal: assessment.effective_principal,
        adapter: ctx.route.adapter,
        receiver: ctx.route.receiver,
        collateral_amount,
        callback_data,
        route_name: &route_name,
        principal_display: &principal_display,
        collateral_display: &collateral_display,
    });
    cli_output::print_prepare(&mut std::io::stdout().lock(), &[tx], &notes, Some(&suggested))
}

async fn prepare_settle(
    paths: &paths::WindlassPaths,
    cfg: &config::WindlassConfig,
    id: u64,
    force: bool,
) -> eyre::Result<()> {
    if id == 0 {
        return Err(errors::WindlassError::InvalidInput(
            "token id must be a positive integer".to_owned(),
        )
        .into());
    }
    let tracked = tracked::TrackedIds::load(&paths.tracked_ids_path());
    let resolver = resolver::Resolver::new(cfg);
    let pass = resolver.begin().await?;
    let ctx = resolver::load_settle_context(&resolver, &pass, cfg, id, tracked.contains(id)).await?;

    let snap = &ctx.snapshot;
    let assessment = gate::assess_settle(
        snap.owner_matches(ctx.wallet),
        snap.is_open(),
        snap.queue.settlement_block(),
    );

    let mut reasons: Vec<String> = Vec::new();
    if !snap.owner_matches(ctx.wallet) {
        reasons.push(format!("wallet does not own position #{id}"));
    }
    if !snap.is_open() {
        let state = snap
            .record
            .map_or_else(|| wad::NOT_AVAILABLE.to_owned(), |r| r.state.to_string());
        let status = snap
            .adapter_view
            .map_or_else(|| wad::NOT_AVAILABLE.to_owned(), |v| v.status.to_string());
        reasons.push(format!(
            "position #{id} is not open (market state: {state}, adapter: {status})"
        ));
    }
    reasons.extend(assessment.blockers.iter().map(ToString::to_string));

    let mut notes = Vec::new();
    if !assessment.can_settle {
        let joined = reasons.join("; ");
        if force {
            notes.push(format!("settle gate overridden by --force: {joined}"));
        } else {
            eyre::bail!("position #{id} is not settleable: {joined}");
        }
    }

    let tx = txbuild::settle_position_tx(ctx.market, id);
    cli_output::print_prepare(&mut std::io::stdout().lock(), &[tx], &notes, None)
}

async fn prepare_deposit(cfg: &config::WindlassConfig, amount: &str) -> eyre::Result<()> {
    let resolver = resolver::Resolver::new(cfg);
    let pass = resolver.begin().await?;
    let gate_view = resolver::load_vault_gate(&resolver, &pass, cfg).await?;

    let amount = parse_positive_amount(amount, gate_view.asset_decimals)?;
    let display = cli_output::amount_display(
        Some(amount),
        gate_view.asset_decimals,
        &gate_view.asset_symbol,
    );

    let mut transactions = Vec::new();
    let mut notes = Vec::new();
    if gate_view.allowance.is_none() {
        notes.push("allowance could not be read; an approval is included in case".to_owned());
    }
    if vault::needs_asset_approval(amount, gate_view.allowance.unwrap_or_default()) {
        transactions.push(txbuild::approve_vault_asset_tx(
            gate_view.asset,
            gate_view.vault,
            amount,
            &display,
        ));
    }
    transactions.push(txbuild::vault_deposit_tx(
        gate_view.wallet,
        gate_view.vault,
        amount,
        &display,
    ));
    cli_output::print_prepare(&mut std::io::stdout().lock(), &transactions, &notes, None)
}

async fn prepare_withdraw(cfg: &config::WindlassConfig, amount: &str) -> eyre::Result<()> {
    let resolver = resolver::Resolver::new(cfg);
    let pass = resolver.begin().await?;
    let gate_view = resolver::load_vault_gate(&resolver, &pass, cfg).await?;

    let amount = parse_positive_amount(amount, gate_view.asset_decimals)?;
    let display = cli_output::amount_display(
        Some(amount),
        gate_view.asset_decimals,
        &gate_view.asset_symbol,
    );
    let tx = txbuild::vault_withdraw_tx(gate_view.wallet, gate_view.vault, amount, &display);
    cli_output::print_prepare(&mut std::io::stdout().lock(), &[tx], &[], None)
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = paths::WindlassPaths::discover()?;
    paths.ensure_private_dirs()?;
    let _log_guard = init_logging(&paths);

    let outcome = match cli.cmd {
        Command::Positions => {
            let cfg = load_config(&paths, cli.wallet.as_deref())?;
            run_positions(&paths, &cfg).await.context("positions failed")
        }
        Command::Vault => {
            let cfg = load_config(&paths, cli.wallet.as_deref())?;
            run_vault(&cfg).await.context("vault failed")
        }
        Command::Scan { expected } => {
            let cfg = load_config(&paths, cli.wallet.as_deref())?;
            run_scan(&cfg, expected).await.context("scan failed")
        }
        Command::BlockAt { window } => {
            let cfg = load_config(&paths, cli.wallet.as_deref())?;
            run_block_at(&cfg, window).await.context("block-at failed")
        }
        Command::Track { cmd } => run_track(&paths, cli.wallet.as_deref(), cmd)
            .await
            .context("track failed"),
        Command::Prepare { cmd } => {
            let cfg = load_config(&paths, cli.wallet.as_deref())?;
            match cmd {
                PrepareCommand::ApproveCollateral { route, amount } => {
                    prepare_approve_collateral(&cfg, route.into(), &amount)
                        .await
                        .context("prepare approve-collateral failed")
                }
                PrepareCommand::Authorize => {
                    prepare_authorization(&cfg, true).context("prepare authorize failed")
                }
                PrepareCommand::Revoke => {
                    prepare_authorization(&cfg, false).context("prepare revoke failed")
                }
                PrepareCommand::Open {
                    route,
                    principal,
                    collateral,
                } => prepare_open(&cfg, route.into(), &principal, &collateral)
                    .await
                    .context("prepare open failed"),
                PrepareCommand::Settle { id, force } => prepare_settle(&paths, &cfg, id, force)
                    .await
                    .context("prepare settle failed"),
                PrepareCommand::Deposit { amount } => prepare_deposit(&cfg, &amount)
                    .await
                    .context("prepare deposit failed"),
                PrepareCommand::Withdraw { amount } => prepare_withdraw(&cfg, &amount)
                    .await
                    .context("prepare withdraw failed"),
            }
        }
        Command::Paths => {
            use std::io::Write as _;
            let s = serde_json::to_string(&serde_json::json!({
              "config_dir": paths.config_dir,
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
            }))
            .context("serialize paths")?;
            writeln!(std::io::stdout().lock(), "{s}").context("write paths")?;
            Ok(())
        }
        Command::Doctor { json } => doctor::run(json).await.context("doctor failed"),
    };

    // Typed failures still get a machine-readable document on stdout; the
    // full context chain goes to stderr through the returned error.
    if let Err(err) = &outcome {
        if let Some(domain) = err.downcast_ref::<errors::WindlassError>() {
            let report = errors::ErrorReport::from(domain.clone());
            cli_output::print_error(&mut std::io::stdout().lock(), &report).ok();
        }
    }
    outcome
}
