use crate::config::WindlassConfig;
use crate::evm::EvmNode;
use crate::paths::WindlassPaths;
use crate::routes::{resolve_route, RouteKey};
use crate::store;
use crate::tracked::TrackedIds;
use eyre::Context as _;
use serde_json::json;
use std::{fs, path::Path, path::PathBuf, time::Duration};

const RPC_PROBE_TIMEOUT: Duration = Duration::from_secs(8);

fn config_toml_path(paths: &WindlassPaths) -> PathBuf {
    paths.config_dir.join("config.toml")
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

fn try_parse_config(path: &Path) -> eyre::Result<WindlassConfig> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WindlassConfig = toml::from_str(&s).context("parse config.toml")?;
    Ok(cfg)
}

/// Deployment slots every command surface depends on. Infrastructure
/// with mainnet defaults is not listed.
fn missing_contracts(cfg: &WindlassConfig) -> Vec<&'static str> {
    let c = &cfg.contracts;
    let slots = [
        (c.vault, "contracts.vault"),
        (c.market, "contracts.market"),
        (c.wsteth_adapter, "contracts.wsteth_adapter"),
        (c.weeth_adapter, "contracts.weeth_adapter"),
        (c.aave_receiver, "contracts.aave_receiver"),
        (c.morpho_receiver, "contracts.morpho_receiver"),
    ];
    slots
        .into_iter()
        .filter_map(|(slot, key)| slot.is_none().then_some(key))
        .collect()
}

/// Per-route readiness, judged from configuration alone.
fn route_states(cfg: &WindlassConfig) -> Vec<(RouteKey, String)> {
    RouteKey::ALL
        .into_iter()
        .map(|key| {
            let status = match resolve_route(cfg, key) {
                Ok(_) => "ok".to_owned(),
                Err(e) => e.to_string(),
            };
            (key, status)
        })
        .collect()
}

struct PathsReport {
    config_dir: PathBuf,
    data_dir: PathBuf,
    log_file: PathBuf,
}

struct ConfigReport {
    path: PathBuf,
    exists: bool,
    parse_ok: bool,
    error: Option<String>,
    wallet_configured: bool,
    missing_contracts: Vec<&'static str>,
}

struct RpcReport {
    url: String,
    fallback_count: usize,
    expected_chain_id: u64,
    reachable: bool,
    latest_block: Option<u64>,
    note: Option<String>,
}

struct TrackedReport {
    path: PathBuf,
    exists: bool,
    count: usize,
}

struct DoctorReport {
    version: &'static str,
    paths: PathsReport,
    config: ConfigReport,
    routes: Vec<(RouteKey, String)>,
    rpc: RpcReport,
    tracked: TrackedReport,
    env: serde_json::Value,
}

async fn probe_rpc(cfg: &WindlassConfig) -> (bool, Option<u64>, Option<String>) {
    let node = EvmNode::from_config(&cfg.rpc);
    match tokio::time::timeout(RPC_PROBE_TIMEOUT, node.connect()).await {
        Ok(Ok((_client, block))) => (true, Some(block.number), None),
        Ok(Err(e)) => (false, None, Some(format!("connect failed: {e}"))),
        Err(_) => (false, None, Some("connect timed out".to_owned())),
    }
}

async fn collect(paths: &WindlassPaths) -> eyre::Result<DoctorReport> {
    let config_path = config_toml_path(paths);
    let config_exists = config_path.exists();
    let (config_ok, config_err, file_cfg) = if config_exists {
        match try_parse_config(&config_path) {
            Ok(cfg) => (true, None, Some(cfg)),
            Err(e) => (false, Some(format!("{e:#}")), None),
        }
    } else {
        (false, None, None)
    };

    // Effective view: file (or defaults) plus env overrides, the same
    // way commands see it, but without writing anything.
    let mut cfg = file_cfg.unwrap_or_default();
    store::apply_env_overrides(&mut cfg);
    cfg.normalize();

    let tracked_path = paths.tracked_ids_path();
    let tracked_exists = tracked_path.exists();
    let tracked_count = TrackedIds::load(&tracked_path).ids().len();

    let (rpc_reachable, latest_block, rpc_note) = probe_rpc(&cfg).await;

    let env = json!({
      "WINDLASS_CONFIG_DIR": env_opt("WINDLASS_CONFIG_DIR"),
      "WINDLASS_DATA_DIR": env_opt("WINDLASS_DATA_DIR"),
      "WINDLASS_RPC_URL": env_opt("WINDLASS_RPC_URL"),
      "WINDLASS_WALLET": env_opt("WINDLASS_WALLET"),
      "WINDLASS_CHAIN_ID": env_opt("WINDLASS_CHAIN_ID"),
    });

    Ok(DoctorReport {
        version: env!("CARGO_PKG_VERSION"),
        paths: PathsReport {
            config_dir: paths.config_dir.clone(),
            data_dir: paths.data_dir.clone(),
            log_file: paths.log_file.clone(),
        },
        config: ConfigReport {
            path: config_path,
            exists: config_exists,
            parse_ok: config_ok,
            error: config_err,
            wallet_configured: cfg.wallet.address.is_some(),
            missing_contracts: missing_contracts(&cfg),
        },
        routes: route_states(&cfg),
        rpc: RpcReport {
            url: cfg.rpc.url.clone(),
            fallback_count: cfg.rpc.fallback_urls.len(),
            expected_chain_id: cfg.rpc.chain_id,
            reachable: rpc_reachable,
            latest_block,
            note: rpc_note,
        },
        tracked: TrackedReport {
            path: tracked_path,
            exists: tracked_exists,
            count: tracked_count,
        },
        env,
    })
}

fn print_json(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(&json!({
      "ok": true,
      "version": r.version,
      "paths": {
        "config_dir": r.paths.config_dir,
        "data_dir": r.paths.data_dir,
        "log_file": r.paths.log_file,
      },
      "config": {
        "path": r.config.path,
        "exists": r.config.exists,
        "parse_ok": r.config.parse_ok,
        "error": r.config.error,
        "wallet_configured": r.config.wallet_configured,
        "missing_contracts": r.config.missing_contracts,
      },
      "routes": r
          .routes
          .iter()
          .map(|(key, status)| json!({"route": key.to_string(), "status": status}))
          .collect::<Vec<_>>(),
      "rpc": {
        "url": r.rpc.url,
        "fallback_count": r.rpc.fallback_count,
        "expected_chain_id": r.rpc.expected_chain_id,
        "reachable": r.rpc.reachable,
        "latest_block": r.rpc.latest_block,
        "note": r.rpc.note,
      },
      "tracked": {
        "path": r.tracked.path,
        "exists": r.tracked.exists,
        "count": r.tracked.count,
      },
      "env": r.env,
      "hints": [
        "Fill the addresses listed in config.missing_contracts before using positions, vault, or prepare.",
        "Set wallet.address (or WINDLASS_WALLET) so positions and prepare know whose state to resolve.",
        "Positions opened before tracking started can be added with: windlass track from-tx <hash>.",
      ]
    }))
    .context("serialize doctor json")?;
    writeln!(out, "{s}").context("write doctor json")?;
    Ok(())
}

fn print_human(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    writeln!(out, "Windlass doctor (v{})", r.version).context("write header")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Paths:").context("write paths header")?;
    writeln!(out, "  config_dir: {}", r.paths.config_dir.display()).context("write paths")?;
    writeln!(out, "  data_dir:   {}", r.paths.data_dir.display()).context("write paths")?;
    writeln!(out, "  log_file:   {}", r.paths.log_file.display()).context("write paths")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Config:").context("write config header")?;
    writeln!(out, "  config.toml: {}", r.config.path.display()).context("write config")?;
    if !r.config.exists {
        writeln!(out, "  status: missing (will be created on first run)")
            .context("write config")?;
    } else if r.config.parse_ok {
        writeln!(out, "  status: ok").context("write config")?;
    } else {
        writeln!(out, "  status: parse failed").context("write config")?;
        if let Some(e) = &r.config.error {
            let first = e.lines().next().unwrap_or("parse error");
            writeln!(out, "  error: {first}").context("write config")?;
        }
    }
    writeln!(out, "  wallet_configured: {}", r.config.wallet_configured)
        .context("write config")?;
    if r.config.missing_contracts.is_empty() {
        writeln!(out, "  contracts: all required slots set").context("write config")?;
    } else {
        writeln!(out, "  contracts missing:").context("write config")?;
        for key in &r.config.missing_contracts {
            writeln!(out, "    - {key}").context("write config")?;
        }
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Routes:").context("write routes header")?;
    for (key, status) in &r.routes {
        writeln!(out, "  {key}: {status}").context("write routes")?;
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "RPC:").context("write rpc header")?;
    writeln!(out, "  url: {}", r.rpc.url).context("write rpc")?;
    writeln!(out, "  fallbacks: {}", r.rpc.fallback_count).context("write rpc")?;
    writeln!(out, "  expected_chain_id: {}", r.rpc.expected_chain_id).context("write rpc")?;
    writeln!(out, "  reachable: {}", r.rpc.reachable).context("write rpc")?;
    if let Some(block) = r.rpc.latest_block {
        writeln!(out, "  latest_block: {block}").context("write rpc")?;
    }
    if let Some(note) = &r.rpc.note {
        writeln!(out, "  note: {note}").context("write rpc")?;
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Tracked positions:").context("write tracked header")?;
    writeln!(out, "  file: {}", r.tracked.path.display()).context("write tracked")?;
    writeln!(out, "  exists: {}", r.tracked.exists).context("write tracked")?;
    writeln!(out, "  count: {}", r.tracked.count).context("write tracked")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Env:").context("write env header")?;
    for key in [
        "WINDLASS_CONFIG_DIR",
        "WINDLASS_DATA_DIR",
        "WINDLASS_RPC_URL",
        "WINDLASS_WALLET",
        "WINDLASS_CHAIN_ID",
    ] {
        writeln!(
            out,
            "  {key}: {:?}",
            r.env.get(key).and_then(|v| v.as_str())
        )
        .context("write env")?;
    }
    Ok(())
}

pub async fn run(as_json: bool) -> eyre::Result<()> {
    let paths = WindlassPaths::discover()?;
    let report = collect(&paths).await.context("collect doctor report")?;
    let mut out = std::io::stdout().lock();
    if as_json {
        print_json(&mut out, &report)?;
    } else {
        print_human(&mut out, &report)?;
    }
    Ok(())
}
