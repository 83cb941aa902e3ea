use crate::errors::WindlassError;
use crate::{config::WindlassConfig, paths::WindlassPaths};
use eyre::Context as _;
use std::{fs, path::PathBuf, str::FromStr as _};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment variable overrides to the config.
pub fn apply_env_overrides(cfg: &mut WindlassConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("WINDLASS_RPC_URL", |v| {
        v.clone_into(&mut cfg.rpc.url);
    });
    apply_env("WINDLASS_WALLET", |v| {
        if let Ok(addr) = alloy::primitives::Address::from_str(v) {
            cfg.wallet.address = Some(addr);
        }
    });
    if let Ok(v) = std::env::var("WINDLASS_CHAIN_ID") {
        if let Ok(n) = v.trim().parse::<u64>() {
            if n > 0 {
                cfg.rpc.chain_id = n;
            }
        }
    }
}

impl ConfigStore {
    pub fn new(paths: &WindlassPaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<WindlassConfig> {
        if !self.path.exists() {
            let mut cfg = WindlassConfig::default();
            apply_env_overrides(&mut cfg);
            cfg.normalize();
            self.save(&cfg)?;
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: WindlassConfig =
            toml::from_str(&s).map_err(|e| WindlassError::Decode(format!("config.toml: {e}")))?;
        apply_env_overrides(&mut cfg);
        cfg.normalize();
        Ok(cfg)
    }

    pub fn save(&self, cfg: &WindlassConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_private_atomic(&self.path, &s).context("write config.toml")?;
        Ok(())
    }
}
