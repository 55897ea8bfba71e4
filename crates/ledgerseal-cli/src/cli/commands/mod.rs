pub mod admin;
pub mod history;
pub mod keygen;
pub mod registry;
pub mod sign;
pub mod verify;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ledgerseal_core::{Identity, TrustConfig, TrustService};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::args::{Cli, Command};
use crate::exit_codes::SUCCESS;

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub actor: Option<String>,
}

impl GlobalOpts {
    fn load_config(&self) -> Result<TrustConfig> {
        let mut config = TrustConfig::load(self.config.as_deref())?;
        if let Some(dir) = &self.data_dir {
            config = config.with_data_dir(dir);
        }
        Ok(config)
    }

    pub fn open_service(&self) -> Result<TrustService> {
        let config = self.load_config()?;
        tracing::debug!(mode = %config.trust_policy_mode.as_str(), "opening trust service");
        Ok(TrustService::open(config)?)
    }

    /// The acting identity; admin-gated commands cannot run anonymously.
    pub fn identity(&self) -> Result<Identity> {
        match self.actor.as_deref().map(str::trim) {
            Some(actor) if !actor.is_empty() => Ok(Identity::new(actor)),
            _ => anyhow::bail!("this command needs an actor: pass --as or set LEDGERSEAL_ACTOR"),
        }
    }
}

pub async fn dispatch(cli: Cli) -> Result<i32> {
    let opts = GlobalOpts {
        config: cli.config,
        data_dir: cli.data_dir,
        actor: cli.actor,
    };

    match cli.cmd {
        Command::Keygen(args) => keygen::run(args),
        Command::Status => sign::status(&opts).await,
        Command::Sign(args) => sign::run(args, &opts),
        Command::SignArtifact(args) => sign::run_artifact(args, &opts),
        Command::Verify(args) => verify::run(args, &opts).await,
        Command::Trust(args) => verify::trust(args, &opts).await,
        Command::Registry(args) => registry::run(args.cmd, &opts).await,
        Command::Admin(args) => admin::run(args.cmd, &opts).await,
        Command::History(args) => history::run(args.cmd, &opts).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{}", out);
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

pub(crate) fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC 3339 timestamp: {}", raw))
}
