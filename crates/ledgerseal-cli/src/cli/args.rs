use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ledgerseal",
    version,
    about = "Signed audit manifests with a rotation-safe trusted signer registry"
)]
pub struct Cli {
    /// YAML config file
    #[arg(long, global = true, env = "LEDGERSEAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage root (overrides config)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Acting identity for admin-gated commands
    #[arg(long = "as", global = true, env = "LEDGERSEAL_ACTOR", value_name = "ACTOR")]
    pub actor: Option<String>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate an ed25519 signing key pair
    Keygen(KeygenArgs),
    /// Show signing key and trust policy status
    Status,
    /// Sign a manifest receipt
    Sign(SignArgs),
    /// Sign an export artifact (HMAC fallback when no key is configured)
    SignArtifact(SignArtifactArgs),
    /// Verify a manifest against its signer block
    Verify(VerifyArgs),
    /// Resolve whether a signer is trusted
    Trust(TrustArgs),
    /// Read and change the trusted signer registry (admin)
    Registry(RegistryArgs),
    /// Manage admin role claims (admin)
    Admin(AdminArgs),
    /// Audit and snapshot history (admin)
    History(HistoryArgs),
    Version,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Output directory for key files
    #[arg(long, default_value = ".")]
    pub out: PathBuf,

    /// Force overwrite existing files
    #[arg(long, short)]
    pub force: bool,

    /// Published key id (default: SPKI fingerprint)
    #[arg(long)]
    pub key_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// SHA-256 of the export content (64 lowercase hex)
    #[arg(long)]
    pub manifest_hash: String,

    #[arg(long)]
    pub export_type: String,

    /// RFC 3339 generation time
    #[arg(long)]
    pub generated_at: String,

    #[arg(long, allow_hyphen_values = true)]
    pub row_count: i64,

    /// JSON object stored in the receipt payload
    #[arg(long)]
    pub context: Option<String>,

    /// Write the receipt here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SignArtifactArgs {
    /// JSON artifact to sign
    pub artifact: PathBuf,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Manifest JSON file (`{"hash": ...}`)
    #[arg(long)]
    pub manifest: PathBuf,

    /// Signer block or signed receipt JSON file
    #[arg(long)]
    pub signer: PathBuf,

    /// Export content to hash against the manifest
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Quiet mode - only exit code, no output
    #[arg(long, short)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct TrustArgs {
    #[arg(long)]
    pub key_id: Option<String>,

    #[arg(long)]
    pub fingerprint: Option<String>,

    /// Evaluate at this RFC 3339 time instead of now
    #[arg(long)]
    pub at: Option<String>,
}

#[derive(Args, Debug)]
pub struct RegistryArgs {
    #[command(subcommand)]
    pub cmd: RegistrySub,
}

#[derive(Subcommand, Debug)]
pub enum RegistrySub {
    /// Show env and runtime entries with their current status
    Show,
    /// Replace the runtime list (no preflight gate)
    Update(EntriesArgs),
    /// Dry-run a rotation
    Preflight(EntriesFileArgs),
    /// Replace the runtime list after a passing preflight
    Rotate(EntriesArgs),
    /// Restore the runtime list from a snapshot
    Rollback(RollbackArgs),
}

#[derive(Args, Debug)]
pub struct EntriesFileArgs {
    /// JSON array of signer entries
    #[arg(long)]
    pub entries: PathBuf,
}

#[derive(Args, Debug)]
pub struct EntriesArgs {
    #[command(flatten)]
    pub file: EntriesFileArgs,

    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    #[arg(long)]
    pub snapshot: String,

    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args, Debug)]
pub struct AdminArgs {
    #[command(subcommand)]
    pub cmd: AdminSub,
}

#[derive(Subcommand, Debug)]
pub enum AdminSub {
    /// Show how the acting identity resolves
    Whoami,
    /// Grant the admin role claim
    Grant { target: String },
    /// Revoke the admin role claim
    Revoke { target: String },
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[command(subcommand)]
    pub cmd: HistorySub,
}

#[derive(Subcommand, Debug)]
pub enum HistorySub {
    /// Audit events, newest first
    Audit(PageArgs),
    /// Registry snapshots, newest first
    Snapshots(PageArgs),
    /// Governance digest over a trailing window
    Digest {
        #[arg(long, default_value_t = 30)]
        window_days: u32,
    },
    /// Rotation readiness and latest changes
    Runbook,
    /// Delete audit events past the retention window
    Trim {
        #[arg(long)]
        retention_days: Option<u32>,
        #[arg(long)]
        keep_recent: Option<usize>,
    },
}

#[derive(Args, Debug)]
pub struct PageArgs {
    /// RFC 3339 lower bound (inclusive)
    #[arg(long)]
    pub since: Option<String>,

    /// RFC 3339 upper bound (inclusive)
    #[arg(long)]
    pub until: Option<String>,

    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    #[arg(long)]
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_rotate() {
        let cli = Cli::try_parse_from([
            "ledgerseal",
            "--as",
            "ops@example.com",
            "registry",
            "rotate",
            "--entries",
            "next.json",
            "--note",
            "q3 rotation",
        ])
        .unwrap();

        assert_eq!(cli.actor.as_deref(), Some("ops@example.com"));
        match cli.cmd {
            Command::Registry(RegistryArgs {
                cmd: RegistrySub::Rotate(args),
            }) => {
                assert_eq!(args.file.entries, PathBuf::from("next.json"));
                assert_eq!(args.note.as_deref(), Some("q3 rotation"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
