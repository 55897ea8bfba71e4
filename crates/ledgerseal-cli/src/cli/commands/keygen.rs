//! `ledgerseal keygen` - Generate an ed25519 key pair for manifest receipts.

use anyhow::{Context, Result};
use ledgerseal_core::ManifestSigner;
use serde_json::json;
use std::fs;

use super::print_json;
use crate::cli::args::KeygenArgs;
use crate::exit_codes::SUCCESS;

pub fn run(args: KeygenArgs) -> Result<i32> {
    if !args.out.exists() {
        fs::create_dir_all(&args.out)
            .with_context(|| format!("failed to create directory: {}", args.out.display()))?;
    }

    let private_path = args.out.join("private_key.pem");
    let public_path = args.out.join("public_key.pem");

    if !args.force {
        for path in [&private_path, &public_path] {
            if path.exists() {
                anyhow::bail!(
                    "key file already exists: {} (use --force to overwrite)",
                    path.display()
                );
            }
        }
    }

    let signer = ManifestSigner::generate(args.key_id)?;
    let private_pem = signer.to_pkcs8_pem()?;
    let public_pem = signer.public_key_pem()?;

    fs::write(&private_path, private_pem.as_bytes())
        .with_context(|| format!("failed to write private key: {}", private_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&private_path, fs::Permissions::from_mode(0o600)).with_context(
            || format!("failed to restrict permissions: {}", private_path.display()),
        )?;
    }

    fs::write(&public_path, public_pem.as_bytes())
        .with_context(|| format!("failed to write public key: {}", public_path.display()))?;

    tracing::info!(key_id = %signer.key_id(), "generated signing key");
    print_json(&json!({
        "key_id": signer.key_id(),
        "public_key_fingerprint": signer.fingerprint(),
        "private_key_path": private_path.display().to_string(),
        "public_key_path": public_path.display().to_string(),
    }))?;
    Ok(SUCCESS)
}
