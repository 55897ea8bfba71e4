//! `ledgerseal verify` and `ledgerseal trust`.

use anyhow::{Context, Result};
use chrono::Utc;
use ledgerseal_core::{normalize_fingerprint, Manifest, SignedReceipt, SignerBlock};
use serde_json::Value;

use super::{parse_time, print_json, read_json, GlobalOpts};
use crate::cli::args::{TrustArgs, VerifyArgs};
use crate::exit_codes::{SUCCESS, TRUST_FAILURE};

/// Accept either a bare signer block or a receipt written by `ledgerseal sign`.
fn load_signer_block(value: Value) -> Result<SignerBlock> {
    if value.get("mode").is_some() {
        return serde_json::from_value(value).context("invalid signer block");
    }
    let receipt: SignedReceipt =
        serde_json::from_value(value).context("expected a signer block or signed receipt")?;
    Ok(SignerBlock::from_receipt(&receipt)?)
}

pub async fn run(args: VerifyArgs, opts: &GlobalOpts) -> Result<i32> {
    let manifest: Manifest = read_json(&args.manifest)?;
    let block = load_signer_block(read_json(&args.signer)?)?;
    let csv = match &args.csv {
        Some(path) => Some(
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let service = opts.open_service()?;
    let receipt = service
        .verify_manifest(&manifest, &block, csv.as_deref())
        .await?;

    if !args.quiet {
        print_json(&receipt)?;
    }

    if receipt.checks.verification_passed {
        Ok(SUCCESS)
    } else {
        if !args.quiet {
            eprintln!("verification failed");
        }
        Ok(TRUST_FAILURE)
    }
}

pub async fn trust(args: TrustArgs, opts: &GlobalOpts) -> Result<i32> {
    if args.key_id.is_none() && args.fingerprint.is_none() {
        anyhow::bail!("pass --key-id and/or --fingerprint");
    }
    let at = match args.at.as_deref() {
        Some(raw) => parse_time(raw)?,
        None => Utc::now(),
    };

    let fingerprint = args
        .fingerprint
        .as_deref()
        .map(normalize_fingerprint)
        .transpose()?;

    let service = opts.open_service()?;
    let status = service
        .resolve_signer_trust_status(args.key_id.as_deref(), fingerprint.as_deref(), at)
        .await?;
    print_json(&status)?;

    Ok(if status.trust_check_passed {
        SUCCESS
    } else {
        TRUST_FAILURE
    })
}
