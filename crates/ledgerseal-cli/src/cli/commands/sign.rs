use anyhow::{Context, Result};
use ledgerseal_core::ReceiptRequest;
use serde_json::Value;

use super::{print_json, read_json, GlobalOpts};
use crate::cli::args::{SignArgs, SignArtifactArgs};
use crate::exit_codes::SUCCESS;

pub async fn status(opts: &GlobalOpts) -> Result<i32> {
    let service = opts.open_service()?;
    print_json(&service.signing_status().await?)?;
    Ok(SUCCESS)
}

pub fn run(args: SignArgs, opts: &GlobalOpts) -> Result<i32> {
    let context = match args.context.as_deref() {
        Some(raw) => serde_json::from_str::<Value>(raw).context("--context must be JSON")?,
        None => Value::Object(Default::default()),
    };

    let service = opts.open_service()?;
    let receipt = service.sign_receipt(&ReceiptRequest {
        manifest_hash: args.manifest_hash,
        export_type: args.export_type,
        generated_at: args.generated_at,
        row_count: args.row_count,
        context,
        actor_id: opts.actor.clone(),
    })?;

    match args.out {
        Some(path) => {
            let body = serde_json::to_string_pretty(&receipt)?;
            std::fs::write(&path, body)
                .with_context(|| format!("failed to write receipt: {}", path.display()))?;
            eprintln!("wrote receipt to {}", path.display());
        }
        None => print_json(&receipt)?,
    }
    Ok(SUCCESS)
}

pub fn run_artifact(args: SignArtifactArgs, opts: &GlobalOpts) -> Result<i32> {
    let artifact: Value = read_json(&args.artifact)?;
    let service = opts.open_service()?;
    print_json(&service.sign_export_artifact(&artifact)?)?;
    Ok(SUCCESS)
}
