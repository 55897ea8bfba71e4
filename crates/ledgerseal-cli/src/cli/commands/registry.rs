use anyhow::Result;
use ledgerseal_core::RegistryChange;
use serde_json::Value;
use std::path::Path;

use super::{print_json, read_json, GlobalOpts};
use crate::cli::args::RegistrySub;
use crate::exit_codes::{SUCCESS, TRUST_FAILURE};

fn read_entries(path: &Path) -> Result<Vec<Value>> {
    match read_json::<Value>(path)? {
        Value::Array(entries) => Ok(entries),
        _ => anyhow::bail!("{} must contain a JSON array of entries", path.display()),
    }
}

fn report_change(change: &RegistryChange) -> Result<i32> {
    if !change.audit_recorded {
        eprintln!("warning: registry changed but the audit event was not recorded");
    }
    print_json(change)?;
    Ok(SUCCESS)
}

pub async fn run(cmd: RegistrySub, opts: &GlobalOpts) -> Result<i32> {
    let identity = opts.identity()?;
    let service = opts.open_service()?;

    match cmd {
        RegistrySub::Show => {
            print_json(&service.read_registry(&identity).await?)?;
            Ok(SUCCESS)
        }
        RegistrySub::Update(args) => {
            let entries = read_entries(&args.file.entries)?;
            let change = service
                .update_registry(&identity, &entries, args.note)
                .await?;
            report_change(&change)
        }
        RegistrySub::Preflight(args) => {
            let entries = read_entries(&args.entries)?;
            let report = service.preflight_rotation(&identity, &entries).await?;
            print_json(&report)?;
            Ok(if report.valid { SUCCESS } else { TRUST_FAILURE })
        }
        RegistrySub::Rotate(args) => {
            let entries = read_entries(&args.file.entries)?;
            let change = service
                .rotate_registry(&identity, &entries, args.note)
                .await?;
            report_change(&change)
        }
        RegistrySub::Rollback(args) => {
            let change = service
                .rollback_registry(&identity, &args.snapshot, args.note)
                .await?;
            report_change(&change)
        }
    }
}
