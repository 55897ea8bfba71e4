use anyhow::Result;
use ledgerseal_core::HistoryQuery;

use super::{parse_time, print_json, GlobalOpts};
use crate::cli::args::{HistorySub, PageArgs};
use crate::exit_codes::SUCCESS;

fn to_query(args: PageArgs) -> Result<HistoryQuery> {
    Ok(HistoryQuery {
        since: args.since.as_deref().map(parse_time).transpose()?,
        until: args.until.as_deref().map(parse_time).transpose()?,
        offset: args.offset,
        limit: args.limit,
    })
}

pub async fn run(cmd: HistorySub, opts: &GlobalOpts) -> Result<i32> {
    let identity = opts.identity()?;
    let service = opts.open_service()?;

    match cmd {
        HistorySub::Audit(args) => {
            let page = service.audit_history(&identity, &to_query(args)?).await?;
            print_json(&page)?;
        }
        HistorySub::Snapshots(args) => {
            let page = service
                .snapshot_history(&identity, &to_query(args)?)
                .await?;
            print_json(&page)?;
        }
        HistorySub::Digest { window_days } => {
            print_json(&service.governance_digest(&identity, window_days).await?)?;
        }
        HistorySub::Runbook => {
            print_json(&service.rotation_runbook(&identity).await?)?;
        }
        HistorySub::Trim {
            retention_days,
            keep_recent,
        } => {
            let report = service
                .trim_audit_history(&identity, retention_days, keep_recent)
                .await?;
            tracing::info!(removed = report.removed, "audit history trimmed");
            print_json(&report)?;
        }
    }
    Ok(SUCCESS)
}
