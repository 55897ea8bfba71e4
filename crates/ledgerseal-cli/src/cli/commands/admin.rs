use anyhow::Result;

use super::{print_json, GlobalOpts};
use crate::cli::args::AdminSub;
use crate::exit_codes::SUCCESS;

pub async fn run(cmd: AdminSub, opts: &GlobalOpts) -> Result<i32> {
    let identity = opts.identity()?;
    let service = opts.open_service()?;

    match cmd {
        AdminSub::Whoami => {
            let access = service.resolve_admin_access(&identity).await;
            print_json(&serde_json::json!({
                "actor_id": identity.actor_id,
                "access": access,
            }))?;
        }
        AdminSub::Grant { target } => {
            print_json(&service.grant_admin(&identity, &target).await?)?;
        }
        AdminSub::Revoke { target } => {
            print_json(&service.revoke_admin(&identity, &target).await?)?;
        }
    }
    Ok(SUCCESS)
}
