use anyhow::{Context, Result, bail};
use ccsession::SessionKeeper;
use std::process::ExitCode;

pub fn run(keeper: &SessionKeeper, session: Option<String>, list: bool) -> Result<ExitCode> {
    if list {
        return list_backups(keeper);
    }
    let Some(session) = session else {
        bail!("give a session id or --list");
    };

    let outcome = keeper
        .restore_backup(&session)
        .with_context(|| format!("cannot restore {}", session))?;
    println!(
        "Restored {} to {}",
        outcome.session_id,
        outcome.restored_to.display()
    );
    Ok(ExitCode::SUCCESS)
}

fn list_backups(keeper: &SessionKeeper) -> Result<ExitCode> {
    let backups = keeper.list_backups().context("cannot read backups")?;
    if backups.is_empty() {
        println!("No backups.");
        return Ok(ExitCode::SUCCESS);
    }
    for meta in &backups {
        println!(
            "{}  {}  {} orphans fixed  {}",
            meta.session_id,
            meta.fixed_at,
            meta.orphans_fixed,
            meta.original_path.display()
        );
    }
    Ok(ExitCode::SUCCESS)
}
