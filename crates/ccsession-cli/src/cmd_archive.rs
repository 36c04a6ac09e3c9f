use anyhow::{Context, Result};
use ccsession::{LocalStorage, SessionKeeper};
use std::path::PathBuf;
use std::process::ExitCode;

pub fn run(
    keeper: &SessionKeeper,
    session: &str,
    output: Option<PathBuf>,
    name: Option<String>,
) -> Result<ExitCode> {
    let dir = output.unwrap_or_else(|| PathBuf::from("."));
    let storage = LocalStorage::new(dir);
    let outcome = keeper
        .archive(session, &storage, name.as_deref())
        .with_context(|| format!("cannot archive session {}", session))?;

    println!("Archived {}", outcome.session_id);
    println!("Archive: {}", outcome.location);
    println!(
        "{} files, {} records",
        outcome.files, outcome.records
    );
    Ok(ExitCode::SUCCESS)
}
