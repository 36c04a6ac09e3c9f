use anyhow::{Context, Result};
use ccsession::{CloneOptions, SessionKeeper};
use std::path::PathBuf;
use std::process::ExitCode;

pub fn run(
    keeper: &SessionKeeper,
    session: &str,
    project: Option<PathBuf>,
    translate_paths: bool,
) -> Result<ExitCode> {
    let options = CloneOptions {
        target_project: project,
        translate_paths,
    };
    let outcome = keeper
        .clone_session(session, &options)
        .with_context(|| format!("cannot clone session {}", session))?;

    println!(
        "Cloned {} -> {}",
        outcome.source_session_id, outcome.new_session_id
    );
    println!("Transcript: {}", outcome.transcript.display());
    println!(
        "Files written: {} ({} agent files)",
        outcome.files_written, outcome.agents
    );
    if outcome.paths_translated {
        println!("Paths translated to {}", outcome.lineage.target_project_path);
    }
    println!("Resume with: claude --resume {}", outcome.new_session_id);
    Ok(ExitCode::SUCCESS)
}
