use anyhow::{Context, Result};
use ccsession::{SessionKeeper, UnarchiveOptions};
use std::path::PathBuf;
use std::process::ExitCode;

pub fn run(
    keeper: &SessionKeeper,
    archive: PathBuf,
    project: Option<PathBuf>,
    in_place: bool,
    translate_paths: bool,
) -> Result<ExitCode> {
    let options = UnarchiveOptions {
        target_project: project,
        in_place,
        translate_paths,
    };
    let outcome = keeper
        .unarchive_file(&archive, &options)
        .with_context(|| format!("cannot restore from {}", archive.display()))?;

    if in_place {
        println!("Restored {} in place", outcome.session_id);
    } else {
        println!(
            "Restored {} as {}",
            outcome.original_session_id, outcome.session_id
        );
    }
    println!("Transcript: {}", outcome.transcript.display());
    println!(
        "Files written: {}, records: {}",
        outcome.files_written, outcome.records
    );
    if outcome.paths_translated {
        println!("Paths translated to the target project");
    }
    Ok(ExitCode::SUCCESS)
}
