use anyhow::{Context, Result};
use ccsession::{ArtifactKind, DeleteManifest, DeleteOptions, DeleteOutcome, SessionKeeper};
use std::process::ExitCode;

pub fn run(keeper: &SessionKeeper, session: &str, options: DeleteOptions) -> Result<ExitCode> {
    let outcome = keeper
        .delete(session, &options)
        .with_context(|| format!("cannot delete session {}", session))?;

    match outcome {
        DeleteOutcome::DryRun(manifest) => {
            println!("Would delete {} (dry run):", manifest.session_id);
            for file in &manifest.files {
                println!("  {}", file.path.display());
            }
            for dir in &manifest.dirs {
                println!("  {}/", dir.display());
            }
            print_totals(&manifest);
            if manifest.native {
                println!("Native session: pass --force to delete it.");
            }
        }
        DeleteOutcome::Deleted {
            manifest,
            backup,
            dirs_removed,
        } => {
            println!(
                "Deleted {} ({} directories removed)",
                manifest.session_id,
                dirs_removed.len()
            );
            print_totals(&manifest);
            if let Some(backup) = backup {
                println!("Backup: {}", backup.display());
                println!(
                    "To undo: ccsession unarchive {} --in-place",
                    backup.display()
                );
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_totals(manifest: &DeleteManifest) {
    println!(
        "{} files, {} bytes: {} transcripts, {} plans, {} tool results, {} todos, {} tasks",
        manifest.files.len(),
        manifest.total_size(),
        manifest.count(ArtifactKind::Transcript) + manifest.count(ArtifactKind::Agent),
        manifest.count(ArtifactKind::Plan),
        manifest.count(ArtifactKind::ToolResult),
        manifest.count(ArtifactKind::Todo),
        manifest.count(ArtifactKind::Task),
    );
}
