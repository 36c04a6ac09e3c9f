use anyhow::{Context, Result};
use ccsession::SessionKeeper;
use ccsession::identity;
use serde_json::json;
use std::process::ExitCode;

pub fn run(keeper: &SessionKeeper, session: &str, as_json: bool) -> Result<ExitCode> {
    let store = keeper.lineage().context("cannot locate lineage ledger")?;
    let entry = store
        .entry(session)
        .with_context(|| format!("cannot look up {}", session))?;
    let session_id = entry
        .as_ref()
        .map(|e| e.child_session_id.clone())
        .unwrap_or_else(|| session.to_string());
    let ancestry = store.ancestry(&session_id)?;
    let children = store.children(&session_id)?;

    if as_json {
        let doc = json!({
            "session_id": session_id,
            "entry": entry,
            "ancestry": ancestry,
            "children": children,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Session: {}", session_id);
    match identity::is_native_session(&session_id) {
        Ok(true) => println!("Origin:  native Claude Code session"),
        Ok(false) => {
            if let Ok(Some(minted)) = identity::restoration_timestamp(&session_id) {
                println!(
                    "Origin:  cloned or restored at {}",
                    minted.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
        Err(_) => {}
    }

    match &entry {
        Some(entry) => {
            println!("Parent:  {} ({})", entry.parent_session_id, entry.method);
            println!("When:    {}", entry.cloned_at.to_rfc3339());
            println!("From:    {}", entry.parent_project_path);
            println!("To:      {}", entry.target_project_path);
            if entry.paths_translated {
                println!("Paths:   translated");
            }
            if let Some(archive) = &entry.archive_path {
                println!("Archive: {}", archive);
            }
            match entry.is_cross_machine() {
                Some(true) => println!(
                    "Machine: {} -> {}",
                    entry.parent_machine_id.as_deref().unwrap_or("?"),
                    entry.target_machine_id
                ),
                _ => println!("Machine: {}", entry.target_machine_id),
            }
        }
        None => println!("Parent:  none recorded"),
    }

    if ancestry.len() > 1 {
        println!("\nAncestry (root first):");
        for id in &ancestry {
            println!("  {}", id);
        }
    }
    if !children.is_empty() {
        println!("\nChildren:");
        for id in &children {
            println!("  {}", id);
        }
    }
    Ok(ExitCode::SUCCESS)
}
