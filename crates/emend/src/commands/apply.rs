//! `apply` - feed an edit-instruction stream into the engine.
//!
//! Reads a JSON array of instructions from a file or stdin, resolves
//! it against the working tree, and commits the surviving changes as
//! one batch. Per-patch rejections are reported and do not fail the
//! batch; files whose content would not change are filtered out before
//! snapshotting.

use crate::commands::open_manager;
use anyhow::{Context, Result};
use emend_patch::{EditInstruction, MaterializationPlan, PatchError, Resolver};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::debug;

pub async fn run(root: &Path, file: Option<&Path>, message: Option<&str>) -> Result<()> {
    let raw = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read instructions from {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .context("failed to read instructions from stdin")?;
            buffer
        }
    };

    let instructions: Vec<EditInstruction> = serde_json::from_str(&raw)
        .map_err(|e| PatchError::validation(format!("invalid instruction stream: {e}")))?;

    if instructions.is_empty() {
        println!("No instructions.");
        return Ok(());
    }

    // Normalize paths repository-relative; instructions that escape
    // the root are rejected individually, the rest proceed.
    let mut normalized: Vec<EditInstruction> = Vec::new();
    let mut invalid: Vec<(PathBuf, String)> = Vec::new();
    for instruction in instructions {
        match normalize_instruction(root, instruction) {
            Ok(instruction) => normalized.push(instruction),
            Err((path, why)) => invalid.push((path, why)),
        }
    }

    let (config, manager) = open_manager(root).await?;

    let mut contents: HashMap<PathBuf, String> = HashMap::new();
    for instruction in &normalized {
        let path = instruction.path().to_path_buf();
        if contents.contains_key(&path) {
            continue;
        }
        match tokio::fs::read_to_string(root.join(&path)).await {
            Ok(text) => {
                contents.insert(path, text);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "instruction targets a new file");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let resolver = Resolver::new(config.max_relocation_lines);
    let plans = resolver.resolve(&normalized, &contents);

    report_outcomes(&invalid, &plans);

    let changed: Vec<&MaterializationPlan> = plans.iter().filter(|p| p.changed).collect();
    if changed.is_empty() {
        println!("No files changed.");
        return Ok(());
    }

    let paths: Vec<PathBuf> = changed.iter().map(|p| p.path.clone()).collect();
    let inflight = manager
        .begin_batch(&paths, message.unwrap_or("apply"))
        .await?;

    let mut batch_contents: HashMap<PathBuf, Option<String>> = HashMap::new();
    for plan in &changed {
        batch_contents.insert(plan.path.clone(), Some(plan.final_content.clone()));
    }
    let batch = manager.commit_batch(inflight, batch_contents).await?;

    println!("Applied batch {:06} ({} file(s)):", batch.id, changed.len());
    for plan in &changed {
        println!("  {}", plan.path.display());
    }

    Ok(())
}

fn normalize_instruction(
    root: &Path,
    mut instruction: EditInstruction,
) -> std::result::Result<EditInstruction, (PathBuf, String)> {
    let original = instruction.path().to_path_buf();

    let rel = if original.is_absolute() {
        match emend_util::path::relative_to(&original, root) {
            Some(rel) => rel,
            None => {
                return Err((original, "outside the repository root".to_string()));
            }
        }
    } else {
        original.clone()
    };

    if !emend_util::path::is_clean_relative(&rel) {
        return Err((original, "escapes the repository root".to_string()));
    }

    let rel = emend_util::path::normalize(&rel);
    match &mut instruction {
        EditInstruction::FullFile { path, .. } => *path = rel,
        EditInstruction::Fragment(patch) => patch.path = rel,
    }

    Ok(instruction)
}

fn report_outcomes(invalid: &[(PathBuf, String)], plans: &[MaterializationPlan]) {
    for (path, why) in invalid {
        println!("  rejected {}: {why}", path.display());
    }

    for plan in plans {
        for relocation in &plan.relocations {
            println!(
                "  relocated {} in {}: lines {}-{} -> {}-{}",
                relocation.id,
                plan.path.display(),
                relocation.from.0,
                relocation.from.1,
                relocation.to.0,
                relocation.to.1,
            );
        }
        for rejected in &plan.rejected {
            println!(
                "  rejected {} in {}: {}",
                rejected.id,
                plan.path.display(),
                rejected.reason
            );
        }
    }
}
