// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One-shot consolidation against the configured backends

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use strata_cortex::application::two_tier_memory::{ConsolidationOutcome, ConsolidationReport};
use strata_cortex::domain::config::CortexConfigManifest;
use strata_cortex::domain::MemoryId;

use crate::daemon::build_memory;

#[derive(Args)]
pub struct ConsolidateArgs {
    /// Record ids to promote
    #[arg(value_name = "ID")]
    pub ids: Vec<String>,

    /// Also promote up to N unconsolidated records found in the episodic tier
    #[arg(long, value_name = "N")]
    pub pending: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ConsolidateArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut ids = parse_ids(&args.ids)?;

    let config = CortexConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    let memory = build_memory(&config);

    if let Some(limit) = args.pending {
        let pending = memory
            .scan_unconsolidated(limit)
            .await
            .context("Failed to scan for unconsolidated records")?;
        ids.extend(pending.into_iter().map(|r| r.id).filter(|id| !args.ids.contains(&id.to_string())));
    }

    if ids.is_empty() {
        println!("{}", "Nothing to consolidate".yellow());
        return Ok(());
    }

    let report = memory.consolidate(&ids).await;
    memory.close();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.success() {
        anyhow::bail!("{} record(s) failed to consolidate", report.failed_count());
    }
    Ok(())
}

fn parse_ids(raw: &[String]) -> Result<Vec<MemoryId>> {
    raw.iter()
        .map(|id| id.parse::<MemoryId>().map_err(anyhow::Error::from))
        .collect()
}

fn print_report(report: &ConsolidationReport) {
    for entry in &report.entries {
        let line = match &entry.outcome {
            ConsolidationOutcome::Consolidated { concept } => {
                format!("✓ {} -> {}", entry.id, concept).green()
            }
            ConsolidationOutcome::AlreadyConsolidated => format!("- {} already consolidated", entry.id).dimmed(),
            ConsolidationOutcome::Skipped => format!("- {} not found", entry.id).yellow(),
            ConsolidationOutcome::Failed { reason } => format!("✗ {}: {}", entry.id, reason).red(),
        };
        println!("{}", line);
    }
    println!();
    println!(
        "{} consolidated, {} skipped, {} failed in {}ms",
        report.consolidated_count(),
        report.skipped_count(),
        report.failed_count(),
        report.duration_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids_rejects_garbage() {
        let good = MemoryId::new().to_string();
        assert_eq!(parse_ids(&[good.clone()]).unwrap().len(), 1);
        assert!(parse_ids(&[good, "not-a-uuid".to_string()]).is_err());
    }
}
