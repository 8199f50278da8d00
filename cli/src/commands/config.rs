// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use strata_cortex::domain::config::{CortexConfigManifest, GraphBackend, VectorBackend};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./strata-config.yaml)
        #[arg(short, long, default_value = "./strata-config.yaml")]
        output: PathBuf,

        /// Use the in-memory backends instead of Qdrant and Neo4j
        #[arg(long)]
        in_memory: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, in_memory } => generate(&output, in_memory).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = CortexConfigManifest::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. STRATA_CONFIG_PATH: {}",
            std::env::var("STRATA_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./strata-config.yaml");
        println!("  4. ~/.strata/config.yaml");
        println!("  5. /etc/strata/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Listen: {}:{}", spec.network.bind_address, spec.network.port);
    println!();

    println!("{}", "Episodic tier:".bold());
    match spec.episodic.backend {
        VectorBackend::Qdrant => {
            println!("  Backend: qdrant ({})", spec.episodic.url);
            println!("  Collection: {}", spec.episodic.collection);
        }
        VectorBackend::InMemory => println!("  Backend: in_memory"),
    }
    println!("  Vector dim: {}", spec.episodic.vector_dim);
    println!();

    println!("{}", "Semantic tier:".bold());
    match spec.semantic.backend {
        GraphBackend::Neo4j => println!("  Backend: neo4j ({} as {})", spec.semantic.uri, spec.semantic.user),
        GraphBackend::InMemory => println!("  Backend: in_memory"),
    }
    println!();

    println!("{}", "Resilience:".bold());
    println!(
        "  Breaker: {} failures, {}s cooldown",
        spec.breaker.max_failures, spec.breaker.reset_timeout_secs
    );
    println!(
        "  Retry: {}ms..{}ms backoff, {}s budget",
        spec.retry.base_interval_ms, spec.retry.max_interval_ms, spec.retry.max_wall_clock_secs
    );
    println!();

    println!("{}", "Consolidation:".bold());
    if spec.consolidation.enabled {
        println!(
            "  Every {}s, batches of {}",
            spec.consolidation.interval_secs, spec.consolidation.batch_size
        );
    } else {
        println!("  {}", "disabled".dimmed());
    }
    println!();

    println!("{}", "Hub:".bold());
    println!("  Channels: {}", spec.hub.channels.join(", "));
    println!("  Delta poll: every {}ms", spec.hub.poll_interval_ms);

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = CortexConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, in_memory: bool) -> Result<()> {
    let config = sample_config(in_memory);
    config
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}

fn sample_config(in_memory: bool) -> CortexConfigManifest {
    let mut config = CortexConfigManifest::default();
    if in_memory {
        config.spec.episodic.backend = VectorBackend::InMemory;
        config.spec.semantic.backend = GraphBackend::InMemory;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_config_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata-config.yaml");

        generate(&path, true).await.unwrap();

        let loaded = CortexConfigManifest::from_yaml_file(&path).unwrap();
        loaded.validate().unwrap();
        assert_eq!(loaded.spec.episodic.backend, VectorBackend::InMemory);
        assert_eq!(loaded.spec.semantic.backend, GraphBackend::InMemory);
    }
}
