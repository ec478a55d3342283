use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use skillforge::cli;

#[derive(Parser)]
#[command(name = "skillforge", version)]
#[command(about = "Create sandbox-compatible skills from a requirement", long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and package a skill for a requirement
    Create {
        /// What the skill should do, in plain language
        requirement: String,

        /// Skill name (defaults to one derived from the requirement)
        #[arg(long)]
        name: Option<String>,

        /// Path to config file (defaults to ./skillforge.toml or ~/.config/skillforge/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Override LLM model
        #[arg(long)]
        model: Option<String>,

        /// Override the OpenAI-compatible gateway URL
        #[arg(long)]
        base_url: Option<String>,

        /// Issues per progress batch when fixing
        #[arg(long)]
        batch_size: Option<usize>,

        /// Retries per issue after the first attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Directory for materialized skill trees
        #[arg(long)]
        workspace: Option<String>,

        /// Directory for packaged archives
        #[arg(long)]
        output_dir: Option<String>,

        /// Never call the LLM backend; deterministic fallbacks only
        #[arg(long)]
        offline: bool,

        /// Use mock LLM client for testing
        #[arg(long)]
        dry_run: bool,
    },

    /// Rank catalog skills against a requirement
    Search {
        requirement: String,

        #[arg(long)]
        config: Option<String>,

        #[arg(long)]
        offline: bool,

        #[arg(long)]
        dry_run: bool,
    },

    /// Report compatibility issues in a skill directory
    Scan {
        path: String,
    },

    /// Check structure and script syntax of a skill directory
    Validate {
        path: String,
    },

    /// Package a skill directory into <output-dir>/<name>.skill
    Package {
        path: String,

        name: String,

        #[arg(long, default_value = "./outputs")]
        output_dir: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Create {
            requirement,
            name,
            config,
            model,
            base_url,
            batch_size,
            max_retries,
            workspace,
            output_dir,
            offline,
            dry_run,
        } => {
            cli::create::run(
                requirement,
                name,
                config,
                model,
                base_url,
                batch_size,
                max_retries,
                workspace,
                output_dir,
                offline,
                dry_run,
            )
            .await?;
        }
        Commands::Search {
            requirement,
            config,
            offline,
            dry_run,
        } => {
            cli::search::run(requirement, config, offline, dry_run).await?;
        }
        Commands::Scan { path } => cli::scan::run(&path)?,
        Commands::Validate { path } => cli::validate::run(&path)?,
        Commands::Package {
            path,
            name,
            output_dir,
        } => cli::package::run(&path, &name, &output_dir)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_create_defaults() {
        let cli = Cli::try_parse_from(["skillforge", "create", "compress pdf files"]).unwrap();
        assert!(!cli.verbose);
        match cli.command {
            Commands::Create {
                requirement,
                name,
                offline,
                dry_run,
                ..
            } => {
                assert_eq!(requirement, "compress pdf files");
                assert!(name.is_none());
                assert!(!offline);
                assert!(!dry_run);
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn test_parse_create_with_all_args() {
        let cli = Cli::try_parse_from([
            "skillforge",
            "create",
            "extract video frames",
            "--name",
            "frame-grabber",
            "--model",
            "gpt-4o",
            "--base-url",
            "http://localhost:4000/v1",
            "--batch-size",
            "3",
            "--max-retries",
            "4",
            "--workspace",
            "/tmp/ws",
            "--output-dir",
            "/tmp/out",
            "--offline",
            "--dry-run",
            "--verbose",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Create {
                name,
                model,
                base_url,
                batch_size,
                max_retries,
                workspace,
                output_dir,
                offline,
                dry_run,
                ..
            } => {
                assert_eq!(name.unwrap(), "frame-grabber");
                assert_eq!(model.unwrap(), "gpt-4o");
                assert_eq!(base_url.unwrap(), "http://localhost:4000/v1");
                assert_eq!(batch_size.unwrap(), 3);
                assert_eq!(max_retries.unwrap(), 4);
                assert_eq!(workspace.unwrap(), "/tmp/ws");
                assert_eq!(output_dir.unwrap(), "/tmp/out");
                assert!(offline);
                assert!(dry_run);
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn test_parse_package_default_output() {
        let cli = Cli::try_parse_from(["skillforge", "package", "./ws/pdf", "pdf-plus"]).unwrap();
        match cli.command {
            Commands::Package {
                path,
                name,
                output_dir,
            } => {
                assert_eq!(path, "./ws/pdf");
                assert_eq!(name, "pdf-plus");
                assert_eq!(output_dir, "./outputs");
            }
            _ => panic!("expected package"),
        }
    }

    #[test]
    fn test_parse_create_requires_requirement() {
        assert!(Cli::try_parse_from(["skillforge", "create"]).is_err());
    }

    #[test]
    fn test_parse_missing_subcommand() {
        assert!(Cli::try_parse_from(["skillforge"]).is_err());
    }
}
