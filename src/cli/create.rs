use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use crate::config::Config;
use crate::llm::factory;
use crate::pipeline::creator::{CreateOutcome, CreateReport, SkillCreator};
use crate::validator::ValidationResult;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    requirement: String,
    name: Option<String>,
    config_path: Option<String>,
    model_override: Option<String>,
    base_url_override: Option<String>,
    batch_size_override: Option<usize>,
    max_retries_override: Option<u32>,
    workspace_override: Option<String>,
    output_dir_override: Option<String>,
    offline: bool,
    dry_run: bool,
) -> Result<()> {
    info!("Requirement: {}", requirement);
    if let Some(ref cfg) = config_path {
        info!("Config: {}", cfg);
    }
    info!("Dry run: {}", dry_run);

    let mut config = Config::load_with_path(config_path)?;

    if let Some(ref model) = model_override {
        info!("CLI override: model = {}", model);
        config.llm.model = model.clone();
    }
    if let Some(ref base_url) = base_url_override {
        info!("CLI override: base_url = {}", base_url);
        config.llm.base_url = base_url.clone();
    }
    if let Some(batch_size) = batch_size_override {
        info!("CLI override: batch_size = {}", batch_size);
        config.pipeline.batch_size = batch_size;
    }
    if let Some(retries) = max_retries_override {
        info!("CLI override: max_retries = {}", retries);
        config.pipeline.max_retries = retries;
    }
    if let Some(ref workspace) = workspace_override {
        info!("CLI override: workspace = {}", workspace);
        config.pipeline.workspace = PathBuf::from(workspace);
    }
    if let Some(ref output_dir) = output_dir_override {
        info!("CLI override: output_dir = {}", output_dir);
        config.pipeline.output_dir = PathBuf::from(output_dir);
    }

    let generator = factory::create_generator(&config.llm, dry_run, offline)?;
    let creator = SkillCreator::new(config, generator)?;

    match creator.create(&requirement, name.as_deref()).await? {
        CreateOutcome::PerfectMatch(skill) => {
            println!("Found perfect match: {} ({})", skill.name, skill.path.display());
            println!("You can install it directly with: /install {}", skill.name);
        }
        CreateOutcome::Packaged(report) => print_report(&report),
    }

    Ok(())
}

fn print_report(report: &CreateReport) {
    match &report.base {
        Some(base) => println!("Base skill: {}", base),
        None => println!("Base skill: (created from scratch)"),
    }
    if !report.features.is_empty() {
        println!("Features added: {}", report.features.join(", "));
    }
    println!(
        "Fixes: {} fixed, {} failed",
        report.fix.fixed,
        report.fix.failed.len()
    );

    if !report.residual_issues.is_empty() {
        println!(
            "\n{} issue(s) require manual intervention:",
            report.residual_issues.len()
        );
        for issue in &report.residual_issues {
            println!("  - {}", issue);
            println!("    {}", issue.suggestion);
        }
    }

    match &report.validation {
        ValidationResult::Pass(_) => println!("Validation: passed"),
        ValidationResult::Fail(reason) => println!("Validation: FAILED ({})", reason),
        ValidationResult::Skipped(reason) => println!("Validation: skipped ({})", reason),
    }

    println!("\nSkill packaged: {}", report.artifact.path.display());
    println!("sha256: {}", report.artifact.sha256);
    println!("Install with: /install {}", report.artifact.path.display());
}
