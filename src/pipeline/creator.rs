//! End-to-end skill creation: match, rank, materialize, integrate, scan,
//! fix, re-scan, validate, package. Stages run strictly in sequence.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use super::fixer::{AutoFixer, FixReport, RetryPolicy};
use super::integrator::{extract_features, is_stop_word, reference_implementation, Integrator};
use super::materializer::{fetcher_for, synthesize, Materializer, SourceFetcher};
use super::ranker::{find_perfect_match, Ranker};
use super::scanner::{CompatibilityIssue, Scanner};
use crate::catalog::{installed_skills, load_catalog, CandidateDescriptor, InstalledSkill};
use crate::config::Config;
use crate::error::PipelineError;
use crate::llm::client::TextGenerator;
use crate::packager::{package, PackagedArtifact};
use crate::skill::{is_valid_name, SkillTree};
use crate::util::{slugify, tokenize};
use crate::validator::{SkillValidator, ValidationResult};

/// Default archive name: first three non-stop words plus `-skill`.
/// `None` when the requirement has no usable words.
pub fn suggest_name(requirement: &str) -> Option<String> {
    let words: Vec<String> = tokenize(requirement)
        .into_iter()
        .filter(|w| !is_stop_word(w))
        .take(3)
        .collect();
    if words.is_empty() {
        return None;
    }
    let name = slugify(&format!("{}-skill", words.join("-")));
    is_valid_name(&name).then_some(name)
}

#[derive(Debug)]
pub struct CreateReport {
    pub name: String,
    pub tree: SkillTree,
    /// Catalog entry the skill was built from, `None` when synthesized
    pub base: Option<String>,
    pub features: Vec<String>,
    pub fix: FixReport,
    /// Issues still present after remediation
    pub residual_issues: Vec<CompatibilityIssue>,
    pub validation: ValidationResult,
    pub artifact: PackagedArtifact,
}

#[derive(Debug)]
pub enum CreateOutcome {
    /// An installed skill already covers the requirement; nothing was built.
    PerfectMatch(InstalledSkill),
    Packaged(CreateReport),
}

pub struct SkillCreator {
    config: Config,
    generator: Box<dyn TextGenerator>,
    fetcher: Arc<dyn SourceFetcher>,
    catalog: Vec<CandidateDescriptor>,
    installed: Vec<InstalledSkill>,
    validator: SkillValidator,
}

impl SkillCreator {
    /// Load the catalog and installed skills named by `config`.
    pub fn new(config: Config, generator: Box<dyn TextGenerator>) -> Result<Self> {
        let catalog = load_catalog(config.catalog.path.as_deref())?;
        let installed = match config.pipeline.installed_skills_dir() {
            Some(dir) => installed_skills(&dir)?,
            None => Vec::new(),
        };
        let fetcher = fetcher_for(&config.source.repo_url);

        Ok(Self {
            config,
            generator,
            fetcher,
            catalog,
            installed,
            validator: SkillValidator::new(),
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_catalog(mut self, catalog: Vec<CandidateDescriptor>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_installed(mut self, installed: Vec<InstalledSkill>) -> Self {
        self.installed = installed;
        self
    }

    pub fn with_validator(mut self, validator: SkillValidator) -> Self {
        self.validator = validator;
        self
    }

    pub async fn create(&self, requirement: &str, name: Option<&str>) -> Result<CreateOutcome> {
        let llm = &self.config.llm;
        let pipeline = &self.config.pipeline;
        let generator = self.generator.as_ref();

        if let Some(name) = name {
            if !is_valid_name(name) {
                bail!("Invalid skill name {:?}", name);
            }
        }

        info!("Step 1: Checking installed skills...");
        if let Some(found) = find_perfect_match(requirement, &self.installed) {
            info!("Found perfect match: {}", found.name);
            return Ok(CreateOutcome::PerfectMatch(found.clone()));
        }

        info!("Step 2: Ranking {} candidates...", self.catalog.len());
        let ranked = Ranker::new(generator)
            .with_timeout(llm.ranking_timeout())
            .with_stream(llm.stream)
            .rank(requirement, &self.catalog)
            .await;
        let base = ranked.into_iter().next().filter(|r| r.similarity > 0.0);

        let final_name = match name {
            Some(name) => name.to_string(),
            None => suggest_name(requirement)
                .or_else(|| base.as_ref().map(|b| b.descriptor.name.clone()))
                .ok_or_else(|| PipelineError::NoCandidate(requirement.to_string()))?,
        };

        info!("Step 3: Materializing...");
        let (tree, base_name, base_description) = match &base {
            Some(ranked) => {
                info!(
                    "Base skill: {} (similarity {:.2})",
                    ranked.descriptor.name, ranked.similarity
                );
                let tree = Materializer::new(Arc::clone(&self.fetcher))
                    .with_timeout(self.config.source.clone_timeout())
                    .materialize(&ranked.descriptor, &pipeline.workspace)
                    .await?;
                (
                    tree,
                    Some(ranked.descriptor.name.clone()),
                    ranked.descriptor.description.clone(),
                )
            }
            None => {
                warn!("No related candidate, creating {} from scratch", final_name);
                std::fs::create_dir_all(&pipeline.workspace).with_context(|| {
                    format!("Failed to create workspace {}", pipeline.workspace.display())
                })?;
                let tree = synthesize(
                    &final_name,
                    requirement,
                    &pipeline.workspace.join(&final_name),
                )?;
                (tree, None, String::new())
            }
        };

        info!("Step 4: Integrating features...");
        let features = extract_features(requirement, &base_description);
        if features.is_empty() {
            info!("No new features beyond the base skill");
        }
        let integrator = Integrator::new(generator)
            .with_timeout(llm.rewrite_timeout())
            .with_max_tokens(llm.max_tokens)
            .with_temperature(llm.temperature)
            .with_stream(llm.stream);
        for feature in &features {
            let reference = reference_implementation(feature);
            if let Err(e) = integrator
                .integrate(&tree, feature, reference.as_ref(), requirement)
                .await
            {
                warn!("Skipping feature {}: {:#}", feature, e);
            }
        }

        info!("Step 5: Checking compatibility...");
        let scanner = Scanner::new()?;
        let issues = scanner.scan(&tree)?;
        info!("Found {} compatibility issues", issues.len());

        let fix = AutoFixer::new(generator)
            .with_policy(RetryPolicy::new(pipeline.max_retries, pipeline.retry_delay()))
            .with_batch_size(pipeline.batch_size)
            .with_timeout(llm.rewrite_timeout())
            .with_stream(llm.stream)
            .fix(&tree, &issues)
            .await;

        let residual_issues = scanner.scan(&tree)?;
        for issue in &residual_issues {
            warn!("Requires manual intervention: {}", issue);
        }

        info!("Step 6: Validating...");
        let validation = self.validator.validate(&tree)?;
        match &validation {
            ValidationResult::Fail(reason) if pipeline.require_validation => {
                return Err(PipelineError::ValidationGate(reason.clone()).into());
            }
            ValidationResult::Fail(reason) => warn!("Validation failed: {}", reason),
            ValidationResult::Skipped(reason) => warn!("Validation skipped: {}", reason),
            ValidationResult::Pass(_) => info!("Validation passed"),
        }

        info!("Step 7: Packaging {}...", final_name);
        let artifact = package(&tree, &final_name, &pipeline.output_dir)?;

        Ok(CreateOutcome::Packaged(CreateReport {
            name: final_name,
            tree,
            base: base_name,
            features,
            fix,
            residual_issues,
            validation,
            artifact,
        }))
    }
}
