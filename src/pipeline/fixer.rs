//! Batched, retried remediation of compatibility issues.

use regex::Regex;
use std::fs;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::scanner::{CompatibilityIssue, IssueKind, CONTAINER_DESCRIPTORS, DISALLOWED_PACKAGES};
use crate::error::FixError;
use crate::llm::client::{CompletionRequest, TextGenerator};
use crate::llm::prompts;
use crate::skill::SkillTree;
use crate::util::write_atomic;

/// Bounded attempts with a constant delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_secs(2),
        }
    }
}

/// Final result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T, FixError>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt ordinal.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Retried<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FixError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) if !e.is_retryable() || attempt >= self.max_attempts() => {
                    return Retried {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} failed: {}",
                        attempt,
                        self.max_attempts(),
                        e
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    Fixed,
    Failed,
}

/// One remedy attempt for the issue at `issue` in the input slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixAttempt {
    pub issue: usize,
    pub ordinal: u32,
    pub outcome: FixOutcome,
}

#[derive(Debug, Clone)]
pub struct FailedFix {
    pub issue: CompatibilityIssue,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FixReport {
    pub attempts: Vec<FixAttempt>,
    pub fixed: usize,
    pub failed: Vec<FailedFix>,
}

impl FixReport {
    /// Number of issues that were attempted at least once.
    pub fn issues_attempted(&self) -> usize {
        let mut seen: Vec<usize> = self.attempts.iter().map(|a| a.issue).collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}

/// Group issue indices by kind: groups in first-seen kind order, members in
/// input order.
fn group_by_kind(issues: &[CompatibilityIssue]) -> Vec<(IssueKind, Vec<usize>)> {
    let mut groups: Vec<(IssueKind, Vec<usize>)> = Vec::new();
    for (idx, issue) in issues.iter().enumerate() {
        match groups.iter_mut().find(|(kind, _)| *kind == issue.kind) {
            Some((_, members)) => members.push(idx),
            None => groups.push((issue.kind, vec![idx])),
        }
    }
    groups
}

pub struct AutoFixer<'a> {
    generator: &'a dyn TextGenerator,
    policy: RetryPolicy,
    batch_size: usize,
    timeout: Duration,
    stream: bool,
}

impl<'a> AutoFixer<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self {
            generator,
            policy: RetryPolicy::default(),
            batch_size: 5,
            timeout: Duration::from_secs(90),
            stream: false,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Attempt every issue. Failures are recorded, never propagated.
    pub async fn fix(&self, tree: &SkillTree, issues: &[CompatibilityIssue]) -> FixReport {
        let mut report = FixReport::default();
        if issues.is_empty() {
            return report;
        }

        for (kind, members) in group_by_kind(issues) {
            let batches = members.len().div_ceil(self.batch_size);
            info!("Fixing {} {} issue(s) in {} batch(es)", members.len(), kind, batches);

            for (batch_no, batch) in members.chunks(self.batch_size).enumerate() {
                info!("{} batch {}/{} ({} issues)", kind, batch_no + 1, batches, batch.len());

                for &idx in batch {
                    let issue = &issues[idx];
                    let retried = self
                        .policy
                        .run(move |ordinal| {
                            debug!("Fixing {} (attempt {})", issue, ordinal);
                            self.remedy(tree, issue)
                        })
                        .await;

                    for ordinal in 1..retried.attempts {
                        report.attempts.push(FixAttempt {
                            issue: idx,
                            ordinal,
                            outcome: FixOutcome::Failed,
                        });
                    }
                    let outcome = if retried.result.is_ok() {
                        FixOutcome::Fixed
                    } else {
                        FixOutcome::Failed
                    };
                    report.attempts.push(FixAttempt {
                        issue: idx,
                        ordinal: retried.attempts,
                        outcome,
                    });

                    match retried.result {
                        Ok(()) => {
                            info!("Fixed: {}", issue);
                            report.fixed += 1;
                        }
                        Err(e) => {
                            warn!(
                                "Failed after {} attempt(s): {}: {}",
                                retried.attempts, issue, e
                            );
                            report.failed.push(FailedFix {
                                issue: issue.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        info!(
            "Fix summary: {} fixed, {} failed",
            report.fixed,
            report.failed.len()
        );
        report
    }

    async fn remedy(&self, tree: &SkillTree, issue: &CompatibilityIssue) -> Result<(), FixError> {
        match issue.kind {
            IssueKind::ForbiddenContainerization
                if issue.line == 0 && CONTAINER_DESCRIPTORS.contains(&issue.file.as_str()) =>
            {
                remove_descriptor(tree, &issue.file)
            }
            IssueKind::ForbiddenContainerization => {
                self.rewrite(tree, issue, prompts::containerization_prompt)
                    .await
            }
            IssueKind::DisallowedRuntime => self.rewrite(tree, issue, prompts::runtime_prompt).await,
            IssueKind::UnboundedMemoryRead => self.rewrite(tree, issue, prompts::memory_prompt).await,
            IssueKind::DisallowedPackage => remove_disallowed_packages(tree),
        }
    }

    /// Backend rewrite of the whole offending file. The file is replaced only
    /// after code was extracted, so failed attempts leave it untouched.
    async fn rewrite(
        &self,
        tree: &SkillTree,
        issue: &CompatibilityIssue,
        build_prompt: fn(&str, &CompatibilityIssue) -> String,
    ) -> Result<(), FixError> {
        let path = tree.root().join(&issue.file);
        if !path.is_file() {
            debug!("{} no longer exists, nothing to fix", issue.file);
            return Ok(());
        }
        let original = fs::read_to_string(&path)?;

        let request = CompletionRequest::prompt(build_prompt(&original, issue))
            .with_max_tokens(3000)
            .with_temperature(0.3)
            .with_timeout(self.timeout)
            .with_stream(self.stream);
        let response = self.generator.complete(&request).await?;
        let code = extract_code(&response)?;

        write_atomic(&path, &format!("{}\n", code))?;
        Ok(())
    }
}

fn remove_descriptor(tree: &SkillTree, file: &str) -> Result<(), FixError> {
    let path = tree.root().join(file);
    if path.is_file() {
        fs::remove_file(&path)?;
        info!("Removed container descriptor {}", file);
    }
    Ok(())
}

/// Drop every manifest line that mentions a disallowed package, comment
/// lines included.
fn remove_disallowed_packages(tree: &SkillTree) -> Result<(), FixError> {
    let path = tree.dependency_manifest();
    if !path.is_file() {
        return Err(FixError::MissingFile(path.display().to_string()));
    }
    let content = fs::read_to_string(&path)?;

    let kept: Vec<&str> = content
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            !DISALLOWED_PACKAGES.iter().any(|p| lower.contains(p))
        })
        .collect();

    let mut rewritten = kept.join("\n");
    if !rewritten.is_empty() {
        rewritten.push('\n');
    }
    write_atomic(&path, &rewritten)?;
    Ok(())
}

const CODE_TOKENS: &[&str] = &["import ", "def ", "class "];
const CODE_PREFIXES: &[&str] = &["import ", "from ", "def ", "class ", "#!"];

/// Pull Python source out of a backend response.
///
/// 1. A ```` ```python ```` block wins and its trimmed body is returned.
/// 2. Otherwise the first fenced block is accepted if it contains an
///    `import`, `def` or `class` token.
/// 3. Otherwise the whole text is accepted if it starts like source code.
/// 4. Anything else is [`FixError::NoValidCode`].
pub fn extract_code(text: &str) -> Result<String, FixError> {
    let tagged = Regex::new(r"(?s)```(?:python|py)[ \t]*\r?\n(.*?)```")
        .map_err(|_| FixError::NoValidCode)?;
    if let Some(caps) = tagged.captures(text) {
        return Ok(caps[1].trim().to_string());
    }

    let generic = Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```")
        .map_err(|_| FixError::NoValidCode)?;
    if let Some(caps) = generic.captures(text) {
        let body = caps[1].trim();
        if CODE_TOKENS.iter().any(|t| body.contains(t)) {
            return Ok(body.to_string());
        }
    }

    let trimmed = text.trim();
    if CODE_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        return Ok(trimmed.to_string());
    }

    Err(FixError::NoValidCode)
}
