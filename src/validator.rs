use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::skill::{SkillTree, MANIFEST_FILE, SCRIPTS_DIR};
use crate::util::run_cmd_with_timeout;

/// Default timeout for a single parse check (seconds)
const VALIDATION_TIMEOUT_SECS: u64 = 60;

/// Parse-only check: compiles the file without executing it.
const PARSE_CHECK: &str =
    "import sys; compile(open(sys.argv[1], encoding='utf-8').read(), sys.argv[1], 'exec')";

/// Structural and syntax gate for a skill tree.
pub struct SkillValidator {
    python: String,
    python_available: bool,
    timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// Structure present and every script parses
    Pass(String),
    /// Missing mandatory item or syntax error
    Fail(String),
    /// Structure present but no interpreter to parse scripts with
    Skipped(String),
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        !matches!(self, ValidationResult::Fail(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            ValidationResult::Pass(msg)
            | ValidationResult::Fail(msg)
            | ValidationResult::Skipped(msg) => msg,
        }
    }
}

impl SkillValidator {
    pub fn new() -> Self {
        Self::with_python("python3")
    }

    pub fn with_python(python: impl Into<String>) -> Self {
        let python = python.into();
        let python_available = Self::is_python_available(&python);
        if !python_available {
            warn!("{} not available - script syntax checks will be skipped", python);
        }
        Self {
            python,
            python_available,
            timeout: Duration::from_secs(VALIDATION_TIMEOUT_SECS),
        }
    }

    fn is_python_available(python: &str) -> bool {
        Command::new(python)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Top-level `scripts/*.py`, sorted.
    fn scripts(tree: &SkillTree) -> Result<Vec<PathBuf>> {
        let pattern = format!(
            "{}/{}/*.py",
            glob::Pattern::escape(&tree.root().to_string_lossy()),
            SCRIPTS_DIR
        );
        let mut scripts = glob::glob(&pattern)
            .context("Invalid script glob")?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .collect::<Vec<_>>();
        scripts.sort();
        Ok(scripts)
    }

    pub fn validate(&self, tree: &SkillTree) -> Result<ValidationResult> {
        for (item, path) in [
            (MANIFEST_FILE, tree.manifest_path()),
            (SCRIPTS_DIR, tree.scripts_dir()),
        ] {
            if !path.exists() {
                warn!("✗ Validation failed: missing {}", item);
                return Ok(ValidationResult::Fail(format!("Missing required: {}", item)));
            }
        }

        let scripts = Self::scripts(tree)?;
        if !self.python_available {
            return Ok(ValidationResult::Skipped(format!(
                "{} not available on system",
                self.python
            )));
        }

        for script in &scripts {
            debug!("Parsing {}", script.display());
            let mut cmd = Command::new(&self.python);
            cmd.arg("-c").arg(PARSE_CHECK).arg(script);
            let output = run_cmd_with_timeout(cmd, self.timeout)?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let message = stderr
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or("unknown error")
                    .trim();
                let name = script
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                warn!("✗ Validation failed: {}: {}", name, message);
                return Ok(ValidationResult::Fail(format!(
                    "Syntax error in {}: {}",
                    name, message
                )));
            }
        }

        info!("✓ Validation passed ({} scripts)", scripts.len());
        Ok(ValidationResult::Pass(format!(
            "{} script(s) parsed",
            scripts.len()
        )))
    }
}

impl Default for SkillValidator {
    fn default() -> Self {
        Self::new()
    }
}
