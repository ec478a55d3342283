use anyhow::{bail, Result};
use std::path::Path;

use crate::skill::SkillTree;
use crate::validator::{SkillValidator, ValidationResult};

pub fn run(path: &str) -> Result<()> {
    let root = Path::new(path);
    if !root.is_dir() {
        bail!("Skill directory not found: {}", path);
    }

    match SkillValidator::new().validate(&SkillTree::new(root))? {
        ValidationResult::Pass(msg) => println!("✓ Validation passed: {}", msg),
        ValidationResult::Skipped(msg) => println!("Validation skipped: {}", msg),
        ValidationResult::Fail(msg) => bail!("Validation failed: {}", msg),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_missing_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = run(dir.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Missing required: SKILL.md"));
    }
}
