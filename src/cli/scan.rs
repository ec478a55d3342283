use anyhow::{bail, Result};
use std::path::Path;

use crate::pipeline::scanner;
use crate::skill::SkillTree;

pub fn run(path: &str) -> Result<()> {
    let root = Path::new(path);
    if !root.is_dir() {
        bail!("Skill directory not found: {}", path);
    }

    let issues = scanner::scan(&SkillTree::new(root))?;
    if issues.is_empty() {
        println!("No compatibility issues found");
        return Ok(());
    }

    println!("Found {} issue(s):\n", issues.len());
    for issue in &issues {
        println!("{}", issue);
        println!("   {}\n", issue.suggestion);
    }
    bail!("{} compatibility issue(s) found", issues.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_run_missing_dir() {
        let result = run("/tmp/nonexistent-skillforge-scan-xyz");
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_run_clean_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("scripts")).unwrap();
        fs::write(dir.path().join("scripts/ok.py"), "print('ok')\n").unwrap();
        assert!(run(dir.path().to_str().unwrap()).is_ok());
    }

    #[test]
    fn test_run_reports_issues() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("requirements.txt"), "torch\n").unwrap();
        let err = run(dir.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("1 compatibility issue"));
    }
}
