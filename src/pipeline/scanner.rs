//! Static compatibility checks against the sandbox environment.
//!
//! Four independent rule families run in a fixed order. Output order is
//! family, then traversal order, then pattern order, so scanning an unchanged
//! tree twice yields identical lists.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::fs;

use crate::skill::{display_relative, SkillTree, DEPENDENCY_MANIFEST};

/// Packages that cannot be installed in the sandbox.
pub const DISALLOWED_PACKAGES: &[&str] = &["tensorflow", "torch", "pytorch", "cuda"];

/// Container build descriptors recognized at the tree root.
pub const CONTAINER_DESCRIPTORS: &[&str] =
    &["Dockerfile", "docker-compose.yml", "docker-compose.yaml"];

const CONTAINER_PATTERNS: &[&str] = &[
    r"docker\s+run",
    r"docker\s+build",
    r"docker-compose",
    r"subprocess.*docker",
    r"^\s*(import|from)\s+docker\b",
];

/// Image-base declaration. Case-sensitive so Python's `from x import y`
/// never matches.
const IMAGE_BASE_PATTERN: &str = r"^\s*FROM\s+\S+";

const RUNTIME_FAMILIES: &[(&str, &[&str])] = &[
    ("java", &[r"\bjava\b", r"\bjavac\b", r"\bjar\b"]),
    ("ruby", &[r"\bruby\b", r"\bgem\s+install\b"]),
    ("go", &[r"\bgo\s+run\b", r"\bgo\s+build\b"]),
    ("dotnet", &[r"\bdotnet\b"]),
];

const WHOLE_FILE_READS: &[&str] = &[".read()", ".readlines()", ".read_text()", ".read_bytes()"];
const STREAMING_TERMS: &[&str] = &["chunk", "stream"];

/// Closed set of violation kinds; the fixer dispatches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IssueKind {
    ForbiddenContainerization,
    DisallowedPackage,
    DisallowedRuntime,
    UnboundedMemoryRead,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::ForbiddenContainerization => "forbidden-containerization",
            IssueKind::DisallowedPackage => "disallowed-package",
            IssueKind::DisallowedRuntime => "disallowed-runtime",
            IssueKind::UnboundedMemoryRead => "unbounded-memory-read",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityIssue {
    pub kind: IssueKind,
    /// Relative to the tree root, forward slashes
    pub file: String,
    /// 1-based; 0 for file-level findings
    pub line: usize,
    pub description: String,
    pub suggestion: String,
}

impl fmt::Display for CompatibilityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{}: {}:{}: {}", self.kind, self.file, self.line, self.description)
        } else {
            write!(f, "{}: {}: {}", self.kind, self.file, self.description)
        }
    }
}

pub struct Scanner {
    container: Vec<Regex>,
    image_base: Regex,
    runtimes: Vec<(&'static str, Vec<Regex>)>,
}

impl Scanner {
    pub fn new() -> Result<Self> {
        let container = CONTAINER_PATTERNS
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid containerization pattern")?;
        let image_base = Regex::new(IMAGE_BASE_PATTERN).context("Invalid image-base pattern")?;
        let runtimes = RUNTIME_FAMILIES
            .iter()
            .map(|(family, patterns)| {
                patterns
                    .iter()
                    .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
                    .collect::<Result<Vec<_>, _>>()
                    .map(|compiled| (*family, compiled))
            })
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid runtime pattern")?;

        Ok(Self {
            container,
            image_base,
            runtimes,
        })
    }

    /// Read-only scan of `tree`.
    pub fn scan(&self, tree: &SkillTree) -> Result<Vec<CompatibilityIssue>> {
        let scripts = self.read_scripts(tree)?;

        let mut issues = Vec::new();
        issues.extend(self.check_containerization(tree, &scripts));
        issues.extend(self.check_packages(tree)?);
        issues.extend(self.check_runtimes(&scripts));
        issues.extend(self.check_memory(&scripts));
        Ok(issues)
    }

    fn read_scripts(&self, tree: &SkillTree) -> Result<Vec<(String, String)>> {
        tree.script_files()?
            .into_iter()
            .map(|rel| {
                let path = tree.root().join(&rel);
                let bytes =
                    fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
                Ok((display_relative(&rel), String::from_utf8_lossy(&bytes).into_owned()))
            })
            .collect()
    }

    fn check_containerization(
        &self,
        tree: &SkillTree,
        scripts: &[(String, String)],
    ) -> Vec<CompatibilityIssue> {
        let mut issues = Vec::new();

        for (file, content) in scripts {
            for (idx, line) in content.lines().enumerate() {
                // One issue per line, first pattern wins
                let hit = self.container.iter().any(|re| re.is_match(line))
                    || self.image_base.is_match(line);
                if hit {
                    issues.push(CompatibilityIssue {
                        kind: IssueKind::ForbiddenContainerization,
                        file: file.clone(),
                        line: idx + 1,
                        description: "Uses Docker (not available in the sandbox)".to_string(),
                        suggestion: "Rewrite to run natively without Docker".to_string(),
                    });
                }
            }
        }

        for descriptor in CONTAINER_DESCRIPTORS {
            if tree.root().join(descriptor).is_file() {
                issues.push(CompatibilityIssue {
                    kind: IssueKind::ForbiddenContainerization,
                    file: descriptor.to_string(),
                    line: 0,
                    description: format!("{} present (Docker not available)", descriptor),
                    suggestion: format!("Remove {} and run natively", descriptor),
                });
            }
        }

        issues
    }

    fn check_packages(&self, tree: &SkillTree) -> Result<Vec<CompatibilityIssue>> {
        let path = tree.dependency_manifest();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;

        let mut issues = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim().to_lowercase();
            if line.starts_with('#') {
                continue;
            }
            for package in DISALLOWED_PACKAGES {
                if line.contains(package) {
                    issues.push(CompatibilityIssue {
                        kind: IssueKind::DisallowedPackage,
                        file: DEPENDENCY_MANIFEST.to_string(),
                        line: idx + 1,
                        description: format!("Package \"{}\" not available in the sandbox", package),
                        suggestion: format!("Remove or find alternative to {}", package),
                    });
                }
            }
        }
        Ok(issues)
    }

    fn check_runtimes(&self, scripts: &[(String, String)]) -> Vec<CompatibilityIssue> {
        let mut issues = Vec::new();
        for (file, content) in scripts {
            for (family, patterns) in &self.runtimes {
                if patterns.iter().any(|re| re.is_match(content)) {
                    issues.push(CompatibilityIssue {
                        kind: IssueKind::DisallowedRuntime,
                        file: file.clone(),
                        line: 0,
                        description: format!("Uses {} (not available)", family),
                        suggestion: format!("Rewrite without {} dependency", family),
                    });
                }
            }
        }
        issues
    }

    fn check_memory(&self, scripts: &[(String, String)]) -> Vec<CompatibilityIssue> {
        scripts
            .iter()
            .filter(|(_, content)| {
                let lower = content.to_lowercase();
                WHOLE_FILE_READS.iter().any(|r| content.contains(r))
                    && !STREAMING_TERMS.iter().any(|t| lower.contains(t))
            })
            .map(|(file, _)| CompatibilityIssue {
                kind: IssueKind::UnboundedMemoryRead,
                file: file.clone(),
                line: 0,
                description: "May load large files entirely into memory".to_string(),
                suggestion: "Consider streaming or chunked processing for large files".to_string(),
            })
            .collect()
    }
}

/// Scan with a freshly built [`Scanner`].
pub fn scan(tree: &SkillTree) -> Result<Vec<CompatibilityIssue>> {
    Scanner::new()?.scan(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn tree_with(files: &[(&str, &str)]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = tmp.path().join(rel);
            fs::create_dir_all(path.parent().unwrap_or(Path::new("."))).unwrap();
            fs::write(path, content).unwrap();
        }
        tmp
    }

    fn kinds(issues: &[CompatibilityIssue]) -> Vec<IssueKind> {
        issues.iter().map(|i| i.kind).collect()
    }

    #[test]
    fn test_clean_tree_has_no_issues() {
        let tmp = tree_with(&[
            ("SKILL.md", "---\nname: a\ndescription: b\n---\n"),
            ("scripts/ok.py", "from pathlib import Path\nimport os\nprint('hi')\n"),
        ]);
        assert!(scan(&SkillTree::new(tmp.path())).unwrap().is_empty());
    }

    #[test]
    fn test_containerization_lines() {
        let tmp = tree_with(&[(
            "scripts/run.py",
            "import subprocess\nsubprocess.run(['docker', 'run', 'x'])\nos.system('docker build .')\n",
        )]);
        let issues = scan(&SkillTree::new(tmp.path())).unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].line, 2);
        assert_eq!(issues[1].line, 3);
        assert_eq!(issues[0].file, "scripts/run.py");
        assert!(issues
            .iter()
            .all(|i| i.kind == IssueKind::ForbiddenContainerization));
    }

    #[test]
    fn test_python_from_import_is_not_image_base() {
        let tmp = tree_with(&[("scripts/a.py", "from os import path\nFROM_CONST = 1\n")]);
        assert!(scan(&SkillTree::new(tmp.path())).unwrap().is_empty());
    }

    #[test]
    fn test_descriptor_at_root_is_file_level() {
        let tmp = tree_with(&[("Dockerfile", "FROM python:3.11\n")]);
        let issues = scan(&SkillTree::new(tmp.path())).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].file, "Dockerfile");
        assert_eq!(issues[0].line, 0);
    }

    #[test]
    fn test_packages_skip_comments() {
        let tmp = tree_with(&[(
            "requirements.txt",
            "tensorflow==2.0\nrequests==2.0\n# torch note\nTorch>=1.0\n",
        )]);
        let issues = scan(&SkillTree::new(tmp.path())).unwrap();
        let lines: Vec<usize> = issues.iter().map(|i| i.line).collect();
        assert_eq!(lines, vec![1, 4]);
        assert!(issues[0].description.contains("tensorflow"));
        assert!(issues[1].description.contains("torch"));
    }

    #[test]
    fn test_runtime_first_match_per_family() {
        let tmp = tree_with(&[(
            "scripts/build.py",
            "os.system('javac Main.java')\nos.system('java Main')\nos.system('go run main.go')\n",
        )]);
        let issues = scan(&SkillTree::new(tmp.path())).unwrap();
        let descriptions: Vec<&str> = issues.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec!["Uses java (not available)", "Uses go (not available)"]
        );
        assert!(issues.iter().all(|i| i.line == 0));
    }

    #[test]
    fn test_runtime_ignores_javascript() {
        let tmp = tree_with(&[("scripts/a.py", "# emits javascript for the page\n")]);
        assert!(scan(&SkillTree::new(tmp.path())).unwrap().is_empty());
    }

    #[test]
    fn test_memory_heuristic() {
        let tmp = tree_with(&[
            ("scripts/bad.py", "data = open(p).read()\n"),
            ("scripts/good.py", "data = open(p).read()\n# processed in chunks\n"),
        ]);
        let issues = scan(&SkillTree::new(tmp.path())).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::UnboundedMemoryRead);
        assert_eq!(issues[0].file, "scripts/bad.py");
    }

    #[test]
    fn test_family_order_and_determinism() {
        let tmp = tree_with(&[
            ("scripts/a.py", "x = open(p).read()\nos.system('ruby x.rb')\n"),
            ("scripts/b.py", "os.system('docker run img')\n"),
            ("requirements.txt", "cuda-python\n"),
        ]);
        let tree = SkillTree::new(tmp.path());
        let first = scan(&tree).unwrap();
        assert_eq!(
            kinds(&first),
            vec![
                IssueKind::ForbiddenContainerization,
                IssueKind::DisallowedPackage,
                IssueKind::DisallowedRuntime,
                IssueKind::UnboundedMemoryRead,
            ]
        );
        assert_eq!(first, scan(&tree).unwrap());
    }

    #[test]
    fn test_display() {
        let issue = CompatibilityIssue {
            kind: IssueKind::DisallowedPackage,
            file: "requirements.txt".to_string(),
            line: 2,
            description: "Package \"torch\" not available in the sandbox".to_string(),
            suggestion: String::new(),
        };
        assert_eq!(
            issue.to_string(),
            "disallowed-package: requirements.txt:2: Package \"torch\" not available in the sandbox"
        );
    }
}
