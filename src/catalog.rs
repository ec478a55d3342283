//! Candidate templates and installed skills.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::skill::{parse_frontmatter, MANIFEST_FILE};

/// Immutable catalog entry describing a skill that can be cloned or adapted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Path of the skill inside the source repository, e.g. `skills/pdf`
    pub source_path: String,
}

fn default_language() -> String {
    "python".to_string()
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    skill: Vec<CandidateDescriptor>,
}

fn entry(name: &str, description: &str, tags: &[&str]) -> CandidateDescriptor {
    CandidateDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        language: default_language(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        source_path: format!("skills/{}", name),
    }
}

/// Built-in catalog mirroring the upstream skills repository.
pub fn builtin_catalog() -> Vec<CandidateDescriptor> {
    vec![
        entry(
            "pdf",
            "Comprehensive PDF manipulation toolkit for extracting text and tables, creating new PDFs, merging/splitting documents, and handling forms.",
            &["pdf", "document", "processing"],
        ),
        entry(
            "docx",
            "Document creation, editing, and analysis with support for tracked changes, comments, formatting preservation, and text extraction.",
            &["word", "document", "office"],
        ),
        entry(
            "image-enhancer",
            "Improves the quality of images, especially screenshots, by enhancing resolution, sharpness, and clarity.",
            &["image", "enhancement", "quality"],
        ),
        entry(
            "video-frames",
            "Extract frames or short clips from videos using ffmpeg.",
            &["video", "ffmpeg", "frames"],
        ),
    ]
}

/// Load a catalog of `[[skill]]` tables, or the built-in one when `path` is `None`.
pub fn load_catalog(path: Option<&Path>) -> Result<Vec<CandidateDescriptor>> {
    let Some(path) = path else {
        return Ok(builtin_catalog());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    let file: CatalogFile = toml::from_str(&content)
        .with_context(|| format!("Invalid catalog {}", path.display()))?;
    debug!("Loaded {} catalog entries from {}", file.skill.len(), path.display());
    Ok(file.skill)
}

/// A skill already present in the installed-skills directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledSkill {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
}

/// Skills under `dir/*/SKILL.md`, sorted by directory name.
/// A missing directory yields an empty set; unparsable manifests are skipped.
pub fn installed_skills(dir: &Path) -> Result<Vec<InstalledSkill>> {
    if !dir.is_dir() {
        debug!("No installed skills directory at {}", dir.display());
        return Ok(Vec::new());
    }

    let mut skill_dirs: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.join(MANIFEST_FILE).is_file())
        .collect();
    skill_dirs.sort();

    let mut installed = Vec::new();
    for skill_dir in skill_dirs {
        let manifest_path = skill_dir.join(MANIFEST_FILE);
        let content = match fs::read_to_string(&manifest_path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read {}: {}", manifest_path.display(), e);
                continue;
            }
        };
        match parse_frontmatter(&content) {
            Some(manifest) => installed.push(InstalledSkill {
                name: manifest.name,
                description: manifest.description,
                path: skill_dir,
            }),
            None => warn!("Skipping {}: no name/description header", manifest_path.display()),
        }
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_catalog_source_paths() {
        let catalog = builtin_catalog();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog[0].name, "pdf");
        for c in &catalog {
            assert_eq!(c.source_path, format!("skills/{}", c.name));
            assert_eq!(c.language, "python");
        }
    }

    #[test]
    fn test_load_catalog_from_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("catalog.toml");
        fs::write(
            &path,
            r#"
[[skill]]
name = "csv"
description = "CSV cleaning"
tags = ["csv", "data"]
source_path = "skills/csv"
"#,
        )
        .unwrap();
        let catalog = load_catalog(Some(&path)).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].language, "python");
        assert_eq!(catalog[0].tags, vec!["csv", "data"]);
    }

    #[test]
    fn test_load_catalog_default() {
        assert_eq!(load_catalog(None).unwrap(), builtin_catalog());
    }

    #[test]
    fn test_installed_skills_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        for (dir, manifest) in [
            ("zeta", "---\nname: zeta\ndescription: last one\n---\n"),
            ("alpha", "---\nname: alpha\ndescription: first one\n---\n"),
            ("broken", "no header here"),
        ] {
            fs::create_dir_all(tmp.path().join(dir)).unwrap();
            fs::write(tmp.path().join(dir).join("SKILL.md"), manifest).unwrap();
        }
        fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let installed = installed_skills(tmp.path()).unwrap();
        let names: Vec<&str> = installed.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_installed_skills_missing_dir() {
        let installed = installed_skills(Path::new("/nonexistent/skills")).unwrap();
        assert!(installed.is_empty());
    }
}
