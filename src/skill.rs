//! On-disk skill tree: a manifest (`SKILL.md`) plus `scripts/`, `references/`
//! and `assets/` subtrees.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "SKILL.md";
pub const SCRIPTS_DIR: &str = "scripts";
pub const REFERENCES_DIR: &str = "references";
pub const ASSETS_DIR: &str = "assets";
pub const DEPENDENCY_MANIFEST: &str = "requirements.txt";

/// Name and description from the manifest's frontmatter header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillManifest {
    pub name: String,
    pub description: String,
}

/// Parse the leading `---` delimited header of a manifest.
/// Returns `None` when the header or either required key is missing.
pub fn parse_frontmatter(content: &str) -> Option<SkillManifest> {
    let mut lines = content.lines();
    if lines.next()?.trim() != "---" {
        return None;
    }

    let mut name = None;
    let mut description = None;
    for line in lines {
        if line.trim() == "---" {
            return Some(SkillManifest {
                name: name?,
                description: description?,
            });
        }
        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
            match key.trim() {
                "name" => name = Some(value),
                "description" => description = Some(value),
                _ => {}
            }
        }
    }
    None
}

/// Handle to a skill directory. Stages receive it explicitly; nothing reads
/// the process working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillTree {
    root: PathBuf,
}

impl SkillTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join(SCRIPTS_DIR)
    }

    pub fn dependency_manifest(&self) -> PathBuf {
        self.root.join(DEPENDENCY_MANIFEST)
    }

    pub fn manifest(&self) -> Result<Option<SkillManifest>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(parse_frontmatter(&content))
    }

    /// Every regular file under the tree, relative to the root, in sorted
    /// traversal order. Hidden and ignored files are included.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b));

        let mut files = Vec::new();
        for entry in builder.build() {
            let entry = entry.with_context(|| format!("Failed to walk {}", self.root.display()))?;
            if entry.file_type().is_some_and(|t| t.is_file()) {
                let relative = entry
                    .path()
                    .strip_prefix(&self.root)
                    .unwrap_or(entry.path())
                    .to_path_buf();
                files.push(relative);
            }
        }
        Ok(files)
    }

    /// Python sources anywhere in the tree, in traversal order.
    pub fn script_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .files()?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "py"))
            .collect())
    }
}

/// A skill name is used as a directory and archive root: it must be a
/// single non-empty path component.
pub fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Forward-slash form of a relative path, used in issues and archive members.
pub fn display_relative(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_frontmatter() {
        let content = "---\nname: pdf\ndescription: \"PDF toolkit\"\nlicense: MIT\n---\n\n# PDF\n";
        let manifest = parse_frontmatter(content).unwrap();
        assert_eq!(manifest.name, "pdf");
        assert_eq!(manifest.description, "PDF toolkit");
    }

    #[test]
    fn test_parse_frontmatter_missing_key() {
        assert!(parse_frontmatter("---\nname: pdf\n---\n").is_none());
        assert!(parse_frontmatter("# no header\nname: pdf\n").is_none());
        assert!(parse_frontmatter("---\nname: pdf\ndescription: x\n").is_none());
    }

    #[test]
    fn test_description_with_colon() {
        let manifest =
            parse_frontmatter("---\nname: a\ndescription: Usage: do things\n---\n").unwrap();
        assert_eq!(manifest.description, "Usage: do things");
    }

    #[test]
    fn test_files_sorted_and_relative() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("scripts")).unwrap();
        fs::write(tmp.path().join("scripts/b.py"), "").unwrap();
        fs::write(tmp.path().join("scripts/a.py"), "").unwrap();
        fs::write(tmp.path().join("SKILL.md"), "").unwrap();
        fs::write(tmp.path().join(".hidden"), "").unwrap();

        let tree = SkillTree::new(tmp.path());
        let files: Vec<String> = tree.files().unwrap().iter().map(|p| display_relative(p)).collect();
        assert_eq!(files, vec![".hidden", "SKILL.md", "scripts/a.py", "scripts/b.py"]);

        let scripts = tree.script_files().unwrap();
        assert_eq!(scripts.len(), 2);
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("pdf-compressor"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(".."));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name("a\\b"));
    }

    #[test]
    fn test_manifest_absent() {
        let tmp = TempDir::new().unwrap();
        let tree = SkillTree::new(tmp.path());
        assert!(tree.manifest().unwrap().is_none());
    }
}
