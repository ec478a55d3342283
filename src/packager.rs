//! Deterministic `.skill` archive assembly.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::skill::{display_relative, is_valid_name, SkillTree};

pub const ARTIFACT_EXTENSION: &str = "skill";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArtifact {
    pub path: PathBuf,
    /// Archive member paths, `<name>/<relative path>`, sorted
    pub members: Vec<String>,
    /// Hex SHA-256 of the archive bytes
    pub sha256: String,
}

#[cfg(unix)]
fn file_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o777)
        .unwrap_or(0o644)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> u32 {
    0o644
}

fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Write every file of `tree` into `<output_dir>/<name>.skill` under a
/// single `<name>/` root. Entries carry a fixed timestamp and sorted order,
/// so an unchanged tree always yields the same bytes.
pub fn package(tree: &SkillTree, name: &str, output_dir: &Path) -> Result<PackagedArtifact> {
    if !is_valid_name(name) {
        bail!("Invalid skill name {:?}", name);
    }
    if !tree.root().is_dir() {
        bail!("Skill tree not found: {}", tree.root().display());
    }
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let files = tree.files()?;
    let path = output_dir.join(format!("{}.{}", name, ARTIFACT_EXTENSION));
    let mut tmp = tempfile::NamedTempFile::new_in(output_dir)
        .context("Failed to create temporary archive")?;

    let mut members = Vec::new();
    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        for rel in files {
            let source = tree.root().join(&rel);
            let member = format!("{}/{}", name, display_relative(&rel));
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(DateTime::default())
                .unix_permissions(file_mode(&source));

            let content =
                fs::read(&source).with_context(|| format!("Failed to read {}", source.display()))?;
            zip.start_file(member.clone(), options)
                .with_context(|| format!("Failed to add {}", member))?;
            zip.write_all(&content)?;
            members.push(member);
        }
        zip.finish().context("Failed to finalize archive")?;
    }
    tmp.as_file_mut().flush()?;
    tmp.persist(&path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    let sha256 = sha256_file(&path)?;
    info!("Packaged {} ({} files, sha256 {})", path.display(), members.len(), sha256);

    Ok(PackagedArtifact {
        path,
        members,
        sha256,
    })
}

/// Sorted member names of an existing archive.
pub fn archive_members(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Invalid archive {}", path.display()))?;
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn skill_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("scripts")).unwrap();
        fs::create_dir_all(tmp.path().join("references")).unwrap();
        fs::write(tmp.path().join("SKILL.md"), "---\nname: x\ndescription: y\n---\n").unwrap();
        fs::write(tmp.path().join("scripts/run.py"), "print('hi')\n").unwrap();
        fs::write(tmp.path().join("references/notes.md"), "notes").unwrap();
        fs::write(tmp.path().join(".env.example"), "KEY=").unwrap();
        tmp
    }

    #[test]
    fn test_members_rooted_at_name() {
        let tree = skill_tree();
        let out = TempDir::new().unwrap();
        let artifact = package(&SkillTree::new(tree.path()), "pdf-tools", out.path()).unwrap();

        assert_eq!(artifact.path, out.path().join("pdf-tools.skill"));
        assert_eq!(
            artifact.members,
            vec![
                "pdf-tools/.env.example",
                "pdf-tools/SKILL.md",
                "pdf-tools/references/notes.md",
                "pdf-tools/scripts/run.py",
            ]
        );
        assert_eq!(archive_members(&artifact.path).unwrap(), artifact.members);
    }

    #[test]
    fn test_repackaging_is_byte_identical() {
        let tree = skill_tree();
        let out = TempDir::new().unwrap();
        let skill = SkillTree::new(tree.path());
        let first = package(&skill, "pdf-tools", out.path()).unwrap();
        let second = package(&skill, "pdf-tools", out.path()).unwrap();
        assert_eq!(first.members, second.members);
        assert_eq!(first.sha256, second.sha256);
        assert_eq!(first.sha256.len(), 64);
    }

    #[test]
    fn test_rejects_bad_name() {
        let tree = skill_tree();
        let out = TempDir::new().unwrap();
        assert!(package(&SkillTree::new(tree.path()), "../x", out.path()).is_err());
        assert!(package(&SkillTree::new(tree.path()), "", out.path()).is_err());
    }

    #[test]
    fn test_missing_tree() {
        let out = TempDir::new().unwrap();
        let missing = out.path().join("nope");
        assert!(package(&SkillTree::new(missing), "x", out.path()).is_err());
    }
}
