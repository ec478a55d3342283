//! Produce an on-disk skill tree for a chosen candidate.
//!
//! The candidate's source is fetched into a scratch directory that is always
//! cleaned up, and only its subtree is relocated into the workspace. When the
//! fetch fails or the subtree is missing, a minimal tree is synthesized.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::catalog::CandidateDescriptor;
use crate::error::PipelineError;
use crate::skill::{
    is_valid_name, SkillTree, ASSETS_DIR, MANIFEST_FILE, REFERENCES_DIR, SCRIPTS_DIR,
};
use crate::util::{copy_dir_all, set_executable, title_case};

/// Populates a scratch directory with the candidate source repository.
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, scratch: &Path) -> Result<()>;
}

/// Shallow clone of a remote git repository.
pub struct GitFetcher {
    url: String,
}

impl GitFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl SourceFetcher for GitFetcher {
    fn fetch(&self, scratch: &Path) -> Result<()> {
        let mut fetch = git2::FetchOptions::new();
        fetch.depth(1);

        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch);
        builder
            .clone(&self.url, scratch)
            .with_context(|| format!("Failed to clone {}", self.url))?;
        Ok(())
    }
}

/// Copies a local checkout, for offline catalogs and tests.
pub struct DirectoryFetcher {
    root: std::path::PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceFetcher for DirectoryFetcher {
    fn fetch(&self, scratch: &Path) -> Result<()> {
        if !self.root.is_dir() {
            anyhow::bail!("Source directory not found: {}", self.root.display());
        }
        copy_dir_all(&self.root, scratch)
    }
}

/// Pick a fetcher for a configured source: local directories are copied,
/// anything else is cloned.
pub fn fetcher_for(source: &str) -> Arc<dyn SourceFetcher> {
    let path = Path::new(source);
    if path.is_dir() {
        Arc::new(DirectoryFetcher::new(path))
    } else {
        Arc::new(GitFetcher::new(source))
    }
}

fn is_relative_subpath(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn remove_existing(dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("Failed to remove existing {}", dest.display()))?;
    }
    Ok(())
}

/// Replace `dest` with a copy of `subtree`. A partial copy is removed again.
fn relocate(subtree: &Path, dest: &Path) -> Result<()> {
    remove_existing(dest)?;
    if let Err(e) = copy_dir_all(subtree, dest) {
        let _ = fs::remove_dir_all(dest);
        return Err(e);
    }
    Ok(())
}

/// Build a minimal valid tree at `dest`: the three conventional subtrees, a
/// placeholder manifest and one executable placeholder script. Any existing
/// tree at `dest` is replaced.
pub fn synthesize(name: &str, description: &str, dest: &Path) -> Result<SkillTree> {
    if !is_valid_name(name) {
        return Err(PipelineError::NoCandidate(format!("invalid skill name {:?}", name)).into());
    }
    remove_existing(dest)?;
    for dir in [SCRIPTS_DIR, REFERENCES_DIR, ASSETS_DIR] {
        fs::create_dir_all(dest.join(dir))
            .with_context(|| format!("Failed to create {}", dest.join(dir).display()))?;
    }

    let description = description.replace(['\n', '\r'], " ");
    let script = name.replace('-', "_");
    let manifest = format!(
        "---\nname: {name}\ndescription: {description}\n---\n\n# {title}\n\n{description}\n\n## Usage\n\n```bash\npython scripts/{script}.py <input>\n```\n",
        title = title_case(name),
    );
    fs::write(dest.join(MANIFEST_FILE), manifest).context("Failed to write manifest")?;

    let script_path = dest.join(SCRIPTS_DIR).join(format!("{}.py", script));
    let body = format!(
        r#"#!/usr/bin/env python3
"""{name} skill entry point."""

import sys


def main(argv):
    if len(argv) < 2:
        print("Usage: {script}.py <input>", file=sys.stderr)
        return 1
    print(f"Processing {{argv[1]}}")
    return 0


if __name__ == "__main__":
    sys.exit(main(sys.argv))
"#
    );
    fs::write(&script_path, body)
        .with_context(|| format!("Failed to write {}", script_path.display()))?;
    set_executable(&script_path)?;

    info!("Synthesized skill template at {}", dest.display());
    Ok(SkillTree::new(dest))
}

pub struct Materializer {
    fetcher: Arc<dyn SourceFetcher>,
    timeout: Duration,
}

impl Materializer {
    pub fn new(fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            fetcher,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Materialize `candidate` at `<workspace>/<name>`, replacing whatever
    /// was there. Only an invalid candidate name is an error.
    pub async fn materialize(
        &self,
        candidate: &CandidateDescriptor,
        workspace: &Path,
    ) -> Result<SkillTree> {
        if !is_valid_name(&candidate.name) {
            return Err(
                PipelineError::NoCandidate(format!("invalid skill name {:?}", candidate.name))
                    .into(),
            );
        }
        fs::create_dir_all(workspace)
            .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;
        let dest = workspace.join(&candidate.name);

        match self.fetch_scratch().await {
            Ok(scratch) => {
                let subtree = scratch.path().join(&candidate.source_path);
                if is_relative_subpath(&candidate.source_path) && subtree.is_dir() {
                    match relocate(&subtree, &dest) {
                        Ok(()) => {
                            info!("Materialized {} from {}", candidate.name, candidate.source_path);
                            return Ok(SkillTree::new(dest));
                        }
                        Err(e) => warn!(
                            "Failed to relocate {} ({:#}), creating template",
                            candidate.source_path, e
                        ),
                    }
                } else {
                    warn!(
                        "{} not found in fetched source, creating template",
                        candidate.source_path
                    );
                }
            }
            Err(e) => warn!("Fetch failed ({:#}), creating template", e),
        }

        synthesize(&candidate.name, &candidate.description, &dest)
    }

    /// Fetch into a fresh scratch directory. The directory is removed when
    /// the returned guard drops, or inside the task if the fetch fails.
    async fn fetch_scratch(&self) -> Result<TempDir> {
        let fetcher = Arc::clone(&self.fetcher);
        let task = tokio::task::spawn_blocking(move || -> Result<TempDir> {
            let scratch = TempDir::new().context("Failed to create scratch directory")?;
            debug!("Fetching into {}", scratch.path().display());
            fetcher.fetch(scratch.path())?;
            Ok(scratch)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined.context("Fetch task panicked")?,
            Err(_) => anyhow::bail!("Fetch timed out after {:?}", self.timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builtin_catalog;
    use crate::skill::parse_frontmatter;

    struct FailingFetcher;

    impl SourceFetcher for FailingFetcher {
        fn fetch(&self, _scratch: &Path) -> Result<()> {
            anyhow::bail!("network unreachable")
        }
    }

    fn source_repo() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let skill = tmp.path().join("skills/pdf");
        fs::create_dir_all(skill.join("scripts")).unwrap();
        fs::write(
            skill.join("SKILL.md"),
            "---\nname: pdf\ndescription: PDF toolkit\n---\n",
        )
        .unwrap();
        fs::write(skill.join("scripts/extract.py"), "import sys\n").unwrap();
        fs::write(tmp.path().join("README.md"), "repo root").unwrap();
        tmp
    }

    fn pdf() -> CandidateDescriptor {
        builtin_catalog().remove(0)
    }

    #[tokio::test]
    async fn test_relocates_only_candidate_subtree() {
        let source = source_repo();
        let workspace = TempDir::new().unwrap();
        let materializer = Materializer::new(Arc::new(DirectoryFetcher::new(source.path())));

        let tree = materializer.materialize(&pdf(), workspace.path()).await.unwrap();
        assert_eq!(tree.root(), workspace.path().join("pdf"));
        assert!(tree.root().join("scripts/extract.py").exists());
        assert!(!tree.root().join("README.md").exists());
    }

    #[tokio::test]
    async fn test_overwrites_existing_tree() {
        let source = source_repo();
        let workspace = TempDir::new().unwrap();
        let stale = workspace.path().join("pdf/stale.txt");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "old").unwrap();

        let materializer = Materializer::new(Arc::new(DirectoryFetcher::new(source.path())));
        let first = materializer.materialize(&pdf(), workspace.path()).await.unwrap();
        let second = materializer.materialize(&pdf(), workspace.path()).await.unwrap();

        assert!(!stale.exists());
        assert_eq!(first.files().unwrap(), second.files().unwrap());
    }

    #[tokio::test]
    async fn test_fetch_failure_synthesizes() {
        let workspace = TempDir::new().unwrap();
        let materializer = Materializer::new(Arc::new(FailingFetcher));
        let tree = materializer.materialize(&pdf(), workspace.path()).await.unwrap();

        let manifest = fs::read_to_string(tree.manifest_path()).unwrap();
        assert_eq!(parse_frontmatter(&manifest).unwrap().name, "pdf");
        assert!(tree.root().join("scripts/pdf.py").exists());
        assert!(tree.root().join("references").is_dir());
        assert!(tree.root().join("assets").is_dir());
    }

    /// Writes the pdf skill plus a symlink whose target is outside the checkout.
    #[cfg(unix)]
    struct DanglingLinkFetcher;

    #[cfg(unix)]
    impl SourceFetcher for DanglingLinkFetcher {
        fn fetch(&self, scratch: &Path) -> Result<()> {
            let skill = scratch.join("skills/pdf");
            fs::create_dir_all(skill.join("scripts"))?;
            fs::write(skill.join("SKILL.md"), "---\nname: pdf\ndescription: PDF toolkit\n---\n")?;
            fs::write(skill.join("scripts/a.py"), "import sys\n")?;
            std::os::unix::fs::symlink("../../shared/LICENSE.txt", skill.join("LICENSE.txt"))?;
            Ok(())
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relocation_failure_synthesizes() {
        let workspace = TempDir::new().unwrap();
        let materializer = Materializer::new(Arc::new(DanglingLinkFetcher));
        let tree = materializer.materialize(&pdf(), workspace.path()).await.unwrap();

        assert_eq!(tree.root(), workspace.path().join("pdf"));
        assert!(tree.root().join("scripts/pdf.py").exists());
        assert!(!tree.root().join("scripts/a.py").exists());
        assert!(tree.root().join("references").is_dir());
        let manifest = fs::read_to_string(tree.manifest_path()).unwrap();
        assert_eq!(parse_frontmatter(&manifest).unwrap().name, "pdf");
    }

    #[tokio::test]
    async fn test_missing_subtree_synthesizes() {
        let source = source_repo();
        let workspace = TempDir::new().unwrap();
        let mut candidate = builtin_catalog().remove(3);
        candidate.source_path = "skills/video-frames".to_string();

        let materializer = Materializer::new(Arc::new(DirectoryFetcher::new(source.path())));
        let tree = materializer.materialize(&candidate, workspace.path()).await.unwrap();
        assert!(tree.root().join("scripts/video_frames.py").exists());
    }

    #[tokio::test]
    async fn test_escaping_source_path_synthesizes() {
        let source = source_repo();
        let workspace = TempDir::new().unwrap();
        let mut candidate = pdf();
        candidate.source_path = "../outside".to_string();

        let materializer = Materializer::new(Arc::new(DirectoryFetcher::new(source.path())));
        let tree = materializer.materialize(&candidate, workspace.path()).await.unwrap();
        assert!(tree.root().join("scripts/pdf.py").exists());
    }

    #[tokio::test]
    async fn test_invalid_name_is_no_candidate() {
        let workspace = TempDir::new().unwrap();
        let mut candidate = pdf();
        candidate.name = "../escape".to_string();
        let err = Materializer::new(Arc::new(FailingFetcher))
            .materialize(&candidate, workspace.path())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_synthesized_script_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let workspace = TempDir::new().unwrap();
        let tree = synthesize("image-enhancer", "Enhance images", &workspace.path().join("x")).unwrap();
        let mode = fs::metadata(tree.root().join("scripts/image_enhancer.py"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
        let manifest = fs::read_to_string(tree.manifest_path()).unwrap();
        assert!(manifest.contains("# Image Enhancer"));
    }

    #[test]
    fn test_fetcher_for_local_directory() {
        let source = source_repo();
        let scratch = TempDir::new().unwrap();
        fetcher_for(source.path().to_str().unwrap())
            .fetch(scratch.path())
            .unwrap();
        assert!(scratch.path().join("skills/pdf/SKILL.md").exists());
    }
}
