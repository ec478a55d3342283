use anyhow::{bail, Result};
use std::path::Path;

use crate::packager;
use crate::skill::SkillTree;

pub fn run(path: &str, name: &str, output_dir: &str) -> Result<()> {
    let root = Path::new(path);
    if !root.is_dir() {
        bail!("Skill directory not found: {}", path);
    }

    let artifact = packager::package(&SkillTree::new(root), name, Path::new(output_dir))?;
    println!("Packaged: {}", artifact.path.display());
    println!("Files: {}", artifact.members.len());
    println!("sha256: {}", artifact.sha256);
    Ok(())
}
