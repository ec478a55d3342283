//! Merge a requested capability into a materialized skill tree.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::llm::client::{CompletionRequest, TextGenerator};
use crate::llm::prompts;
use crate::skill::{SkillTree, SCRIPTS_DIR};
use crate::util::{set_executable, title_case, tokenize, truncate_chars};

/// At most this many features are integrated per run.
pub const MAX_FEATURES: usize = 3;

const MANIFEST_EXCERPT_CHARS: usize = 1000;
const SCRIPT_PREVIEW_CHARS: usize = 500;

pub const STOP_WORDS: &[&str] = &[
    "i", "need", "to", "a", "an", "the", "and", "or", "for", "of", "with", "in", "on", "my", "me",
    "want", "that", "can", "it", "is", "be", "some", "from", "into", "by", "using", "use",
];

/// Words that cannot be Python function names.
const RESERVED: &[&str] = &[
    "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif", "else",
    "except", "finally", "global", "if", "import", "lambda", "nonlocal", "not", "pass", "raise",
    "return", "try", "while", "yield",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Requirement words missing from the base description, in requirement
/// order, deduplicated, capped at [`MAX_FEATURES`]. Each is a valid Python
/// identifier.
pub fn extract_features(requirement: &str, base_description: &str) -> Vec<String> {
    let base: HashSet<String> = tokenize(base_description).into_iter().collect();
    let mut seen = HashSet::new();
    tokenize(requirement)
        .into_iter()
        .filter(|w| !is_stop_word(w) && !base.contains(w))
        .filter(|w| w.chars().next().is_some_and(|c| c.is_ascii_alphabetic()))
        .filter(|w| w.chars().all(|c| c.is_ascii_alphanumeric()))
        .filter(|w| !RESERVED.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .take(MAX_FEATURES)
        .collect()
}

/// Known-good code to seed integration of a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImpl {
    pub code: String,
    pub description: String,
    pub source: String,
}

pub fn reference_implementation(feature: &str) -> Option<ReferenceImpl> {
    match feature {
        "compress" => Some(ReferenceImpl {
            code: r#"def compress_pdf(input_path, output_path):
    """Compress PDF file"""
    from PyPDF2 import PdfReader, PdfWriter

    reader = PdfReader(input_path)
    writer = PdfWriter()

    for page in reader.pages:
        page.compress_content_streams()
        writer.add_page(page)

    with open(output_path, 'wb') as f:
        writer.write(f)

    return output_path
"#
            .to_string(),
            description: "PDF compression using PyPDF2".to_string(),
            source: "PyPDF2 documentation example".to_string(),
        }),
        _ => None,
    }
}

/// Bounded summary of the tree: manifest excerpt plus a preview of each
/// top-level script.
pub fn build_context(tree: &SkillTree) -> Result<String> {
    let mut sections = Vec::new();

    let manifest = tree.manifest_path();
    if manifest.is_file() {
        let content = fs::read_to_string(&manifest)
            .with_context(|| format!("Failed to read {}", manifest.display()))?;
        sections.push(format!(
            "=== SKILL.md ===\n{}...\n",
            truncate_chars(&content, MANIFEST_EXCERPT_CHARS)
        ));
    }

    let scripts_dir = tree.scripts_dir();
    if scripts_dir.is_dir() {
        sections.push("\n=== scripts/ ===".to_string());
        let mut scripts: Vec<_> = fs::read_dir(&scripts_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "py"))
            .collect();
        scripts.sort();
        for script in scripts {
            let content = String::from_utf8_lossy(&fs::read(&script)?).into_owned();
            let name = script
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            sections.push(format!("- {}", name));
            sections.push(format!(
                "  Preview: {}...\n",
                truncate_chars(&content, SCRIPT_PREVIEW_CHARS)
            ));
        }
    }

    Ok(sections.join("\n"))
}

/// One full-file replacement from an integration response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchBlock {
    pub path: String,
    pub content: String,
}

/// Every ```` ```filename: <path> ```` block in `text`, in order.
pub fn parse_patch_blocks(text: &str) -> Vec<PatchBlock> {
    let Ok(re) = Regex::new(r"(?s)```filename:[ \t]*([^\n]+)\n(.*?)```") else {
        return Vec::new();
    };
    re.captures_iter(text)
        .map(|caps| PatchBlock {
            path: caps[1].trim().to_string(),
            content: caps[2].to_string(),
        })
        .collect()
}

/// Relative, non-empty, and never climbing out of the tree.
pub fn is_safe_relative_path(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn is_script(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "py")
        && path
            .components()
            .next()
            .is_some_and(|c| c.as_os_str() == SCRIPTS_DIR)
}

fn write_block(tree: &SkillTree, block: &PatchBlock) -> Result<()> {
    let rel = Path::new(&block.path);
    let path = tree.root().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&path, &block.content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    if is_script(rel) {
        set_executable(&path)?;
    }
    Ok(())
}

/// How a feature ended up in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integration {
    /// Files written from backend patch blocks
    Patched(Vec<String>),
    /// Placeholder script plus a manifest section
    Template,
}

pub struct Integrator<'a> {
    generator: &'a dyn TextGenerator,
    timeout: Duration,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

impl<'a> Integrator<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self {
            generator,
            timeout: Duration::from_secs(90),
            max_tokens: 4000,
            temperature: 0.3,
            stream: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Add `feature` to `tree` in place. Backend problems and unwritable
    /// patch blocks degrade to the template strategy; only template write
    /// errors are returned.
    pub async fn integrate(
        &self,
        tree: &SkillTree,
        feature: &str,
        reference: Option<&ReferenceImpl>,
        requirement: &str,
    ) -> Result<Integration> {
        if !self.generator.is_available() {
            info!("Backend unavailable, using template integration for {}", feature);
            self.apply_template(tree, feature, reference)?;
            return Ok(Integration::Template);
        }

        let context = build_context(tree)?;
        let reference_code = reference
            .map(|r| r.code.as_str())
            .unwrap_or("No reference code provided");
        let request = CompletionRequest::prompt(prompts::integration_prompt(
            &context,
            feature,
            reference_code,
            requirement,
        ))
        .with_max_tokens(self.max_tokens)
        .with_temperature(self.temperature)
        .with_timeout(self.timeout)
        .with_stream(self.stream);

        match self.generator.complete(&request).await {
            Ok(response) => {
                let written = self.apply_patch(tree, &parse_patch_blocks(&response));
                if !written.is_empty() {
                    info!("Integrated {} ({} files)", feature, written.len());
                    return Ok(Integration::Patched(written));
                }
                warn!("No usable file blocks in response, using template integration for {}", feature);
            }
            Err(e) => warn!("Integration of {} failed ({}), using template", feature, e),
        }

        self.apply_template(tree, feature, reference)?;
        Ok(Integration::Template)
    }

    /// Write every usable block. A block that cannot be written is skipped,
    /// so a bad response degrades to the template instead of failing.
    fn apply_patch(&self, tree: &SkillTree, blocks: &[PatchBlock]) -> Vec<String> {
        let mut written = Vec::new();
        for block in blocks {
            if !is_safe_relative_path(&block.path) {
                warn!("Skipping unsafe patch path {:?}", block.path);
                continue;
            }
            match write_block(tree, block) {
                Ok(()) => {
                    debug!("Saved {}", block.path);
                    written.push(block.path.clone());
                }
                Err(e) => warn!("Skipping patch block {:?}: {:#}", block.path, e),
            }
        }
        written
    }

    fn apply_template(
        &self,
        tree: &SkillTree,
        feature: &str,
        reference: Option<&ReferenceImpl>,
    ) -> Result<()> {
        let title = title_case(feature);
        let scripts_dir = tree.scripts_dir();
        fs::create_dir_all(&scripts_dir)
            .with_context(|| format!("Failed to create {}", scripts_dir.display()))?;

        let script_path = scripts_dir.join(format!("{}.py", feature));
        if script_path.exists() {
            debug!("{} already exists, keeping it", script_path.display());
        } else {
            let note = reference
                .map(|r| r.description.as_str())
                .unwrap_or("No description");
            let body = format!(
                r#"#!/usr/bin/env python3
"""
{title} functionality.
"""

import sys


def {feature}(input_file, output_file=None):
    """
    {title} operation.

    Reference: {note}

    Args:
        input_file: Input file path
        output_file: Output file path (optional)

    Returns:
        Path to output file
    """
    print(f"Processing {{input_file}}...")
    if output_file is None:
        output_file = input_file.replace('.', '_{feature}.', 1)
    return output_file


if __name__ == "__main__":
    if len(sys.argv) > 1:
        result = {feature}(sys.argv[1])
        print(f"Output: {{result}}")
    else:
        print("Usage: python {feature}.py <input_file>")
"#
            );
            fs::write(&script_path, body)
                .with_context(|| format!("Failed to write {}", script_path.display()))?;
            set_executable(&script_path)?;
        }

        let manifest = tree.manifest_path();
        if manifest.is_file() {
            let mut content = fs::read_to_string(&manifest)
                .with_context(|| format!("Failed to read {}", manifest.display()))?;
            content.push_str(&format!(
                "\n\n## {title}\n\nUsage:\n```bash\npython scripts/{feature}.py <input>\n```\n"
            ));
            fs::write(&manifest, content)
                .with_context(|| format!("Failed to write {}", manifest.display()))?;
        }

        info!("Created template for {}", feature);
        Ok(())
    }
}
