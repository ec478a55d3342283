//! Prompt builders for every backend round-trip in the pipeline.

use crate::catalog::CandidateDescriptor;
use crate::pipeline::scanner::CompatibilityIssue;

pub const RANKING_MARKER: &str = "Rank these skills by relevance";
pub const FEATURE_MARKER: &str = "NEW FEATURE TO ADD: ";
pub const ORIGINAL_CODE_MARKER: &str = "ORIGINAL CODE:";

/// The two execution environments the sandbox provides.
pub const SANCTIONED_RUNTIMES: &str = "Python 3.11 or Node.js 24";

pub fn ranking_prompt(requirement: &str, catalog: &[CandidateDescriptor]) -> String {
    let skills = catalog
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}: {}", i + 1, s.name, s.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"User needs: "{requirement}"

Available skills:
{skills}

Task: {RANKING_MARKER} to the user's need. Consider:
- Semantic similarity (not just keywords)
- What the user is trying to accomplish
- Which skill provides the closest functionality

Return ONLY a JSON array of skill names in order of relevance, with similarity scores (0-1):
[
  {{"name": "pdf", "similarity": 0.95}},
  {{"name": "docx", "similarity": 0.3}}
]"#
    )
}

pub fn integration_prompt(
    context: &str,
    feature: &str,
    reference_code: &str,
    requirement: &str,
) -> String {
    format!(
        r#"You are integrating a new feature into an existing skill.

USER REQUIREMENT: {requirement}

EXISTING SKILL STRUCTURE:
{context}

{FEATURE_MARKER}{feature}

REFERENCE IMPLEMENTATION:
{reference_code}

TASK:
1. Add the new feature ({feature}) to the existing skill
2. Match the existing code style and patterns
3. Ensure compatibility with the sandbox environment:
   - {SANCTIONED_RUNTIMES}
   - No Docker dependencies
   - Memory usage < 2GB
   - Use standard libraries when possible
4. Keep dependencies minimal
5. Follow the skill's existing structure (scripts/, references/, assets/)

OUTPUT:
Provide the complete content of every new or modified file. Format as:

```filename: scripts/{feature}.py
[code here]
```

```filename: SKILL.md
[updated SKILL.md with feature documented]
```

Each block must contain the full file, not a diff."#
    )
}

pub fn containerization_prompt(original_code: &str, issue: &CompatibilityIssue) -> String {
    format!(
        r#"Fix this Python code to remove Docker dependencies.

ISSUE: {}

{ORIGINAL_CODE_MARKER}
```python
{original_code}
```

REQUIREMENTS:
- Remove all Docker usage
- Use only {SANCTIONED_RUNTIMES} native features
- Keep the same functionality
- Use subprocess for native commands if needed

IMPORTANT: Output ONLY the fixed Python code wrapped in ```python code blocks. Do NOT include explanations."#,
        issue.description
    )
}

pub fn runtime_prompt(original_code: &str, issue: &CompatibilityIssue) -> String {
    format!(
        r#"This code uses a runtime that is not available in the sandbox.

ISSUE: {}

AVAILABLE: {SANCTIONED_RUNTIMES}

{ORIGINAL_CODE_MARKER}
```python
{original_code}
```

TASK: Rewrite to use only {SANCTIONED_RUNTIMES}. No Java, Ruby, Go, or .NET toolchains and no containers.

Output only the fixed code wrapped in ```python code blocks."#,
        issue.description
    )
}

pub fn memory_prompt(original_code: &str, issue: &CompatibilityIssue) -> String {
    format!(
        r#"This code may use too much memory in the sandbox (4GB limit).

ISSUE: {}

{ORIGINAL_CODE_MARKER}
```python
{original_code}
```

TASK: Optimize for memory efficiency:
- Use streaming/chunked reading for large files
- Don't load entire files into memory
- Process data in batches
- Use only {SANCTIONED_RUNTIMES}, no containers

Output only the fixed code wrapped in ```python code blocks."#,
        issue.description
    )
}
