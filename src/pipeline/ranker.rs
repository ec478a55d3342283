//! Candidate ranking and the installed-skill perfect-match check.

use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{CandidateDescriptor, InstalledSkill};
use crate::llm::client::{CompletionRequest, TextGenerator};
use crate::llm::prompts;
use crate::util::tokenize;

/// Share of key words an installed skill must cover to pre-empt creation.
pub const PERFECT_MATCH_THRESHOLD: f64 = 0.7;

/// A catalog entry plus the score it earned for one requirement.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub descriptor: CandidateDescriptor,
    /// Always within [0, 1]
    pub similarity: f64,
}

#[derive(Debug, Deserialize)]
struct RankEntry {
    name: String,
    similarity: f64,
}

/// Stable descending sort: equal scores keep their input order.
fn sort_descending(ranked: &mut [RankedCandidate]) {
    ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
}

/// Deterministic ranking: |requirement ∩ (description ∪ tags)| / max(|requirement|, 1).
pub fn rank_by_keywords(requirement: &str, catalog: &[CandidateDescriptor]) -> Vec<RankedCandidate> {
    let req_words: BTreeSet<String> = tokenize(requirement).into_iter().collect();
    let denominator = req_words.len().max(1) as f64;

    let mut ranked: Vec<RankedCandidate> = catalog
        .iter()
        .map(|candidate| {
            let mut words: HashSet<String> = tokenize(&candidate.description).into_iter().collect();
            for tag in &candidate.tags {
                words.extend(tokenize(tag));
            }
            let overlap = req_words.iter().filter(|w| words.contains(*w)).count();
            RankedCandidate {
                descriptor: candidate.clone(),
                similarity: overlap as f64 / denominator,
            }
        })
        .collect();

    sort_descending(&mut ranked);
    ranked
}

/// Parse a backend ranking of `{name, similarity}` pairs.
///
/// Unknown names are dropped, catalog entries the backend did not mention are
/// excluded, scores are clamped to [0, 1]. Returns `None` when the text holds
/// no parsable array or nothing in it matches the catalog.
pub fn parse_semantic_ranking(
    text: &str,
    catalog: &[CandidateDescriptor],
) -> Option<Vec<RankedCandidate>> {
    let array_re = Regex::new(r"(?s)\[.*\]").ok()?;
    let json = array_re.find(text)?.as_str();
    let entries: Vec<RankEntry> = match serde_json::from_str(json) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Ranking response is not a JSON array of entries: {}", e);
            return None;
        }
    };

    let mut seen = HashSet::new();
    let mut ranked: Vec<RankedCandidate> = entries
        .into_iter()
        .filter(|e| e.similarity.is_finite())
        .filter_map(|e| {
            let descriptor = catalog.iter().find(|c| c.name == e.name)?;
            if !seen.insert(e.name) {
                return None;
            }
            Some(RankedCandidate {
                descriptor: descriptor.clone(),
                similarity: e.similarity.clamp(0.0, 1.0),
            })
        })
        .collect();

    if ranked.is_empty() {
        return None;
    }
    sort_descending(&mut ranked);
    Some(ranked)
}

/// Ranks a catalog against a requirement, semantically when the backend is
/// available and by keyword overlap otherwise.
pub struct Ranker<'a> {
    generator: &'a dyn TextGenerator,
    timeout: Duration,
    stream: bool,
}

impl<'a> Ranker<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self {
            generator,
            timeout: Duration::from_secs(30),
            stream: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub async fn rank(
        &self,
        requirement: &str,
        catalog: &[CandidateDescriptor],
    ) -> Vec<RankedCandidate> {
        if catalog.is_empty() {
            return Vec::new();
        }

        if !self.generator.is_available() {
            info!("Backend unavailable, ranking by keyword overlap");
            return rank_by_keywords(requirement, catalog);
        }

        let request = CompletionRequest::prompt(prompts::ranking_prompt(requirement, catalog))
            .with_max_tokens(1000)
            .with_temperature(0.3)
            .with_timeout(self.timeout)
            .with_stream(self.stream);

        match self.generator.complete(&request).await {
            Ok(text) => match parse_semantic_ranking(&text, catalog) {
                Some(ranked) => {
                    info!("Semantic ranking returned {} candidates", ranked.len());
                    ranked
                }
                None => {
                    warn!("Unparsable ranking response, falling back to keyword matching");
                    rank_by_keywords(requirement, catalog)
                }
            },
            Err(e) => {
                warn!("Semantic ranking failed ({}), falling back to keyword matching", e);
                rank_by_keywords(requirement, catalog)
            }
        }
    }
}

/// Distinct requirement tokens longer than three characters.
pub fn key_words(requirement: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(requirement)
        .into_iter()
        .filter(|w| w.chars().count() > 3)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// True when at least 70% of `key_words` occur in `description`.
/// An empty key-word set never matches.
pub fn is_perfect_match(key_words: &[String], description: &str) -> bool {
    if key_words.is_empty() {
        return false;
    }
    let description = description.to_lowercase();
    let matches = key_words
        .iter()
        .filter(|w| description.contains(w.as_str()))
        .count();
    matches as f64 >= key_words.len() as f64 * PERFECT_MATCH_THRESHOLD
}

/// First installed skill whose description already covers the requirement.
pub fn find_perfect_match<'s>(
    requirement: &str,
    installed: &'s [InstalledSkill],
) -> Option<&'s InstalledSkill> {
    let words = key_words(requirement);
    installed
        .iter()
        .find(|skill| is_perfect_match(&words, &skill.description))
}
