use anyhow::Result;

use crate::catalog::load_catalog;
use crate::config::Config;
use crate::llm::factory;
use crate::pipeline::ranker::{RankedCandidate, Ranker};

/// How many candidates `search` prints.
const TOP_N: usize = 3;

pub async fn run(
    requirement: String,
    config_path: Option<String>,
    offline: bool,
    dry_run: bool,
) -> Result<()> {
    let config = Config::load_with_path(config_path)?;
    let catalog = load_catalog(config.catalog.path.as_deref())?;
    let generator = factory::create_generator(&config.llm, dry_run, offline)?;

    let ranked = Ranker::new(generator.as_ref())
        .with_timeout(config.llm.ranking_timeout())
        .with_stream(config.llm.stream)
        .rank(&requirement, &catalog)
        .await;

    if ranked.is_empty() {
        println!("No candidates in catalog");
        return Ok(());
    }
    for line in format_results(&ranked) {
        println!("{}", line);
    }
    Ok(())
}

fn format_results(ranked: &[RankedCandidate]) -> Vec<String> {
    ranked
        .iter()
        .take(TOP_N)
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {} ({:.2}) - {}",
                i + 1,
                r.descriptor.name,
                r.similarity,
                r.descriptor.description
            )
        })
        .collect()
}
