use anyhow::Result;
use tracing::{info, warn};

use super::client::{LocalGenerator, MockGenerator, TextGenerator};
use super::gateway::GatewayClient;
use crate::config::LlmConfig;

/// Pick the generation backend. This is the only place that decides between
/// the remote gateway and the deterministic-local fallback.
pub fn create_generator(
    llm_config: &LlmConfig,
    dry_run: bool,
    offline: bool,
) -> Result<Box<dyn TextGenerator>> {
    if dry_run {
        info!("Dry run: using mock generation backend");
        return Ok(Box::new(MockGenerator::new()));
    }

    if offline {
        info!("Offline mode: deterministic fallbacks only");
        return Ok(Box::new(LocalGenerator));
    }

    match llm_config.api_key() {
        Some(api_key) => {
            let client = GatewayClient::new(
                api_key,
                llm_config.model.clone(),
                llm_config.base_url.clone(),
            )?;
            info!(
                "Using generation backend at {} (model: {})",
                llm_config.base_url,
                client.model()
            );
            Ok(Box::new(client))
        }
        None => {
            warn!(
                "No API key in {}, generation backend disabled: deterministic fallbacks only",
                llm_config.api_key_env.as_deref().unwrap_or("<unset>")
            );
            Ok(Box::new(LocalGenerator))
        }
    }
}
