use crate::chunking::ChunkingConfig;
use crate::gateway::{GatewayConfig, RetryPolicy, DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTokenBudgets {
    pub extraction: u32,
    pub research: u32,
    pub scoring: u32,
    pub flags: u32,
    pub recommendation: u32,
}

impl Default for StageTokenBudgets {
    fn default() -> Self {
        Self {
            extraction: DEFAULT_MAX_TOKENS,
            research: 3000,
            scoring: DEFAULT_MAX_TOKENS,
            flags: DEFAULT_MAX_TOKENS,
            recommendation: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub gateway: GatewayConfig,
    pub chunking: ChunkingConfig,
    /// Upper bound on the whole document stage, chunk and merge calls included.
    pub document_stage_timeout: Duration,
    pub max_tokens: StageTokenBudgets,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            chunking: ChunkingConfig::default(),
            document_stage_timeout: Duration::from_secs(90),
            max_tokens: StageTokenBudgets::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `ANTHROPIC_API_KEY`, `ANTHROPIC_BASE_URL`,
    /// `DEAL_SCREEN_RETRY_INITIAL_MS` and `DEAL_SCREEN_RETRY_MAX_ATTEMPTS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key).and_then(|value| {
                let value = value.trim().to_string();
                if value.is_empty() {
                    None
                } else {
                    Some(value)
                }
            })
        };

        let mut config = Self::default();

        if let Some(api_key) = read("ANTHROPIC_API_KEY") {
            config.gateway.api_key = api_key;
        }
        config.gateway.base_url =
            read("ANTHROPIC_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let defaults = RetryPolicy::default();
        config.gateway.retry = RetryPolicy {
            initial_delay: read("DEAL_SCREEN_RETRY_INITIAL_MS")
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_attempts: read("DEAL_SCREEN_RETRY_MAX_ATTEMPTS")
                .and_then(|value| value.parse::<u32>().ok())
                .filter(|attempts| *attempts > 0)
                .unwrap_or(defaults.max_attempts),
        };

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_constants() {
        let config = PipelineConfig::from_lookup(lookup(&[]));
        assert_eq!(config.gateway.retry.initial_delay, Duration::from_secs(3));
        assert_eq!(config.gateway.retry.max_attempts, 5);
        assert_eq!(config.gateway.request_timeout, Duration::from_secs(120));
        assert_eq!(config.chunking.pages_per_chunk, 12);
        assert_eq!(config.chunking.native_threshold_bytes, 5 * 1024 * 1024);
        assert_eq!(config.chunking.extraction_timeout, Duration::from_secs(30));
        assert_eq!(config.max_tokens.research, 3000);
    }

    #[test]
    fn environment_overrides_are_applied_and_validated() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "  sk-test  "),
            ("ANTHROPIC_BASE_URL", "http://localhost:8089"),
            ("DEAL_SCREEN_RETRY_INITIAL_MS", "250"),
            ("DEAL_SCREEN_RETRY_MAX_ATTEMPTS", "0"),
        ]));

        assert_eq!(config.gateway.api_key, "sk-test");
        assert_eq!(config.gateway.base_url, "http://localhost:8089");
        assert_eq!(config.gateway.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.gateway.retry.max_attempts, 5);
    }
}
