use crate::config::types::{Config, CrawlerSection, RetrySection, StorageSection, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration file
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_section(&config.crawler)?;
    validate_retry_section(&config.retry)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_storage_section(&config.storage)?;
    validate_seeds(config)?;
    for pattern in &config.allowed_domains {
        validate_domain_pattern(pattern)?;
    }
    Ok(())
}

fn validate_crawler_section(crawler: &CrawlerSection) -> Result<(), ConfigError> {
    if crawler.thread_pool_size < 1 || crawler.thread_pool_size > 256 {
        return Err(ConfigError::Validation(format!(
            "thread-pool-size must be between 1 and 256, got {}",
            crawler.thread_pool_size
        )));
    }

    if crawler.max_pages_to_fetch < 1 {
        return Err(ConfigError::Validation(format!(
            "max-pages-to-fetch must be >= 1, got {}",
            crawler.max_pages_to_fetch
        )));
    }

    if crawler.max_pages_per_domain == Some(0) {
        return Err(ConfigError::Validation(
            "max-pages-per-domain must be >= 1 when set".to_string(),
        ));
    }

    if crawler.request_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "request-timeout-ms must be >= 1".to_string(),
        ));
    }

    if crawler.max_redirects > 20 {
        return Err(ConfigError::Validation(format!(
            "max-redirects must be <= 20, got {}",
            crawler.max_redirects
        )));
    }

    Ok(())
}

fn validate_retry_section(retry: &RetrySection) -> Result<(), ConfigError> {
    if retry.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be <= 10, got {}",
            retry.max_retries
        )));
    }

    if let Some(status) = retry
        .retry_statuses
        .iter()
        .find(|s| !(100..=599).contains(*s))
    {
        return Err(ConfigError::Validation(format!(
            "retry-statuses contains invalid HTTP status {}",
            status
        )));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    Ok(())
}

fn validate_storage_section(storage: &StorageSection) -> Result<(), ConfigError> {
    if storage.folder.is_empty() {
        return Err(ConfigError::Validation(
            "storage folder cannot be empty".to_string(),
        ));
    }

    if storage.resumable && storage.checkpoint_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "checkpoint-interval-secs must be >= 1 for a resumable crawl".to_string(),
        ));
    }

    Ok(())
}

fn validate_seeds(config: &Config) -> Result<(), ConfigError> {
    if config.seeds.is_empty() && config.endpoints.is_empty() {
        return Err(ConfigError::Validation(
            "at least one seed or endpoint is required".to_string(),
        ));
    }

    let composed = config.endpoints.iter().map(|e| e.base_uri());
    for seed in config.seeds.iter().map(|s| s.url.clone()).chain(composed) {
        let url = Url::parse(&seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use http or https",
                seed
            )));
        }
    }

    Ok(())
}

/// Validates a domain pattern (supports a leading `*.` wildcard)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
        || domain.contains("..")
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' is malformed",
            domain
        )));
    }

    Ok(())
}
