use crate::config::types::{CrawlConfig, DiscoveryLimits};
use crate::ConfigError;
use url::Url;

/// Validates a crawl configuration
pub fn validate(config: &CrawlConfig) -> Result<(), ConfigError> {
    validate_targets(&config.targets)?;
    validate_limits(&config.limits)?;
    validate_file_types(&config.filters.file_types)?;
    Ok(())
}

/// Validates target URLs
fn validate_targets(targets: &[String]) -> Result<(), ConfigError> {
    for target in targets {
        let url = Url::parse(target)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", target, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "target must be http(s), got '{}'",
                target
            )));
        }

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(format!(
                "target has no host: '{}'",
                target
            )));
        }
    }

    Ok(())
}

/// Validates discovery limits
fn validate_limits(limits: &DiscoveryLimits) -> Result<(), ConfigError> {
    if limits.max_documents == 0 {
        return Err(ConfigError::Validation(
            "max_documents must be >= 1".to_string(),
        ));
    }

    if limits.max_sitemap_urls == 0 {
        return Err(ConfigError::Validation(
            "max_sitemap_urls must be >= 1".to_string(),
        ));
    }

    if let Some(per_domain) = limits.max_documents_per_domain {
        if per_domain == 0 {
            return Err(ConfigError::Validation(
                "max_documents_per_domain must be >= 1 when set".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates file-type extensions
fn validate_file_types(file_types: &[String]) -> Result<(), ConfigError> {
    for ext in file_types {
        let trimmed = ext.trim_start_matches('.');
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Validation(format!(
                "invalid file type '{}': extensions must be alphanumeric",
                ext
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;

    fn config_with_targets(targets: Vec<&str>) -> CrawlConfig {
        CrawlConfig {
            targets: targets.into_iter().map(String::from).collect(),
            ..CrawlConfig::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let config = config_with_targets(vec!["https://example.org", "http://moe.gov.tt"]);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_targets_allowed() {
        // An empty target list is legal; discovery simply returns nothing.
        let config = config_with_targets(vec![]);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_target_url() {
        let config = config_with_targets(vec!["not a url"]);
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let config = config_with_targets(vec!["ftp://example.org"]);
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_zero_max_documents_rejected() {
        let mut config = config_with_targets(vec!["https://example.org"]);
        config.limits.max_documents = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_bad_file_type_rejected() {
        let mut config = config_with_targets(vec!["https://example.org"]);
        config.filters.file_types = vec!["pd f".to_string()];
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }
}
