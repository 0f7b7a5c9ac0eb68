pub mod config;
pub mod logging;
pub mod error;
pub mod validation;
pub mod pricelist;

pub use self::config::*;
pub use logging::*;
pub use error::*;
pub use validation::*;
pub use pricelist::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8087);
        assert_eq!(config.extraction.max_pages, 10);
        assert_eq!(config.standardization.batch_size, 50);
        assert_eq!(config.extraction.fallback_merge_mode, FallbackMergeMode::Replace);
        assert!(config.pipeline.auto_approve);
        assert!(validator::Validate::validate(&config).is_ok());
    }

    #[test]
    fn test_category_threshold_lookup() {
        let config = StandardizationConfig::default();
        assert_eq!(config.threshold_for("Vegetables"), 0.80);
        assert_eq!(config.threshold_for("meat"), 0.85);
    }

    #[test]
    fn test_invalid_threshold_is_rejected() {
        let mut config = AppConfig::default();
        config.extraction.header_threshold = 1.5;
        assert!(validator::Validate::validate(&config).is_err());
    }

    #[test]
    fn test_error_handling() {
        let error = PricebookError::validation("price", "must be positive");
        assert_eq!(error.error_code(), "VALIDATION_ERROR");
        assert_eq!(error.http_status_code(), 400);

        let error = PricebookError::external_service("vision", "502 Bad Gateway");
        assert_eq!(error.http_status_code(), 502);
    }
}
