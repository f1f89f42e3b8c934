//! API Configuration Module
//!
//! Authentication and CORS settings for the HTTP surface. Configuration is
//! loaded from environment variables with defaults for development.

use geohealth_core::AcceptedKeys;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for authentication and CORS.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Authentication
    // ========================================================================
    /// When false every caller is admitted under the anonymous identity.
    pub auth_enabled: bool,

    /// Hashes of the API keys accepted in `X-API-Key`.
    pub api_keys: AcceptedKeys,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty, or a single `*`, means allow all origins.
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            auth_enabled: false,
            api_keys: AcceptedKeys::default(),
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `GEOHEALTH_AUTH_ENABLED`: "true" or "false" (default: false)
    /// - `GEOHEALTH_API_KEYS`: Comma-separated keys; 64-char hex entries are pre-hashed
    /// - `GEOHEALTH_CORS_ORIGINS`: Comma-separated allowed origins (empty or `*` = allow all)
    /// - `GEOHEALTH_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `GEOHEALTH_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    pub fn from_env() -> Self {
        let auth_enabled = std::env::var("GEOHEALTH_AUTH_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let api_keys = std::env::var("GEOHEALTH_API_KEYS")
            .ok()
            .map(|s| AcceptedKeys::parse(&s))
            .unwrap_or_default();

        let cors_origins = std::env::var("GEOHEALTH_CORS_ORIGINS")
            .ok()
            .map(|s| parse_origins(&s))
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("GEOHEALTH_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let cors_max_age_secs = std::env::var("GEOHEALTH_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(86400);

        Self {
            auth_enabled,
            api_keys,
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
        }
    }

    /// Require `X-API-Key` and accept `keys`.
    pub fn with_api_keys(mut self, keys: AcceptedKeys) -> Self {
        self.auth_enabled = true;
        self.api_keys = keys;
        self
    }

    /// Check if a given origin is allowed. Entries of the form `*.domain`
    /// match `https://domain` and any https subdomain of it.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }

            // *.example.org
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{pattern}"))
                        || origin_domain == pattern;
                }
            }

            false
        })
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    if origins.iter().any(|o| o == "*") {
        Vec::new()
    } else {
        origins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert!(!config.auth_enabled);
        assert!(config.api_keys.is_empty());
        assert!(config.cors_origins.is_empty());
        assert!(!config.cors_allow_credentials);
        assert_eq!(config.cors_max_age_secs, 86400);
    }

    #[test]
    fn test_with_api_keys_enables_auth() {
        let config = ApiConfig::default().with_api_keys(AcceptedKeys::parse("k1,k2"));
        assert!(config.auth_enabled);
        assert_eq!(config.api_keys.len(), 2);
    }

    #[test]
    fn test_wildcard_origin_means_allow_all() {
        assert!(parse_origins("*").is_empty());
        assert!(parse_origins(" https://a.org , *").is_empty());
        assert_eq!(
            parse_origins("https://a.org, https://b.org,"),
            vec!["https://a.org".to_string(), "https://b.org".to_string()]
        );
    }

    #[test]
    fn test_origin_allowed_dev_mode() {
        let config = ApiConfig::default();
        assert!(config.is_origin_allowed("https://anything.com"));
        assert!(config.is_origin_allowed("http://localhost:8000"));
    }

    #[test]
    fn test_origin_allowed_production() {
        let mut config = ApiConfig::default();
        config.cors_origins = vec![
            "https://geohealth.example.org".to_string(),
            "https://app.geohealth.example.org".to_string(),
        ];

        assert!(config.is_origin_allowed("https://geohealth.example.org"));
        assert!(config.is_origin_allowed("https://app.geohealth.example.org"));
        assert!(!config.is_origin_allowed("https://evil.com"));
    }

    #[test]
    fn test_wildcard_subdomain() {
        let mut config = ApiConfig::default();
        config.cors_origins = vec!["*.geohealth.example.org".to_string()];

        assert!(config.is_origin_allowed("https://app.geohealth.example.org"));
        assert!(!config.is_origin_allowed("https://notgeohealth.example.org"));
        assert!(!config.is_origin_allowed("http://app.geohealth.example.org"));
    }
}
