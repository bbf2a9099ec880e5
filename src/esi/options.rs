use std::time::Duration;

use serde::Deserialize;

use super::error::ConfigError;
use super::executor::IncludeExecutor;

/// Settings for [`EsiMiddleware::in_memory`](super::EsiMiddleware::in_memory).
///
/// Every field has a default, so `{}` is a valid configuration:
///
/// ```rust
/// use rttp_esi::esi::EsiOptions;
///
/// let options = EsiOptions::from_json(r#"{ "default_ttl_secs": 30 }"#).unwrap();
/// assert_eq!(options.marker_header, "X-Esi");
/// assert_eq!(options.max_include_depth, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EsiOptions {
    /// Header that marks fragment sub-requests issued by the layer itself.
    pub marker_header: String,
    /// How deeply includes may nest inside fetched fragments.
    pub max_include_depth: usize,
    /// Cache lifetime for pages whose origin sent no freshness directive.
    /// `None` keeps them until evicted.
    pub default_ttl_secs: Option<u64>,
}

impl Default for EsiOptions {
    fn default() -> Self {
        Self {
            marker_header: "X-Esi".to_owned(),
            max_include_depth: IncludeExecutor::DEFAULT_MAX_DEPTH,
            default_ttl_secs: None,
        }
    }
}

impl EsiOptions {
    /// Parses and validates options from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.marker_header.trim().is_empty() {
            return Err(ConfigError::EmptyMarkerHeader);
        }
        if self.max_include_depth == 0 {
            return Err(ConfigError::ZeroIncludeDepth);
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(EsiOptions::from_json("{}").unwrap(), EsiOptions::default());
    }

    #[test]
    fn fields_override_defaults() {
        let options = EsiOptions::from_json(
            r#"{ "marker_header": "X-Fragment", "max_include_depth": 2, "default_ttl_secs": 90 }"#,
        )
        .unwrap();
        assert_eq!(options.marker_header, "X-Fragment");
        assert_eq!(options.max_include_depth, 2);
        assert_eq!(options.default_ttl(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            EsiOptions::from_json(r#"{ "max_depth": 3 }"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            EsiOptions::from_json(r#"{ "marker_header": " " }"#),
            Err(ConfigError::EmptyMarkerHeader)
        ));
        assert!(matches!(
            EsiOptions::from_json(r#"{ "max_include_depth": 0 }"#),
            Err(ConfigError::ZeroIncludeDepth)
        ));
    }
}
