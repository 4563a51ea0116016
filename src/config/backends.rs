//! Provider name → base URL mapping.

use std::collections::HashMap;

use url::Url;

use crate::config::schema::GatewayConfig;

/// Immutable mapping from backend name to base URL.
///
/// Built once per configuration; the ESI core only reads snapshots of it.
#[derive(Debug, Clone, Default)]
pub struct BackendMap {
    providers: HashMap<String, Url>,
    default: Option<String>,
}

impl BackendMap {
    /// Build from configuration. Entries with unparseable URLs are skipped
    /// (validation reports them before this point).
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut providers = HashMap::new();
        for backend in &config.backends {
            match Url::parse(&backend.base_url) {
                Ok(url) => {
                    providers.insert(backend.name.clone(), url);
                }
                Err(e) => {
                    tracing::warn!(backend = %backend.name, error = %e, "Invalid backend base URL");
                }
            }
        }
        Self {
            providers,
            default: config.default_backend.clone(),
        }
    }

    /// Build from `(name, base_url)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, url::ParseError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut providers = HashMap::new();
        for (name, url) in pairs {
            providers.insert(name.into(), Url::parse(url.as_ref())?);
        }
        Ok(Self { providers, default: None })
    }

    /// Set the backend used for pages and relative includes.
    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Url> {
        self.providers.get(name)
    }

    /// Base URL as used in template expansion: no trailing slash, so that
    /// `$PROVIDER({name})/path` never yields `//path`.
    pub fn base_for_template(&self, name: &str) -> Option<&str> {
        self.providers
            .get(name)
            .map(|url| url.as_str().trim_end_matches('/'))
    }

    /// Base URL of the default backend, if one is configured.
    pub fn default_url(&self) -> Option<&Url> {
        self.default.as_deref().and_then(|name| self.providers.get(name))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
