//! Resource classification.
//!
//! Maps a request to the kind of resource it asks for. The mapping is pure:
//! the same request always lands in the same class.

use http::Method;
use serde::{Deserialize, Serialize};
use swkit_net::Request;

/// Resource class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Stylesheets, scripts, fonts and images.
    StaticAsset,
    /// HTML navigations.
    Page,
    /// Calls to the site's API.
    Api,
    /// Everything else.
    Other,
}

/// Classification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Path prefix of API calls.
    pub api_prefix: String,
    /// Hostname substring marking an API host.
    pub api_host_marker: String,
    /// File extensions (without dot) served as static assets.
    pub static_extensions: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api/".to_string(),
            api_host_marker: "api.".to_string(),
            static_extensions: [
                "css", "js", "woff", "woff2", "png", "jpg", "jpeg", "gif", "webp", "avif", "svg",
                "ico",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Request classifier.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify a request. Static assets win over pages, pages over API calls.
    pub fn classify(&self, request: &Request) -> ResourceKind {
        if self.is_static_asset(request) {
            ResourceKind::StaticAsset
        } else if self.is_page(request) {
            ResourceKind::Page
        } else if self.is_api(request) {
            ResourceKind::Api
        } else {
            ResourceKind::Other
        }
    }

    fn is_static_asset(&self, request: &Request) -> bool {
        let path = request.url.path();
        match path.rsplit_once('.') {
            Some((_, ext)) if !ext.contains('/') => {
                self.config.static_extensions.iter().any(|e| e == ext)
            }
            _ => false,
        }
    }

    fn is_page(&self, request: &Request) -> bool {
        request.method == Method::GET && request.accepts_html()
    }

    fn is_api(&self, request: &Request) -> bool {
        let path_match = request.url.path().starts_with(&self.config.api_prefix);
        let host_match = request
            .url
            .host_str()
            .is_some_and(|host| host.contains(&self.config.api_host_marker));
        path_match || host_match
    }
}
