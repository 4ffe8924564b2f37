//! Maps an intercepted request to the resource class that selects its caching strategy.

use std::fmt;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::request::RequestDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
    Critical,
    Standard,
    ApiShortCache,
    NeverCache,
}

impl ResourceClass {
    /// Classes that own a store. `NeverCache` never touches one.
    pub const STORED: [ResourceClass; 3] = [
        ResourceClass::Standard,
        ResourceClass::Critical,
        ResourceClass::ApiShortCache,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Critical => "critical",
            ResourceClass::Standard => "standard",
            ResourceClass::ApiShortCache => "api-short-cache",
            ResourceClass::NeverCache => "never-cache",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The runtime's own host and port, taken from its origin URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOrigin {
    pub host: String,
    pub port: Option<u16>,
}

impl RuntimeOrigin {
    pub fn from_url(url: &Url) -> Self {
        Self {
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port_or_known_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    origin: RuntimeOrigin,
    sensitive_paths: Vec<String>,
    critical_suffixes: Vec<String>,
    api_hosts: Vec<String>,
    api_paths: Vec<String>,
}

impl Classifier {
    pub fn new(
        origin: RuntimeOrigin,
        sensitive_paths: Vec<String>,
        critical_suffixes: Vec<String>,
        api_hosts: Vec<String>,
        api_paths: Vec<String>,
    ) -> Self {
        Self {
            origin,
            sensitive_paths,
            critical_suffixes,
            api_hosts,
            api_paths,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            RuntimeOrigin::from_url(&config.origin),
            config.sensitive_paths.clone(),
            config.critical_suffixes.clone(),
            config.api_hosts.clone(),
            config.api_paths.clone(),
        )
    }

    /// Classify a request. Rules are evaluated in strict priority order;
    /// requests that are not cacheable at all are passed through as `NeverCache`.
    pub fn classify(&self, request: &RequestDescriptor) -> ResourceClass {
        let url = &request.url;
        let class = self.classify_url(url, &request.method);
        debug!(url = %url, method = %request.method, class = %class, "Request classified");
        class
    }

    fn classify_url(&self, url: &Url, method: &Method) -> ResourceClass {
        if !matches!(url.scheme(), "http" | "https") {
            return ResourceClass::NeverCache;
        }

        if url.port_or_known_default() != self.origin.port {
            return ResourceClass::NeverCache;
        }

        let path = url.path();

        if self.sensitive_paths.iter().any(|p| matches_segment(path, p)) {
            return ResourceClass::NeverCache;
        }

        if self.critical_suffixes.iter().any(|s| path.ends_with(s.as_str())) {
            return ResourceClass::Critical;
        }

        if self.is_api(url) {
            return if *method == Method::GET {
                ResourceClass::ApiShortCache
            } else {
                ResourceClass::NeverCache
            };
        }

        ResourceClass::Standard
    }

    fn is_api(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default();
        self.api_hosts.iter().any(|h| matches_domain(host, h))
            || self.api_paths.iter().any(|p| matches_segment(url.path(), p))
    }
}

/// `pattern` occurs in `path` on whole path segments: `/auth` matches
/// `/auth` and `/app/auth/callback` but not `/authors`.
fn matches_segment(path: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    path.match_indices(pattern).any(|(start, _)| {
        let starts_segment = pattern.starts_with('/') || start == 0 || path[..start].ends_with('/');
        let end = start + pattern.len();
        let ends_segment = pattern.ends_with('/') || end == path.len() || path[end..].starts_with('/');
        starts_segment && ends_segment
    })
}

/// `host` is `domain` or one of its subdomains.
fn matches_domain(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::from_config(&Config::default())
    }

    fn classify(url: &str) -> ResourceClass {
        classifier().classify(&RequestDescriptor::get(url).unwrap())
    }

    #[test]
    fn test_non_http_schemes_are_not_cached() {
        let req = RequestDescriptor::get("chrome-extension://abc/index.css").unwrap();
        assert_eq!(classifier().classify(&req), ResourceClass::NeverCache);
    }

    #[test]
    fn test_foreign_port_is_not_cached() {
        assert_eq!(classify("https://localhost:9999/assets/index.css"), ResourceClass::NeverCache);
    }

    #[test]
    fn test_sensitive_paths_win_over_everything() {
        assert_eq!(classify("https://localhost/login"), ResourceClass::NeverCache);
        assert_eq!(classify("https://localhost/auth/callback"), ResourceClass::NeverCache);
        // Would otherwise be critical by suffix
        assert_eq!(classify("https://localhost/dashboard/index.html"), ResourceClass::NeverCache);
        // Would otherwise be api-short-cache
        assert_eq!(
            classify("https://api.example.com/auth/v1/token"),
            ResourceClass::NeverCache
        );
    }

    #[test]
    fn test_sensitive_paths_match_whole_segments() {
        assert_eq!(classify("https://localhost/authors/x.png"), ResourceClass::Standard);
        assert_eq!(classify("https://localhost/app/login"), ResourceClass::NeverCache);
        assert_eq!(classify("https://localhost/logins.css"), ResourceClass::Standard);
    }

    #[test]
    fn test_api_hosts_match_domain_suffix() {
        assert_eq!(
            classify("https://abcd.supabase.co/storage/file"),
            ResourceClass::ApiShortCache
        );
        assert_eq!(
            classify("https://notsupabase.company.com/logo.png"),
            ResourceClass::Standard
        );
        assert_eq!(
            classify("https://supabase.co.evil.com/logo.png"),
            ResourceClass::Standard
        );
    }

    #[test]
    fn test_critical_suffixes() {
        assert_eq!(classify("https://localhost/assets/index.css"), ResourceClass::Critical);
        assert_eq!(classify("https://localhost/manifest.json"), ResourceClass::Critical);
    }

    #[test]
    fn test_api_requests() {
        assert_eq!(
            classify("https://api.example.com/rest/v1/items"),
            ResourceClass::ApiShortCache
        );

        let post = RequestDescriptor::get("https://api.example.com/rest/v1/items")
            .unwrap()
            .with_method(Method::POST);
        assert_eq!(classifier().classify(&post), ResourceClass::NeverCache);
    }

    #[test]
    fn test_everything_else_is_standard() {
        assert_eq!(classify("https://localhost/images/logo.png"), ResourceClass::Standard);
        assert_eq!(classify("http://localhost:443/fonts/a.woff2"), ResourceClass::Standard);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = classifier();
        let req = RequestDescriptor::get("https://localhost/courses/42").unwrap();
        assert_eq!(c.classify(&req), c.classify(&req));
    }
}
