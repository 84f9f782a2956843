//! Backend selection
//!
//! Every proxied path maps to exactly one [`BackendTarget`]. Rules are
//! evaluated in order against the path segments; the first match wins and a
//! path no rule claims goes to the table's fallback target.

use std::fmt;

/// Live API backend serving namespaced resource operations
pub const RESOURCE_BACKEND: &str = "us-central1-run.googleapis.com";

/// Auxiliary backend answering discovery and schema requests
pub const DISCOVERY_BACKEND: &str = "146.148.59.112";

/// Path segment that introduces a namespace name
pub const NAMESPACE_SEGMENT: &str = "namespaces";

/// Remote host, scheme and certificate policy for one proxied request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub host: String,
    pub scheme: String,
    pub verify_peer: bool,
}

impl BackendTarget {
    /// HTTPS target with full certificate verification
    pub fn verified(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            scheme: "https".to_string(),
            verify_peer: true,
        }
    }

    /// HTTPS target whose certificate is not checked
    ///
    /// The discovery backend is addressed by IP, which its certificate does not cover.
    pub fn unverified(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            scheme: "https".to_string(),
            verify_peer: false,
        }
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)
    }
}

/// Predicate over the segments of a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatcher {
    /// A segment equal to the given name, followed by a non-empty segment
    ///
    /// A trailing `namespaces/` with no name after it does not match.
    SegmentWithValue(String),
    /// Path starts with the given segments
    SegmentPrefix(Vec<String>),
}

impl PathMatcher {
    pub fn matches(&self, path: &str) -> bool {
        let segments = segments(path);
        match self {
            PathMatcher::SegmentWithValue(name) => segments
                .windows(2)
                .any(|pair| pair[0] == name.as_str() && !pair[1].is_empty()),
            PathMatcher::SegmentPrefix(prefix) => {
                prefix.len() <= segments.len()
                    && prefix.iter().zip(&segments).all(|(want, got)| want.as_str() == *got)
            }
        }
    }
}

/// Split a path into its segments, ignoring the leading slash
fn segments(path: &str) -> Vec<&str> {
    path.strip_prefix('/').unwrap_or(path).split('/').collect()
}

/// One entry in the routing table
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub matcher: PathMatcher,
    pub target: BackendTarget,
}

/// Ordered routing table with a mandatory fallback
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    fallback: BackendTarget,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>, fallback: BackendTarget) -> Self {
        Self { rules, fallback }
    }

    /// Choose the backend for a path
    pub fn select(&self, path: &str) -> &BackendTarget {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(path))
            .map(|rule| &rule.target)
            .unwrap_or(&self.fallback)
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn fallback(&self) -> &BackendTarget {
        &self.fallback
    }
}

impl Default for RouteTable {
    /// Namespaced resources go to the live API; everything else to the discovery host
    fn default() -> Self {
        Self::new(
            vec![RouteRule {
                matcher: PathMatcher::SegmentWithValue(NAMESPACE_SEGMENT.to_string()),
                target: BackendTarget::verified(RESOURCE_BACKEND),
            }],
            BackendTarget::unverified(DISCOVERY_BACKEND),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_paths_use_live_backend() {
        let table = RouteTable::default();

        for path in [
            "/apis/serving.knative.dev/v1alpha1/namespaces/default/services",
            "/apis/serving.knative.dev/v1alpha1/namespaces/ns/services/foo",
            "/apis/domains.cloudrun.com/v1alpha1/namespaces/p/domainmappings/",
        ] {
            let target = table.select(path);
            assert_eq!(target.host, RESOURCE_BACKEND, "{}", path);
            assert!(target.verify_peer);
            assert_eq!(target.scheme, "https");
        }
    }

    #[test]
    fn test_discovery_paths_use_unverified_backend() {
        let table = RouteTable::default();

        for path in [
            "/openapi/v2",
            "/openapi",
            "/swagger-2.0.0.pb-v1",
            "/apis/serving.knative.dev/v1alpha1",
            "/api/v1/namespaces",
            "/apis/serving.knative.dev/v1alpha1/namespaces/",
        ] {
            let target = table.select(path);
            assert_eq!(target.host, DISCOVERY_BACKEND, "{}", path);
            assert!(!target.verify_peer);
        }
    }

    #[test]
    fn test_marker_must_be_whole_segment() {
        let table = RouteTable::default();

        assert_eq!(
            table.select("/apis/g/v1/foonamespaces/x").host,
            DISCOVERY_BACKEND
        );
        assert_eq!(
            table.select("/apis/g/v1/namespaces-old/x").host,
            DISCOVERY_BACKEND
        );
    }

    #[test]
    fn test_resource_named_like_marker() {
        let table = RouteTable::default();

        assert_eq!(
            table.select("/apis/g/v1/namespaces/ns/services/namespaces").host,
            RESOURCE_BACKEND
        );
    }

    #[test]
    fn test_selection_is_stable() {
        let table = RouteTable::default();
        let path = "/apis/serving.knative.dev/v1alpha1/namespaces/default/services";

        let first = table.select(path).clone();
        for _ in 0..10 {
            assert_eq!(table.select(path), &first);
        }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let table = RouteTable::new(
            vec![
                RouteRule {
                    matcher: PathMatcher::SegmentPrefix(vec!["apis".to_string()]),
                    target: BackendTarget::verified("first.example.com"),
                },
                RouteRule {
                    matcher: PathMatcher::SegmentWithValue("namespaces".to_string()),
                    target: BackendTarget::verified("second.example.com"),
                },
            ],
            BackendTarget::unverified("fallback.example.com"),
        );

        assert_eq!(table.select("/apis/g/namespaces/ns").host, "first.example.com");
        assert_eq!(table.select("/api/namespaces/ns").host, "second.example.com");
        assert_eq!(table.select("/openapi/v2").host, "fallback.example.com");
    }

    #[test]
    fn test_segment_prefix() {
        let matcher = PathMatcher::SegmentPrefix(vec!["openapi".to_string()]);

        assert!(matcher.matches("/openapi"));
        assert!(matcher.matches("/openapi/v2"));
        assert!(!matcher.matches("/openapiv2"));
        assert!(!matcher.matches("/"));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            BackendTarget::verified(RESOURCE_BACKEND).to_string(),
            "https://us-central1-run.googleapis.com"
        );
    }
}
