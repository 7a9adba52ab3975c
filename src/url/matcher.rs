/// Checks if a domain matches a wildcard pattern
///
/// Two kinds of pattern are supported:
/// 1. Exact match: "example.com" matches only "example.com"
/// 2. Wildcard match: "*.example.com" matches the bare domain and any subdomain,
///    nested or not
///
/// # Examples
///
/// ```
/// use ripple_crawl::url::matches_wildcard;
///
/// assert!(matches_wildcard("example.com", "example.com"));
/// assert!(!matches_wildcard("example.com", "blog.example.com"));
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "myexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base
            || candidate
                .strip_suffix(base)
                .is_some_and(|prefix| prefix.ends_with('.'))
    } else {
        candidate == pattern
    }
}

/// The set of domains a crawl run may enter
///
/// An empty scope is unrestricted.
#[derive(Debug, Clone, Default)]
pub struct DomainScope {
    patterns: Vec<String>,
}

impl DomainScope {
    /// Builds a scope from domain patterns; patterns are lowercased
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Returns true when no restriction applies
    pub fn is_unrestricted(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Checks whether a lowercase domain falls inside the scope
    pub fn allows(&self, domain: &str) -> bool {
        self.is_unrestricted() || self.patterns.iter().any(|p| matches_wildcard(p, domain))
    }

    /// The normalized patterns in this scope
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
