use url::Url;

/// Extracts the domain from a URL
///
/// Retrieves the host portion of a URL and converts it to lowercase. The port is not
/// part of the domain; use [`host_key`] when the port matters.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use ripple_crawl::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM:8080/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the key used for per-host politeness and robots.txt caching
///
/// This is the lowercase host, followed by `:port` when the URL carries a
/// non-default port. Two servers on one address but different ports are distinct
/// hosts with their own robots.txt.
///
/// ```
/// use url::Url;
/// use ripple_crawl::url::host_key;
///
/// let url = Url::parse("http://127.0.0.1:4000/a").unwrap();
/// assert_eq!(host_key(&url), Some("127.0.0.1:4000".to_string()));
///
/// let url = Url::parse("https://example.com:443/a").unwrap();
/// assert_eq!(host_key(&url), Some("example.com".to_string()));
/// ```
pub fn host_key(url: &Url) -> Option<String> {
    let host = extract_domain(url)?;
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

/// Builds the robots.txt URL for the host serving `url`
pub fn robots_url(url: &Url) -> Option<Url> {
    let mut robots = url.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    if robots.set_username("").is_err() || robots.set_password(None).is_err() {
        return None;
    }
    Some(robots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_simple_domain() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(extract_domain(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_with_port() {
        let url = Url::parse("https://example.com:8080/").unwrap();
        assert_eq!(extract_domain(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_uppercase_converted_to_lowercase() {
        let url = Url::parse("https://Example.COM/").unwrap();
        assert_eq!(extract_domain(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_host_key_keeps_non_default_port() {
        let url = Url::parse("http://example.test:8080/page").unwrap();
        assert_eq!(host_key(&url), Some("example.test:8080".to_string()));
    }

    #[test]
    fn test_host_key_drops_default_port() {
        let url = Url::parse("http://example.test:80/page").unwrap();
        assert_eq!(host_key(&url), Some("example.test".to_string()));
    }

    #[test]
    fn test_robots_url() {
        let url = Url::parse("https://user:pw@example.test:8443/a/b?q=1#frag").unwrap();
        let robots = robots_url(&url).unwrap();
        assert_eq!(robots.as_str(), "https://example.test:8443/robots.txt");
    }
}
