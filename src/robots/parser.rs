//! Robots.txt rule parsing
//!
//! Allow/disallow decisions are delegated to the robotstxt crate's matcher so longest
//! match and wildcard semantics follow Google's reference implementation. The group
//! scan here only extracts what the matcher does not expose: the disallow patterns and
//! the `Crawl-delay` that apply to our agent.

use chrono::{DateTime, Utc};
use robotstxt::DefaultMatcher;
use std::time::Duration;
use url::Url;

/// Parsed robots.txt rules of one host, as seen by one user agent
#[derive(Debug, Clone)]
pub struct RobotsRules {
    pub host: String,

    /// Disallow patterns of the group that applies to our agent, in file order
    pub disallow_patterns: Vec<String>,

    /// `Crawl-delay` of the applicable group
    pub crawl_delay: Option<Duration>,

    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,

    agent: String,
    /// Raw file content; empty for allow-all rules
    content: String,
    allow_all: bool,
}

impl RobotsRules {
    /// Parses robots.txt content for the given agent token
    pub fn parse(host: &str, content: &str, agent: &str, ttl: Duration) -> Self {
        let group = applicable_group(content, agent);
        Self {
            host: host.to_string(),
            disallow_patterns: group.disallow,
            crawl_delay: group.crawl_delay,
            fetched_at: Utc::now(),
            ttl,
            agent: agent.to_string(),
            content: content.to_string(),
            allow_all: false,
        }
    }

    /// Permissive rules, cached when robots.txt cannot be retrieved
    pub fn allow_all(host: &str, agent: &str, ttl: Duration) -> Self {
        Self {
            host: host.to_string(),
            disallow_patterns: Vec::new(),
            crawl_delay: None,
            fetched_at: Utc::now(),
            ttl,
            agent: agent.to_string(),
            content: String::new(),
            allow_all: true,
        }
    }

    pub fn is_allow_all(&self) -> bool {
        self.allow_all
    }

    /// Checks if a URL is allowed for our agent
    pub fn is_allowed(&self, url: &Url) -> bool {
        if self.allow_all || self.content.trim().is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, &self.agent, url.as_str())
    }

    /// Returns true once the rules are older than their TTL
    pub fn is_stale(&self) -> bool {
        self.age() >= self.ttl
    }

    /// How long ago the rules were fetched
    pub fn age(&self) -> Duration {
        (Utc::now() - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Default)]
struct Group {
    agents: Vec<String>,
    disallow: Vec<String>,
    crawl_delay: Option<Duration>,
}

/// Product token of a user agent: `RippleCrawl/1.0 (+url)` becomes `ripplecrawl`
fn product_token(agent: &str) -> String {
    agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Upper bound on a parsed `Crawl-delay`; larger values are clamped to it
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(3600);

fn parse_delay(value: &str) -> Option<Duration> {
    let secs = value.parse::<f64>().ok()?;
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    if secs >= MAX_CRAWL_DELAY.as_secs_f64() {
        return Some(MAX_CRAWL_DELAY);
    }
    Duration::try_from_secs_f64(secs).ok()
}

fn parse_groups(content: &str) -> Vec<Group> {
    let mut groups = Vec::new();
    let mut current: Option<Group> = None;
    let mut in_rules = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim().to_lowercase().as_str() {
            "user-agent" => {
                // User-agent lines after rules open a new group
                if in_rules || current.is_none() {
                    groups.extend(current.take());
                    current = Some(Group::default());
                    in_rules = false;
                }
                if let Some(group) = current.as_mut() {
                    group.agents.push(value.to_lowercase());
                }
            }
            "disallow" => {
                in_rules = true;
                if let Some(group) = current.as_mut() {
                    if !value.is_empty() {
                        group.disallow.push(value.to_string());
                    }
                }
            }
            "crawl-delay" => {
                in_rules = true;
                if let Some(group) = current.as_mut() {
                    group.crawl_delay = parse_delay(value).or(group.crawl_delay);
                }
            }
            "allow" => in_rules = true,
            _ => {}
        }
    }

    groups.extend(current);
    groups
}

/// Merges the groups naming our agent, falling back to the `*` groups
fn applicable_group(content: &str, agent: &str) -> Group {
    let token = product_token(agent);
    let groups = parse_groups(content);

    let (specific, wildcard): (Vec<Group>, Vec<Group>) = groups
        .into_iter()
        .filter(|g| g.agents.iter().any(|a| a == "*" || *a == token))
        .partition(|g| g.agents.iter().any(|a| *a == token));

    let chosen = if specific.is_empty() { wildcard } else { specific };

    chosen
        .into_iter()
        .fold(Group::default(), |mut merged, group| {
            merged.disallow.extend(group.disallow);
            merged.crawl_delay = merged.crawl_delay.or(group.crawl_delay);
            merged
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(3600);

    fn url(path: &str) -> Url {
        Url::parse("http://example.test/").unwrap().join(path).unwrap()
    }

    fn rules(content: &str, agent: &str) -> RobotsRules {
        RobotsRules::parse("example.test", content, agent, TTL)
    }

    #[test]
    fn test_allow_all() {
        let robots = RobotsRules::allow_all("example.test", "TestBot", TTL);
        assert!(robots.is_allowed(&url("/any/path")));
        assert!(robots.is_allowed(&url("/admin")));
        assert!(robots.is_allow_all());
    }

    #[test]
    fn test_disallow_prefix() {
        let robots = rules("User-agent: *\nDisallow: /private/", "TestBot");
        assert!(robots.is_allowed(&url("/")));
        assert!(robots.is_allowed(&url("/a")));
        assert!(!robots.is_allowed(&url("/private/c")));
        assert_eq!(robots.disallow_patterns, vec!["/private/".to_string()]);
    }

    #[test]
    fn test_allow_overrides_longer_match() {
        let robots = rules(
            "User-agent: *\nDisallow: /private\nAllow: /private/public",
            "TestBot",
        );
        assert!(!robots.is_allowed(&url("/private")));
        assert!(robots.is_allowed(&url("/private/public")));
    }

    #[test]
    fn test_specific_agent_group_wins() {
        let content = "User-agent: TestBot\nDisallow: /only-us\n\nUser-agent: *\nDisallow: /";
        let robots = rules(content, "TestBot");
        assert!(robots.is_allowed(&url("/page")));
        assert!(!robots.is_allowed(&url("/only-us")));
        assert_eq!(robots.disallow_patterns, vec!["/only-us".to_string()]);

        let other = rules(content, "OtherBot");
        assert!(!other.is_allowed(&url("/page")));
        assert_eq!(other.disallow_patterns, vec!["/".to_string()]);
    }

    #[test]
    fn test_invalid_content_allows_everything() {
        let robots = rules("This is not valid robots.txt {{{", "TestBot");
        assert!(robots.is_allowed(&url("/anything")));
        assert!(robots.disallow_patterns.is_empty());
    }

    #[test]
    fn test_crawl_delay_for_wildcard() {
        let robots = rules("User-agent: *\nCrawl-delay: 2.5", "TestBot");
        assert_eq!(robots.crawl_delay, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_crawl_delay_prefers_specific_agent() {
        let content = "User-agent: *\nCrawl-delay: 1\n\nUser-agent: testbot\nCrawl-delay: 7";
        assert_eq!(
            rules(content, "TestBot").crawl_delay,
            Some(Duration::from_secs(7))
        );
        assert_eq!(
            rules(content, "Other").crawl_delay,
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_huge_crawl_delay_is_clamped() {
        for value in ["1e30", "inf", "18446744073709551616", "7200"] {
            let robots = rules(&format!("User-agent: *\nCrawl-delay: {}", value), "TestBot");
            assert_eq!(robots.crawl_delay, Some(MAX_CRAWL_DELAY), "value {}", value);
        }
    }

    #[test]
    fn test_invalid_crawl_delay_is_ignored() {
        for value in ["-1", "NaN", "soon", ""] {
            let robots = rules(&format!("User-agent: *\nCrawl-delay: {}", value), "TestBot");
            assert_eq!(robots.crawl_delay, None, "value {:?}", value);
        }
    }

    #[test]
    fn test_multiple_agents_share_group() {
        let content = "User-agent: BotA\nUser-agent: BotB\nCrawl-delay: 3";
        assert_eq!(rules(content, "BotA").crawl_delay, Some(Duration::from_secs(3)));
        assert_eq!(rules(content, "BotB").crawl_delay, Some(Duration::from_secs(3)));
        assert_eq!(rules(content, "BotC").crawl_delay, None);
    }

    #[test]
    fn test_product_token_strips_version() {
        assert_eq!(product_token("RippleCrawl/1.0 (+https://x.test)"), "ripplecrawl");
        assert_eq!(product_token("TestBot"), "testbot");
    }

    #[test]
    fn test_staleness() {
        let mut robots = RobotsRules::allow_all("example.test", "TestBot", TTL);
        assert!(!robots.is_stale());

        robots.fetched_at = Utc::now() - chrono::Duration::hours(2);
        assert!(robots.is_stale());
        assert!(robots.age() >= Duration::from_secs(7000));
    }
}
