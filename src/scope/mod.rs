//! Host allowlist. Deny-by-default: a host matching no rule is out of scope.

use std::net::IpAddr;

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// `api.example.com`
    Exact(String),
    /// `*.example.com`: any proper subdomain of the stored suffix.
    Wildcard(String),
}

impl HostPattern {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("*.") {
            let suffix = normalize_host(rest)?;
            return Some(HostPattern::Wildcard(suffix));
        }
        normalize_host(raw).map(HostPattern::Exact)
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(h) => h == host,
            HostPattern::Wildcard(suffix) => host
                .strip_suffix(suffix.as_str())
                .map(|head| head.len() > 1 && head.ends_with('.'))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRule {
    pub pattern: HostPattern,
    pub allowed: bool,
}

impl ScopeRule {
    pub fn allow(pattern: &str) -> Option<Self> {
        HostPattern::parse(pattern).map(|pattern| Self { pattern, allowed: true })
    }

    pub fn deny(pattern: &str) -> Option<Self> {
        HostPattern::parse(pattern).map(|pattern| Self { pattern, allowed: false })
    }

    /// Scope file syntax: one pattern per line, `!` prefix marks a denial.
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        match line.strip_prefix('!') {
            Some(rest) => Self::deny(rest),
            None => Self::allow(line),
        }
    }
}

/// Immutable after construction; share it behind an `Arc` across workers.
#[derive(Debug, Clone, Default)]
pub struct ScopeMatcher {
    rules: Vec<ScopeRule>,
}

impl ScopeMatcher {
    pub fn new(rules: Vec<ScopeRule>) -> Self {
        Self { rules }
    }

    pub fn from_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(patterns.into_iter().filter_map(ScopeRule::from_line).collect())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// A matching deny rule wins over any matching allow rule.
    pub fn allowed(&self, host: &str) -> bool {
        let Some(host) = normalize_host(host) else {
            return false;
        };
        let mut allowed = false;
        for rule in self.rules.iter().filter(|r| r.pattern.matches(&host)) {
            if !rule.allowed {
                return false;
            }
            allowed = true;
        }
        allowed
    }

    pub fn allowed_url(&self, url: &Url) -> bool {
        match url.scheme() {
            "http" | "https" => url.host_str().map(|h| self.allowed(h)).unwrap_or(false),
            _ => false,
        }
    }
}

/// Case-folds, strips a port and any trailing dot. IPv6 literals keep their brackets.
pub fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let host = if raw.starts_with('[') {
        let end = raw.find(']')?;
        &raw[..=end]
    } else {
        match raw.rsplit_once(':') {
            Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
            _ => raw,
        }
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || host.contains('/') {
        return None;
    }
    Some(host)
}

/// Registered domain of `host` per the public suffix list: `api.example.co.uk`
/// gives `example.co.uk`. IP literals and hosts without a registrable part
/// (e.g. `localhost`) map to themselves.
pub fn registered_domain(host: &str) -> Option<String> {
    let host = normalize_host(host)?;
    if host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
        return Some(host);
    }
    let domain = psl::domain_str(&host).unwrap_or(&host).to_string();
    Some(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn matcher() -> ScopeMatcher {
        ScopeMatcher::from_patterns(["example.com", "*.example.com", "!admin.example.com", "127.0.0.1"])
    }

    #[rstest]
    #[case("example.com", true)]
    #[case("EXAMPLE.com:8443", true)]
    #[case("api.example.com", true)]
    #[case("deep.api.example.com", true)]
    #[case("example.com.", true)]
    #[case("admin.example.com", false)]
    #[case("example.com.evil.org", false)]
    #[case("notexample.com", false)]
    #[case("127.0.0.1:9000", true)]
    #[case("", false)]
    fn host_decisions(#[case] host: &str, #[case] expected: bool) {
        assert_eq!(matcher().allowed(host), expected, "host {host}");
    }

    #[test]
    fn wildcard_does_not_cover_apex() {
        let m = ScopeMatcher::from_patterns(["*.example.com"]);
        assert!(m.allowed("api.example.com"));
        assert!(!m.allowed("example.com"));
        assert!(!m.allowed(".example.com"));
    }

    #[test]
    fn empty_rule_set_denies_everything() {
        assert!(!ScopeMatcher::default().allowed("example.com"));
    }

    #[test]
    fn urls_need_http_scheme() {
        let m = matcher();
        assert!(m.allowed_url(&Url::parse("https://api.example.com/x?y=1").unwrap()));
        assert!(!m.allowed_url(&Url::parse("ftp://example.com/").unwrap()));
        assert!(!m.allowed_url(&Url::parse("mailto:a@example.com").unwrap()));
    }

    #[rstest]
    #[case("example.com", "example.com")]
    #[case("API.example.com:8443", "example.com")]
    #[case("a.b.example.co.uk", "example.co.uk")]
    #[case("127.0.0.1", "127.0.0.1")]
    #[case("[::1]:80", "[::1]")]
    #[case("localhost", "localhost")]
    fn registered_domains(#[case] host: &str, #[case] expected: &str) {
        assert_eq!(registered_domain(host).as_deref(), Some(expected));
    }

    #[test]
    fn ipv6_host_normalization() {
        assert_eq!(normalize_host("[::1]:8080").as_deref(), Some("[::1]"));
        assert_eq!(normalize_host("Api.Example.COM:443").as_deref(), Some("api.example.com"));
    }
}
