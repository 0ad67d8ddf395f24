//! Page-level heuristics: bot challenges and phishing-style red flags.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use url::Url;

use crate::findings::{Severity, Signal};
use crate::scope::registered_domain;

static CHALLENGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(captcha|cloudflare|challenge|verify\s+you\s+are\s+human|verifying you are human|checking security of your connection|please prove you are human|cf-chl|are you human)",
    )
    .expect("static regex")
});
static FORM_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<form[^>]+>").expect("static regex"));
static SENSITIVE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"password|credit card|ssn|bank|cvv").expect("static regex"));

const SCAM_PHRASES: &[&str] = &[
    "free money",
    "win big",
    "lottery",
    "claim prize",
    "urgent action",
    "congratulations you won",
    "crypto giveaway",
    "double your btc",
    "investment scheme",
    "work from home and earn",
];

/// Brand name and the registered domain that legitimately hosts its login.
const BRANDS: &[(&str, Option<&str>)] = &[
    ("paypal", Some("paypal.com")),
    ("apple", Some("apple.com")),
    ("microsoft", Some("microsoft.com")),
    ("google", Some("google.com")),
    ("amazon", Some("amazon.com")),
    ("facebook", Some("facebook.com")),
    ("instagram", Some("instagram.com")),
    ("bank", None),
];

const SHADY_TLDS: &[&str] = &[".zip", ".xyz", ".top", ".club", ".click", ".work", ".gq", ".ml", ".tk"];

/// First bot-challenge or captcha marker in `html`.
pub fn detect_challenge(html: &str) -> Option<String> {
    CHALLENGE.find(html).map(|m| m.as_str().to_ascii_lowercase())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedFlags {
    pub flags: Vec<String>,
    pub score: u32,
}

impl RedFlags {
    fn add(&mut self, weight: u32, flag: String) {
        self.flags.push(flag);
        self.score += weight;
    }
}

/// Scores phishing indicators on one page. Weak indicators only count in the
/// presence of a form or outgoing links.
pub fn detect_red_flags(page: &Url, html: &str, links: &[Url], resources: &[String]) -> RedFlags {
    let mut out = RedFlags::default();
    let lower = html.to_lowercase();
    let domain = page.host_str().and_then(registered_domain).unwrap_or_default();
    let has_form = FORM_TAG.is_match(html);

    if has_form || !links.is_empty() {
        for phrase in SCAM_PHRASES.iter().filter(|p| lower.contains(*p)) {
            out.add(2, format!("scam phrase with context: {phrase}"));
        }
    }

    if has_form && lower.contains("login") {
        for (brand, legit) in BRANDS {
            let foreign = legit.map_or(true, |d| !domain.contains(d));
            if lower.contains(brand) && foreign {
                out.add(3, format!("{brand} login form on {domain}"));
            }
        }
    }

    for link in links {
        let Some(host) = link.host_str() else { continue };
        if matches!(link.host(), Some(url::Host::Ipv4(_))) && !same_site(host, &domain) {
            out.add(2, format!("raw IP link: {link}"));
        }
        if host.contains("xn--") {
            out.add(2, format!("punycode host: {host}"));
        }
        if SHADY_TLDS.iter().any(|tld| host.ends_with(tld)) {
            out.add(2, format!("suspicious TLD: {host}"));
        }
        let s = link.as_str();
        if (s.contains("/api/") || s.contains("token") || s.contains("auth")) && !same_site(host, &domain) {
            out.add(2, format!("foreign API endpoint: {link}"));
        }
    }

    for res in resources {
        let Ok(u) = Url::parse(res) else { continue };
        let credential_like = ["token", "auth", "sessionid"].iter().any(|t| res.contains(t));
        if credential_like && !u.host_str().is_some_and(|h| same_site(h, &domain)) {
            out.add(2, format!("credential parameter sent off-site: {res}"));
        }
    }

    let trusted = BRANDS.iter().filter_map(|(_, d)| *d).any(|d| domain.contains(d));
    if has_form && SENSITIVE_FIELD.is_match(&lower) && !trusted {
        out.add(3, "form requesting sensitive data on an untrusted domain".to_string());
    }

    let obfuscated = ["eval(", "atob(", "base64"].iter().any(|m| lower.contains(m));
    if obfuscated && out.score > 0 {
        out.add(1, "obfuscated script alongside other indicators".to_string());
    }
    out
}

fn same_site(host: &str, domain: &str) -> bool {
    !domain.is_empty() && registered_domain(host).as_deref() == Some(domain)
}

fn endpoint(page: &Url) -> String {
    format!("{}{}", page.origin().ascii_serialization(), page.path())
}

pub fn challenge_signal(page: &Url, html: &str) -> Option<Signal> {
    let marker = detect_challenge(html)?;
    Some(Signal {
        kind: "challenge_detected".into(),
        severity: Severity::Info,
        endpoint: endpoint(page),
        description: "Page serves a captcha or bot challenge".into(),
        impact: "Crawl results behind the challenge are incomplete".into(),
        evidence: json!({ "url": page.as_str(), "marker": marker }),
    })
}

pub fn red_flag_signal(page: &Url, flags: RedFlags) -> Option<Signal> {
    if flags.score == 0 {
        return None;
    }
    let severity = if flags.score >= 5 { Severity::Medium } else { Severity::Low };
    Some(Signal {
        kind: "red_flags".into(),
        severity,
        endpoint: endpoint(page),
        description: "Page shows phishing or scam indicators".into(),
        impact: "Users may be lured into handing over credentials".into(),
        evidence: json!({ "url": page.as_str(), "score": flags.score, "flags": flags.flags }),
    })
}
