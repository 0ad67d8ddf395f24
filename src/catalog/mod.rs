//! Pluggable probe definitions: which endpoints to enumerate, which fixed
//! paths to check, which files to try storing, and what finding each one
//! produces.

mod nextcloud;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::Rng;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::NetbearConfig;
use crate::engine::candidate::{Candidate, EndpointCandidate, IdCandidate, IdKind, UploadCandidate};
use crate::engine::sampler::{sample_ids, token_candidates};
use crate::findings::{Severity, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Recon,
    Idor,
    Upload,
    Auth,
    PublicLinks,
}

impl TestKind {
    pub const ALL: [TestKind; 5] =
        [TestKind::Recon, TestKind::Idor, TestKind::Upload, TestKind::Auth, TestKind::PublicLinks];
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestKind::Recon => "recon",
            TestKind::Idor => "idor",
            TestKind::Upload => "upload",
            TestKind::Auth => "auth",
            TestKind::PublicLinks => "public_links",
        })
    }
}

impl FromStr for TestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "recon" => Ok(TestKind::Recon),
            "idor" => Ok(TestKind::Idor),
            "upload" => Ok(TestKind::Upload),
            "auth" => Ok(TestKind::Auth),
            "public_links" | "links" => Ok(TestKind::PublicLinks),
            other => Err(format!("unknown test kind '{other}' (expected recon, idor, upload, auth, public_links)")),
        }
    }
}

/// The fixed part of a finding; probes add the evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct FindingTemplate {
    pub kind: String,
    pub severity: Severity,
    pub endpoint: String,
    pub description: String,
    pub impact: String,
}

impl FindingTemplate {
    pub fn new(kind: &str, severity: Severity, endpoint: &str, description: &str, impact: &str) -> Self {
        Self {
            kind: kind.to_string(),
            severity,
            endpoint: endpoint.to_string(),
            description: description.to_string(),
            impact: impact.to_string(),
        }
    }

    pub fn signal(&self, evidence: Value) -> Signal {
        self.signal_at(self.severity, evidence)
    }

    pub fn signal_at(&self, severity: Severity, evidence: Value) -> Signal {
        Signal {
            kind: self.kind.clone(),
            severity,
            endpoint: self.endpoint.clone(),
            description: self.description.clone(),
            impact: self.impact.clone(),
            evidence,
        }
    }
}

/// An endpoint template with an `{id}` placeholder.
#[derive(Debug, Clone)]
pub struct IdEndpoint {
    pub kind: IdKind,
    pub template: String,
    pub headers: Vec<(String, String)>,
    /// A 200 that is not JSON is a probe logic error rather than a hit.
    pub expect_json: bool,
    pub finding: FindingTemplate,
}

impl IdEndpoint {
    pub fn render(&self, id: &str) -> Result<Url, url::ParseError> {
        Url::parse(&self.template.replace("{id}", id))
    }
}

/// What the response to a fixed-path request must show to count as a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessCheck {
    /// Any 200.
    Reachable,
    /// 200 with a JSON status document.
    SystemInfo,
    /// 200 or 400 carrying a non-empty OCS user list.
    UserList,
    /// 200 carrying a non-empty OCS share list. `public_only` keeps public
    /// links (share type 3); `harvest_tokens` hands their tokens to follow-ups.
    ShareList { public_only: bool, harvest_tokens: bool },
    /// Anything but 401 while the session authenticates with HTTP Basic.
    BasicAuth,
    /// 200 whose body does not ask for a password.
    NoPasswordPrompt,
}

/// A fixed request whose response may itself be the finding.
#[derive(Debug, Clone)]
pub struct AccessRule {
    pub test: TestKind,
    pub method: Method,
    pub path: String,
    pub label: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Send the session credentials.
    pub authenticated: bool,
    pub follow_redirects: bool,
    pub check: AccessCheck,
    pub finding: FindingTemplate,
}

impl AccessRule {
    /// Authenticated GET that follows redirects.
    pub fn get(test: TestKind, path: &str, label: &str, check: AccessCheck, finding: FindingTemplate) -> Self {
        Self {
            test,
            method: Method::GET,
            path: path.to_string(),
            label: label.to_string(),
            headers: Vec::new(),
            body: None,
            authenticated: true,
            follow_redirects: true,
            check,
            finding,
        }
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

/// A check repeated for every public-link token confirmed during the first
/// dispatch phase. `{token}` in the rule's path is replaced by the token.
#[derive(Debug, Clone)]
pub struct TokenFollowup {
    pub rule: AccessRule,
    /// Submit the rule once per configured share password, as a form POST.
    pub with_passwords: bool,
}

/// A file the upload probe tries to store. Content is always an inert marker.
#[derive(Debug, Clone)]
pub struct UploadRule {
    pub filename: String,
    pub label: String,
    pub content: Vec<u8>,
    pub finding: FindingTemplate,
}

/// Everything the enumeration engine needs to know about one target system.
#[derive(Debug, Clone)]
pub struct TargetDefinition {
    pub name: String,
    pub base_url: Url,
    pub username: String,
    /// Requested once with credentials before dispatch; 401/403 aborts the session.
    pub status_path: Option<String>,
    pub id_endpoints: Vec<Arc<IdEndpoint>>,
    pub access_rules: Vec<Arc<AccessRule>>,
    pub token_followups: Vec<TokenFollowup>,
    /// Collection that upload candidates are stored under. Created before
    /// upload dispatch and removed afterwards.
    pub upload_base: Option<Url>,
    pub upload_rules: Vec<Arc<UploadRule>>,
}

impl TargetDefinition {
    pub fn new(name: &str, base_url: Url, username: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url,
            username: username.to_string(),
            status_path: None,
            id_endpoints: Vec::new(),
            access_rules: Vec::new(),
            token_followups: Vec::new(),
            upload_base: None,
            upload_rules: Vec::new(),
        }
    }

    /// `base_url` with `path` appended, keeping any path prefix of the base.
    pub fn url_for(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}"))
    }

    pub fn status_url(&self) -> Option<Url> {
        self.status_path.as_deref().and_then(|p| self.url_for(p).ok())
    }
}

/// Turns a target definition plus config into enumeration candidates.
pub struct ProbeCatalog<'a> {
    target: &'a TargetDefinition,
    config: &'a NetbearConfig,
}

impl<'a> ProbeCatalog<'a> {
    pub fn new(target: &'a TargetDefinition, config: &'a NetbearConfig) -> Self {
        Self { target, config }
    }

    pub fn candidates(&self, tests: &[TestKind], rng: &mut impl Rng) -> Vec<Candidate> {
        let mut out = Vec::new();
        for test in tests {
            let before = out.len();
            match test {
                TestKind::Idor => {
                    self.id_candidates(|k| k != IdKind::Token, rng, &mut out);
                    self.access_candidates(*test, &mut out);
                }
                TestKind::PublicLinks => {
                    self.id_candidates(|k| k == IdKind::Token, rng, &mut out);
                    self.access_candidates(*test, &mut out);
                }
                TestKind::Recon | TestKind::Auth => self.access_candidates(*test, &mut out),
                TestKind::Upload => self.upload_candidates(&mut out),
            }
            tracing::debug!(test = %test, candidates = out.len() - before, "catalog expanded");
        }
        out
    }

    fn id_candidates(&self, want: impl Fn(IdKind) -> bool, rng: &mut impl Rng, out: &mut Vec<Candidate>) {
        for endpoint in self.target.id_endpoints.iter().filter(|e| want(e.kind)) {
            let ids: Vec<String> = if endpoint.kind == IdKind::Token {
                token_candidates(self.config.token_attempts, rng)
            } else {
                let Some(range) = self.config.range_for(endpoint.kind) else {
                    tracing::warn!(kind = %endpoint.kind, "no id range configured, skipping");
                    continue;
                };
                sample_ids(range, self.config.sample_size, self.config.sampling, rng)
                    .into_iter()
                    .map(|id| id.to_string())
                    .collect()
            };
            out.extend(ids.into_iter().map(|id| {
                Candidate::Id(IdCandidate { template: endpoint.clone(), id, kind: endpoint.kind })
            }));
        }
    }

    fn access_candidates(&self, test: TestKind, out: &mut Vec<Candidate>) {
        for rule in self.target.access_rules.iter().filter(|r| r.test == test) {
            match self.target.url_for(&rule.path) {
                Ok(url) => out.push(Candidate::Endpoint(EndpointCandidate { url, rule: rule.clone() })),
                Err(e) => tracing::warn!(path = %rule.path, error = %e, "skipping unparsable access path"),
            }
        }
    }

    /// Second-phase candidates for the public-link tokens found so far.
    pub fn token_followups(&self, tokens: &[String]) -> Vec<Candidate> {
        let mut out = Vec::new();
        for followup in &self.target.token_followups {
            if followup.with_passwords {
                for token in tokens.iter().take(self.config.password_followup_tokens) {
                    for password in &self.config.share_passwords {
                        let body = url::form_urlencoded::Serializer::new(String::new())
                            .append_pair("password", password)
                            .finish();
                        let label = if password.is_empty() {
                            "empty_password".to_string()
                        } else {
                            format!("weak_password_{password}")
                        };
                        let mut rule = followup.rule.clone();
                        rule.method = Method::POST;
                        rule.body = Some(body.into_bytes());
                        rule.headers.push(("Content-Type".into(), "application/x-www-form-urlencoded".into()));
                        rule.label = label;
                        self.push_followup(rule, token, &mut out);
                    }
                }
            } else {
                for token in tokens.iter().take(self.config.share_followup_tokens) {
                    self.push_followup(followup.rule.clone(), token, &mut out);
                }
            }
        }
        out
    }

    fn push_followup(&self, mut rule: AccessRule, token: &str, out: &mut Vec<Candidate>) {
        rule.path = rule.path.replace("{token}", token);
        match self.target.url_for(&rule.path) {
            Ok(url) => out.push(Candidate::Endpoint(EndpointCandidate { url, rule: Arc::new(rule) })),
            Err(e) => tracing::warn!(token, error = %e, "skipping unparsable follow-up"),
        }
    }

    fn upload_candidates(&self, out: &mut Vec<Candidate>) {
        let Some(base) = &self.target.upload_base else { return };
        for rule in &self.target.upload_rules {
            let Ok(url) = base.join(&rule.filename) else { continue };
            out.push(Candidate::Upload(UploadCandidate { url, filename: rule.filename.clone(), rule: rule.clone() }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sampler::session_rng;

    fn target() -> TargetDefinition {
        TargetDefinition::nextcloud(Url::parse("https://cloud.example.com/").unwrap(), "alice", &NetbearConfig::default()).unwrap()
    }

    #[test]
    fn test_kinds_parse() {
        assert_eq!("recon".parse::<TestKind>().unwrap(), TestKind::Recon);
        assert_eq!("idor".parse::<TestKind>().unwrap(), TestKind::Idor);
        assert_eq!("public-links".parse::<TestKind>().unwrap(), TestKind::PublicLinks);
        assert!("xss".parse::<TestKind>().is_err());
    }

    #[test]
    fn id_templates_render() {
        let t = target();
        let file = t.id_endpoints.iter().find(|e| e.kind == IdKind::FileId).unwrap();
        assert_eq!(file.render("42").unwrap().as_str(), "https://cloud.example.com/remote.php/dav/files/alice/42");
        assert_eq!(t.status_url().unwrap().as_str(), "https://cloud.example.com/status.php");
    }

    #[test]
    fn idor_candidates_sample_each_configured_kind() {
        let t = target();
        let cfg = NetbearConfig { sample_size: 10, ..Default::default() };
        let cands = ProbeCatalog::new(&t, &cfg).candidates(&[TestKind::Idor], &mut session_rng(Some(1)));
        let ids = cands.iter().filter(|c| matches!(c, Candidate::Id(_))).count();
        let endpoints = cands.iter().filter(|c| matches!(c, Candidate::Endpoint(_))).count();
        assert_eq!(ids, 30);
        assert!(endpoints > 0);
        assert!(cands.iter().all(|c| !matches!(c, Candidate::Id(i) if i.kind == IdKind::Token)));
    }

    #[test]
    fn public_links_use_token_attempts_plus_the_share_listing() {
        let t = target();
        let cfg = NetbearConfig { token_attempts: 12, ..Default::default() };
        let cands = ProbeCatalog::new(&t, &cfg).candidates(&[TestKind::PublicLinks], &mut session_rng(Some(1)));
        assert_eq!(cands.len(), 13);
        let Candidate::Id(first) = &cands[0] else { panic!("expected id candidate") };
        assert_eq!(first.url().unwrap().as_str(), "https://cloud.example.com/s/share100");
        let Candidate::Endpoint(listing) = &cands[12] else { panic!("expected share listing") };
        assert_eq!(listing.rule.finding.kind, "public_shares_enumeration");
    }

    #[test]
    fn recon_covers_status_users_and_shares() {
        let t = target();
        let cfg = NetbearConfig::default();
        let cands = ProbeCatalog::new(&t, &cfg).candidates(&[TestKind::Recon], &mut session_rng(Some(1)));
        let kinds: Vec<_> = cands
            .iter()
            .filter_map(|c| match c {
                Candidate::Endpoint(e) => Some(e.rule.finding.kind.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec!["system_info", "user_enumeration", "shares_enumeration", "public_links"]);
    }

    #[test]
    fn token_followups_respect_limits_and_passwords() {
        let t = target();
        let cfg = NetbearConfig {
            share_followup_tokens: 2,
            password_followup_tokens: 1,
            share_passwords: vec!["".into(), "admin".into()],
            ..Default::default()
        };
        let tokens: Vec<String> = ["aaa", "bbb", "ccc"].iter().map(|s| s.to_string()).collect();
        let cands = ProbeCatalog::new(&t, &cfg).token_followups(&tokens);

        let rules: Vec<_> = cands
            .iter()
            .map(|c| match c {
                Candidate::Endpoint(e) => e,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].url.as_str(), "https://cloud.example.com/s/aaa");
        assert!(rules[..2].iter().all(|e| e.rule.check == AccessCheck::NoPasswordPrompt && !e.rule.authenticated));
        let posts: Vec<_> = rules[2..].iter().map(|e| (e.rule.method.clone(), e.rule.label.as_str())).collect();
        assert_eq!(posts, vec![(Method::POST, "empty_password"), (Method::POST, "weak_password_admin")]);
        assert_eq!(rules[3].rule.body.as_deref(), Some(&b"password=admin"[..]));
        assert_ne!(cands[2].visit_key(), cands[3].visit_key());
    }

    #[test]
    fn upload_candidates_cover_dangerous_extensions() {
        let t = target();
        let cfg = NetbearConfig::default();
        let cands = ProbeCatalog::new(&t, &cfg).candidates(&[TestKind::Upload], &mut session_rng(Some(1)));
        let names: Vec<_> = cands.iter().map(Candidate::label).collect();
        assert!(names.iter().any(|n| n.ends_with(".php")));
        assert!(names.iter().any(|n| n.ends_with(".jpg.php")));
        assert!(names.iter().any(|n| n.ends_with(".html")));
        assert!(names.iter().any(|n| n.ends_with("_large.bin")));
        assert!(cands.iter().all(|c| c.target_url().unwrap().path().starts_with("/remote.php/dav/files/alice/")));
    }
}
