use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::catalog::{AccessRule, IdEndpoint, UploadRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    FileId,
    ShareId,
    UserId,
    Token,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdKind::FileId => "file_id",
            IdKind::ShareId => "share_id",
            IdKind::UserId => "user_id",
            IdKind::Token => "token",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCandidate {
    pub url: Url,
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct IdCandidate {
    pub template: Arc<IdEndpoint>,
    pub id: String,
    pub kind: IdKind,
}

impl IdCandidate {
    pub fn url(&self) -> Result<Url, url::ParseError> {
        self.template.render(&self.id)
    }
}

#[derive(Debug, Clone)]
pub struct EndpointCandidate {
    pub url: Url,
    pub rule: Arc<AccessRule>,
}

#[derive(Debug, Clone)]
pub struct UploadCandidate {
    pub url: Url,
    pub filename: String,
    pub rule: Arc<UploadRule>,
}

/// One unit of probe work. Immutable once enqueued.
#[derive(Debug, Clone)]
pub enum Candidate {
    Page(PageCandidate),
    Id(IdCandidate),
    Endpoint(EndpointCandidate),
    Upload(UploadCandidate),
}

/// Key of the session's visited set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VisitKey {
    Url(String),
    Id(IdKind, String),
    /// Method, normalized URL and rule label: one URL may carry several checks.
    Request(String, String, String),
    Upload(String),
}

impl Candidate {
    pub fn page(url: Url, depth: usize) -> Self {
        Candidate::Page(PageCandidate { url, depth })
    }

    /// URL the probe will contact, used for scope checks before dispatch.
    pub fn target_url(&self) -> Option<Url> {
        match self {
            Candidate::Page(p) => Some(p.url.clone()),
            Candidate::Id(c) => c.url().ok(),
            Candidate::Endpoint(e) => Some(e.url.clone()),
            Candidate::Upload(u) => Some(u.url.clone()),
        }
    }

    pub fn visit_key(&self) -> VisitKey {
        match self {
            Candidate::Page(p) => VisitKey::Url(normalize_url(&p.url)),
            Candidate::Id(c) => VisitKey::Id(c.kind, c.id.clone()),
            Candidate::Endpoint(e) => {
                VisitKey::Request(e.rule.method.to_string(), normalize_url(&e.url), e.rule.label.clone())
            }
            Candidate::Upload(u) => VisitKey::Upload(u.filename.clone()),
        }
    }

    pub fn depth(&self) -> Option<usize> {
        match self {
            Candidate::Page(p) => Some(p.depth),
            _ => None,
        }
    }

    /// Whether the probe sends session credentials. A 401 on such a request
    /// before anything has succeeded means the credentials are bad.
    pub fn is_authenticated(&self) -> bool {
        match self {
            Candidate::Page(_) => false,
            Candidate::Id(c) => c.kind != IdKind::Token,
            Candidate::Endpoint(e) => e.rule.authenticated,
            Candidate::Upload(_) => true,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Candidate::Page(p) => p.url.to_string(),
            Candidate::Id(c) => format!("{}={}", c.kind, c.id),
            Candidate::Endpoint(e) => format!("{} {} [{}]", e.rule.method, e.url, e.rule.label),
            Candidate::Upload(u) => u.filename.clone(),
        }
    }
}

/// Fragment dropped, empty path made `/`. Host case and default ports are
/// already normalized by `url`.
pub fn normalize_url(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);
    if u.path().is_empty() {
        u.set_path("/");
    }
    if u.query() == Some("") {
        u.set_query(None);
    }
    u.to_string()
}
