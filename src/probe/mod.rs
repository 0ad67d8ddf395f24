//! Probe abstraction: one network operation per candidate, classified into an
//! [`Observation`].

pub mod access_probe;
pub mod http_probe;
pub mod id_probe;
pub mod page_probe;
pub mod throttle;
pub mod token_probe;
pub mod upload_probe;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Method;
use serde::Serialize;
use url::Url;

use crate::discover::fetcher::PageFetcher;
use crate::engine::candidate::{Candidate, IdKind};
use crate::errors::ProbeError;
use crate::findings::{Classification, Signal};
use crate::gather::extract::Form;

pub use access_probe::AccessProbe;
pub use http_probe::HttpCapability;
pub use id_probe::IdProbe;
pub use page_probe::PageProbe;
pub use throttle::RateLimiter;
pub use token_probe::TokenProbe;
pub use upload_probe::UploadProbe;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub follow_redirects: bool,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: Vec::new(), body: None, follow_redirects: true }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<'a>(mut self, headers: impl IntoIterator<Item = &'a (String, String)>) -> Self {
        self.headers.extend(headers.into_iter().cloned());
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub latency: Duration,
    /// URL that produced this response, after any redirects that were followed.
    pub final_url: Option<Url>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// Session credentials, opaque to the engine. Probes attach the headers to
/// authenticated requests.
#[derive(Clone, Default)]
pub struct Credentials {
    headers: Vec<(String, String)>,
}

impl Credentials {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn basic(username: &str, password: &str) -> Self {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        Self { headers: vec![("Authorization".to_string(), format!("Basic {token}"))] }
    }

    pub fn bearer(token: &str) -> Self {
        Self { headers: vec![("Authorization".to_string(), format!("Bearer {token}"))] }
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Lower-cased scheme of the `Authorization` header, e.g. `basic`.
    pub fn scheme(&self) -> Option<String> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .and_then(|(_, value)| value.split_whitespace().next())
            .map(str::to_ascii_lowercase)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("headers", &"<redacted>").finish()
    }
}

/// Read-only state handed to every probe invocation.
#[derive(Clone)]
pub struct ProbeContext {
    pub http: Arc<dyn HttpCapability>,
    pub pages: Arc<dyn PageFetcher>,
    pub credentials: Credentials,
    pub max_links_per_page: usize,
    /// External scripts fetched and scanned per crawled page.
    pub max_scripts_per_page: usize,
}

/// What a page probe pulled out of a page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Extracted {
    pub forms: Vec<Form>,
    pub params: Vec<String>,
    pub links: Vec<Url>,
    pub xhr_endpoints: Vec<String>,
    /// Where the page fetch ended up after redirects or client-side navigation.
    pub landed_on: Option<Url>,
    /// Public-link tokens confirmed or listed by the probe.
    pub tokens: Vec<String>,
}

/// Classified result of probing one candidate.
#[derive(Debug, Clone)]
pub struct Observation {
    pub candidate: Candidate,
    pub status_code: u16,
    pub size: usize,
    pub latency: Duration,
    pub classification: Classification,
    pub extracted: Extracted,
    pub signals: Vec<Signal>,
}

impl Observation {
    pub fn benign(candidate: Candidate, resp: &HttpResponse) -> Self {
        Self {
            candidate,
            status_code: resp.status,
            size: resp.body.len(),
            latency: resp.latency,
            classification: Classification::Benign,
            extracted: Extracted::default(),
            signals: Vec::new(),
        }
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.classification = self.classification.max(signal.severity.into());
        self.signals.push(signal);
        self
    }

    /// 429 and 503 feed the limiter's backoff instead of becoming findings.
    pub fn is_throttled(&self) -> bool {
        matches!(self.status_code, 429 | 503)
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    /// Exactly one observation or one error per call. No retries here.
    async fn probe(&self, candidate: &Candidate, ctx: &ProbeContext) -> Result<Observation, ProbeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Page,
    Id,
    Token,
    Upload,
    Access,
}

impl ProbeKind {
    pub fn of(candidate: &Candidate) -> Self {
        match candidate {
            Candidate::Page(_) => ProbeKind::Page,
            Candidate::Id(c) if c.kind == IdKind::Token => ProbeKind::Token,
            Candidate::Id(_) => ProbeKind::Id,
            Candidate::Upload(_) => ProbeKind::Upload,
            Candidate::Endpoint(_) => ProbeKind::Access,
        }
    }
}

/// Fixed table of probe implementations, one slot per [`ProbeKind`].
#[derive(Clone)]
pub struct ProbeRegistry {
    page: Arc<dyn Probe>,
    id: Arc<dyn Probe>,
    token: Arc<dyn Probe>,
    upload: Arc<dyn Probe>,
    access: Arc<dyn Probe>,
}

impl ProbeRegistry {
    pub fn builtin() -> Self {
        Self {
            page: Arc::new(PageProbe::default()),
            id: Arc::new(IdProbe),
            token: Arc::new(TokenProbe),
            upload: Arc::new(UploadProbe),
            access: Arc::new(AccessProbe),
        }
    }

    pub fn with(mut self, kind: ProbeKind, probe: Arc<dyn Probe>) -> Self {
        match kind {
            ProbeKind::Page => self.page = probe,
            ProbeKind::Id => self.id = probe,
            ProbeKind::Token => self.token = probe,
            ProbeKind::Upload => self.upload = probe,
            ProbeKind::Access => self.access = probe,
        }
        self
    }

    pub fn get(&self, kind: ProbeKind) -> &Arc<dyn Probe> {
        match kind {
            ProbeKind::Page => &self.page,
            ProbeKind::Id => &self.id,
            ProbeKind::Token => &self.token,
            ProbeKind::Upload => &self.upload,
            ProbeKind::Access => &self.access,
        }
    }

    pub fn for_candidate(&self, candidate: &Candidate) -> &Arc<dyn Probe> {
        self.get(ProbeKind::of(candidate))
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}


#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::discover::fetcher::FetchedPage;
    use crate::http_client::ClientOptions;
    use crate::probe::http_probe::ReqwestHttp;

    /// Serves the same HTML for every URL.
    pub struct StaticPages(pub String);

    #[async_trait]
    impl PageFetcher for StaticPages {
        async fn fetch_page(&self, _url: &Url, _http: &dyn HttpCapability) -> Result<FetchedPage, ProbeError> {
            Ok(FetchedPage { html: self.0.clone(), status: 200, ..Default::default() })
        }
    }

    pub fn reqwest_context(credentials: Credentials) -> ProbeContext {
        let opts = ClientOptions { timeout: Duration::from_secs(5), ..Default::default() };
        ProbeContext {
            http: Arc::new(ReqwestHttp::new(opts).unwrap()),
            pages: Arc::new(StaticPages(String::new())),
            credentials,
            max_links_per_page: 8,
            max_scripts_per_page: 2,
        }
    }
}
