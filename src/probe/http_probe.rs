use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Client, Method};
use url::Url;

use super::{HttpRequest, HttpResponse};
use crate::errors::ProbeError;
use crate::http_client::{create_client, ClientOptions};
use crate::scope::ScopeMatcher;

const MAX_REDIRECTS: usize = 5;

/// Outbound HTTP as seen by probes.
#[async_trait]
pub trait HttpCapability: Send + Sync {
    async fn request(&self, req: HttpRequest) -> Result<HttpResponse, ProbeError>;
}

/// `HttpCapability` over reqwest. Keeps one redirect-following and one
/// non-following client so both share pooling settings.
pub struct ReqwestHttp {
    follow: Client,
    no_follow: Client,
}

impl ReqwestHttp {
    pub fn new(opts: ClientOptions) -> anyhow::Result<Self> {
        Ok(Self {
            follow: create_client(ClientOptions { follow_redirects: true, ..opts })?,
            no_follow: create_client(ClientOptions { follow_redirects: false, ..opts })?,
        })
    }
}

#[async_trait]
impl HttpCapability for ReqwestHttp {
    async fn request(&self, req: HttpRequest) -> Result<HttpResponse, ProbeError> {
        let client = if req.follow_redirects { &self.follow } else { &self.no_follow };
        let mut builder = client.request(req.method.clone(), req.url.clone());
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let start = Instant::now();
        let resp = builder.send().await.map_err(classify_error)?;
        let status = resp.status().as_u16();
        let final_url = resp.url().clone();
        let headers: HashMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
            .collect();
        let body = resp.bytes().await.map_err(classify_error)?;
        let latency = start.elapsed();

        tracing::debug!(method = %req.method, url = %req.url, status, ms = latency.as_millis() as u64, "http");

        Ok(HttpResponse { status, body: body.to_vec(), headers, latency, final_url: Some(final_url) })
    }
}

/// Keeps every request, including each redirect hop, inside the scope.
///
/// The inner capability is always called without redirect following; hops
/// are taken here one at a time. A hop to a host outside the scope ends the
/// chain and the redirect response itself is returned.
pub struct ScopedHttp {
    inner: Arc<dyn HttpCapability>,
    scope: Arc<ScopeMatcher>,
}

impl ScopedHttp {
    pub fn new(inner: Arc<dyn HttpCapability>, scope: Arc<ScopeMatcher>) -> Self {
        Self { inner, scope }
    }
}

#[async_trait]
impl HttpCapability for ScopedHttp {
    async fn request(&self, req: HttpRequest) -> Result<HttpResponse, ProbeError> {
        if !self.scope.allowed_url(&req.url) {
            return Err(ProbeError::OutOfScope(req.url.to_string()));
        }
        let follow = req.follow_redirects;
        let mut current = HttpRequest { follow_redirects: false, ..req };
        let mut hops = 0;
        loop {
            let mut resp = self.inner.request(current.clone()).await?;
            resp.final_url = Some(current.url.clone());
            if !follow || !resp.is_redirect() || hops >= MAX_REDIRECTS {
                return Ok(resp);
            }
            let Some(next) = resp.header("location").and_then(|loc| current.url.join(loc).ok()) else {
                return Ok(resp);
            };
            if !self.scope.allowed_url(&next) {
                tracing::debug!(from = %current.url, to = %next, "redirect leaves scope, not followed");
                return Ok(resp);
            }
            current = redirect_hop(current, resp.status, next);
            hops += 1;
        }
    }
}

/// Next request of a redirect chain. 303, and 301/302 after a POST, switch to
/// a bodiless GET. Credentials only travel to the same origin.
fn redirect_hop(prev: HttpRequest, status: u16, next: Url) -> HttpRequest {
    let same_origin = prev.url.origin() == next.origin();
    let to_get = status == 303 || (matches!(status, 301 | 302) && prev.method == Method::POST);
    let mut headers = prev.headers;
    if !same_origin {
        headers.retain(|(name, _)| !name.eq_ignore_ascii_case("authorization") && !name.eq_ignore_ascii_case("cookie"));
    }
    if to_get {
        headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
    }
    HttpRequest {
        method: if to_get { Method::GET } else { prev.method },
        url: next,
        headers,
        body: if to_get { None } else { prev.body },
        follow_redirects: false,
    }
}

/// Maps a reqwest failure onto the probe error taxonomy. TLS problems are
/// only visible as text somewhere in the source chain.
pub fn classify_error(err: reqwest::Error) -> ProbeError {
    let chain = error_chain(&err);
    if err.is_timeout() {
        return ProbeError::NetworkTimeout(chain);
    }
    let lower = chain.to_ascii_lowercase();
    if ["certificate", "tls", "ssl", "handshake"].iter().any(|m| lower.contains(m)) {
        return ProbeError::TlsFailure(chain);
    }
    if err.is_builder() {
        return ProbeError::InvalidCandidate(chain);
    }
    ProbeError::NetworkFailure(chain)
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(s) = source {
        parts.push(s.to_string());
        source = s.source();
    }
    parts.join(": ")
}
