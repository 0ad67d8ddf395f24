use async_trait::async_trait;
use serde_json::json;

use super::{HttpRequest, Observation, Probe, ProbeContext};
use crate::engine::candidate::{Candidate, IdKind};
use crate::errors::ProbeError;

/// Tries a public-link token without credentials and without following
/// redirects. 200 and 302 both mean the token exists. Latency is kept on
/// every observation so valid and invalid tokens can be compared.
pub struct TokenProbe;

#[async_trait]
impl Probe for TokenProbe {
    async fn probe(&self, candidate: &Candidate, ctx: &ProbeContext) -> Result<Observation, ProbeError> {
        let c = match candidate {
            Candidate::Id(c) if c.kind == IdKind::Token => c,
            _ => return Err(ProbeError::InvalidCandidate(format!("token probe got {}", candidate.label()))),
        };
        let url = c
            .url()
            .map_err(|e| ProbeError::InvalidCandidate(format!("token {}: {e}", c.id)))?;

        let resp = ctx
            .http
            .request(HttpRequest::get(url).headers(&c.template.headers).no_redirects())
            .await?;
        let mut obs = Observation::benign(candidate.clone(), &resp);

        if matches!(resp.status, 200 | 302) {
            obs.extracted.tokens.push(c.id.clone());
            tracing::info!(token = %c.id, status = resp.status, "valid public link token");
            let evidence = json!({
                "token": c.id,
                "status": resp.status,
                "latency_ms": resp.latency.as_millis() as u64,
            });
            return Ok(obs.with_signal(c.template.finding.signal(evidence)));
        }
        Ok(obs)
    }
}
