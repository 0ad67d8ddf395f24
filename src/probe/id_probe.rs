use async_trait::async_trait;
use serde_json::{json, Value};

use super::{HttpRequest, Observation, Probe, ProbeContext};
use crate::engine::candidate::Candidate;
use crate::errors::ProbeError;

/// Requests an endpoint template with one substituted ID.
///
/// 200 with a non-empty body is a hit carrying the template's finding.
/// Everything else, 403/404 included, is benign. 429/503 come back as plain
/// observations; the engine turns them into backoff.
pub struct IdProbe;

#[async_trait]
impl Probe for IdProbe {
    async fn probe(&self, candidate: &Candidate, ctx: &ProbeContext) -> Result<Observation, ProbeError> {
        let Candidate::Id(c) = candidate else {
            return Err(ProbeError::InvalidCandidate(format!("id probe got {}", candidate.label())));
        };
        let url = c
            .url()
            .map_err(|e| ProbeError::InvalidCandidate(format!("{}={}: {e}", c.kind, c.id)))?;

        let req = HttpRequest::get(url.clone())
            .headers(ctx.credentials.headers())
            .headers(&c.template.headers);
        let resp = ctx.http.request(req).await?;
        let obs = Observation::benign(candidate.clone(), &resp);

        if resp.status != 200 || resp.body.is_empty() {
            return Ok(obs);
        }

        let mut evidence = json!({
            "kind": c.kind,
            "id": c.id,
            "status": resp.status,
            "size": resp.body.len(),
        });
        if c.template.expect_json {
            let data: Value = serde_json::from_slice(&resp.body)
                .map_err(|e| ProbeError::ProbeLogic(format!("{url} answered 200 without JSON: {e}")))?;
            if let Some(inner) = data.pointer("/ocs/data").filter(|v| !v.is_null()) {
                evidence["data"] = inner.clone();
            }
        }

        tracing::info!(kind = %c.kind, id = %c.id, "accessible id");
        Ok(obs.with_signal(c.template.finding.signal(evidence)))
    }
}
