use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;

use super::{HttpRequest, Observation, Probe, ProbeContext};
use crate::engine::candidate::Candidate;
use crate::errors::ProbeError;

/// Stores an inert marker file, reads it back, then removes it.
///
/// Accepted and read back intact: the rule's severity. Accepted but not
/// readable: one level lower, since the server may have quarantined it.
pub struct UploadProbe;

#[async_trait]
impl Probe for UploadProbe {
    async fn probe(&self, candidate: &Candidate, ctx: &ProbeContext) -> Result<Observation, ProbeError> {
        let Candidate::Upload(u) = candidate else {
            return Err(ProbeError::InvalidCandidate(format!("upload probe got {}", candidate.label())));
        };
        let creds = ctx.credentials.headers();

        let put = ctx
            .http
            .request(HttpRequest::new(Method::PUT, u.url.clone()).headers(creds).body(u.rule.content.clone()))
            .await?;
        let obs = Observation::benign(candidate.clone(), &put);
        if !matches!(put.status, 200 | 201 | 204) {
            tracing::debug!(file = %u.filename, status = put.status, "upload rejected");
            return Ok(obs);
        }

        let confirmed = match ctx.http.request(HttpRequest::get(u.url.clone()).headers(creds)).await {
            Ok(get) => get.status == 200 && get.body == u.rule.content,
            Err(e) => {
                tracing::debug!(file = %u.filename, error = %e, "could not read back upload");
                false
            }
        };

        match ctx.http.request(HttpRequest::new(Method::DELETE, u.url.clone()).headers(creds)).await {
            Ok(del) if matches!(del.status, 200 | 204 | 404) => {}
            Ok(del) => tracing::warn!(url = %u.url, status = del.status, "probe file may not have been removed"),
            Err(e) => tracing::warn!(url = %u.url, error = %e, "probe file may not have been removed"),
        }

        let severity = if confirmed { u.rule.finding.severity } else { u.rule.finding.severity.downgrade() };
        tracing::info!(file = %u.filename, confirmed, "upload accepted");
        let evidence = json!({
            "filename": u.filename,
            "check": u.rule.label,
            "status": put.status,
            "confirmed": confirmed,
        });
        Ok(obs.with_signal(u.rule.finding.signal_at(severity, evidence)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ProbeCatalog, TargetDefinition, TestKind};
    use crate::config::NetbearConfig;
    use crate::engine::sampler::session_rng;
    use crate::findings::Severity;
    use crate::probe::test_support::reqwest_context;
    use crate::probe::Credentials;
    use url::Url;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn upload_candidate(server: &MockServer, name: &str) -> Candidate {
        let cfg = NetbearConfig::default();
        let target = TargetDefinition::nextcloud(Url::parse(&server.uri()).unwrap(), "alice", &cfg).unwrap();
        ProbeCatalog::new(&target, &cfg)
            .candidates(&[TestKind::Upload], &mut session_rng(Some(1)))
            .into_iter()
            .find(|c| c.label() == name)
            .unwrap()
    }

    #[tokio::test]
    async fn confirmed_upload_keeps_severity_and_cleans_up() {
        let server = MockServer::start().await;
        let file = "/remote.php/dav/files/alice/Netbear_Test_Uploads/netbear_probe.php";
        Mock::given(method("PUT")).and(path(file)).respond_with(ResponseTemplate::new(201)).mount(&server).await;
        Mock::given(method("GET"))
            .and(path(file))
            .respond_with(ResponseTemplate::new(200).set_body_string("netbear upload probe marker"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(file))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = reqwest_context(Credentials::basic("alice", "pw"));
        let obs = UploadProbe.probe(&upload_candidate(&server, "netbear_probe.php"), &ctx).await.unwrap();
        assert_eq!(obs.signals[0].kind, "file_type_bypass");
        assert_eq!(obs.signals[0].severity, Severity::Critical);
        assert_eq!(obs.signals[0].evidence["confirmed"], true);
    }

    #[tokio::test]
    async fn unconfirmed_upload_is_downgraded() {
        let server = MockServer::start().await;
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(201)).mount(&server).await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
        Mock::given(method("DELETE")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let ctx = reqwest_context(Credentials::none());
        let obs = UploadProbe.probe(&upload_candidate(&server, "netbear_probe.html"), &ctx).await.unwrap();
        assert_eq!(obs.signals[0].kind, "stored_markup_upload");
        assert_eq!(obs.signals[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn rejected_upload_is_benign() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(r"\.php$"))
            .respond_with(ResponseTemplate::new(415))
            .mount(&server)
            .await;

        let ctx = reqwest_context(Credentials::none());
        let obs = UploadProbe.probe(&upload_candidate(&server, "netbear_probe.php"), &ctx).await.unwrap();
        assert!(obs.signals.is_empty());
        assert_eq!(obs.status_code, 415);
    }
}
