use async_trait::async_trait;
use serde_json::{json, Value};

use super::{HttpRequest, HttpResponse, Observation, Probe, ProbeContext};
use crate::catalog::AccessCheck;
use crate::engine::candidate::Candidate;
use crate::errors::ProbeError;

/// Evidence kept per listed share or user.
const LISTED_EVIDENCE: usize = 20;

/// Sends a fixed request and applies the rule's [`AccessCheck`] to the answer.
pub struct AccessProbe;

#[async_trait]
impl Probe for AccessProbe {
    async fn probe(&self, candidate: &Candidate, ctx: &ProbeContext) -> Result<Observation, ProbeError> {
        let Candidate::Endpoint(e) = candidate else {
            return Err(ProbeError::InvalidCandidate(format!("access probe got {}", candidate.label())));
        };
        let rule = &e.rule;

        let mut req = HttpRequest::new(rule.method.clone(), e.url.clone()).headers(&rule.headers);
        if rule.authenticated {
            req = req.headers(ctx.credentials.headers());
        }
        if let Some(body) = &rule.body {
            req = req.body(body.clone());
        }
        if !rule.follow_redirects {
            req = req.no_redirects();
        }
        let resp = ctx.http.request(req).await?;
        let mut obs = Observation::benign(candidate.clone(), &resp);

        let Some(mut evidence) = evaluate(rule.check, &resp, ctx, &mut obs.extracted.tokens) else {
            return Ok(obs);
        };
        if let Value::Object(map) = &mut evidence {
            map.insert("path".into(), json!(e.url.path()));
            map.insert("check".into(), json!(rule.label));
            map.insert("status".into(), json!(resp.status));
        }
        tracing::warn!(url = %e.url, finding = %rule.finding.kind, check = %rule.label, "access check matched");
        Ok(obs.with_signal(rule.finding.signal(evidence)))
    }
}

/// Evidence when the response satisfies `check`, `None` otherwise.
fn evaluate(check: AccessCheck, resp: &HttpResponse, ctx: &ProbeContext, tokens: &mut Vec<String>) -> Option<Value> {
    match check {
        AccessCheck::Reachable => (resp.status == 200).then(|| json!({ "content_type": resp.header("content-type") })),
        AccessCheck::SystemInfo => {
            let doc = json_body(resp, &[200])?;
            Some(json!({
                "version": doc.get("versionstring").or_else(|| doc.get("version")),
                "product": doc.get("productname"),
                "maintenance": doc.get("maintenance"),
            }))
        }
        AccessCheck::UserList => {
            let doc = json_body(resp, &[200, 400])?;
            let users = doc.pointer("/ocs/data/users")?.as_array()?;
            if users.is_empty() {
                return None;
            }
            let listed: Vec<&Value> = users.iter().take(LISTED_EVIDENCE).collect();
            Some(json!({ "count": users.len(), "users": listed }))
        }
        AccessCheck::ShareList { public_only, harvest_tokens } => {
            let doc = json_body(resp, &[200])?;
            let shares: Vec<&Value> = match doc.pointer("/ocs/data")? {
                Value::Array(items) => items.iter().collect(),
                Value::Object(items) => items.values().collect(),
                _ => return None,
            };
            let shares: Vec<&Value> = shares
                .into_iter()
                .filter(|s| !public_only || s.get("share_type").and_then(Value::as_u64) == Some(3))
                .collect();
            if shares.is_empty() {
                return None;
            }
            if harvest_tokens {
                tokens.extend(shares.iter().filter_map(|s| s.get("token")?.as_str().map(str::to_string)));
            }
            let listed: Vec<Value> = shares
                .iter()
                .take(LISTED_EVIDENCE)
                .map(|s| json!({ "id": s.get("id"), "path": s.get("path"), "share_type": s.get("share_type") }))
                .collect();
            Some(json!({ "count": shares.len(), "shares": listed }))
        }
        AccessCheck::BasicAuth => {
            let basic = ctx.credentials.scheme().as_deref() == Some("basic");
            let transport = resp.final_url.as_ref().map(|u| u.scheme().to_string());
            (basic && resp.status != 401).then(|| json!({ "scheme": "basic", "transport": transport }))
        }
        AccessCheck::NoPasswordPrompt => {
            let prompted = resp.text().to_ascii_lowercase().contains("password");
            (resp.status == 200 && !prompted).then(|| json!({}))
        }
    }
}

fn json_body(resp: &HttpResponse, statuses: &[u16]) -> Option<Value> {
    if !statuses.contains(&resp.status) {
        return None;
    }
    match serde_json::from_slice(&resp.body) {
        Ok(doc) => Some(doc),
        Err(e) => {
            tracing::debug!(status = resp.status, error = %e, "expected a JSON body");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ProbeCatalog, TargetDefinition, TestKind};
    use crate::config::NetbearConfig;
    use crate::engine::sampler::session_rng;
    use crate::findings::{Severity, Signal};
    use crate::probe::test_support::reqwest_context;
    use crate::probe::Credentials;
    use url::Url;
    use wiremock::matchers::{any, body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn run(server: &MockServer, tests: &[TestKind], credentials: Credentials) -> (Vec<Signal>, Vec<String>) {
        let cfg = NetbearConfig::default();
        let target = TargetDefinition::nextcloud(Url::parse(&server.uri()).unwrap(), "bob", &cfg).unwrap();
        let candidates = ProbeCatalog::new(&target, &cfg).candidates(tests, &mut session_rng(Some(1)));
        let ctx = reqwest_context(credentials);

        let mut signals = Vec::new();
        let mut tokens = Vec::new();
        for c in candidates.iter().filter(|c| matches!(c, Candidate::Endpoint(_))) {
            let obs = AccessProbe.probe(c, &ctx).await.unwrap();
            signals.extend(obs.signals);
            tokens.extend(obs.extracted.tokens);
        }
        (signals, tokens)
    }

    #[tokio::test]
    async fn open_admin_endpoint_is_critical() {
        let server = MockServer::start().await;
        Mock::given(path("/settings/admin/"))
            .and(header("OCS-APIRequest", "true"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
            .mount(&server)
            .await;
        Mock::given(any()).respond_with(ResponseTemplate::new(403)).mount(&server).await;

        let (signals, _) = run(&server, &[TestKind::Auth], Credentials::bearer("t")).await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, "admin_access");
        assert_eq!(signals[0].severity, Severity::Critical);
        assert_eq!(signals[0].evidence["content_type"], "text/html");
    }

    #[tokio::test]
    async fn basic_credentials_are_flagged_unless_refused() {
        let server = MockServer::start().await;
        Mock::given(any()).respond_with(ResponseTemplate::new(403)).mount(&server).await;

        let (signals, _) = run(&server, &[TestKind::Auth], Credentials::basic("bob", "pw")).await;
        let basic: Vec<_> = signals.iter().filter(|s| s.kind == "basic_auth_used").collect();
        assert_eq!(basic.len(), 1);
        assert_eq!(basic[0].evidence["transport"], "http");

        let refused = MockServer::start().await;
        Mock::given(any()).respond_with(ResponseTemplate::new(401)).mount(&refused).await;
        let (signals, _) = run(&refused, &[TestKind::Auth], Credentials::basic("bob", "pw")).await;
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn recon_reads_status_users_and_shares() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"installed":true,"maintenance":false,"versionstring":"27.1.3","productname":"Nextcloud"}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(path("/ocs/v2.php/apps/provisioning_api/api/v1/users"))
            .and(query_param("limit", "100"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"ocs":{"data":{"users":["admin","bob","carol"]}}}"#),
            )
            .mount(&server)
            .await;
        let shares = r#"{"ocs":{"data":[
            {"id":"1","share_type":0,"path":"/a"},
            {"id":"2","share_type":3,"path":"/b","token":"tokB"}
        ]}}"#;
        Mock::given(path("/ocs/v2.php/apps/files_sharing/api/v1/shares"))
            .respond_with(ResponseTemplate::new(200).set_body_string(shares))
            .mount(&server)
            .await;

        let (signals, tokens) = run(&server, &[TestKind::Recon], Credentials::basic("bob", "pw")).await;
        let by_kind = |k: &str| signals.iter().find(|s| s.kind == k).unwrap_or_else(|| panic!("no {k}"));

        assert_eq!(by_kind("system_info").evidence["version"], "27.1.3");
        assert_eq!(by_kind("system_info").severity, Severity::Info);
        assert_eq!(by_kind("user_enumeration").evidence["count"], 3);
        assert_eq!(by_kind("shares_enumeration").evidence["count"], 2);
        assert_eq!(by_kind("public_links").evidence["count"], 1);
        // recon reports shares but leaves token follow-ups to the public link test
        assert!(tokens.is_empty());
    }

    #[tokio::test]
    async fn public_share_listing_harvests_tokens() {
        let server = MockServer::start().await;
        Mock::given(path("/ocs/v2.php/apps/files_sharing/api/v1/shares"))
            .and(query_param("public", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"ocs":{"data":{"7":{"id":"7","share_type":3,"token":"abcDEF"},"8":{"id":"8","share_type":1}}}}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(any()).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let (signals, tokens) = run(&server, &[TestKind::PublicLinks], Credentials::basic("bob", "pw")).await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, "public_shares_enumeration");
        assert_eq!(tokens, vec!["abcDEF"]);
    }

    #[tokio::test]
    async fn share_followups_detect_missing_and_bypassed_passwords() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/s/open"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>holiday.jpg</h1>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/s/open"))
            .and(body_string("password=admin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>holiday.jpg</h1>"))
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("Enter the password"))
            .mount(&server)
            .await;

        let cfg = NetbearConfig::default();
        let target = TargetDefinition::nextcloud(Url::parse(&server.uri()).unwrap(), "bob", &cfg).unwrap();
        let candidates = ProbeCatalog::new(&target, &cfg).token_followups(&["open".to_string()]);
        let ctx = reqwest_context(Credentials::basic("bob", "pw"));

        let mut signals = Vec::new();
        for c in &candidates {
            signals.extend(AccessProbe.probe(c, &ctx).await.unwrap().signals);
        }
        let kinds: Vec<_> = signals.iter().map(|s| (s.kind.as_str(), s.evidence["check"].as_str().unwrap_or(""))).collect();
        assert_eq!(kinds, vec![("share_access_control", "direct_access"), ("password_bypass", "weak_password_admin")]);

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.headers.get(&wiremock::http::HeaderName::from("authorization")).is_none()));
    }
}
