use std::collections::BTreeSet;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashSet;
use url::Url;

use super::{Extracted, HttpRequest, Observation, Probe, ProbeContext};
use crate::engine::candidate::Candidate;
use crate::errors::ProbeError;
use crate::filter::param_signals;
use crate::findings::{Classification, Signal};
use crate::gather::{analyze_script, challenge_signal, detect_red_flags, extract_page, red_flag_signal, script_signals};

/// Fetches a page and pulls out forms, parameter names, links and script
/// endpoints. Interesting parameter names, bot challenges, phishing markers
/// and risky script patterns become signals.
#[derive(Default)]
pub struct PageProbe {
    /// External scripts already scanned; shared pages reuse one bundle.
    scanned: DashSet<String>,
}

#[async_trait]
impl Probe for PageProbe {
    async fn probe(&self, candidate: &Candidate, ctx: &ProbeContext) -> Result<Observation, ProbeError> {
        let Candidate::Page(page) = candidate else {
            return Err(ProbeError::InvalidCandidate(format!("page probe got {}", candidate.label())));
        };

        let start = Instant::now();
        let fetched = ctx.pages.fetch_page(&page.url, ctx.http.as_ref()).await?;
        let latency = start.elapsed();

        let base = fetched.final_url.clone().unwrap_or_else(|| page.url.clone());
        let found = extract_page(&fetched.html, &base);

        let endpoints: BTreeSet<String> = found.script_endpoints.into_iter().chain(fetched.xhr).collect();
        let endpoints: Vec<String> = endpoints.into_iter().collect();
        let mut links = found.links;
        links.truncate(ctx.max_links_per_page);

        tracing::debug!(
            url = %page.url,
            depth = page.depth,
            links = links.len(),
            forms = found.forms.len(),
            params = found.params.len(),
            "page extracted"
        );

        let mut signals = param_signals(&page.url, &found.params);
        signals.extend(challenge_signal(&base, &fetched.html));
        signals.extend(red_flag_signal(&base, detect_red_flags(&base, &fetched.html, &links, &endpoints)));

        let mut inline = found.inline_scripts.iter().map(|js| analyze_script(js));
        if let Some(mut report) = inline.next() {
            inline.for_each(|r| report.merge(r));
            signals.extend(script_signals(&base, &report));
        }
        let scripts: BTreeSet<String> =
            fetched.scripts.into_iter().chain(found.script_srcs.iter().map(Url::to_string)).collect();
        signals.extend(self.scan_external(scripts, ctx).await);

        let mut obs = Observation {
            candidate: candidate.clone(),
            status_code: fetched.status,
            size: fetched.html.len(),
            latency,
            classification: Classification::Benign,
            extracted: Extracted {
                forms: found.forms,
                params: found.params,
                links,
                xhr_endpoints: endpoints,
                landed_on: fetched.final_url,
                tokens: Vec::new(),
            },
            signals: Vec::new(),
        };
        for signal in signals {
            obs = obs.with_signal(signal);
        }
        Ok(obs)
    }
}

impl PageProbe {
    /// Fetches up to `max_scripts_per_page` unseen external scripts through
    /// the session's HTTP capability and scans them. Fetch failures, including
    /// out-of-scope refusals, are skipped.
    async fn scan_external(&self, scripts: BTreeSet<String>, ctx: &ProbeContext) -> Vec<Signal> {
        let mut signals = Vec::new();
        let fresh = scripts.into_iter().filter(|s| self.scanned.insert(s.clone()));
        for src in fresh.take(ctx.max_scripts_per_page) {
            let Ok(url) = Url::parse(&src) else { continue };
            let resp = match ctx.http.request(HttpRequest::get(url.clone())).await {
                Ok(resp) if resp.status == 200 => resp,
                Ok(resp) => {
                    tracing::debug!(script = %url, status = resp.status, "script not scanned");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(script = %url, error = %e, "script not scanned");
                    continue;
                }
            };
            signals.extend(script_signals(&url, &analyze_script(&resp.text())));
        }
        signals
    }
}
