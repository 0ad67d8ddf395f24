//! Pattern scan of JavaScript for DOM XSS sinks, user-controlled sources and
//! client-side credential handling.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use url::Url;

use crate::findings::{Severity, Signal};

fn compile(table: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    table.iter().map(|(p, name)| (Regex::new(p).expect("static regex"), *name)).collect()
}

static SINKS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    compile(&[
        (r"\.innerHTML\s*=", "innerHTML"),
        (r"\.outerHTML\s*=", "outerHTML"),
        (r"\.insertAdjacentHTML\s*\(", "insertAdjacentHTML"),
        (r"document\.write\s*\(", "document.write"),
        (r"\beval\s*\(", "eval"),
        (r"new\s+Function\s*\(", "new Function"),
        (r#"set(?:Timeout|Interval)\s*\(\s*['"]"#, "string timer"),
        (r"(?:jQuery|\$)\([^)]*\)\.html\s*\(", "jQuery.html"),
    ])
});

static SOURCES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    compile(&[
        (r"location\.search", "location.search"),
        (r"location\.hash", "location.hash"),
        (r"document\.location", "document.location"),
        (r"document\.referrer", "document.referrer"),
        (r"URLSearchParams", "URLSearchParams"),
        (r"(?:local|session)Storage\[", "web storage read"),
    ])
});

static AUTH: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    compile(&[
        (r#"(?i)(?:local|session)Storage\.setItem\(\s*['"](?:[a-z_]*)(?:token|auth|jwt)"#, "token in web storage"),
        (r"document\.cookie\s*=", "cookie written from script"),
        (r#"(?i)['"](?:authorization|x-api-key)['"]\s*:"#, "credential header set in script"),
    ])
});

static STORAGE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:local|session)Storage\.setItem\(\s*['"]([^'"]+)"#).expect("static regex"));

/// What one script, or the inline scripts of one page, does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptReport {
    pub sinks: BTreeSet<&'static str>,
    pub sources: BTreeSet<&'static str>,
    pub auth: BTreeSet<&'static str>,
    pub storage_keys: BTreeSet<String>,
}

impl ScriptReport {
    /// Sinks count twice, sources once; three or more is worth reporting.
    pub fn xss_score(&self) -> usize {
        self.sinks.len() * 2 + self.sources.len()
    }

    /// A user-controlled source and a sink in the same code.
    pub fn has_chain(&self) -> bool {
        !self.sinks.is_empty() && !self.sources.is_empty()
    }

    pub fn merge(&mut self, other: ScriptReport) {
        self.sinks.extend(other.sinks);
        self.sources.extend(other.sources);
        self.auth.extend(other.auth);
        self.storage_keys.extend(other.storage_keys);
    }
}

pub fn analyze_script(js: &str) -> ScriptReport {
    let hits = |table: &[(Regex, &'static str)]| -> BTreeSet<&'static str> {
        table.iter().filter(|(re, _)| re.is_match(js)).map(|(_, name)| *name).collect()
    };
    ScriptReport {
        sinks: hits(SINKS.as_slice()),
        sources: hits(SOURCES.as_slice()),
        auth: hits(AUTH.as_slice()),
        storage_keys: STORAGE_KEY.captures_iter(js).filter_map(|c| c.get(1)).map(|m| m.as_str().to_string()).collect(),
    }
}

/// `script` is the external script URL, or the page itself for inline code.
pub fn script_signals(script: &Url, report: &ScriptReport) -> Vec<Signal> {
    let endpoint = format!("{}{}", script.origin().ascii_serialization(), script.path());
    let mut out = Vec::new();
    if report.xss_score() >= 3 {
        let severity = if report.has_chain() { Severity::Medium } else { Severity::Low };
        out.push(Signal {
            kind: "dom_xss_sink".into(),
            severity,
            endpoint: endpoint.clone(),
            description: "Script writes into DOM or code sinks".into(),
            impact: "User-controlled input reaching these sinks executes in the victim's session".into(),
            evidence: json!({
                "script": script.as_str(),
                "sinks": report.sinks,
                "sources": report.sources,
                "chain": report.has_chain(),
            }),
        });
    }
    if !report.auth.is_empty() {
        out.push(Signal {
            kind: "client_token_handling".into(),
            severity: Severity::Low,
            endpoint,
            description: "Script stores or sets credentials on the client".into(),
            impact: "Tokens readable from script are exposed to any injected code".into(),
            evidence: json!({
                "script": script.as_str(),
                "patterns": report.auth,
                "storage_keys": report.storage_keys,
            }),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_to_sink_chain_is_medium() {
        let js = r#"
            const q = new URLSearchParams(location.search).get("q");
            document.getElementById("out").innerHTML = q;
        "#;
        let report = analyze_script(js);
        assert_eq!(report.sinks.iter().copied().collect::<Vec<_>>(), vec!["innerHTML"]);
        assert!(report.has_chain());

        let signals = script_signals(&Url::parse("https://example.com/app.js").unwrap(), &report);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, "dom_xss_sink");
        assert_eq!(signals[0].severity, Severity::Medium);
        assert_eq!(signals[0].endpoint, "https://example.com/app.js");
    }

    #[test]
    fn lone_sink_is_below_threshold() {
        let report = analyze_script("el.innerHTML = '<b>static</b>';");
        assert_eq!(report.xss_score(), 2);
        assert!(script_signals(&Url::parse("https://example.com/").unwrap(), &report).is_empty());
    }

    #[test]
    fn token_storage_is_reported_with_keys() {
        let js = r#"localStorage.setItem("access_token", res.token); sessionStorage.setItem('theme', 'dark');"#;
        let report = analyze_script(js);
        assert_eq!(report.auth.len(), 1);
        assert_eq!(report.storage_keys.len(), 2);

        let signals = script_signals(&Url::parse("https://example.com/").unwrap(), &report);
        assert_eq!(signals[0].kind, "client_token_handling");
        assert_eq!(signals[0].evidence["storage_keys"][0], "access_token");
    }
}
