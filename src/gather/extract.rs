use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Form {
    pub action: String,
    pub method: String,
    pub inputs: Vec<String>,
}

/// Everything pulled from one HTML document. Built synchronously because
/// `scraper::Html` is not `Send`.
#[derive(Debug, Clone, Default)]
pub struct PageExtract {
    pub links: Vec<Url>,
    pub forms: Vec<Form>,
    pub params: Vec<String>,
    pub script_srcs: Vec<Url>,
    pub script_endpoints: Vec<String>,
    pub inline_scripts: Vec<String>,
}

static LINK_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));
static FORM_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("form").expect("static selector"));
static FIELD_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input[name], select[name], textarea[name]").expect("static selector"));
static SCRIPT_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("script").expect("static selector"));

static ENDPOINT_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)(?:fetch|axios\.(?:get|post|put|delete|patch))\(\s*['"`]([^'"`\s]+)['"`]"#,
        r#"(?i)\burl\s*:\s*['"]([^'"\s]+)['"]"#,
        r#"(?i)\bendpoint\s*:\s*['"]([^'"\s]+)['"]"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

const SKIPPED_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".ico", ".pdf", ".zip", ".exe", ".mp4", ".mp3", ".webm", ".svg",
];

/// Parse a page and extract links, forms, GET parameter names and script endpoints.
pub fn extract_page(html: &str, base: &Url) -> PageExtract {
    let doc = Html::parse_document(html);
    let mut out = PageExtract::default();
    let mut params: BTreeSet<String> = base.query_pairs().map(|(k, _)| k.into_owned()).collect();
    let mut seen_links = BTreeSet::new();

    for a in doc.select(&LINK_SEL) {
        let Some(href) = a.value().attr("href") else { continue };
        let Ok(mut link) = base.join(href.trim()) else { continue };
        if !matches!(link.scheme(), "http" | "https") {
            continue;
        }
        link.set_fragment(None);
        params.extend(link.query_pairs().map(|(k, _)| k.into_owned()));
        if is_static_asset(&link) {
            continue;
        }
        if seen_links.insert(link.to_string()) {
            out.links.push(link);
        }
    }

    for form in doc.select(&FORM_SEL) {
        let action = form
            .value()
            .attr("action")
            .and_then(|a| base.join(a).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| base.to_string());
        let method = form
            .value()
            .attr("method")
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "GET".to_string());
        let inputs = form
            .select(&FIELD_SEL)
            .filter_map(|i| i.value().attr("name").map(str::to_string))
            .collect();
        out.forms.push(Form { action, method, inputs });
    }

    let mut endpoints = BTreeSet::new();
    for script in doc.select(&SCRIPT_SEL) {
        if let Some(src) = script.value().attr("src") {
            if let Ok(u) = base.join(src) {
                out.script_srcs.push(u);
            }
            continue;
        }
        let body: String = script.text().collect();
        endpoints.extend(script_endpoints(&body, base));
        if !body.trim().is_empty() {
            out.inline_scripts.push(body);
        }
    }

    out.params = params.into_iter().collect();
    out.script_endpoints = endpoints.into_iter().collect();
    out
}

/// Endpoint-like string literals in JavaScript source, resolved against `base`.
pub fn script_endpoints(js: &str, base: &Url) -> Vec<String> {
    let mut out = BTreeSet::new();
    for re in ENDPOINT_RES.iter() {
        for cap in re.captures_iter(js) {
            let Some(m) = cap.get(1) else { continue };
            let s = m.as_str();
            if s.starts_with('/') || s.starts_with("http://") || s.starts_with("https://") {
                if let Ok(u) = base.join(s) {
                    out.insert(u.to_string());
                }
            }
        }
    }
    out.into_iter().collect()
}

fn is_static_asset(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    SKIPPED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
