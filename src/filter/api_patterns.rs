use once_cell::sync::Lazy;
use regex::Regex;

static VERSIONED: Lazy<Regex> = Lazy::new(|| Regex::new(r"/v\d+(/|$|\?)").expect("static regex"));

/// Heuristic for captured XHR/script URLs worth reporting as API endpoints.
pub fn is_api_candidate(u: &str) -> bool {
    let lower = u.to_lowercase();
    if lower.starts_with("data:") || lower.starts_with("blob:") {
        return false;
    }

    let path = lower.split(['?', '#']).next().unwrap_or("");
    for ext in [".css", ".woff", ".woff2", ".png", ".jpg", ".svg", ".ico", ".map"] {
        if path.ends_with(ext) {
            return false;
        }
    }

    if ["/api/", "/graphql", "/rest/", "wp-json", "/ocs/", "/ajax/", "/remote.php/"]
        .iter()
        .any(|t| lower.contains(t))
    {
        return true;
    }

    if path.ends_with(".json") {
        return true;
    }

    if VERSIONED.is_match(&lower) {
        return true;
    }

    lower.contains("/login") || lower.contains("/token") || lower.contains("/auth")
}
