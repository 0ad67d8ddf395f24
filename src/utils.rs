use std::fs;
use std::path::Path;

use url::Url;

use crate::errors::ConfigError;
use crate::scope::{ScopeMatcher, ScopeRule};

pub fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Non-empty, non-comment lines of a newline-delimited file.
pub fn load_lines(path: &Path) -> Result<Vec<String>, ConfigError> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Crawl seeds. Bare hosts get an `https://` scheme.
pub fn load_targets(path: &Path) -> Result<Vec<Url>, ConfigError> {
    let mut out = Vec::new();
    for line in load_lines(path)? {
        let raw = if line.contains("://") { line.clone() } else { format!("https://{line}") };
        match Url::parse(&raw) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => out.push(u),
            _ => return Err(ConfigError::Invalid(format!("{}: not a valid target URL: {line}", path.display()))),
        }
    }
    Ok(out)
}

pub fn load_scope_rules(path: &Path) -> Result<ScopeMatcher, ConfigError> {
    let mut rules = Vec::new();
    for line in load_lines(path)? {
        match ScopeRule::from_line(&line) {
            Some(rule) => rules.push(rule),
            None => tracing::warn!(file = %path.display(), line = %line, "ignoring unparsable scope rule"),
        }
    }
    Ok(ScopeMatcher::new(rules))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loaders_skip_comments_and_blanks() {
        let dir = std::env::temp_dir().join(format!("netbear-utils-{}", std::process::id()));
        ensure_dir(&dir).unwrap();

        let targets = dir.join("targets.txt");
        fs::write(&targets, "# seeds\nexample.com\n\nhttp://api.example.com/v1\n").unwrap();
        let urls = load_targets(&targets).unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].as_str(), "https://example.com/");

        let scopes = dir.join("scopes.txt");
        fs::write(&scopes, "# allow\n*.example.com\n!admin.example.com\n").unwrap();
        let scope = load_scope_rules(&scopes).unwrap();
        assert_eq!(scope.len(), 2);
        assert!(scope.allowed("api.example.com"));
        assert!(!scope.allowed("admin.example.com"));

        assert!(matches!(load_lines(&dir.join("missing.txt")), Err(ConfigError::Io { .. })));
        let _ = fs::remove_dir_all(&dir);
    }
}
