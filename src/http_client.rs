use std::time::Duration;

use reqwest::{Client, ClientBuilder};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Client settings shared by every probe in a session.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub verify_ssl: bool,
    pub follow_redirects: bool,
    pub max_idle_per_host: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            verify_ssl: true,
            follow_redirects: true,
            max_idle_per_host: 32,
        }
    }
}

/// Pooled client with keep-alive and compression enabled.
pub fn create_client(opts: ClientOptions) -> anyhow::Result<Client> {
    let redirects = if opts.follow_redirects {
        reqwest::redirect::Policy::limited(5)
    } else {
        reqwest::redirect::Policy::none()
    };

    let client = ClientBuilder::new()
        // Connection pooling - reuse connections aggressively
        .pool_max_idle_per_host(opts.max_idle_per_host)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .tcp_nodelay(true)

        // Timeouts
        .timeout(opts.timeout)
        .connect_timeout(Duration::from_secs(5).min(opts.timeout))

        // Compression
        .gzip(true)
        .brotli(true)

        .use_rustls_tls()
        .tls_sni(true)
        .danger_accept_invalid_certs(!opts.verify_ssl)

        .redirect(redirects)
        .user_agent(USER_AGENT)
        .build()?;

    Ok(client)
}
