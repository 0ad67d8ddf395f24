//! Page fetching through headless Chrome via the DevTools protocol.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use url::Url;

use super::fetcher::{FetchedPage, PageFetcher};
use crate::errors::ProbeError;
use crate::filter::is_api_candidate;
use crate::probe::HttpCapability;

const RESOURCES_JS: &str = r#"
    (function() {
        const scripts = Array.from(document.scripts).map(s => s.src).filter(s => s);
        const xhr = performance.getEntriesByType('resource')
            .filter(e => e.initiatorType === 'fetch' || e.initiatorType === 'xmlhttprequest')
            .map(e => e.name);
        return { scripts: scripts, xhr: xhr };
    })()
"#;

#[derive(Debug, Default, serde::Deserialize)]
struct PageResources {
    #[serde(default)]
    scripts: Vec<String>,
    #[serde(default)]
    xhr: Vec<String>,
}

/// Renders pages in headless Chrome and reports the scripts and fetch/XHR
/// requests the page made after load.
pub struct BrowserPageFetcher {
    browser: Browser,
    settle: Duration,
}

impl BrowserPageFetcher {
    pub async fn launch(settle: Duration) -> Result<Self> {
        tracing::info!("launching headless Chrome");

        let config = BrowserConfig::builder()
            .no_sandbox()
            .args(vec![
                "--headless",
                "--disable-blink-features=AutomationControlled",
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--window-size=1920,1080",
            ])
            .build()
            .map_err(|e| anyhow::anyhow!("browser config error: {e}"))?;

        let (browser, mut handler) = Browser::launch(config).await.context("failed to launch browser")?;

        tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self { browser, settle })
    }

    async fn render(&self, url: &Url) -> Result<FetchedPage, chromiumoxide::error::CdpError> {
        let page = self.browser.new_page("about:blank").await?;
        let rendered = async {
            page.goto(url.as_str()).await?;
            tokio::time::sleep(self.settle).await;

            let html = page.content().await?;
            let final_url = page.url().await?.and_then(|u| Url::parse(&u).ok());
            let resources: PageResources = page.evaluate(RESOURCES_JS).await?.into_value().unwrap_or_default();
            Ok::<_, chromiumoxide::error::CdpError>((html, final_url, resources))
        }
        .await;
        // The tab is closed on every path, failed navigations included.
        if let Err(e) = page.close().await {
            tracing::debug!(url = %url, error = %e, "failed to close tab");
        }
        let (html, final_url, resources) = rendered?;

        Ok(FetchedPage {
            html,
            scripts: resources.scripts,
            xhr: resources.xhr.into_iter().filter(|u| is_api_candidate(u)).collect(),
            // CDP navigation does not expose the document status here.
            status: 200,
            final_url,
        })
    }
}

#[async_trait]
impl PageFetcher for BrowserPageFetcher {
    async fn fetch_page(&self, url: &Url, _http: &dyn HttpCapability) -> Result<FetchedPage, ProbeError> {
        self.render(url).await.map_err(|e| {
            let msg = e.to_string();
            let lower = msg.to_ascii_lowercase();
            if lower.contains("timeout") || lower.contains("timed out") {
                ProbeError::NetworkTimeout(msg)
            } else if lower.contains("cert") || lower.contains("ssl") {
                ProbeError::TlsFailure(msg)
            } else {
                ProbeError::NetworkFailure(msg)
            }
        })
    }
}
