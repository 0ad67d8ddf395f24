use async_trait::async_trait;
use url::Url;

use crate::errors::ProbeError;
use crate::gather::extract::extract_page;
use crate::probe::{Credentials, HttpCapability, HttpRequest};

/// A rendered or fetched page as the crawler consumes it.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub html: String,
    pub scripts: Vec<String>,
    pub xhr: Vec<String>,
    pub status: u16,
    pub final_url: Option<Url>,
}

/// Page retrieval. Fetchers that speak HTTP themselves go through `http`,
/// which is the session's scope-checked capability.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &Url, http: &dyn HttpCapability) -> Result<FetchedPage, ProbeError>;
}

/// Plain GET; no script execution, so `xhr` stays empty.
pub struct HttpPageFetcher {
    credentials: Credentials,
}

impl HttpPageFetcher {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &Url, http: &dyn HttpCapability) -> Result<FetchedPage, ProbeError> {
        let resp = http
            .request(HttpRequest::get(url.clone()).headers(self.credentials.headers()))
            .await?;
        let final_url = resp.final_url.clone().unwrap_or_else(|| url.clone());
        let html = resp.text();
        let scripts = extract_page(&html, &final_url).script_srcs.into_iter().map(String::from).collect();
        Ok(FetchedPage {
            html,
            scripts,
            xhr: Vec::new(),
            status: resp.status,
            final_url: Some(final_url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::ClientOptions;
    use crate::probe::http_probe::ReqwestHttp;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn http_fetcher_collects_script_sources() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<html><script src="/app.js"></script><a href="/next">n</a></html>"#),
            )
            .mount(&server)
            .await;

        let http = ReqwestHttp::new(ClientOptions::default()).unwrap();
        let fetcher = HttpPageFetcher::new(Credentials::none());
        let url = Url::parse(&format!("{}/", server.uri())).unwrap();
        let page = fetcher.fetch_page(&url, &http).await.unwrap();

        assert_eq!(page.status, 200);
        assert_eq!(page.final_url, Some(url));
        assert_eq!(page.scripts, vec![format!("{}/app.js", server.uri())]);
        assert!(page.html.contains("/next"));
    }

    #[tokio::test]
    async fn http_fetcher_reports_where_redirects_landed() {
        let server = MockServer::start().await;
        Mock::given(path("/start"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/landing/"))
            .mount(&server)
            .await;
        Mock::given(path("/landing/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<script src="app.js"></script>"#))
            .mount(&server)
            .await;

        let http = ReqwestHttp::new(ClientOptions::default()).unwrap();
        let url = Url::parse(&format!("{}/start", server.uri())).unwrap();
        let page = HttpPageFetcher::new(Credentials::none()).fetch_page(&url, &http).await.unwrap();

        assert_eq!(page.final_url.unwrap().path(), "/landing/");
        assert_eq!(page.scripts, vec![format!("{}/landing/app.js", server.uri())]);
    }
}
