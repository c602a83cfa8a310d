//! HTTP retrieval of the source document.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use super::{validate_document, SourceError};

/// Downloads and validates NZB documents.
pub struct SourceFetcher {
    client: Client,
}

impl SourceFetcher {
    /// Create a fetcher with the given request timeout.
    pub fn new(timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("movies-on-demand/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// GET `url` and return the body if it is an NZB document.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        debug!(url = %redact_query(url), "Fetching source document");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        validate_document(&body)?;
        info!(bytes = body.len(), "Source document fetched");

        Ok(body.to_vec())
    }
}

/// Strip the query string, which usually carries an indexer API key.
fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_redact_query() {
        assert_eq!(
            redact_query("https://indexer.example/api?t=get&apikey=secret"),
            "https://indexer.example/api"
        );
        assert_eq!(redact_query("https://x.example/a.nzb"), "https://x.example/a.nzb");
    }

    #[tokio::test]
    async fn test_fetch_valid_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("id", "abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<nzb></nzb>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = SourceFetcher::new(5);
        let body = fetcher
            .fetch(&format!("{}/api?t=get&id=abc", server.uri()))
            .await
            .unwrap();
        assert!(body.starts_with(b"<?xml"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_nzb_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not xml"))
            .mount(&server)
            .await;

        let fetcher = SourceFetcher::new(5);
        let err = fetcher.fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, SourceError::NotAnNzb { .. }));
    }

    #[tokio::test]
    async fn test_fetch_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let fetcher = SourceFetcher::new(5);
        let err = fetcher.fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, SourceError::Http { status: 429 }));
    }
}
