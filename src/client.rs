use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::sleep;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};

use crate::{crawler::CrawlerOptions, types::FetchError};

/// HTTP client shared by discovery and detail fetches. Retries rate limiting,
/// server errors and transport failures with exponential backoff; every other
/// failure surfaces immediately.
pub struct RetryingClient {
    client: Client,
    max_attempts: usize,
    backoff_base: Duration,
    pacing: Duration,
}

impl RetryingClient {
    pub fn new(options: &CrawlerOptions) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(options.user_agent.as_str())
            .timeout(options.request_timeout)
            .build()?;

        Ok(RetryingClient {
            client,
            max_attempts: options.max_attempts.max(1),
            backoff_base: options.backoff_base,
            pacing: options.pacing,
        })
    }

    /// Waits before retry `k` (0-indexed): `backoff_base * 2^k`.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        // ExponentialBackoff yields factor * 2^(k+1) millis
        let factor = (self.backoff_base.as_millis() / 2) as u64;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .take(self.max_attempts - 1)
            .collect()
    }

    /// The cooperative pause callers take after each request.
    pub async fn pace(&self) {
        if !self.pacing.is_zero() {
            sleep(self.pacing).await;
        }
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, FetchError> {
        let this = self;
        let mut attempt = 0;
        let res = RetryIf::start(
            self.backoff_schedule(),
            move || {
                attempt += 1;
                this.attempt(method.clone(), url, body, attempt)
            },
            |e: &FetchError| e.is_retryable(),
        )
        .await;

        match res {
            Ok(v) => Ok(v),
            Err(e) if e.is_retryable() => Err(FetchError::Transient {
                url: url.into(),
                attempts: self.max_attempts,
                cause: e.to_string(),
            }),
            Err(e) => {
                error!("request to {} failed: {}", url, e);
                Err(e)
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let v = self.request(Method::GET, url, None).await?;
        decode(url, v)
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<T, FetchError> {
        let v = self.request(Method::POST, url, Some(body)).await?;
        decode(url, v)
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        attempt: usize,
    ) -> Result<Value, FetchError> {
        let res = self.send_once(method, url, body).await;
        if let Err(e) = &res {
            if e.is_retryable() && attempt < self.max_attempts {
                let wait = self.backoff_base * 2u32.pow(attempt as u32 - 1);
                warn!(
                    "retry {}/{} for {} ({}), waiting {:?}",
                    attempt, self.max_attempts, url, e, wait
                );
            }
        }
        res
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, FetchError> {
        let mut req = self.client.request(method, url);
        if let Some(body) = body {
            req = req.json(body);
        }

        let res = req.send().await.map_err(|source| FetchError::Request {
            url: url.into(),
            source,
        })?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.into(),
                status: status.as_u16(),
            });
        }

        let bytes = res.bytes().await.map_err(|source| FetchError::Request {
            url: url.into(),
            source,
        })?;

        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode {
            url: url.into(),
            message: e.to_string(),
        })
    }
}

fn decode<T: DeserializeOwned>(url: &str, v: Value) -> Result<T, FetchError> {
    serde_json::from_value(v).map_err(|e| FetchError::Decode {
        url: url.into(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod test {
    use std::time::Instant;

    use super::*;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn client(backoff_ms: u64) -> RetryingClient {
        let options = CrawlerOptions::default_builder()
            .backoff_base(Duration::from_millis(backoff_ms))
            .pacing(Duration::ZERO)
            .build()
            .unwrap();
        RetryingClient::new(&options).unwrap()
    }

    #[test]
    fn default_backoff_doubles_from_two_seconds() {
        let c = RetryingClient::new(&CrawlerOptions::default_builder().build().unwrap()).unwrap();
        assert_eq!(
            c.backoff_schedule(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn sends_fixed_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jobs"))
            .and(header("accept", "application/json"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(serde_json::json!({"offset": 20})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"total": 3})))
            .expect(1)
            .mount(&server)
            .await;

        let v: Value = client(0)
            .post_json(
                &format!("{}/jobs", server.uri()),
                &serde_json::json!({"offset": 20}),
            )
            .await
            .unwrap();
        assert_eq!(v["total"], 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts_on_503() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let start = Instant::now();
        let res = client(40)
            .get_json::<Value>(&format!("{}/down", server.uri()))
            .await;

        // 40ms before attempt 2, 80ms before attempt 3
        assert!(start.elapsed() >= Duration::from_millis(120));
        match res {
            Err(FetchError::Transient { attempts, cause, .. }) => {
                assert_eq!(attempts, 3);
                assert!(cause.contains("503"));
            }
            other => panic!("expected transient failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn recovers_after_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let v: Value = client(0)
            .get_json(&format!("{}/busy", server.uri()))
            .await
            .unwrap();
        assert_eq!(v["ok"], true);
    }

    #[tokio::test]
    async fn client_errors_fail_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let res = client(0)
            .get_json::<Value>(&format!("{}/missing", server.uri()))
            .await;
        assert!(matches!(res, Err(FetchError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn malformed_json_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .expect(1)
            .mount(&server)
            .await;

        let res = client(0)
            .get_json::<Value>(&format!("{}/garbled", server.uri()))
            .await;
        assert!(matches!(res, Err(FetchError::Decode { .. })));
    }
}
