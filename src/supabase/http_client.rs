use anyhow::Result;
use std::collections::HashMap;

/// HTTP method enum covering the verbs the backend API uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

/// Response data decoupled from any HTTP library type
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status_code: u16,
    body: String,
}

impl HttpResponse {
    /// Create a new response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status_code: status,
            body: body.into(),
        }
    }

    /// Get the status code
    pub fn status(&self) -> u16 {
        self.status_code
    }

    /// Get a reference to the response body
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parse body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Check if successful (2xx status)
    pub fn is_success(&self) -> bool {
        self.status_code >= 200 && self.status_code < 300
    }
}

/// Trait for HTTP operations, allowing for mocking
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform an HTTP request and return the raw response
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Result<HttpResponse>;
}

/// Implementation of HttpClient using reqwest
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a new ReqwestHttpClient
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a new client with custom configuration
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Result<HttpResponse> {
        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Patch => self.client.patch(url),
            HttpMethod::Delete => self.client.delete(url),
        };

        for (key, value) in headers {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse::new(status, body))
    }
}

/// Scripted HTTP client for tests: responses are matched by method and a
/// path fragment, and every request is recorded for assertions.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub method: HttpMethod,
        pub url: String,
        pub body: Option<String>,
    }

    struct Rule {
        method: HttpMethod,
        path_fragment: String,
        response: HttpResponse,
    }

    #[derive(Clone)]
    pub struct MockHttpClient {
        rules: Arc<Mutex<Vec<Rule>>>,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
        /// Simulated latency before each response, so tests can overlap
        /// concurrent calls under paused time
        latency: Duration,
    }

    impl MockHttpClient {
        pub fn new() -> Self {
            Self {
                rules: Arc::new(Mutex::new(Vec::new())),
                requests: Arc::new(Mutex::new(Vec::new())),
                latency: Duration::from_millis(10),
            }
        }

        pub async fn respond(
            &self,
            method: HttpMethod,
            path_fragment: &str,
            status: u16,
            body: &str,
        ) {
            self.rules.lock().await.push(Rule {
                method,
                path_fragment: path_fragment.to_string(),
                response: HttpResponse::new(status, body),
            });
        }

        pub async fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().await.clone()
        }

        pub async fn request_count(&self, method: HttpMethod, path_fragment: &str) -> usize {
            self.requests
                .lock()
                .await
                .iter()
                .filter(|r| r.method == method && r.url.contains(path_fragment))
                .count()
        }
    }

    #[async_trait::async_trait]
    impl HttpClient for MockHttpClient {
        async fn request(
            &self,
            method: HttpMethod,
            url: &str,
            _headers: HashMap<String, String>,
            body: Option<String>,
        ) -> Result<HttpResponse> {
            self.requests.lock().await.push(RecordedRequest {
                method,
                url: url.to_string(),
                body,
            });

            tokio::time::sleep(self.latency).await;

            let rules = self.rules.lock().await;
            for rule in rules.iter() {
                if rule.method == method && url.contains(&rule.path_fragment) {
                    return Ok(rule.response.clone());
                }
            }
            anyhow::bail!("no mock response for {:?} {}", method, url)
        }
    }
}
