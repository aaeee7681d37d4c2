//! Generic HTTP request tool.

use std::collections::HashMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::traits::{Tool, ToolFailure};

/// Cap on response body bytes returned to the model.
const BODY_CAP_BYTES: usize = 64 * 1024;

/// Arguments for the HTTP tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct HttpArgs {
    /// HTTP method: GET, POST, PUT, PATCH, DELETE or HEAD.
    pub method: String,
    /// Absolute URL to request.
    pub url: String,
    /// Optional request headers.
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// Optional request body, sent as-is.
    #[serde(default)]
    pub body: Option<String>,
}

/// Captured HTTP response.
#[derive(Debug, Clone, Serialize)]
pub struct HttpToolOutput {
    /// Response status code.
    pub status: u16,
    /// Response body, byte-capped.
    pub body: String,
}

/// Performs a single HTTP request with a bounded response capture.
#[derive(Debug, Clone)]
pub struct HttpTool {
    client: reqwest::Client,
}

impl HttpTool {
    /// Create an HTTP tool with a request timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(20))
    }
}

impl Tool for HttpTool {
    const NAME: &'static str = "http_request";
    type Args = HttpArgs;
    type Output = HttpToolOutput;

    fn description(&self) -> String {
        "Perform an HTTP request and return status plus a byte-capped body.".to_owned()
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, ToolFailure> {
        let method = match args.method.to_uppercase().as_str() {
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "PATCH" => reqwest::Method::PATCH,
            "DELETE" => reqwest::Method::DELETE,
            "HEAD" => reqwest::Method::HEAD,
            other => {
                return Err(ToolFailure::validation(format!("unknown method: {other}")));
            }
        };
        let url: reqwest::Url = args
            .url
            .parse()
            .map_err(|e| ToolFailure::validation(format!("invalid url: {e}")))?;

        let mut request = self.client.request(method, url);
        if let Some(headers) = &args.headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        if let Some(body) = args.body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            let retryable = e.is_timeout() || e.is_connect();
            ToolFailure::execution(format!("request failed: {e}"), retryable)
        })?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ToolFailure::execution(format!("body read failed: {e}"), true))?;

        let mut body = String::from_utf8_lossy(&bytes).into_owned();
        if body.len() > BODY_CAP_BYTES {
            let mut cut = BODY_CAP_BYTES;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("\n[body truncated]");
        }

        Ok(HttpToolOutput { status, body })
    }

    fn insights(&self, output: &Self::Output) -> Vec<String> {
        if output.status >= 400 {
            vec![format!("http request returned status {}", output.status)]
        } else {
            Vec::new()
        }
    }
}
