//! Upstream HTTP client.
//!
//! One POST per request to `generateAssistantResponse`; the 2xx response
//! body is a chunked binary event stream handed back to the caller for
//! decoding. Timeouts are generous (streams run for minutes) but bounded.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::kiro::UpstreamRequest;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(12 * 60);
/// Cap on how much of an upstream error body is carried into our own error.
const ERROR_BODY_SNIPPET: usize = 512;

const SDK_UA_BASE: &str = "aws-sdk-js/1.0.7 ua/2.1";
const API_UA: &str = "api/codewhispererstreaming#1.0.7";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Client for the streaming backend. Cheap to clone.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    endpoint: String,
    user_agent: String,
}

impl UpstreamClient {
    pub fn new(config: &Config, machine_id: &str) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let user_agent = format!(
            "{base} os/{os} lang/js md/nodejs#{node} region/{region} {api} m/E KiroIDE-{version}-{machine_id}",
            base = SDK_UA_BASE,
            os = config.system_version,
            node = config.node_version,
            region = config.region,
            api = API_UA,
            version = config.kiro_version,
        );

        Ok(Self {
            client,
            endpoint: format!("{}/generateAssistantResponse", config.upstream_base()),
            user_agent,
        })
    }

    /// Issue the streaming call. 2xx returns the response whose body is the
    /// binary event stream; anything else surfaces status and a body snippet.
    pub async fn generate_assistant_response(
        &self,
        request: &UpstreamRequest,
        access_token: &str,
    ) -> Result<reqwest::Response, UpstreamError> {
        let invocation_id = Uuid::new_v4().to_string();
        debug!(%invocation_id, endpoint = %self.endpoint, "dispatching upstream request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(access_token)
            .header("Content-Type", "application/json")
            .header("x-amzn-codewhisperer-optout", "true")
            .header("x-amzn-kiro-agent-mode", "vibe")
            .header("x-amz-user-agent", "aws-sdk-js/1.0.7 KiroIDE")
            .header("user-agent", &self.user_agent)
            .header("amz-sdk-invocation-id", invocation_id)
            .header("amz-sdk-request", "attempt=1; max=3")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(ERROR_BODY_SNIPPET);
            return Err(UpstreamError::Status { status, body });
        }

        Ok(response)
    }
}
