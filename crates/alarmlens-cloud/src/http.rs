use crate::error::{parse_error_response, CloudError, Result};
use crate::sigv4::{AwsCredentials, RequestSigner};
use chrono::Utc;
use reqwest::{Client, Url};

/// Regional endpoint for an AWS service, e.g. `https://monitoring.us-east-1.amazonaws.com`.
pub fn default_endpoint(service: &str, region: &str) -> String {
    format!("https://{service}.{region}.amazonaws.com")
}

/// HTTP client that signs every POST with SigV4 for a single service endpoint.
pub struct SignedHttpClient {
    client: Client,
    signer: RequestSigner,
    endpoint: Url,
    host: String,
}

impl SignedHttpClient {
    /// `endpoint` overrides the regional endpoint (local stacks, VPC endpoints).
    pub fn new(
        credentials: AwsCredentials,
        region: &str,
        service: &str,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        let raw = endpoint
            .map(str::to_string)
            .unwrap_or_else(|| default_endpoint(service, region));
        let endpoint = Url::parse(&raw)
            .map_err(|e| CloudError::ConfigError(format!("invalid endpoint {raw}: {e}")))?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(CloudError::ConfigError(format!(
                    "endpoint {raw} has no host"
                )))
            }
        };

        let client = Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            signer: RequestSigner::new(credentials, region, service),
            endpoint,
            host,
        })
    }

    pub fn service(&self) -> &str {
        self.signer.service()
    }

    pub fn region(&self) -> &str {
        self.signer.region()
    }

    /// POST `body` to the endpoint root and return the response body.
    ///
    /// Non-2xx responses are decoded into a [`CloudError`].
    pub async fn post(&self, headers: Vec<(String, String)>, body: Vec<u8>) -> Result<String> {
        let path = self.endpoint.path().to_string();
        let auth = self
            .signer
            .sign("POST", &path, &self.host, &headers, &body, Utc::now())?;

        let mut request = self.client.post(self.endpoint.clone());
        for (name, value) in headers.iter().chain(auth.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::debug!(
                service = self.service(),
                status = status.as_u16(),
                "AWS request failed"
            );
            return Err(parse_error_response(self.service(), status.as_u16(), &text));
        }

        Ok(text)
    }
}
