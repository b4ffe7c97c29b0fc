use crate::app::ports::{HttpClientPort, HttpGetResult, TransportError, TransportErrorKind};
use crate::config::{ApiConfig, AuthConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};

/// reqwest-backed client for the feed API. Timeout, user agent and
/// credentials come from [`ApiConfig`] and apply to every request.
pub struct ReqwestHttp {
    client: reqwest::Client,
    auth: AuthConfig,
}

impl ReqwestHttp {
    pub fn new(api: &ApiConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(api.timeout())
            .user_agent(api.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            auth: api.auth.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            AuthConfig::None => request,
            AuthConfig::Basic { username, password } => request.basic_auth(username, Some(password)),
            AuthConfig::Bearer { token } => request.bearer_auth(token),
            AuthConfig::ApiKey { header, value } => request.header(header.as_str(), value.as_str()),
        }
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpGetResult, TransportError> {
        let request = self.authorize(self.client.get(url).query(query));
        let resp = request.send().await.map_err(transport_error)?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp.bytes().await.map_err(transport_error)?.to_vec();
        Ok(HttpGetResult {
            status,
            bytes,
            content_type,
        })
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, err.to_string())
}
