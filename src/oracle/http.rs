use crate::{Error, OracleResult, PayloadEncoder, Transport, TransportError};

use std::time::{Duration, Instant};

use reqwest::{Client, Method};

/// Marks where the encoded payload goes in the URL, a header value or the
/// body. Without it the payload is appended to the URL.
pub const PAYLOAD_MARKER: &str = "{POPAYLOAD}";

#[derive(Debug, Clone)]
pub struct RequestTemplate {
    url: String,
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

/// A [`RequestTemplate`] with the payload filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestTemplate {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a header given as `Name: value`.
    pub fn with_raw_header(self, header: &str) -> Result<Self, Error> {
        match header.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok(self.with_header(name.trim(), value.trim_start()))
            }
            _ => Err(Error::InvalidHeader(header.to_string())),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn has_content_type(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
    }

    pub fn has_marker(&self) -> bool {
        self.url.contains(PAYLOAD_MARKER)
            || self.headers.iter().any(|(_, v)| v.contains(PAYLOAD_MARKER))
            || self
                .body
                .as_ref()
                .is_some_and(|b| b.contains(PAYLOAD_MARKER))
    }

    pub fn render(&self, payload: &str) -> RenderedRequest {
        let url = if self.has_marker() {
            self.url.replace(PAYLOAD_MARKER, payload)
        } else {
            format!("{}{}", self.url, payload)
        };
        RenderedRequest {
            url,
            method: self.method.clone(),
            headers: self
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.replace(PAYLOAD_MARKER, payload)))
                .collect(),
            body: self
                .body
                .as_ref()
                .map(|body| body.replace(PAYLOAD_MARKER, payload)),
        }
    }
}

/// Sends probes to a real HTTP endpoint.
pub struct HttpTransport {
    client: Client,
    template: RequestTemplate,
    encoder: PayloadEncoder,
}

impl HttpTransport {
    pub fn new(
        template: RequestTemplate,
        encoder: PayloadEncoder,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, template, encoder))
    }

    pub fn with_client(client: Client, template: RequestTemplate, encoder: PayloadEncoder) -> Self {
        Self {
            client,
            template,
            encoder,
        }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, payload: &[u8]) -> Result<OracleResult, TransportError> {
        let request = self.template.render(&self.encoder.encode(payload));
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let start = Instant::now();
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text().await?;

        Ok(OracleResult {
            url: request.url,
            status,
            headers,
            body,
            elapsed: start.elapsed(),
        })
    }
}
