//! HTTP transport towards the bot-management console.
//!
//! The console is driven through a cookie-carrying HTTP session. The
//! [`ConsoleTransport`] trait is the seam between the token manager and the
//! network: production code uses [`HttpTransport`] (reqwest with a cookie jar),
//! tests plug in mocks.

use crate::config::CONSOLE_REFERER;
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

const CONSOLE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36";
const CONSOLE_ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";
/// Language cookie the console expects before any session cookie exists
const LANGUAGE_COOKIE: &str = "stel_ln=ru";

/// Errors raised below the console protocol
#[derive(Debug, Error)]
pub enum TransportError {
    /// Error from the HTTP client
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Console address could not be parsed
    #[error("Invalid console URL: {0}")]
    InvalidUrl(String),
    /// Request issued after the session was released
    #[error("Transport already closed")]
    Closed,
}

/// Header set sent with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestProfile {
    /// Plain console page or API request
    Standard,
    /// XHR-style request the console answers with JSON fragments
    WebApp,
}

/// Status and body of a console response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code
    pub status: u16,
    /// Raw response body
    pub body: String,
}

impl HttpReply {
    /// Creates a reply, mostly useful for fakes
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// The console signals success only with 200
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Parses the body as JSON
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the body is not valid JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// A file posted as multipart form data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    /// Form field carrying the file
    pub field: String,
    /// File name reported to the console
    pub file_name: String,
    /// MIME type of the file
    pub content_type: String,
    /// File contents
    pub bytes: Vec<u8>,
    /// Additional text fields
    pub fields: Vec<(String, String)>,
}

/// One cookie-carrying HTTP session against the console
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsoleTransport: Send + Sync {
    /// Issues a GET request
    async fn get(&self, url: &str, profile: RequestProfile) -> Result<HttpReply, TransportError>;
    /// Issues a url-encoded form POST
    async fn post_form(
        &self,
        url: &str,
        form: Vec<(String, String)>,
    ) -> Result<HttpReply, TransportError>;
    /// Issues a multipart POST
    async fn post_multipart(
        &self,
        url: &str,
        upload: MediaUpload,
    ) -> Result<HttpReply, TransportError>;
    /// Releases the session, later requests fail with `TransportError::Closed`
    async fn close(&self);
}

/// Opens fresh transports, one per bootstrap attempt
pub trait TransportFactory: Send + Sync {
    /// Opens a transport for the console at `base_url`
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the HTTP client cannot be built.
    fn open(&self, base_url: &str) -> Result<Arc<dyn ConsoleTransport>, TransportError>;
}

/// reqwest-backed transport with its own cookie jar
pub struct HttpTransport {
    client: Mutex<Option<Client>>,
}

impl HttpTransport {
    /// Builds a client with console headers and a pre-seeded cookie jar
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if `base_url` is invalid or the client fails to build.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let url = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let jar = Arc::new(Jar::default());
        jar.add_cookie_str(LANGUAGE_COOKIE, &url);

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CONSOLE_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static(CONSOLE_ACCEPT));
        headers.insert(REFERER, HeaderValue::from_static(CONSOLE_REFERER));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .cookie_provider(jar)
            .build()?;

        Ok(Self {
            client: Mutex::new(Some(client)),
        })
    }

    fn client(&self) -> Result<Client, TransportError> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::Closed)
    }

    async fn reply(response: reqwest::Response) -> Result<HttpReply, TransportError> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }
}

#[async_trait]
impl ConsoleTransport for HttpTransport {
    async fn get(&self, url: &str, profile: RequestProfile) -> Result<HttpReply, TransportError> {
        let mut request = self.client()?.get(url);
        if profile == RequestProfile::WebApp {
            request = request
                .header("x-aj-referer", CONSOLE_REFERER)
                .header("x-requested-with", "XMLHttpRequest");
        }
        Self::reply(request.send().await?).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: Vec<(String, String)>,
    ) -> Result<HttpReply, TransportError> {
        let response = self.client()?.post(url).form(&form).send().await?;
        Self::reply(response).await
    }

    async fn post_multipart(
        &self,
        url: &str,
        upload: MediaUpload,
    ) -> Result<HttpReply, TransportError> {
        let part = Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.content_type)?;
        let form = upload
            .fields
            .into_iter()
            .fold(Form::new().part(upload.field, part), |form, (k, v)| {
                form.text(k, v)
            });

        let response = self.client()?.post(url).multipart(form).send().await?;
        Self::reply(response).await
    }

    async fn close(&self) {
        // Dropping the last client handle tears down its connection pool
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Factory producing [`HttpTransport`]s with a shared timeout
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    timeout: Duration,
}

impl HttpTransportFactory {
    /// Creates a factory whose transports time out after `timeout`
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn open(&self, base_url: &str) -> Result<Arc<dyn ConsoleTransport>, TransportError> {
        Ok(Arc::new(HttpTransport::new(base_url, self.timeout)?))
    }
}
