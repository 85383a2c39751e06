//! Shared fakes for unit tests.

use crate::console::transport::{
    ConsoleTransport, HttpReply, MockConsoleTransport, TransportError, TransportFactory,
};
use crate::flood::FloodGuard;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const BASE: &str = "https://webappinternal.telegram.org/botfather";
pub const HASH: &str = "0123456789abcdef01";
pub const WEBVIEW: &str = "https://webappinternal.telegram.org/botfather?#tgWebAppData=query_id%3DAAE%26hash%3Dabc&tgWebAppVersion=7.0";

/// Flood guard that only counts protected calls
#[derive(Default)]
pub struct CountingGuard(AtomicUsize);

impl CountingGuard {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FloodGuard for CountingGuard {
    async fn protect(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out the same mock transport for every session
pub struct SharedFactory {
    transport: Arc<MockConsoleTransport>,
    opened: AtomicUsize,
}

impl SharedFactory {
    pub fn new(transport: MockConsoleTransport) -> Self {
        Self {
            transport: Arc::new(transport),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl TransportFactory for SharedFactory {
    fn open(&self, base_url: &str) -> Result<Arc<dyn ConsoleTransport>, TransportError> {
        assert_eq!(base_url, BASE);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.transport.clone())
    }
}

pub fn has(form: &[(String, String)], key: &str, value: &str) -> bool {
    form.iter().any(|(k, v)| k == key && v == value)
}

pub fn api_url() -> String {
    format!("{BASE}/api?hash={HASH}")
}

pub fn expect_auth(mock: &mut MockConsoleTransport, status: u16) {
    mock.expect_post_form()
        .withf(|url, form| {
            url == "https://webappinternal.telegram.org/botfather/api?hash=-"
                && has(form, "method", "auth")
                && has(form, "_auth", "query_id=AAE&hash=abc")
        })
        .returning(move |_, _| Ok(HttpReply::new(status, "{}")));
}
