use anyhow::Context;
use companion_bot::bot::TeloxidePoller;
use companion_bot::config::Settings;
use companion_bot::console::HttpTransportFactory;
use companion_bot::flood::FloodWaitProtector;
use companion_bot::manager::{ManagerDeps, TokenManager};
use companion_bot::platform::StaticWebView;
use companion_bot::storage::JsonFileStore;
use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::types::Update;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token_url: Regex,
    token: Regex,
    webapp_data: Regex,
    auth_field: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token: Regex::new(r"([0-9]{8,10}:)[A-Za-z0-9_-]{35}")?,
            webapp_data: Regex::new(r"tgWebAppData=[^&\s]+")?,
            auth_field: Regex::new(r#"("?_auth"?\s*[:=]\s*"?)[^"&\s]+"#)?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = self
            .token_url
            .replace_all(input, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .webapp_data
            .replace_all(&output, "tgWebAppData=[MASKED]")
            .to_string();
        output = self
            .auth_field
            .replace_all(&output, "$1[MASKED]")
            .to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length, the redacted text may differ in size
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Before logging, so nothing is written unredacted
    let patterns = Arc::new(RedactionPatterns::new().context("compiling redaction patterns")?);
    init_logging(patterns);

    info!("Starting companion bot token manager...");

    let settings = Settings::new().context("loading configuration")?;
    info!("Configuration loaded successfully.");

    let store = JsonFileStore::open(&settings.store_path)
        .with_context(|| format!("opening store {}", settings.store_path.display()))?;
    info!("Settings store opened at {}", store.path().display());

    let webview_url = settings
        .webview_url
        .clone()
        .context("`webview_url` is required without a connected user session")?;

    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    tokio::spawn(log_updates(updates_rx));

    let manager = TokenManager::new(ManagerDeps {
        platform: Arc::new(StaticWebView::new(webview_url)),
        transports: Arc::new(HttpTransportFactory::new(settings.http_timeout())),
        store: Arc::new(store),
        flood: Arc::new(FloodWaitProtector::new(settings.flood_wait_interval())),
        server: Arc::new(
            TeloxidePoller::new(settings.poll_timeout_secs).with_update_sink(updates_tx),
        ),
        settings,
    });

    match manager.init().await {
        Ok(true) => info!("Inline features are ready"),
        Ok(false) => warn!("Inline features are disabled, see the log above"),
        Err(e) => error!("Token manager failed to start: {e}"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("Shutting down...");
    manager.stop().await;
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

async fn log_updates(mut updates: mpsc::UnboundedReceiver<Update>) {
    while let Some(update) = updates.recv().await {
        debug!("Update {} received", update.id.0);
    }
}
