use crate::bot::{BotIdentity, InlineServer, PollingConflict, ServeError};
use crate::manager::Token;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::{ApiError, RequestError};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a failed `getUpdates` before polling again
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(3);

struct RunningPoller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Long-polls the companion bot's updates with teloxide
///
/// Updates are handed to an optional sink; inline handlers live with the
/// consumer of that sink.
pub struct TeloxidePoller {
    poll_timeout: u32,
    updates: Option<UnboundedSender<Update>>,
    running: Mutex<Option<RunningPoller>>,
}

impl TeloxidePoller {
    /// Creates a poller with the given long-polling timeout in seconds
    #[must_use]
    pub fn new(poll_timeout: u32) -> Self {
        Self {
            poll_timeout,
            updates: None,
            running: Mutex::new(None),
        }
    }

    /// Forwards every received update to `sink`
    #[must_use]
    pub fn with_update_sink(mut self, sink: UnboundedSender<Update>) -> Self {
        self.updates = Some(sink);
        self
    }

    /// Whether a polling task is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }
}

fn serve_error(error: RequestError) -> ServeError {
    match error {
        RequestError::Api(ApiError::InvalidToken) => ServeError::InvalidToken,
        other => ServeError::Api(other.to_string()),
    }
}

async fn poll_updates(
    bot: Bot,
    poll_timeout: u32,
    cancel: CancellationToken,
    conflicts: UnboundedSender<PollingConflict>,
    updates: Option<UnboundedSender<Update>>,
) {
    let mut offset = 0_i32;
    loop {
        let request = bot.get_updates().offset(offset).timeout(poll_timeout);
        let result = tokio::select! {
            () = cancel.cancelled() => break,
            result = request.send() => result,
        };

        match result {
            Ok(batch) => {
                for update in batch {
                    offset = update.id.as_offset();
                    if let Some(sink) = &updates {
                        if sink.send(update).is_err() {
                            debug!("Update sink closed, dropping updates");
                        }
                    }
                }
            }
            Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                warn!("Polling conflict: the token is polled by another process");
                if conflicts.send(PollingConflict).is_err() {
                    debug!("Nobody listens for polling conflicts");
                }
                break;
            }
            Err(e) => {
                warn!("Failed to fetch updates: {e}");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                }
            }
        }
    }
    debug!("Update polling stopped");
}

#[async_trait]
impl InlineServer for TeloxidePoller {
    async fn start(
        &self,
        token: Token,
        conflicts: UnboundedSender<PollingConflict>,
    ) -> Result<BotIdentity, ServeError> {
        self.stop().await;

        let bot = Bot::new(token.as_str());
        let me = bot.get_me().await.map_err(serve_error)?;
        let identity = BotIdentity {
            id: me.user.id.0,
            username: me.username().to_string(),
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_updates(
            bot,
            self.poll_timeout,
            cancel.clone(),
            conflicts,
            self.updates.clone(),
        ));
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(RunningPoller { cancel, task });

        info!("Companion bot @{} is polling for updates", identity.username);
        Ok(identity)
    }

    async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.task.await {
                warn!("Polling task ended abnormally: {e}");
            }
            info!("Companion bot polling stopped");
        }
    }
}
