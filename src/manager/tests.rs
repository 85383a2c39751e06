use super::*;
use crate::bot::{BotIdentity, MockInlineServer};
use crate::config::{STORE_NAMESPACE, TOKEN_KEY};
use crate::console::markup::fixtures::*;
use crate::console::transport::{HttpReply, MockConsoleTransport, RequestProfile, TransportError};
use crate::platform::MockChatPlatform;
use crate::storage::MemoryStore;
use crate::test_support::*;
use serde_json::Value;
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::Notify;

const NEW_TOKEN: &str = "7012345678:BBHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw2";
const GENERATED: &str = "lorem_a1b2c3_bot";

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct Scenario {
    manager: Arc<TokenManager>,
    store: Arc<MemoryStore>,
    guard: Arc<CountingGuard>,
    factory: Arc<SharedFactory>,
}

fn test_settings() -> Settings {
    Settings {
        bootstrap_delay_ms: 0,
        avatar_path: "/nonexistent/heroku.png".into(),
        version: "1.6.3".to_string(),
        ..Settings::default()
    }
}

fn scenario(
    settings: Settings,
    platform: MockChatPlatform,
    transport: MockConsoleTransport,
    server: MockInlineServer,
    store: Arc<MemoryStore>,
) -> Scenario {
    let guard = Arc::new(CountingGuard::default());
    let factory = Arc::new(SharedFactory::new(transport));
    let manager = TokenManager::new(ManagerDeps {
        settings,
        platform: Arc::new(platform),
        transports: factory.clone(),
        store: store.clone(),
        flood: guard.clone(),
        server: Arc::new(server),
    });
    Scenario {
        manager,
        store,
        guard,
        factory,
    }
}

fn web_view() -> MockChatPlatform {
    let mut platform = MockChatPlatform::new();
    platform
        .expect_request_web_view()
        .returning(|_| Ok(WEBVIEW.to_string()));
    platform
}

fn seeded_store(token: &str) -> Result<Arc<MemoryStore>, StoreError> {
    let store = Arc::new(MemoryStore::new());
    store.set(STORE_NAMESPACE, TOKEN_KEY, Value::String(token.to_string()))?;
    Ok(store)
}

/// Console whose landing page and bot list are both `page`
fn console(rows: &[String]) -> MockConsoleTransport {
    let mut mock = MockConsoleTransport::new();
    expect_auth(&mut mock, 200);
    let page = bot_list(rows);
    mock.expect_get()
        .withf(|url, profile| url == BASE && *profile == RequestProfile::Standard)
        .returning(move |_, _| Ok(HttpReply::new(200, page.clone())));
    mock.expect_close().returning(|| ());
    mock
}

fn expect_details(mock: &mut MockConsoleTransport, bot_id: u64, token: &'static str) {
    let url = format!("{BASE}/bot/{bot_id}");
    mock.expect_get()
        .withf(move |u, profile| *u == url && *profile == RequestProfile::WebApp)
        .returning(move |_, _| Ok(HttpReply::new(200, details_blob(token).to_string())));
}

fn expect_settings(mock: &mut MockConsoleTransport, bot_id: &'static str, status: u16, times: usize) {
    mock.expect_post_form()
        .withf(move |url, form| {
            *url == api_url() && has(form, "method", "changeSettings") && has(form, "bid", bot_id)
        })
        .times(times)
        .returning(move |_, _| Ok(HttpReply::new(status, "{}")));
}

type Offered = Arc<Mutex<Option<String>>>;

/// Accepts the first offered username and remembers it without the `@`
fn accept_username(mock: &mut MockConsoleTransport) -> Offered {
    let offered = Offered::default();
    let seen = offered.clone();
    mock.expect_post_form()
        .withf(|url, form| *url == api_url() && has(form, "method", "checkBotUsername"))
        .times(1)
        .returning(move |_, form| {
            let name = form
                .iter()
                .find(|(k, _)| k == "username")
                .map(|(_, v)| v.trim_start_matches('@').to_string());
            *seen.lock().unwrap_or_else(PoisonError::into_inner) = name;
            Ok(HttpReply::new(200, r#"{"ok":true}"#))
        });
    offered
}

/// Landing page and first bot list show `before`; the third fetch adds the
/// bot registered under the offered username as id 4321
fn list_after_creation(mock: &mut MockConsoleTransport, before: Vec<String>, offered: Offered) {
    let mut lists = 0;
    mock.expect_get()
        .withf(|url, _| url == BASE)
        .times(3)
        .returning(move |_, _| {
            lists += 1;
            let mut rows = before.clone();
            if lists == 3 {
                let name = offered
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
                    .unwrap_or_default();
                rows.push(bot_row(4321, "🪐 Heroku 1.6.3", &name));
            }
            Ok(HttpReply::new(200, bot_list(&rows)))
        });
}

fn expect_create(mock: &mut MockConsoleTransport) {
    mock.expect_post_form()
        .withf(|url, form| *url == api_url() && has(form, "method", "createBot"))
        .times(1)
        .returning(|_, _| Ok(HttpReply::new(200, r#"{"ok":true}"#)));
}

fn serving_server() -> MockInlineServer {
    let mut server = MockInlineServer::new();
    server.expect_start().returning(|_, _| {
        Ok(BotIdentity {
            id: 4321,
            username: GENERATED.to_string(),
        })
    });
    server.expect_stop().returning(|| ());
    server
}

#[tokio::test]
async fn test_cached_token_asserts_without_io() -> TestResult {
    let mut platform = MockChatPlatform::new();
    platform.expect_request_web_view().never();
    let s = scenario(
        test_settings(),
        platform,
        MockConsoleTransport::new(),
        MockInlineServer::new(),
        seeded_store(TOKEN)?,
    );

    assert!(s.manager.assert_token(true, false).await?);
    assert!(s.manager.assert_token(true, true).await?);
    assert_eq!(s.factory.opened(), 0);
    assert_eq!(s.guard.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_custom_bot_is_discovered() -> TestResult {
    let store = Arc::new(MemoryStore::new());
    storage::set_custom_bot(store.as_ref(), Some("@myassistant"))?;

    let mut transport = console(&[
        bot_row(77, "Shop", "someone_bot"),
        bot_row(1234, "My Assistant", "myassistant"),
    ]);
    expect_details(&mut transport, 1234, TOKEN);
    expect_settings(&mut transport, "1234", 200, 3);

    let s = scenario(test_settings(), web_view(), transport, MockInlineServer::new(), store);

    assert!(s.manager.assert_token(true, false).await?);
    assert_eq!(s.manager.token().map(|t| t.as_str().to_string()), Some(TOKEN.to_string()));
    assert_eq!(
        storage::stored_token(s.store.as_ref()).map(|t| t.as_str().to_string()),
        Some(TOKEN.to_string())
    );
    assert_eq!(s.guard.count(), 3);
    Ok(())
}

#[tokio::test]
async fn test_no_bot_and_no_creation() -> TestResult {
    let mut transport = console(&[bot_row(10, "Shop", "shopbot")]);
    transport.expect_post_multipart().never();

    let s = scenario(
        test_settings(),
        web_view(),
        transport,
        MockInlineServer::new(),
        Arc::new(MemoryStore::new()),
    );

    assert!(!s.manager.assert_token(false, false).await?);
    assert!(s.manager.token().is_none());
    assert_eq!(s.guard.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_creation_gives_up_after_refused_usernames() -> TestResult {
    let mut transport = console(&[]);
    transport
        .expect_post_form()
        .withf(|url, form| *url == api_url() && has(form, "method", "checkBotUsername"))
        .times(5)
        .returning(|_, _| Ok(HttpReply::new(200, r#"{"ok":false}"#)));
    transport.expect_post_multipart().never();

    let s = scenario(
        test_settings(),
        web_view(),
        transport,
        MockInlineServer::new(),
        Arc::new(MemoryStore::new()),
    );

    assert!(!s.manager.assert_token(true, false).await?);
    assert_eq!(s.guard.count(), 5);
    Ok(())
}

#[tokio::test]
async fn test_avatar_failure_still_creates_bot() -> TestResult {
    let mut avatar = tempfile::NamedTempFile::new()?;
    avatar.write_all(b"\x89PNG")?;
    let settings = Settings {
        avatar_path: avatar.path().to_path_buf(),
        ..test_settings()
    };

    let mut transport = MockConsoleTransport::new();
    expect_auth(&mut transport, 200);
    let offered = accept_username(&mut transport);
    list_after_creation(&mut transport, Vec::new(), offered);
    transport.expect_close().returning(|| ());
    transport
        .expect_post_multipart()
        .withf(|_, upload| upload.file_name == "heroku.png" && upload.bytes == b"\x89PNG")
        .times(1)
        .returning(|_, _| Ok(HttpReply::new(500, "")));
    transport
        .expect_post_form()
        .withf(|url, form| {
            *url == api_url()
                && has(form, "method", "createBot")
                && has(form, "title", "🪐 Heroku 1.6.3")
                && has(form, "userpic", "")
                && has(form, "about", "")
        })
        .times(1)
        .returning(|_, _| Ok(HttpReply::new(200, r#"{"ok":true}"#)));
    expect_details(&mut transport, 4321, TOKEN);
    expect_settings(&mut transport, "4321", 200, 3);

    let s = scenario(
        settings,
        web_view(),
        transport,
        MockInlineServer::new(),
        Arc::new(MemoryStore::new()),
    );

    assert!(s.manager.assert_token(true, false).await?);
    assert_eq!(s.manager.token().map(|t| t.as_str().to_string()), Some(TOKEN.to_string()));
    // username check, upload, createBot and three settings
    assert_eq!(s.guard.count(), 6);
    Ok(())
}

#[tokio::test]
async fn test_taken_custom_username_is_replaced() -> TestResult {
    let store = Arc::new(MemoryStore::new());
    storage::set_custom_bot(store.as_ref(), Some("myassistant"))?;

    let mut platform = web_view();
    platform
        .expect_username_taken()
        .withf(|username| username == "@myassistant")
        .times(1)
        .returning(|_| Ok(true));

    let mut transport = console(&[]);
    transport
        .expect_post_form()
        .withf(|url, form| {
            *url == api_url()
                && has(form, "method", "checkBotUsername")
                && !has(form, "username", "@myassistant")
        })
        .times(1)
        .returning(|_, _| Ok(HttpReply::new(500, "")));

    let s = scenario(test_settings(), platform, transport, MockInlineServer::new(), store);

    assert!(!s.manager.create_bot().await?);
    Ok(())
}

#[tokio::test]
async fn test_created_bot_found_under_replacement_username() -> TestResult {
    let store = Arc::new(MemoryStore::new());
    storage::set_custom_bot(store.as_ref(), Some("myassistant"))?;

    let mut platform = web_view();
    platform
        .expect_username_taken()
        .withf(|username| username == "@myassistant")
        .times(1)
        .returning(|_| Ok(true));

    let mut transport = MockConsoleTransport::new();
    expect_auth(&mut transport, 200);
    let offered = accept_username(&mut transport);
    // an older generated bot stays listed and must not be picked up
    list_after_creation(
        &mut transport,
        vec![bot_row(99, "🪐 Heroku", "lorem_zzzzzz_bot")],
        offered.clone(),
    );
    transport.expect_close().returning(|| ());
    transport.expect_post_multipart().never();
    expect_create(&mut transport);
    expect_details(&mut transport, 4321, NEW_TOKEN);
    expect_settings(&mut transport, "4321", 200, 3);

    let s = scenario(test_settings(), platform, transport, MockInlineServer::new(), store);

    assert!(s.manager.assert_token(true, false).await?);
    assert_eq!(s.manager.token().map(|t| t.as_str().to_string()), Some(NEW_TOKEN.to_string()));
    let offered = offered.lock().unwrap_or_else(PoisonError::into_inner).clone();
    assert!(offered.is_some_and(|name| name != "myassistant" && name.ends_with("_bot")));
    Ok(())
}

#[tokio::test]
async fn test_settings_failure_keeps_token() -> TestResult {
    let mut transport = console(&[bot_row(4321, "🪐 Heroku", GENERATED)]);
    expect_details(&mut transport, 4321, TOKEN);
    expect_settings(&mut transport, "4321", 500, 1);

    let s = scenario(
        test_settings(),
        web_view(),
        transport,
        MockInlineServer::new(),
        Arc::new(MemoryStore::new()),
    );

    assert!(!s.manager.assert_token(true, false).await?);
    assert!(s.manager.token().is_some());
    assert!(storage::stored_token(s.store.as_ref()).is_some());
    Ok(())
}

#[tokio::test]
async fn test_revoke_clears_cache_and_store() -> TestResult {
    let mut transport = MockConsoleTransport::new();
    expect_auth(&mut transport, 200);
    let mut calls = 0;
    transport
        .expect_get()
        .withf(|url, _| url == BASE)
        .times(4)
        .returning(move |_, _| {
            calls += 1;
            Ok(match calls {
                2 => HttpReply::new(500, ""),
                4 => HttpReply::new(200, bot_list(&[])),
                _ => HttpReply::new(200, landing_page(HASH)),
            })
        });
    transport.expect_close().returning(|| ());

    let s = scenario(
        test_settings(),
        web_view(),
        transport,
        MockInlineServer::new(),
        seeded_store(TOKEN)?,
    );

    assert!(!s.manager.dp_revoke_token(false).await?);
    assert!(s.manager.token().is_none());
    assert_eq!(s.store.get(STORE_NAMESPACE, TOKEN_KEY), Some(Value::Null));
    assert!(!s.manager.init_complete());

    // the revoked token is gone from the cache, so assert goes to the console
    assert!(!s.manager.assert_token(false, false).await?);
    assert_eq!(s.factory.opened(), 2);
    Ok(())
}

#[tokio::test]
async fn test_revoke_reasserts_inline_when_not_serving() -> TestResult {
    let mut transport = console(&[bot_row(4321, "🪐 Heroku", GENERATED)]);
    transport
        .expect_post_form()
        .withf(|url, form| {
            *url == api_url() && has(form, "method", "revokeAccessToken") && has(form, "bid", "4321")
        })
        .times(1)
        .returning(|_, _| Ok(HttpReply::new(200, format!(r#"{{"token":"{NEW_TOKEN}"}}"#))));
    expect_settings(&mut transport, "4321", 200, 3);

    let s = scenario(
        test_settings(),
        web_view(),
        transport,
        serving_server(),
        seeded_store(TOKEN)?,
    );

    assert!(s.manager.dp_revoke_token(false).await?);
    assert_eq!(s.manager.token().map(|t| t.as_str().to_string()), Some(NEW_TOKEN.to_string()));
    assert!(s.manager.init_complete());
    Ok(())
}

#[tokio::test]
async fn test_polling_conflict_schedules_reassertion() -> TestResult {
    let mut transport = console(&[bot_row(4321, "🪐 Heroku", GENERATED)]);
    transport
        .expect_post_form()
        .withf(|url, form| *url == api_url() && has(form, "method", "revokeAccessToken"))
        .times(1)
        .returning(|_, _| Ok(HttpReply::new(200, format!(r#"{{"token":"{NEW_TOKEN}"}}"#))));
    expect_settings(&mut transport, "4321", 200, 3);

    let store = seeded_store(TOKEN)?;
    let stopped_with_old_token = Arc::new(AtomicBool::new(false));
    let started = Arc::new(Notify::new());
    let mut server = MockInlineServer::new();
    let (observed, seen) = (stopped_with_old_token.clone(), store.clone());
    server.expect_stop().times(1).returning(move || {
        let old = storage::stored_token(seen.as_ref()).is_some_and(|t| t.as_str() == TOKEN);
        observed.store(old, Ordering::SeqCst);
    });
    let notify = started.clone();
    server.expect_start().times(1).returning(move |token, _| {
        assert_eq!(token.as_str(), NEW_TOKEN);
        notify.notify_one();
        Ok(BotIdentity {
            id: 4321,
            username: GENERATED.to_string(),
        })
    });

    let s = scenario(test_settings(), web_view(), transport, server, store);

    assert!(s.manager.dp_revoke_token(true).await?);
    assert!(stopped_with_old_token.load(Ordering::SeqCst));
    started.notified().await;

    assert_eq!(s.manager.token().map(|t| t.as_str().to_string()), Some(NEW_TOKEN.to_string()));
    assert_eq!(
        storage::stored_token(s.store.as_ref()).map(|t| t.as_str().to_string()),
        Some(NEW_TOKEN.to_string())
    );
    assert!(s.manager.init_complete());
    Ok(())
}

/// Console whose landing page loads `landings` times, then the connection drops
fn dropping_console(landings: usize, closed: Option<Arc<Notify>>) -> MockConsoleTransport {
    let mut mock = MockConsoleTransport::new();
    expect_auth(&mut mock, 200);
    let mut calls = 0;
    mock.expect_get()
        .withf(|url, _| url == BASE)
        .returning(move |_, _| {
            calls += 1;
            if calls <= landings {
                Ok(HttpReply::new(200, landing_page(HASH)))
            } else {
                Err(TransportError::Closed)
            }
        });
    let mut closes = 0;
    mock.expect_close().returning(move || {
        closes += 1;
        if let (Some(notify), 2) = (&closed, closes) {
            notify.notify_one();
        }
    });
    mock
}

#[tokio::test]
async fn test_failed_reassertion_clears_ready_flag() -> TestResult {
    let mut server = MockInlineServer::new();
    server.expect_start().times(1).returning(|_, _| {
        Ok(BotIdentity {
            id: 4321,
            username: GENERATED.to_string(),
        })
    });
    let s = scenario(
        test_settings(),
        web_view(),
        dropping_console(1, None),
        server,
        seeded_store(TOKEN)?,
    );

    assert_eq!(s.manager.register().await, Registration::Serving);
    assert!(s.manager.init_complete());

    let result = s.manager.reassert_token().await;
    assert!(matches!(
        result,
        Err(TokenError::Console(ConsoleError::Transport(TransportError::Closed)))
    ));
    assert!(!s.manager.init_complete());
    Ok(())
}

#[tokio::test]
async fn test_polling_conflict_clears_ready_flag_when_reassertion_fails() -> TestResult {
    let mut server = MockInlineServer::new();
    server.expect_start().times(1).returning(|_, _| {
        Ok(BotIdentity {
            id: 4321,
            username: GENERATED.to_string(),
        })
    });
    server.expect_stop().times(1).returning(|| ());

    let closed = Arc::new(Notify::new());
    let s = scenario(
        test_settings(),
        web_view(),
        dropping_console(2, Some(closed.clone())),
        server,
        seeded_store(TOKEN)?,
    );

    assert_eq!(s.manager.register().await, Registration::Serving);
    assert!(s.manager.dp_revoke_token(true).await?);
    assert!(!s.manager.init_complete());

    // the detached reassertion closes the second session once it fails
    closed.notified().await;
    assert!(s.manager.token().is_none());
    assert!(!s.manager.init_complete());
    Ok(())
}

#[tokio::test]
async fn test_check_bot_finds_listed_bot() -> TestResult {
    let s = scenario(
        test_settings(),
        web_view(),
        console(&[bot_row(1234, "My Assistant", "myassistant")]),
        MockInlineServer::new(),
        Arc::new(MemoryStore::new()),
    );

    assert!(s.manager.check_bot("@myassistant").await?);
    assert_eq!(s.guard.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_check_bot_asks_console() -> TestResult {
    let mut transport = console(&[]);
    transport
        .expect_post_form()
        .withf(|url, form| {
            *url == api_url()
                && has(form, "method", "checkBotUsername")
                && has(form, "username", "@freebie_bot")
        })
        .times(1)
        .returning(|_, _| Ok(HttpReply::new(200, r#"{"ok":true}"#)));

    let s = scenario(
        test_settings(),
        web_view(),
        transport,
        MockInlineServer::new(),
        Arc::new(MemoryStore::new()),
    );

    assert!(s.manager.check_bot("@freebie_bot").await?);
    assert_eq!(s.guard.count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unavailable_console_returns_false() -> TestResult {
    let mut transport = MockConsoleTransport::new();
    expect_auth(&mut transport, 502);
    transport.expect_close().times(5).returning(|| ());

    let s = scenario(
        test_settings(),
        web_view(),
        transport,
        MockInlineServer::new(),
        Arc::new(MemoryStore::new()),
    );

    assert!(!s.manager.assert_token(true, false).await?);
    assert_eq!(s.factory.opened(), 5);
    Ok(())
}

#[tokio::test]
async fn test_transport_failure_propagates() -> TestResult {
    let mut transport = MockConsoleTransport::new();
    expect_auth(&mut transport, 200);
    let mut calls = 0;
    transport
        .expect_get()
        .withf(|url, _| url == BASE)
        .returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Ok(HttpReply::new(200, landing_page(HASH)))
            } else {
                Err(TransportError::Closed)
            }
        });
    transport.expect_close().times(1).returning(|| ());

    let s = scenario(
        test_settings(),
        web_view(),
        transport,
        MockInlineServer::new(),
        Arc::new(MemoryStore::new()),
    );

    let result = s.manager.assert_token(true, false).await;
    assert!(matches!(
        result,
        Err(TokenError::Console(ConsoleError::Transport(TransportError::Closed)))
    ));
    Ok(())
}

#[tokio::test]
async fn test_init_replaces_rejected_token() -> TestResult {
    let mut transport = console(&[bot_row(4321, "🪐 Heroku", GENERATED)]);
    expect_details(&mut transport, 4321, NEW_TOKEN);
    expect_settings(&mut transport, "4321", 200, 3);

    let mut server = MockInlineServer::new();
    let mut starts = 0;
    server.expect_start().times(2).returning(move |token, _| {
        starts += 1;
        if starts == 1 {
            assert_eq!(token.as_str(), TOKEN);
            Err(ServeError::InvalidToken)
        } else {
            Ok(BotIdentity {
                id: 4321,
                username: GENERATED.to_string(),
            })
        }
    });

    let s = scenario(test_settings(), web_view(), transport, server, seeded_store(TOKEN)?);

    assert!(s.manager.init().await?);
    assert!(s.manager.init_complete());
    assert_eq!(s.manager.token().map(|t| t.as_str().to_string()), Some(NEW_TOKEN.to_string()));
    Ok(())
}

#[tokio::test]
async fn test_register_without_token_fails() {
    let mut server = MockInlineServer::new();
    server.expect_start().never();
    let s = scenario(
        test_settings(),
        MockChatPlatform::new(),
        MockConsoleTransport::new(),
        server,
        Arc::new(MemoryStore::new()),
    );

    assert_eq!(s.manager.register().await, Registration::Failed);
    assert!(!s.manager.init_complete());
}
