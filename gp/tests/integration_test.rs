//! Integration tests for gitpoller
//!
//! These tests drive the coordinator end to end with scripted remotes and a
//! mock webhook endpoint.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gitpoller::config::{Config, ConfigProvider, ConfigSource, ConfigWatcher, GitConfig, RepoConfig, StaticConfig, WebhookConfig};
use gitpoller::coordinator::{ReloadCoordinator, ReloadError, SourceFactory};
use gitpoller::domain::GitRef;
use gitpoller::events::{EventBus, EventKind};
use gitpoller::git::{GitError, InMemoryRefSource, RemoteRefSource};
use gitpoller::scheduler::SchedulerState;
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

const APP_URL: &str = "https://example.com/app.git";
const LIB_URL: &str = "https://example.com/lib.git";

fn repo(name: &str, url: &str, excluded: &[&str]) -> RepoConfig {
    RepoConfig {
        name: name.to_string(),
        url: url.to_string(),
        excluded_refs: excluded.iter().map(|s| s.to_string()).collect(),
        webhook: None,
    }
}

fn factory<S: RemoteRefSource + 'static>(source: Arc<S>) -> SourceFactory {
    Arc::new(move |_: &GitConfig| source.clone() as Arc<dyn RemoteRefSource>)
}

fn coordinator<S: RemoteRefSource + 'static>(provider: Arc<dyn ConfigProvider>, source: Arc<S>) -> ReloadCoordinator {
    ReloadCoordinator::new(Arc::new(EventBus::new()), provider, factory(source))
}

fn counting_handler(bus: &EventBus) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    bus.register(EventKind::RepositoryChange, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    count
}

async fn wait_for_hits(mock: &httpmock::Mock<'_>, expected: usize) -> usize {
    let mut hits = 0;
    for _ in 0..200 {
        hits = mock.hits_async().await;
        if hits >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    hits
}

// =============================================================================
// Detection Scenarios
// =============================================================================

#[tokio::test]
async fn test_new_refs_are_reported_and_accumulated() {
    let source = Arc::new(InMemoryRefSource::new());
    source.set_refs(APP_URL, [("main", "h1")]);
    let config = Config {
        repos: vec![repo("app", APP_URL, &[])],
        ..Default::default()
    };
    let coordinator = coordinator(Arc::new(StaticConfig::new(config)), source.clone());
    coordinator.start().await.expect("Failed to start");

    source.set_refs(APP_URL, [("main", "h2"), ("develop", "h3")]);
    let changes = coordinator.check_for_changes(false).await;

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].changes, vec![GitRef::new("main", "h2"), GitRef::new("develop", "h3")]);
    assert_eq!(
        coordinator.repository_refs("app").await,
        vec![GitRef::new("main", "h1"), GitRef::new("main", "h2"), GitRef::new("develop", "h3")]
    );

    // Nothing new the second time round
    assert!(coordinator.check_for_changes(false).await.is_empty());
    assert_eq!(coordinator.repository_refs("app").await.len(), 3);
}

#[tokio::test]
async fn test_excluded_prefixes_are_never_reported() {
    let source = Arc::new(InMemoryRefSource::new());
    source.set_refs(APP_URL, [("main", "h1")]);
    let config = Config {
        repos: vec![repo("app", APP_URL, &["refs/pull/"])],
        ..Default::default()
    };
    let coordinator = coordinator(Arc::new(StaticConfig::new(config)), source.clone());
    coordinator.start().await.expect("Failed to start");

    source.set_refs(APP_URL, [("refs/pull/1", "hX"), ("main", "hY")]);
    let changes = coordinator.check_for_changes(false).await;

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].changes, vec![GitRef::new("main", "hY")]);
}

#[tokio::test]
async fn test_unreachable_remote_is_contained() {
    let source = Arc::new(InMemoryRefSource::new());
    source.set_refs(APP_URL, [("main", "h1")]);
    source.set_refs(LIB_URL, [("main", "l1")]);
    let config = Config {
        repos: vec![repo("app", APP_URL, &[]), repo("lib", LIB_URL, &[])],
        ..Default::default()
    };
    let coordinator = coordinator(Arc::new(StaticConfig::new(config)), source.clone());
    coordinator.start().await.expect("Failed to start");

    source.set_unavailable(APP_URL);
    source.set_refs(LIB_URL, [("main", "l2")]);
    let changes = coordinator.check_for_changes(false).await;

    // The failing repository never blocks the healthy one
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].name, "lib");
    assert_eq!(coordinator.repository_refs("app").await, vec![GitRef::new("main", "h1")]);
}

#[tokio::test]
async fn test_repository_seeded_while_unreachable_starts_empty() {
    let source = Arc::new(InMemoryRefSource::new());
    source.set_unavailable(APP_URL);
    let config = Config {
        repos: vec![repo("app", APP_URL, &[])],
        ..Default::default()
    };
    let coordinator = coordinator(Arc::new(StaticConfig::new(config)), source.clone());
    coordinator.start().await.expect("Failed to start");

    assert!(coordinator.repository_refs("app").await.is_empty());

    source.set_refs(APP_URL, [("main", "h1")]);
    let changes = coordinator.check_for_changes(false).await;
    assert_eq!(changes[0].changes, vec![GitRef::new("main", "h1")]);
}

// =============================================================================
// Webhook Delivery
// =============================================================================

#[tokio::test]
async fn test_scheduled_tick_posts_one_webhook_per_ref() {
    let server = MockServer::start_async().await;
    let main_hook = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .header("authorization", "Bearer file-token")
                .json_body(json!({"name": "app", "url": APP_URL, "change": {"name": "main", "hash": "h2"}}));
            then.status(200);
        })
        .await;
    let develop_hook = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .header("authorization", "Bearer file-token")
                .json_body(json!({"name": "app", "url": APP_URL, "change": {"name": "develop", "hash": "h3"}}));
            then.status(200);
        })
        .await;

    let dir = TempDir::new().expect("Failed to create temp dir");
    let token_path = dir.path().join("token");
    fs::write(&token_path, "file-token\n").expect("Failed to write token");

    let source = Arc::new(InMemoryRefSource::new());
    source.set_refs(APP_URL, [("main", "h1")]);
    let config = Config {
        poll_interval: Some(20),
        webhook: WebhookConfig {
            url: Some(server.url("/hook")),
            token: Some("inline-token".to_string()),
            token_path: Some(token_path),
        },
        repos: vec![repo("app", APP_URL, &[])],
        ..Default::default()
    };
    let coordinator = coordinator(Arc::new(StaticConfig::new(config)), source.clone());
    coordinator.start().await.expect("Failed to start");
    assert_eq!(coordinator.scheduler_state().await, SchedulerState::Running);

    source.set_refs(APP_URL, [("main", "h2"), ("develop", "h3")]);

    assert_eq!(wait_for_hits(&main_hook, 1).await, 1);
    assert_eq!(wait_for_hits(&develop_hook, 1).await, 1);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_repository_webhook_override() {
    let server = MockServer::start_async().await;
    let default_hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/default");
            then.status(200);
        })
        .await;
    let lib_hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/lib").header("authorization", "Bearer lib-token");
            then.status(200);
        })
        .await;

    let source = Arc::new(InMemoryRefSource::new());
    source.set_refs(APP_URL, [("main", "a1")]);
    source.set_refs(LIB_URL, [("main", "l1")]);
    let mut lib = repo("lib", LIB_URL, &[]);
    lib.webhook = Some(WebhookConfig {
        url: Some(server.url("/lib")),
        token: Some("lib-token".to_string()),
        token_path: None,
    });
    let config = Config {
        webhook: WebhookConfig {
            url: Some(server.url("/default")),
            ..Default::default()
        },
        repos: vec![repo("app", APP_URL, &[]), lib],
        ..Default::default()
    };
    let coordinator = coordinator(Arc::new(StaticConfig::new(config)), source.clone());
    coordinator.start().await.expect("Failed to start");

    source.set_refs(APP_URL, [("main", "a2")]);
    source.set_refs(LIB_URL, [("main", "l2")]);
    let changes = coordinator.check_for_changes(true).await;
    assert_eq!(changes.len(), 2);

    assert_eq!(wait_for_hits(&default_hook, 1).await, 1);
    assert_eq!(wait_for_hits(&lib_hook, 1).await, 1);
}

#[tokio::test]
async fn test_failed_reload_keeps_delivering_to_previous_target() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/hook").header("authorization", "Bearer old-token");
            then.status(200);
        })
        .await;

    let source = Arc::new(InMemoryRefSource::new());
    source.set_refs(APP_URL, [("main", "h1")]);
    let good = Config {
        webhook: WebhookConfig {
            url: Some(server.url("/hook")),
            token: Some("old-token".to_string()),
            token_path: None,
        },
        repos: vec![repo("app", APP_URL, &[])],
        ..Default::default()
    };
    let provider = Arc::new(StaticConfig::new(good.clone()));
    let coordinator = coordinator(provider.clone(), source.clone());
    coordinator.start().await.expect("Failed to start");

    let mut broken = good;
    broken.webhook.token_path = Some("/nonexistent/token".into());
    provider.set(broken);
    let err = coordinator.reload().await.expect_err("Reload should fail");
    assert!(matches!(err, ReloadError::Webhook(_)));

    source.set_refs(APP_URL, [("main", "h2")]);
    coordinator.check_for_changes(true).await;

    assert_eq!(wait_for_hits(&hook, 1).await, 1);
}

// =============================================================================
// Reload Sequencing
// =============================================================================

/// Ref source that records when listings begin and end
struct RecordingSource {
    inner: InMemoryRefSource,
    log: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl RemoteRefSource for RecordingSource {
    async fn list_refs(&self, url: &str) -> Result<Vec<GitRef>, GitError> {
        self.log.lock().unwrap().push("start");
        let result = self.inner.list_refs(url).await;
        self.log.lock().unwrap().push("end");
        result
    }
}

#[tokio::test]
async fn test_reload_waits_for_in_flight_tick() {
    let source = Arc::new(RecordingSource {
        inner: InMemoryRefSource::new(),
        log: Mutex::new(Vec::new()),
    });
    source.inner.set_refs(APP_URL, [("main", "h1")]);
    let config = Config {
        poll_interval: Some(10),
        repos: vec![repo("app", APP_URL, &[])],
        ..Default::default()
    };
    let provider = Arc::new(StaticConfig::new(config.clone()));
    let coordinator = coordinator(provider.clone(), source.clone());
    coordinator.start().await.expect("Failed to start");

    // The next generation does not poll, so only on-demand checks detect
    provider.set(Config {
        poll_interval: None,
        ..config
    });
    let stale = counting_handler(coordinator.bus());
    source.inner.set_refs(APP_URL, [("main", "h2")]);
    source.inner.set_latency(Duration::from_millis(100));

    // Wait for a tick to be mid-listing
    for _ in 0..200 {
        if source.log.lock().unwrap().last() == Some(&"start") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    coordinator.reload().await.expect("Reload failed");
    let stale_at_reload = stale.load(Ordering::SeqCst);

    // Listings never overlapped: the tick finished before the new seed began
    let log = source.log.lock().unwrap().clone();
    for pair in log.chunks(2) {
        assert_eq!(pair, ["start", "end"].as_slice(), "overlapping listings: {log:?}");
    }

    // Handlers from before the reload see nothing dispatched after it
    source.inner.set_latency(Duration::ZERO);
    source.inner.set_refs(APP_URL, [("main", "h3")]);
    let fresh = counting_handler(coordinator.bus());
    let changes = coordinator.check_for_changes(true).await;

    assert_eq!(changes.len(), 1);
    assert_eq!(fresh.load(Ordering::SeqCst), 1);
    assert_eq!(stale.load(Ordering::SeqCst), stale_at_reload);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_reload_reseeds_from_full_listing() {
    let source = Arc::new(InMemoryRefSource::new());
    source.set_refs(APP_URL, [("main", "h1")]);
    let config = Config {
        repos: vec![repo("app", APP_URL, &[])],
        ..Default::default()
    };
    let coordinator = coordinator(Arc::new(StaticConfig::new(config)), source.clone());
    coordinator.start().await.expect("Failed to start");

    source.set_refs(APP_URL, [("main", "h2")]);
    coordinator.check_for_changes(false).await;
    assert_eq!(coordinator.repository_refs("app").await.len(), 2);

    // History is discarded; the new generation starts from the current listing
    coordinator.reload().await.expect("Reload failed");
    assert_eq!(coordinator.repository_refs("app").await, vec![GitRef::new("main", "h2")]);
}

// =============================================================================
// File-backed Configuration
// =============================================================================

#[tokio::test]
async fn test_layered_files_and_watcher_driven_reload() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let base = dir.path().join("default.yml");
    let local = dir.path().join("local.yml");
    fs::write(
        &base,
        "pollInterval: 0\nrepos:\n  - name: app\n    url: https://example.com/app.git\n",
    )
    .expect("Failed to write base config");
    fs::write(&local, "webhook:\n  url: http://localhost:9/hook\n").expect("Failed to write local config");

    let source = Arc::new(InMemoryRefSource::new());
    source.set_refs(APP_URL, [("main", "h1")]);
    source.set_refs(LIB_URL, [("main", "l1")]);
    let provider = Arc::new(ConfigSource::new(vec![base.clone(), local.clone()]));
    let coordinator = coordinator(provider.clone(), source);

    let config = coordinator.start().await.expect("Failed to start");
    assert_eq!(config.webhook.url.as_deref(), Some("http://localhost:9/hook"));
    assert_eq!(
        provider.get("webhook.url").and_then(|v| v.as_str().map(str::to_string)),
        Some("http://localhost:9/hook".to_string())
    );
    assert_eq!(coordinator.repositories().await.len(), 1);

    let (tx, mut rx) = mpsc::channel(4);
    let watcher = ConfigWatcher::new(vec![base.clone(), local.clone()], tx)
        .await
        .expect("Failed to watch config files");
    let watcher_handle = tokio::spawn(watcher.run());

    fs::write(
        &local,
        "repos:\n  - name: app\n    url: https://example.com/app.git\n  - name: lib\n    url: https://example.com/lib.git\n",
    )
    .expect("Failed to rewrite local config");
    let changed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Watcher did not report the edit");
    assert_eq!(changed, Some(vec![local]));
    watcher_handle.abort();

    coordinator.reload().await.expect("Reload failed");
    let names: Vec<String> = coordinator.repositories().await.into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["app".to_string(), "lib".to_string()]);
    assert_eq!(coordinator.generation().await, 2);
}

#[tokio::test]
async fn test_invalid_file_fails_reload_without_losing_state() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("default.yml");
    fs::write(&path, "repos:\n  - name: app\n    url: https://example.com/app.git\n").expect("Failed to write config");

    let source = Arc::new(InMemoryRefSource::new());
    source.set_refs(APP_URL, [("main", "h1")]);
    let coordinator = coordinator(Arc::new(ConfigSource::new(vec![path.clone()])), source);
    coordinator.start().await.expect("Failed to start");

    fs::write(
        &path,
        "repos:\n  - name: app\n    url: a\n  - name: app\n    url: b\n",
    )
    .expect("Failed to rewrite config");
    let err = coordinator.reload().await.expect_err("Duplicate names should fail");

    assert!(matches!(err, ReloadError::Config(_)));
    assert_eq!(coordinator.repository_refs("app").await, vec![GitRef::new("main", "h1")]);
}
