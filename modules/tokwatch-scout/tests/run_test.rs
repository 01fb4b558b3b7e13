//! RunController end-to-end: scripted browser in, snapshot records out.
//!
//! Time is paused so retry backoff and account budgets elapse instantly.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, TimeZone};
use tokio::sync::watch;
use tokwatch_common::Account;
use tokwatch_scout::account::{FailureKind, SessionSettings};
use tokwatch_scout::recovery::RetryPolicy;
use tokwatch_scout::run::{AccountStatus, RunController, RunReport};
use tokwatch_scout::testing::{
    post_id_at, BrowserLog, MockBrowser, MockResponse, PostFixture, ProfileFixture,
    RecordingOverride,
};
use tokwatch_scout::writer::SnapshotWriter;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    controller: RunController,
    log: Arc<Mutex<BrowserLog>>,
    overrides: Arc<Mutex<Vec<String>>>,
    shutdown: watch::Sender<bool>,
}

fn harness(browser: MockBrowser, logs_dir: &Path) -> Harness {
    harness_with(browser, logs_dir, RecordingOverride::default())
}

fn harness_with(browser: MockBrowser, logs_dir: &Path, hook: RecordingOverride) -> Harness {
    let log = browser.log();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let overrides = Arc::clone(&hook.calls);

    let controller = RunController::new(
        Box::new(browser),
        SnapshotWriter::new(logs_dir),
        SessionSettings::default(),
        RetryPolicy::new(3, Duration::from_secs(3)),
        Duration::from_secs(180),
        shutdown_rx,
    )
    .unwrap()
    .with_manual_override(Box::new(hook));

    Harness {
        controller,
        log,
        overrides,
        shutdown,
    }
}

fn accounts(handles: &[&str]) -> Vec<Account> {
    handles.iter().map(|h| Account::parse(h).unwrap()).collect()
}

fn status<'a>(report: &'a RunReport, handle: &str) -> &'a AccountStatus {
    &report
        .accounts
        .iter()
        .find(|r| r.account.handle() == handle)
        .unwrap_or_else(|| panic!("no report for {handle}"))
        .status
}

fn written_text(report: &RunReport, handle: &str) -> String {
    match status(report, handle) {
        AccountStatus::Written { path, .. } => std::fs::read_to_string(path).unwrap(),
        other => panic!("expected {handle} written, got {other:?}"),
    }
}

fn display(secs: i64) -> String {
    Local
        .timestamp_opt(secs, 0)
        .unwrap()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn three_post_profile_produces_ordered_record() {
    let pinned = post_id_at(1_800_000_000, 11);
    let latest = post_id_at(1_700_000_000, 22);
    let page = ProfileFixture::new("creator")
        .nickname("The Creator")
        .post(PostFixture::video("creator", pinned).pinned().views("9.9M"))
        .post(PostFixture::video("creator", latest).views("12.3K"))
        .post(PostFixture::with_href("https://www.tiktok.com/@creator/video/not-a-number").views("42"));
    let browser = MockBrowser::new().on_account("creator", vec![page.page()]);
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(browser, dir.path());

    let report = h.controller.run(&accounts(&["creator"])).await;

    let text = written_text(&report, "creator");
    assert!(text.starts_with("用户账号: @creator\n用户昵称: The Creator\n"));
    assert!(text.contains(&format!("最新更新: {}\n", display(1_700_000_000))));

    let blocks: Vec<_> = text.match_indices("--- 视频 ").map(|(i, _)| i).collect();
    assert_eq!(blocks.len(), 3);
    let post1 = &text[blocks[0]..blocks[1]];
    let post2 = &text[blocks[1]..blocks[2]];
    let post3 = &text[blocks[2]..];

    assert!(post1.starts_with("--- 视频 1 ---\n是否置顶: 是\n"));
    assert!(post1.contains(&format!("发布时间: {}\n", display(1_800_000_000))));
    assert!(post2.starts_with("--- 视频 2 ---\n是否置顶: 否\n"));
    assert!(post2.contains(&format!("发布时间: {}\n", display(1_700_000_000))));
    assert!(post2.contains("播放量: 12.3K\n"));
    assert!(post3.starts_with("--- 视频 3 ---\n"));
    assert!(post3.contains("发布时间: N/A\n"));
    assert!(post3.contains("视频地址: https://www.tiktok.com/@creator/video/not-a-number\n"));

    match status(&report, "creator") {
        AccountStatus::Written {
            path,
            identity_verified,
            posts,
            ..
        } => {
            assert!(identity_verified);
            assert_eq!(*posts, 3);
            assert!(path.starts_with(dir.path().join("creator")));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn identity_mismatch_is_written_and_reported() {
    let page = ProfileFixture::new("requested")
        .displayed_handle("@redirected")
        .post(PostFixture::video("redirected", post_id_at(1_700_000_000, 1)));
    let browser = MockBrowser::new().on_account("requested", vec![page.page()]);
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(browser, dir.path());

    let report = h.controller.run(&accounts(&["requested"])).await;

    match status(&report, "requested") {
        AccountStatus::Written {
            identity_verified,
            displayed_handle,
            ..
        } => {
            assert!(!identity_verified);
            assert_eq!(displayed_handle.as_deref(), Some("@redirected"));
        }
        other => panic!("expected written snapshot, got {other:?}"),
    }
    let mismatches: Vec<_> = report
        .identity_mismatches()
        .into_iter()
        .map(|a| a.handle().to_string())
        .collect();
    assert_eq!(mismatches, ["requested"]);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["accounts"][0]["status"], "written");
    assert_eq!(json["accounts"][0]["identity_verified"], false);
}

#[tokio::test(start_paused = true)]
async fn profile_without_posts_writes_nothing() {
    let browser = MockBrowser::new().on_account("empty", vec![ProfileFixture::new("empty").page()]);
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(browser, dir.path());

    let report = h.controller.run(&accounts(&["empty"])).await;

    assert!(matches!(status(&report, "empty"), AccountStatus::NoPosts));
    assert!(!dir.path().join("empty").exists());
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transient_block_recovers_on_retry() {
    let page = ProfileFixture::new("flaky").post(PostFixture::video("flaky", post_id_at(1_700_000_000, 5)));
    let browser = MockBrowser::new().on_account(
        "flaky",
        vec![MockResponse::NavigationTimeout, MockResponse::NeverReady, page.page()],
    );
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(browser, dir.path());

    let report = h.controller.run(&accounts(&["flaky"])).await;

    assert!(matches!(status(&report, "flaky"), AccountStatus::Written { .. }));
    assert_eq!(h.log.lock().unwrap().visits.len(), 3);
    assert!(h.overrides.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_failure_and_continue() {
    let next = ProfileFixture::new("next").post(PostFixture::video("next", post_id_at(1_700_000_000, 1)));
    let browser = MockBrowser::new()
        .on_account("blocked", vec![MockResponse::NeverReady])
        .on_account("next", vec![next.page()]);
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(browser, dir.path());

    let report = h.controller.run(&accounts(&["blocked", "next"])).await;

    match status(&report, "blocked") {
        AccountStatus::Failed { kind, attempts, .. } => {
            assert_eq!(*kind, FailureKind::ReadinessTimeout);
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(status(&report, "next"), AccountStatus::Written { .. }));
    assert_eq!(*h.overrides.lock().unwrap(), ["blocked"]);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.written(), 1);
}

#[tokio::test(start_paused = true)]
async fn non_timeout_failure_is_not_retried() {
    let browser = MockBrowser::new()
        .on_account("broken", vec![MockResponse::Crash("target closed".into())]);
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(browser, dir.path());

    let report = h.controller.run(&accounts(&["broken"])).await;

    match status(&report, "broken") {
        AccountStatus::Failed { kind, attempts, .. } => {
            assert_eq!(*kind, FailureKind::Session);
            assert_eq!(*attempts, 1);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(h.overrides.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_page_hits_account_budget() {
    let browser = MockBrowser::new().on_account("stuck", vec![MockResponse::Hang]);
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(browser, dir.path());

    let report = h.controller.run(&accounts(&["stuck"])).await;

    match status(&report, "stuck") {
        AccountStatus::Failed { kind, attempts, .. } => {
            assert_eq!(*kind, FailureKind::BudgetExceeded);
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn write_failure_does_not_stop_the_run() {
    let a = ProfileFixture::new("alpha").post(PostFixture::video("alpha", post_id_at(1_700_000_000, 1)));
    let b = ProfileFixture::new("beta").post(PostFixture::video("beta", post_id_at(1_700_000_000, 2)));
    let browser = MockBrowser::new()
        .on_account("alpha", vec![a.page()])
        .on_account("beta", vec![b.page()]);
    let dir = tempfile::tempdir().unwrap();
    let not_a_dir = dir.path().join("logs");
    std::fs::write(&not_a_dir, "occupied").unwrap();
    let mut h = harness(browser, &not_a_dir);

    let report = h.controller.run(&accounts(&["alpha", "beta"])).await;

    assert!(matches!(status(&report, "alpha"), AccountStatus::WriteFailed { .. }));
    assert!(matches!(status(&report, "beta"), AccountStatus::WriteFailed { .. }));
    assert_eq!(h.log.lock().unwrap().visits.len(), 2);
}

// ---------------------------------------------------------------------------
// Session isolation and shutdown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_reset_fails_the_account_without_visiting() {
    let page = ProfileFixture::new("dirty").post(PostFixture::video("dirty", post_id_at(1_700_000_000, 1)));
    let browser = MockBrowser::new()
        .failing_resets()
        .on_account("dirty", vec![page.page()]);
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(browser, dir.path());

    let report = h.controller.run(&accounts(&["dirty"])).await;

    match status(&report, "dirty") {
        AccountStatus::Failed { kind, attempts, .. } => {
            assert_eq!(*kind, FailureKind::Session);
            assert_eq!(*attempts, 1);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(h.log.lock().unwrap().visits.is_empty());
    assert!(!dir.path().join("dirty").exists());
}

#[tokio::test(start_paused = true)]
async fn browser_is_reset_before_every_account() {
    let browser = MockBrowser::new()
        .on_account("one", vec![ProfileFixture::new("one").post(PostFixture::video("one", 1 << 32)).page()])
        .on_account("two", vec![ProfileFixture::new("two").post(PostFixture::video("two", 2 << 32)).page()]);
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(browser, dir.path());

    let report = h.controller.run(&accounts(&["one", "two"])).await;

    assert_eq!(report.written(), 2);
    let log = h.log.lock().unwrap();
    assert_eq!(log.resets, 2);
    assert_eq!(
        log.visits,
        ["https://www.tiktok.com/@one", "https://www.tiktok.com/@two"]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_start_skips_everything() {
    let browser = MockBrowser::new();
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(browser, dir.path());
    h.shutdown.send(true).unwrap();

    let report = h.controller.run(&accounts(&["a", "b"])).await;

    assert_eq!(report.skipped(), 2);
    assert!(h.log.lock().unwrap().visits.is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_backoff_stops_after_current_account() {
    let browser = MockBrowser::new()
        .on_account("blocked", vec![MockResponse::NeverReady])
        .on_account("later", vec![ProfileFixture::new("later").page()]);
    let dir = tempfile::tempdir().unwrap();
    let Harness {
        mut controller,
        overrides,
        shutdown,
        ..
    } = harness(browser, dir.path());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = shutdown.send(true);
    });

    let report = controller.run(&accounts(&["blocked", "later"])).await;

    match status(&report, "blocked") {
        AccountStatus::Failed { attempts, .. } => assert_eq!(*attempts, 1),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(status(&report, "later"), AccountStatus::Skipped));
    assert!(overrides.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_final_attempt_skips_the_operator() {
    // 180s budget per attempt: attempt 3 runs from roughly 372s to 552s.
    let browser = MockBrowser::new()
        .on_account("stuck", vec![MockResponse::Hang])
        .on_account("next", vec![ProfileFixture::new("next").page()]);
    let dir = tempfile::tempdir().unwrap();
    let Harness {
        mut controller,
        overrides,
        shutdown,
        ..
    } = harness(browser, dir.path());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(450)).await;
        let _ = shutdown.send(true);
    });

    let report = controller.run(&accounts(&["stuck", "next"])).await;

    match status(&report, "stuck") {
        AccountStatus::Failed { kind, attempts, .. } => {
            assert_eq!(*kind, FailureKind::BudgetExceeded);
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(status(&report, "next"), AccountStatus::Skipped));
    assert!(overrides.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_an_unanswered_operator_prompt() {
    let browser = MockBrowser::new()
        .on_account("blocked", vec![MockResponse::NeverReady])
        .on_account("next", vec![ProfileFixture::new("next").page()]);
    let dir = tempfile::tempdir().unwrap();
    let Harness {
        mut controller,
        overrides,
        shutdown,
        ..
    } = harness_with(browser, dir.path(), RecordingOverride::unanswered());

    // Retries are exhausted after about 12s; the operator never answers.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        let _ = shutdown.send(true);
    });

    let report = controller.run(&accounts(&["blocked", "next"])).await;

    match status(&report, "blocked") {
        AccountStatus::Failed { kind, attempts, .. } => {
            assert_eq!(*kind, FailureKind::ReadinessTimeout);
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(*overrides.lock().unwrap(), ["blocked"]);
    assert!(matches!(status(&report, "next"), AccountStatus::Skipped));
}
