use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::test;
use tokio::time::{Instant, sleep};

use adapters::driver::scripted::{Operation, ScriptedDriver, ScriptedElement};
use adapters::{ContextHandle, DriverError, ElementHandle};
use common::logger::init_logger;
use corelib::{AuctionStatus, MonitorUpdate, Origin};
use monitor::MonitorConfig;
use session::{SessionError, SessionManager, SessionPhase};

const TARGET: &str = "/auctionDashboard?auctionDetails=42-A";
const AUCTION_FRAME: &str = "https://g2auction.copart.com/g2/#/";

struct Page {
    driver: Arc<ScriptedDriver>,
    frame: ContextHandle,
    bid: ElementHandle,
}

fn config() -> MonitorConfig {
    MonitorConfig {
        resolve_timeout: Duration::from_secs(2),
        resolve_poll_interval: Duration::from_millis(100),
        ..MonitorConfig::default()
    }
}

fn fill_frame(driver: &ScriptedDriver, frame: &ContextHandle, bid: &str) -> ElementHandle {
    let bid = driver.put_text(frame, ".current-bid", bid);
    driver.put_text(frame, ".winning-bidder", "CA - Sacramento");
    driver.put_text(frame, ".lot-title", "2017 Honda Accord");
    driver.put_text(frame, ".bidder-count", "7 bidders");
    driver.put_text(frame, ".auction-status", "Live");
    bid
}

fn copart_page() -> Page {
    init_logger("session-tests", false);

    let driver = Arc::new(ScriptedDriver::new("https://www.copart.com/dashboard"));
    let frame = driver.add_frame(AUCTION_FRAME);
    let bid = fill_frame(&driver, &frame, "$1,250");

    Page { driver, frame, bid }
}

async fn next_update(rx: &mut Receiver<MonitorUpdate>) -> MonitorUpdate {
    tokio::time::timeout(Duration::from_secs(300), rx.recv())
        .await
        .expect("no update within five minutes")
        .expect("broadcast channel closed")
}

#[test(start_paused = true)]
async fn start_publishes_initial_snapshot() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());
    let (_, mut rx) = mgr.subscribe();

    mgr.start(TARGET).await?;

    let first = next_update(&mut rx).await;
    assert!(first.is_monitoring);
    assert!(first.initial_load);
    assert!(first.changed);
    assert_eq!(first.origin, Some(Origin::Pull));

    let snap = first.snapshot.unwrap();
    assert_eq!(snap.auction_id, "42-A");
    assert_eq!(snap.current_bid, "$1,250");
    assert_eq!(snap.current_bidder, "CA - Sacramento");
    assert_eq!(snap.active_bidders, 7);
    assert_eq!(snap.status, AuctionStatus::Active);
    assert_eq!(snap.time_remaining, "N/A");

    assert_eq!(
        page.driver.navigations(),
        vec!["https://www.copart.com/auctionDashboard?auctionDetails=42-A".to_string()]
    );

    let installs = page.driver.evaluations();
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].context, page.frame.id);
    assert!(installs[0].script.contains(".auctionrunningdiv-MACRO"));

    assert_eq!(mgr.phase().await, Some(SessionPhase::Observing));
    assert_eq!(mgr.current_snapshot().await.unwrap().current_bid, "$1,250");

    let session = mgr.session().await.unwrap();
    assert_eq!(session.resolved_context, Some(page.frame.clone()));
    assert!(!session.degraded);
    assert!(session.last_reconciled_at.is_some());

    mgr.stop().await;
    Ok(())
}

#[test(start_paused = true)]
async fn second_start_is_rejected_while_active() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());

    mgr.start(TARGET).await?;

    let err = mgr.start("/auctionDashboard?auctionDetails=99-B").await.unwrap_err();
    assert!(matches!(err, SessionError::AlreadyActive(ref t) if t.contains("42-A")));

    mgr.stop().await;
    mgr.start("/auctionDashboard?auctionDetails=99-B").await?;
    assert_eq!(mgr.session().await.unwrap().auction_id, "99-B");

    mgr.stop().await;
    Ok(())
}

#[test]
async fn blank_target_is_invalid() {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());

    let err = mgr.start("   ").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidTarget(_)));
    assert!(page.driver.navigations().is_empty());
}

#[test(start_paused = true)]
async fn stop_is_idempotent_and_cleans_up() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());
    let (_, mut rx) = mgr.subscribe();

    // Nothing running yet.
    mgr.stop().await;

    mgr.start(TARGET).await?;
    let _initial = next_update(&mut rx).await;

    mgr.stop().await;
    mgr.stop().await;

    let last = next_update(&mut rx).await;
    assert!(!last.is_monitoring);
    assert!(!last.changed);
    assert_eq!(last.snapshot.unwrap().current_bid, "$1,250");
    assert!(rx.try_recv().is_err(), "second stop must not publish again");

    let cleanup = page.driver.evaluations().pop().unwrap();
    assert!(cleanup.script.contains("disconnect()"));
    assert_eq!(cleanup.context, page.frame.id);

    assert_eq!(mgr.phase().await, None);
    assert!(!mgr.is_monitoring().await);
    assert!(mgr.current_snapshot().await.is_none());

    let status = mgr.status().await;
    assert!(!status.is_monitoring);
    assert!(status.snapshot.is_none());
    Ok(())
}

#[test(start_paused = true)]
async fn stop_during_health_check_still_cleans_up() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(
        page.driver.clone(),
        MonitorConfig {
            probe_timeout: Duration::from_secs(60),
            candidate_budget: Duration::from_secs(120),
            ..config()
        },
    );
    let (_, mut rx) = mgr.subscribe();

    mgr.start(TARGET).await?;
    let _initial = next_update(&mut rx).await;

    // Countdown that stays hidden for the whole probe keeps the next pull busy.
    page.driver.put(
        &page.frame,
        ".time-remaining",
        ScriptedElement::visible("00:42").appearing_after(Duration::from_secs(100)),
    );
    sleep(Duration::from_secs(31)).await;

    let began = Instant::now();
    mgr.stop().await;
    assert!(began.elapsed() < Duration::from_secs(1));

    let cleanups = page
        .driver
        .evaluations()
        .iter()
        .filter(|e| e.script.contains("disconnect()"))
        .count();
    assert_eq!(cleanups, 1);

    let last = next_update(&mut rx).await;
    assert!(!last.is_monitoring);
    assert!(rx.try_recv().is_err(), "abandoned pull must not publish");
    assert_eq!(mgr.counters().pull_cycles, 1);
    assert_eq!(mgr.phase().await, None);
    Ok(())
}

#[test(start_paused = true)]
async fn stop_during_recovery_is_prompt() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());
    let (_, mut rx) = mgr.subscribe();

    mgr.start(TARGET).await?;
    let _initial = next_update(&mut rx).await;

    // Frame gone and every reinstall fails: recovery keeps retrying.
    page.driver.destroy_frame(&page.frame);
    for _ in 0..20 {
        page.driver
            .fail_next(Operation::Evaluate, DriverError::ContextDestroyed("main".into()));
    }
    sleep(Duration::from_secs(40)).await;

    assert_eq!(mgr.phase().await, Some(SessionPhase::Recovering));
    assert!(mgr.counters().recovery_failures >= 1);
    assert_eq!(mgr.counters().recoveries, 0);

    let began = Instant::now();
    mgr.stop().await;
    assert!(began.elapsed() < Duration::from_secs(1));

    let last = next_update(&mut rx).await;
    assert!(!last.is_monitoring);
    assert_eq!(last.snapshot.unwrap().current_bid, "$1,250");
    assert_eq!(mgr.phase().await, None);
    assert!(!mgr.is_monitoring().await);
    Ok(())
}

#[test(start_paused = true)]
async fn push_changes_merge_field_wise() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());
    let (_, mut rx) = mgr.subscribe();

    mgr.start(TARGET).await?;
    let _initial = next_update(&mut rx).await;

    page.driver.emit_console(r#"CHANGE:{"bid":"$1,300"}"#);
    page.driver.emit_console(r#"CHANGE:{"bidder":"CA-123"}"#);

    let first = next_update(&mut rx).await;
    assert_eq!(first.origin, Some(Origin::Push));
    assert!(first.changed);
    assert!(!first.initial_load);
    assert_eq!(first.snapshot.unwrap().current_bid, "$1,300");

    let second = next_update(&mut rx).await;
    let snap = second.snapshot.unwrap();
    assert_eq!(snap.current_bid, "$1,300");
    assert_eq!(snap.current_bidder, "CA-123");
    assert_eq!(snap.lot_title, "2017 Honda Accord");

    let current = mgr.current_snapshot().await.unwrap();
    assert_eq!(current.current_bid, "$1,300");
    assert_eq!(current.current_bidder, "CA-123");
    assert_eq!(mgr.counters().push_events, 2);

    mgr.stop().await;
    Ok(())
}

#[test(start_paused = true)]
async fn console_noise_is_ignored_and_bad_payloads_counted() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());
    let (_, mut rx) = mgr.subscribe();

    mgr.start(TARGET).await?;
    let _initial = next_update(&mut rx).await;

    page.driver.emit_console("[GTM] container loaded");
    page.driver.emit_console("CHANGE:{not json");
    page.driver.emit_console(r#"CHANGE:{"bid":"$1,250"}"#);
    page.driver.emit_console("OBSERVER:ready");
    page.driver.emit_console(r#"CHANGE:{"bid":"$1,275"}"#);

    // Only the last line changes anything.
    let update = next_update(&mut rx).await;
    assert_eq!(update.origin, Some(Origin::Push));
    assert_eq!(update.snapshot.unwrap().current_bid, "$1,275");

    let counters = mgr.counters();
    assert_eq!(counters.console_ignored, 1);
    assert_eq!(counters.decode_errors, 1);
    assert_eq!(counters.push_events, 2);

    mgr.stop().await;
    Ok(())
}

#[test(start_paused = true)]
async fn health_check_publishes_without_push_events() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());
    let (_, mut rx) = mgr.subscribe();

    mgr.start(TARGET).await?;
    let _initial = next_update(&mut rx).await;

    page.driver.set_text(&page.bid, "$1,400");
    sleep(Duration::from_secs(45)).await;

    let update = rx.try_recv()?;
    assert_eq!(update.origin, Some(Origin::Pull));
    assert!(update.changed);
    assert!(!update.initial_load);
    assert_eq!(update.snapshot.unwrap().current_bid, "$1,400");
    assert!(rx.try_recv().is_err(), "one health check in 45s");

    // Nothing moved: the next check still publishes, flagged unchanged.
    sleep(Duration::from_secs(30)).await;
    let idle = rx.try_recv()?;
    assert!(!idle.changed);
    assert_eq!(idle.snapshot.unwrap().current_bid, "$1,400");

    assert_eq!(mgr.counters().pull_cycles, 3);

    mgr.stop().await;
    Ok(())
}

#[test(start_paused = true)]
async fn destroyed_context_is_recovered() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());
    let (_, mut rx) = mgr.subscribe();

    mgr.start(TARGET).await?;
    let _initial = next_update(&mut rx).await;

    // Frame reloads: old document gone, a new one takes its place.
    page.driver.destroy_frame(&page.frame);
    let reloaded = page.driver.add_frame(AUCTION_FRAME);
    fill_frame(&page.driver, &reloaded, "$1,500");

    sleep(Duration::from_secs(31)).await;

    let update = next_update(&mut rx).await;
    assert!(update.is_monitoring);
    assert_eq!(update.origin, Some(Origin::Pull));
    assert_eq!(update.snapshot.unwrap().current_bid, "$1,500");

    assert_eq!(mgr.phase().await, Some(SessionPhase::Observing));
    let session = mgr.session().await.unwrap();
    assert_eq!(session.resolved_context, Some(reloaded.clone()));
    assert_eq!(session.recoveries, 1);
    assert_eq!(mgr.counters().recoveries, 1);

    // Observer reinstalled into the new document.
    let installs: Vec<_> = page
        .driver
        .evaluations()
        .into_iter()
        .filter(|e| e.script.contains("MutationObserver"))
        .collect();
    assert_eq!(installs.len(), 2);
    assert_eq!(installs[1].context, reloaded.id);

    // Push channel survives recovery.
    page.driver.emit_console(r#"CHANGE:{"bid":"$1,550"}"#);
    let pushed = next_update(&mut rx).await;
    assert_eq!(pushed.snapshot.unwrap().current_bid, "$1,550");

    mgr.stop().await;
    Ok(())
}

#[test(start_paused = true)]
async fn one_shot_context_loss_converges() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());
    let (_, mut rx) = mgr.subscribe();

    mgr.start(TARGET).await?;
    let _initial = next_update(&mut rx).await;

    page.driver.fail_next(
        Operation::Locate,
        DriverError::ContextDestroyed(page.frame.id.clone()),
    );
    sleep(Duration::from_secs(31)).await;

    let update = next_update(&mut rx).await;
    assert!(update.is_monitoring);
    assert_eq!(mgr.phase().await, Some(SessionPhase::Observing));
    assert_eq!(mgr.counters().recoveries, 1);
    assert_eq!(mgr.counters().recovery_failures, 0);

    mgr.stop().await;
    Ok(())
}

#[test(start_paused = true)]
async fn degraded_mode_picks_up_late_frame() -> anyhow::Result<()> {
    init_logger("session-tests", false);
    let driver = Arc::new(ScriptedDriver::new("https://www.copart.com/dashboard"));
    let mgr = SessionManager::new(driver.clone(), config());
    let (_, mut rx) = mgr.subscribe();

    mgr.start(TARGET).await?;

    let initial = next_update(&mut rx).await;
    assert!(initial.initial_load);
    assert_eq!(initial.snapshot.unwrap().current_bid, "N/A");

    let session = mgr.session().await.unwrap();
    assert!(session.degraded);
    assert!(session.resolved_context.unwrap().top_level);

    let frame = driver.add_frame(AUCTION_FRAME);
    fill_frame(&driver, &frame, "$2,000");

    sleep(Duration::from_secs(31)).await;

    let update = rx.try_recv()?;
    assert!(update.changed);
    assert_eq!(update.snapshot.unwrap().current_bid, "$2,000");

    let session = mgr.session().await.unwrap();
    assert!(!session.degraded);
    assert_eq!(session.resolved_context, Some(frame));

    mgr.stop().await;
    Ok(())
}

#[test(start_paused = true)]
async fn late_frame_at_start_is_waited_for() -> anyhow::Result<()> {
    init_logger("session-tests", false);
    let driver = Arc::new(ScriptedDriver::new("https://www.copart.com/dashboard"));
    let frame = driver.add_frame_after(AUCTION_FRAME, 5);
    fill_frame(&driver, &frame, "$800");

    let mgr = SessionManager::new(driver.clone(), config());
    mgr.start(TARGET).await?;

    let session = mgr.session().await.unwrap();
    assert!(!session.degraded);
    assert_eq!(session.resolved_context, Some(frame));
    assert_eq!(mgr.current_snapshot().await.unwrap().current_bid, "$800");

    mgr.stop().await;
    Ok(())
}

#[test(start_paused = true)]
async fn closed_browser_ends_session() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());
    let (_, mut rx) = mgr.subscribe();

    mgr.start(TARGET).await?;
    let _initial = next_update(&mut rx).await;

    page.driver.close();
    sleep(Duration::from_secs(31)).await;

    let last = next_update(&mut rx).await;
    assert!(!last.is_monitoring);
    assert_eq!(last.snapshot.unwrap().current_bid, "$1,250");

    let session = mgr.session().await.unwrap();
    assert!(!session.is_active);
    assert_eq!(session.phase, SessionPhase::Stopped);
    assert_eq!(session.last_error.as_deref(), Some("browser closed"));
    assert!(!mgr.is_monitoring().await);
    assert!(!mgr.status().await.is_monitoring);

    // No cleanup script against a dead browser.
    assert!(
        !page
            .driver
            .evaluations()
            .iter()
            .any(|e| e.script.contains("disconnect()"))
    );

    mgr.stop().await;
    assert_eq!(mgr.phase().await, None);
    Ok(())
}

#[test(start_paused = true)]
async fn start_against_closed_browser_fails() {
    let page = copart_page();
    page.driver.close();

    let mgr = SessionManager::new(page.driver.clone(), config());
    let err = mgr.start(TARGET).await.unwrap_err();

    assert!(matches!(err, SessionError::Driver(DriverError::Closed)));
    assert_eq!(mgr.phase().await, None);
}

#[test(start_paused = true)]
async fn navigation_failure_is_not_fatal() -> anyhow::Result<()> {
    let page = copart_page();
    page.driver
        .fail_next(Operation::Goto, DriverError::Navigation("net::ERR_ABORTED".into()));

    let mgr = SessionManager::new(page.driver.clone(), config());
    mgr.start(TARGET).await?;

    assert_eq!(mgr.current_snapshot().await.unwrap().current_bid, "$1,250");
    mgr.stop().await;
    Ok(())
}

#[test(start_paused = true)]
async fn start_gives_up_after_budget() {
    init_logger("session-tests", false);
    let driver = Arc::new(ScriptedDriver::new("https://www.copart.com/dashboard"));
    let mgr = SessionManager::new(
        driver.clone(),
        MonitorConfig {
            start_timeout: Duration::from_secs(1),
            resolve_timeout: Duration::from_secs(10),
            ..MonitorConfig::default()
        },
    );

    let err = mgr.start(TARGET).await.unwrap_err();
    assert!(matches!(err, SessionError::StartTimeout(d) if d == Duration::from_secs(1)));
    assert_eq!(mgr.phase().await, None);
    assert!(!mgr.status().await.is_monitoring);
}

#[test(start_paused = true)]
async fn iaai_target_monitors_top_level_document() -> anyhow::Result<()> {
    init_logger("session-tests", false);
    let driver = Arc::new(ScriptedDriver::new("https://www.iaai.com/"));
    let main = driver.top_level_handle();
    driver.put_text(&main, ".asking-bid", "$3,250");
    driver.put_text(&main, ".high-bid__location", "TX - Dallas");
    driver.put_text(&main, ".run-list__item-name", "2016 Ford F-150");

    let mgr = SessionManager::new(driver.clone(), config());
    let (_, mut rx) = mgr.subscribe();
    mgr.start("https://www.iaai.com/LiveAuctionsCalendar").await?;

    let initial = next_update(&mut rx).await;
    let snap = initial.snapshot.unwrap();
    assert_eq!(snap.auction_id, "Unknown");
    assert_eq!(snap.current_bid, "$3,250");
    assert_eq!(snap.current_bidder, "TX - Dallas");
    assert_eq!(driver.calls(Operation::ListFrames), 0);

    // Legacy payload shape still decodes.
    driver.emit_console(r#"CHANGE:{"item":"2016 Ford F-150","bid":"$3,500","stockNumber":"40123987"}"#);
    let pushed = next_update(&mut rx).await.snapshot.unwrap();
    assert_eq!(pushed.current_bid, "$3,500");
    assert_eq!(pushed.lot_number, "40123987");

    mgr.stop().await;
    Ok(())
}

#[test(start_paused = true)]
async fn status_serializes_for_new_clients() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());

    let idle = serde_json::to_value(mgr.status().await)?;
    assert_eq!(idle["isMonitoring"], false);
    assert!(idle["snapshot"].is_null());

    mgr.start(TARGET).await?;

    let live = serde_json::to_value(mgr.status().await)?;
    assert_eq!(live["isMonitoring"], true);
    assert_eq!(live["changed"], false);
    assert_eq!(live["initialLoad"], false);
    assert_eq!(live["snapshot"]["currentBid"], "$1,250");
    assert_eq!(live["snapshot"]["auctionId"], "42-A");

    mgr.stop().await;
    Ok(())
}

#[test(start_paused = true)]
async fn unsubscribed_clients_stop_receiving() -> anyhow::Result<()> {
    let page = copart_page();
    let mgr = SessionManager::new(page.driver.clone(), config());
    let (id, mut rx) = mgr.subscribe();
    let (_, mut other) = mgr.subscribe();

    assert!(mgr.unsubscribe(id));
    mgr.start(TARGET).await?;

    assert!(next_update(&mut other).await.initial_load);
    assert!(rx.try_recv().is_err());

    mgr.stop().await;
    Ok(())
}
