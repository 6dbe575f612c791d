//! Escalation checks driven by the background worker on a paused clock

use std::time::Duration;

use tokio::time::sleep;
use triagen_core::broadcast::{EscalationNotice, EventName};
use triagen_core::scheduler::{CheckKind, DelayedTaskStore, JournaledTaskQueue, TaskKey};
use triagen_core::{
    Actor, Engine, EngineConfig, EventKind, IncidentPatch, NewIncident, Role, Severity, Status,
    Team,
};

const HOUR: u64 = 3600;

fn actor() -> Actor {
    Actor::new("alice", Role::Responder)
}

async fn started_engine() -> Engine {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let mut engine = Engine::from_config(EngineConfig::default()).unwrap();
    engine.start();
    engine
}

async fn current(engine: &Engine, id: &str) -> triagen_core::IncidentDetail {
    engine.manager().get(id).await.unwrap()
}

fn alerts(detail: &triagen_core::IncidentDetail) -> usize {
    detail
        .events
        .iter()
        .filter(|e| e.kind == EventKind::SystemAlert)
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_incident_escalates_after_response_window() {
    let engine = started_engine().await;
    let inc = engine
        .manager()
        .create(&actor(), NewIncident::new("login broken", Severity::Low))
        .await
        .unwrap();

    sleep(Duration::from_secs(119)).await;
    assert_eq!(current(&engine, &inc.id).await.incident.severity, Severity::Low);

    sleep(Duration::from_secs(2)).await;
    let detail = current(&engine, &inc.id).await;
    assert_eq!(detail.incident.severity, Severity::Critical);
    assert_eq!(detail.incident.version, 1);
    assert_eq!(alerts(&detail), 1);
    assert_eq!(detail.events[0].author_label(), "system");

    // The SLA check later finds it CRITICAL already.
    sleep(Duration::from_secs(49 * HOUR)).await;
    let detail = current(&engine, &inc.id).await;
    assert_eq!(detail.incident.version, 1);
    assert_eq!(alerts(&detail), 1);
    assert!(engine.queue().is_empty());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_incident_escalates_only_at_sla() {
    let engine = started_engine().await;
    let ops = engine
        .store()
        .insert_team(Team::new("Ops"))
        .await
        .unwrap();
    let mut oncall = engine
        .registry()
        .connect(&Actor::new("oncall", Role::Responder).with_team(ops.id.clone()));

    let inc = engine
        .manager()
        .create(
            &actor(),
            NewIncident::new("replica lag", Severity::High).with_team_id(ops.id.clone()),
        )
        .await
        .unwrap();
    engine
        .manager()
        .update(&inc.id, &actor(), Some(0), IncidentPatch::status(Status::Acknowledged))
        .await
        .unwrap();

    sleep(Duration::from_secs(10 * 60)).await;
    let detail = current(&engine, &inc.id).await;
    assert_eq!(detail.incident.severity, Severity::High);
    assert_eq!(alerts(&detail), 0);

    sleep(Duration::from_secs(4 * HOUR)).await;
    let detail = current(&engine, &inc.id).await;
    assert_eq!(detail.incident.severity, Severity::Critical);
    assert_eq!(detail.incident.status, Status::Acknowledged);
    assert_eq!(alerts(&detail), 1);

    let notice = oncall
        .drain()
        .into_iter()
        .find(|e| e.name == EventName::IncidentEscalated)
        .expect("team should hear about the escalation");
    let notice: EscalationNotice = notice.decode().unwrap();
    assert_eq!(notice.id, inc.id);
    assert_eq!(notice.severity, Severity::Critical);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_resolved_incident_never_escalates() {
    let engine = started_engine().await;
    let inc = engine
        .manager()
        .create(&actor(), NewIncident::new("disk full", Severity::Medium))
        .await
        .unwrap();

    sleep(Duration::from_secs(60)).await;
    engine
        .manager()
        .update(&inc.id, &actor(), None, IncidentPatch::status(Status::Resolved))
        .await
        .unwrap();

    sleep(Duration::from_secs(25 * HOUR)).await;
    let detail = current(&engine, &inc.id).await;
    assert_eq!(detail.incident.severity, Severity::Medium);
    assert_eq!(detail.incident.version, 1);
    assert_eq!(alerts(&detail), 0);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_critical_incident_checks_fire_without_change() {
    let engine = started_engine().await;
    let inc = engine
        .manager()
        .create(&actor(), NewIncident::new("cron drift", Severity::Critical))
        .await
        .unwrap();

    sleep(Duration::from_secs(2 * HOUR)).await;
    let detail = current(&engine, &inc.id).await;
    // Created CRITICAL: nothing to raise, nothing recorded.
    assert_eq!(alerts(&detail), 0);
    assert_eq!(detail.incident.version, 0);
    assert!(engine.queue().is_empty());

    // A cancel after both checks fired is a quiet no-op.
    assert_eq!(engine.scheduler().cancel(&inc.id).await.unwrap(), 0);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pending_checks_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("escalations.json");
    let config = EngineConfig {
        journal_path: Some(journal.clone()),
        ..EngineConfig::default()
    };

    let (kept, cancelled) = {
        let engine = Engine::from_config(config.clone()).unwrap();
        let kept = engine
            .manager()
            .create(&actor(), NewIncident::new("kept", Severity::Low))
            .await
            .unwrap();
        let cancelled = engine
            .manager()
            .create(&actor(), NewIncident::new("cancelled", Severity::Low))
            .await
            .unwrap();
        engine.scheduler().cancel(&cancelled.id).await.unwrap();
        (kept, cancelled)
    };

    let reopened = JournaledTaskQueue::open(&journal).unwrap();
    let pending = reopened.pending().await.unwrap();
    assert_eq!(pending.len(), 2);
    for kind in CheckKind::ALL {
        assert!(pending.iter().any(|t| t.key == TaskKey::new(kept.id.as_str(), kind)));
        assert!(!pending
            .iter()
            .any(|t| t.key == TaskKey::new(cancelled.id.as_str(), kind)));
    }
}
