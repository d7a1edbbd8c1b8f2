//! End-to-end controller scenarios: services wired against a real store
//! and broker, exercising the dispatch lifecycle in-process.

use netscan::broker::{Broker, CHECK_RESULTS_CHANNEL, CHECK_TASKS_QUEUE};
use netscan::domain::{AgentStatus, CheckResult, CheckStatus, RegisterRequest};
use netscan::error::Error;
use netscan::service::{AgentService, CheckService, DispatchService};
use netscan::store::{AgentTaskStore, SqliteStore};
use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;

struct Controller {
    agents: Arc<AgentService>,
    checks: Arc<CheckService>,
    dispatch: Arc<DispatchService>,
    broker: Arc<Broker>,
    store: Arc<SqliteStore>,
}

fn controller() -> Controller {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let broker = Arc::new(Broker::new());

    let agents = Arc::new(AgentService::new(store.clone(), store.clone()));
    let checks = Arc::new(CheckService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        broker.clone(),
    ));
    let dispatch = Arc::new(DispatchService::new(
        broker.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        checks.clone(),
        // Short pop window keeps empty-queue assertions fast.
        Duration::from_millis(200),
    ));

    Controller {
        agents,
        checks,
        dispatch,
        broker,
        store,
    }
}

fn online_agent(ctl: &Controller, name: &str, capabilities: &[&str]) -> String {
    let (agent, _token) = ctl
        .agents
        .register(&RegisterRequest {
            name: name.to_string(),
            location: "test".to_string(),
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            metadata: None,
        })
        .unwrap();
    ctl.agents.update_heartbeat(&agent.id, 0).unwrap();
    agent.id
}

fn result_from(agent_id: &str, check_id: &str) -> CheckResult {
    CheckResult {
        id: String::new(),
        check_id: check_id.to_string(),
        agent_id: agent_id.to_string(),
        success: true,
        data: Map::new(),
        error: String::new(),
        duration: 0.05,
        created_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn happy_path_with_two_agents() {
    let ctl = controller();
    let a1 = online_agent(&ctl, "a1", &["http"]);
    let a2 = online_agent(&ctl, "a2", &["http"]);

    let check = ctl
        .checks
        .create_check("http", "http://example.org")
        .await
        .unwrap();
    assert_eq!(check.status, CheckStatus::Pending);
    assert_eq!(ctl.broker.len(CHECK_TASKS_QUEUE).await, 2);

    let mut results_rx = ctl.broker.subscribe(CHECK_RESULTS_CHANNEL).await;

    // First fetch advances the check to running.
    let task = ctl.dispatch.get_next_task(&a1).await.unwrap().unwrap();
    assert_eq!(task.check_id, check.id);
    let (current, _) = ctl.checks.get_check(&check.id).unwrap().unwrap();
    assert_eq!(current.status, CheckStatus::Running);

    // First result: one of two agents answered, still running.
    ctl.dispatch
        .submit_task_result(&mut result_from(&a1, &check.id))
        .await
        .unwrap();
    let (current, results) = ctl.checks.get_check(&check.id).unwrap().unwrap();
    assert_eq!(current.status, CheckStatus::Running);
    assert_eq!(results.len(), 1);

    // Second agent fetches and answers: completed.
    let task = ctl.dispatch.get_next_task(&a2).await.unwrap().unwrap();
    assert_eq!(task.check_id, check.id);
    ctl.dispatch
        .submit_task_result(&mut result_from(&a2, &check.id))
        .await
        .unwrap();

    let (current, results) = ctl.checks.get_check(&check.id).unwrap().unwrap();
    assert_eq!(current.status, CheckStatus::Completed);
    assert_eq!(results.len(), 2);

    // Both ingests published a notification.
    assert!(results_rx.recv().await.is_ok());
    assert!(results_rx.recv().await.is_ok());

    // In-flight rows were cleared on ingest.
    assert_eq!(ctl.store.count_processing().unwrap(), 0);

    let stats = ctl.checks.stats(&check.id).unwrap();
    assert_eq!(stats.total_results, 2);
    assert_eq!(stats.successful, 2);
    assert_eq!(stats.agent_results.len(), 2);
}

#[tokio::test]
async fn capability_miss_requeues_the_task() {
    let ctl = controller();
    let a1 = online_agent(&ctl, "a1", &["ping"]);

    // Fan-out ignores capabilities; the gate runs at pop time.
    let check = ctl
        .checks
        .create_check("dns", "example.org")
        .await
        .unwrap();
    assert_eq!(ctl.broker.len(CHECK_TASKS_QUEUE).await, 1);

    let err = ctl.dispatch.get_next_task(&a1).await.unwrap_err();
    assert!(matches!(err, Error::CapabilityMismatch(_)));

    // The payload went back; queue length returns to one.
    assert_eq!(ctl.broker.len(CHECK_TASKS_QUEUE).await, 1);

    // A capable agent still gets it.
    let a2 = online_agent(&ctl, "a2", &["dns"]);
    let task = ctl.dispatch.get_next_task(&a2).await.unwrap().unwrap();
    assert_eq!(task.check_id, check.id);
}

#[tokio::test]
async fn stuck_task_is_reaped_and_requeued() {
    let ctl = controller();
    let a1 = online_agent(&ctl, "a1", &["http"]);

    let check = ctl
        .checks
        .create_check("http", "http://example.org")
        .await
        .unwrap();

    // Agent fetches but never submits.
    let task = ctl.dispatch.get_next_task(&a1).await.unwrap().unwrap();
    assert_eq!(task.check_id, check.id);
    assert_eq!(ctl.store.count_processing().unwrap(), 1);
    assert!(ctl.broker.is_empty(CHECK_TASKS_QUEUE).await);

    // With a zero threshold every in-flight row is overdue.
    let reaped = ctl
        .dispatch
        .cleanup_stuck_tasks(Duration::from_secs(0))
        .await
        .unwrap();
    assert_eq!(reaped, 1);

    // The payload is back on the queue, the row is gone, and the check
    // was marked failed.
    assert_eq!(ctl.broker.len(CHECK_TASKS_QUEUE).await, 1);
    assert_eq!(ctl.store.count_processing().unwrap(), 0);
    let (current, _) = ctl.checks.get_check(&check.id).unwrap().unwrap();
    assert_eq!(current.status, CheckStatus::Failed);

    // Any agent can pop the requeued payload.
    let again = ctl.dispatch.get_next_task(&a1).await.unwrap().unwrap();
    assert_eq!(again.check_id, check.id);
}

#[tokio::test]
async fn heartbeat_sweep_takes_agents_out_of_rotation() {
    let ctl = controller();
    let a1 = online_agent(&ctl, "a1", &["http"]);
    assert_eq!(ctl.agents.list_online().unwrap().len(), 1);

    // Zero timeout: every heartbeat is stale.
    let swept = ctl
        .agents
        .cleanup_inactive_agents(Duration::from_secs(0))
        .unwrap();
    assert_eq!(swept, 1);
    assert!(ctl.agents.list_online().unwrap().is_empty());

    let agent = ctl.agents.get(&a1).unwrap().unwrap();
    assert_eq!(agent.status, AgentStatus::Offline);

    // New checks no longer fan out anywhere.
    let err = ctl
        .checks
        .create_check("http", "http://example.org")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoOnlineAgents));
}

#[tokio::test]
async fn task_delivery_requires_a_known_online_agent() {
    let ctl = controller();

    let err = ctl.dispatch.get_next_task("ghost").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    // Registered but never heartbeated: offline agents cannot pull.
    let (agent, _) = ctl
        .agents
        .register(&RegisterRequest {
            name: "offline".into(),
            location: "test".into(),
            capabilities: vec!["http".into()],
            metadata: None,
        })
        .unwrap();
    let err = ctl.dispatch.get_next_task(&agent.id).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn empty_queue_returns_no_task_within_the_window() {
    let ctl = controller();
    let a1 = online_agent(&ctl, "a1", &["http"]);

    let popped = ctl.dispatch.get_next_task(&a1).await.unwrap();
    assert!(popped.is_none());
}

#[tokio::test]
async fn result_for_unknown_check_is_rejected() {
    let ctl = controller();
    let a1 = online_agent(&ctl, "a1", &["http"]);

    let err = ctl
        .dispatch
        .submit_task_result(&mut result_from(&a1, "ghost-check"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn queue_stats_reflect_the_system() {
    let ctl = controller();
    online_agent(&ctl, "a1", &["http"]);
    ctl.checks
        .create_check("http", "http://example.org")
        .await
        .unwrap();

    let stats = ctl.dispatch.queue_stats().await.unwrap();
    assert_eq!(stats.queue_length, 1);
    assert_eq!(stats.online_agents, 1);
    assert_eq!(stats.pending_checks, 1);
    assert_eq!(stats.running_checks, 0);
    assert_eq!(stats.active_tasks, 0);
}
