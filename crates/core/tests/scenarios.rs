//! End-to-end engine behaviour with scripted collaborators.

mod common;

use common::{engine, engine_with, fail_with, pass, started, wait_for_status, Script, Step};
use foreman_core::approval::PackStatus;
use foreman_core::graph::{TaskGraph, TaskNode};
use foreman_core::policy::UseCasePolicy;
use foreman_core::store::MemoryRunStore;
use foreman_core::{
    AgentRole, AgentStatus, ApprovalDecision, ApprovalStatus, Engine, EngineConfig, EngineError,
    Feedback, Rating, RunEvent, RunEventKind, RunOutcome, RunPhase, RunStore, SqliteRunStore,
    UseCase,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};
use AgentRole::*;

fn drain(rx: &mut mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_bot_team_happy_path_with_approval() {
    let script = Script::new();
    let engine = engine(&script);
    let run_id = started(&engine, UseCase::BotTeamSpec).await;

    assert_eq!(
        engine.advance(&run_id).await.unwrap(),
        RunOutcome::AwaitingApproval
    );
    let paused = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(paused.phase(), RunPhase::ApprovalPending);
    assert_eq!(paused.approval_status(), Some(ApprovalStatus::Pending));
    let pack = paused.approval_pack().unwrap();
    assert_eq!(pack.artifacts.len(), 4);
    assert_eq!(pack.status, PackStatus::PendingApproval);
    assert_eq!(script.executions(), 0);

    let phase = engine
        .resume_after_approval(&run_id, ApprovalDecision::Approved, None)
        .await
        .unwrap();
    assert_eq!(phase, RunPhase::Executing);
    assert_eq!(engine.advance(&run_id).await.unwrap(), RunOutcome::Done);

    let state = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Done);
    assert_eq!(state.fix_iteration(), 0);
    assert!(state.pr_url().is_some());
    assert!(state.commit_hash().is_some());
    assert!(state.error().is_none());
    assert_eq!(state.approval_status(), Some(ApprovalStatus::Approved));
    for role in AgentRole::ALL {
        assert!(state.result(role).is_some(), "{role} slot empty");
        assert_eq!(state.agent_status(role.as_str()), Some(AgentStatus::Done));
    }

    let authors: Vec<_> = state.messages().iter().map(|m| m.agent).collect();
    assert_eq!(authors, vec![Ba, Architect, Dev, Qa]);
    assert_eq!(script.executions(), 1);
}

#[tokio::test]
async fn test_fix_loop_reruns_only_implicated_subgraph() {
    let script = Script::new();
    script.evaluations(vec![
        fail_with("code", "handler panics on empty input"),
        fail_with("bug", "off-by-one in pagination"),
        pass(),
    ]);
    let engine = engine(&script);
    let run_id = started(&engine, UseCase::BotTeamSpec).await;

    assert_eq!(
        engine.advance(&run_id).await.unwrap(),
        RunOutcome::AwaitingApproval
    );

    let state = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(state.fix_iteration(), 2);
    assert_eq!(state.evaluation_passed(), Some(true));

    assert_eq!(script.calls_for(Ba), 1);
    assert_eq!(script.calls_for(Architect), 1);
    assert_eq!(script.calls_for(Dev), 3);
    assert_eq!(script.calls_for(Qa), 3);

    // Upstream slots are untouched across retries
    assert_eq!(state.result(Ba).unwrap()["iteration"], 0);
    assert_eq!(state.result(Architect).unwrap()["iteration"], 0);
    assert_eq!(state.result(Dev).unwrap()["iteration"], 2);
    assert_eq!(state.result(Qa).unwrap()["iteration"], 2);

    // The dev retry carries the routed finding; qa only re-runs as a dependent
    let retry = script
        .calls()
        .into_iter()
        .find(|c| c.role == Dev && c.fix_iteration == 1)
        .unwrap();
    assert_eq!(retry.fix_context.len(), 1);
    assert_eq!(retry.dependencies, vec![Ba, Architect]);

    // Messages only ever grow
    assert_eq!(state.messages().len(), 4 + 2 + 2);
}

#[tokio::test]
async fn test_quality_gate_exhaustion_fails_run() {
    let script = Script::new();
    script.evaluations(vec![fail_with("test", "coverage below threshold")]);
    let engine = engine(&script);
    let run_id = started(&engine, UseCase::BotTeamSpec).await;

    let err = engine.advance(&run_id).await.unwrap_err();
    assert!(matches!(err, EngineError::QualityGateExhausted { .. }));

    let state = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Failed);
    assert_eq!(state.error(), Some("quality_gate_exhausted"));
    assert_eq!(state.evaluation_passed(), Some(false));
    assert_eq!(state.fix_iteration(), state.max_fix_iterations());
    assert!(state.approval_status().is_none());
    assert!(state.approval_pack().is_none());
    assert_eq!(state.agent_status("executor"), Some(AgentStatus::Skipped));
    assert_eq!(script.executions(), 0);

    // One first attempt plus one per fix iteration; qa findings only re-run qa
    assert_eq!(script.evaluations_run(), 4);
    assert_eq!(script.calls_for(Ba), 1);
    assert_eq!(script.calls_for(Dev), 1);
    assert_eq!(script.calls_for(Qa), 4);
}

#[tokio::test]
async fn test_rejection_ends_run_without_execution() {
    let script = Script::new();
    let engine = engine(&script);
    let run_id = started(&engine, UseCase::WebAppCreation).await;
    assert_eq!(
        engine.advance(&run_id).await.unwrap(),
        RunOutcome::AwaitingApproval
    );

    let phase = engine
        .resume_after_approval(
            &run_id,
            ApprovalDecision::Rejected,
            Some("needs rework".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(phase, RunPhase::Rejected);

    let state = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Rejected);
    assert_eq!(state.rejection_comment(), Some("needs rework"));
    assert_eq!(state.approval_status(), Some(ApprovalStatus::Rejected));
    assert_eq!(state.approval_pack().unwrap().status, PackStatus::Rejected);
    assert!(state.artifacts().is_none());
    assert!(state.diff().is_none());
    assert!(state.pr_url().is_none());
    assert!(state.error().is_some());
    assert_eq!(script.executions(), 0);

    assert_eq!(engine.advance(&run_id).await.unwrap(), RunOutcome::Rejected);
}

#[tokio::test]
async fn test_agent_failure_skips_dependents() {
    let script = Script::new();
    script.step(Architect, Step::Fail("model refused".to_string()));
    let engine = engine(&script);
    let run_id = started(&engine, UseCase::BotTeamSpec).await;

    let err = engine.advance(&run_id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::AgentTaskFailed { role: Architect, .. }
    ));

    let state = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Failed);
    assert!(state.error().unwrap().contains("architect"));
    assert_eq!(state.agent_status("ba"), Some(AgentStatus::Done));
    assert_eq!(state.agent_status("architect"), Some(AgentStatus::Failed));
    assert_eq!(state.agent_status("dev"), Some(AgentStatus::Skipped));
    assert_eq!(state.agent_status("qa"), Some(AgentStatus::Skipped));
    assert!(state.result(Dev).is_none());
    assert_eq!(script.calls_for(Dev), 0);
    assert_eq!(script.calls_for(Qa), 0);
}

#[tokio::test]
async fn test_transport_error_counts_as_task_failure() {
    let script = Script::new();
    script.step(Dev, Step::Error("connection reset".to_string()));
    let engine = engine(&script);
    let run_id = started(&engine, UseCase::MediaGeneration).await;

    let err = engine.advance(&run_id).await.unwrap_err();
    assert!(matches!(err, EngineError::AgentTaskFailed { role: Dev, .. }));
    let state = engine.snapshot(&run_id).await.unwrap();
    assert!(state.error().unwrap().contains("connection reset"));
}

#[tokio::test]
async fn test_agent_timeout_is_task_failure() {
    let script = Script::new();
    script.step(Dev, Step::Delay(3_000));
    let mut config = EngineConfig::default();
    config.agent_timeout_secs = 1;
    let engine = engine_with(&script, config);
    let run_id = started(&engine, UseCase::MediaGeneration).await;

    let err = engine.advance(&run_id).await.unwrap_err();
    match err {
        EngineError::AgentTaskFailed { role, reason } => {
            assert_eq!(role, Dev);
            assert!(reason.contains("timed out"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_tasks_see_populated_dependencies() {
    let script = Script::new();
    let engine = engine(&script);
    let run_id = started(&engine, UseCase::BotTeamSpec).await;
    engine.advance(&run_id).await.unwrap();

    let calls = script.calls();
    let deps_of = |role| {
        calls
            .iter()
            .find(|c| c.role == role)
            .map(|c| c.dependencies.clone())
            .unwrap()
    };
    assert_eq!(deps_of(Ba), vec![]);
    assert_eq!(deps_of(Architect), vec![Ba]);
    assert_eq!(deps_of(Dev), vec![Ba, Architect]);
    assert_eq!(deps_of(Qa), vec![Dev]);

    let order: Vec<_> = calls.iter().map(|c| c.role).collect();
    assert_eq!(order, vec![Ba, Architect, Dev, Qa]);
}

#[tokio::test]
async fn test_parallel_tasks_merge_in_completion_order() {
    let script = Script::new();
    script.step(Architect, Step::Delay(150));
    script.step(Dev, Step::Delay(10));

    let mut config = EngineConfig::default();
    config.policy.use_cases.insert(
        UseCase::MediaGeneration,
        UseCasePolicy {
            graph: TaskGraph::new(vec![
                TaskNode::new(Architect, &[]),
                TaskNode::new(Dev, &[]),
                TaskNode::new(Qa, &[Architect, Dev]),
            ]),
            requires_approval: false,
        },
    );
    let engine = engine_with(&script, config);
    let run_id = started(&engine, UseCase::MediaGeneration).await;

    assert_eq!(engine.advance(&run_id).await.unwrap(), RunOutcome::Done);
    let state = engine.snapshot(&run_id).await.unwrap();
    let authors: Vec<_> = state.messages().iter().map(|m| m.agent).collect();
    assert_eq!(authors, vec![Dev, Architect, Qa]);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let script = Script::new();
    let (tx, mut rx) = mpsc::channel(64);
    let engine = Engine::builder(EngineConfig::default())
        .with_collaborator(script.clone())
        .with_event_channel(tx)
        .build()
        .unwrap();
    let run_id = started(&engine, UseCase::DocGeneration).await;

    assert!(engine.cancel(&run_id).await.unwrap());
    assert!(!engine.cancel(&run_id).await.unwrap());

    let state = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Failed);
    assert_eq!(state.error(), Some("cancelled"));
    assert!(state
        .agent_statuses()
        .values()
        .all(|s| *s == AgentStatus::Skipped));

    let failures = drain(&mut rx)
        .into_iter()
        .filter(|e| e.kind == RunEventKind::RunFailed)
        .count();
    assert_eq!(failures, 1);

    assert_eq!(engine.advance(&run_id).await.unwrap(), RunOutcome::Cancelled);
}

#[tokio::test]
async fn test_cancel_discards_in_flight_results() {
    let script = Script::new();
    script.step(Ba, Step::Hang);
    let engine = Arc::new(engine(&script));
    let run_id = started(&engine, UseCase::BotTeamSpec).await;

    let driver = {
        let engine = engine.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move { engine.advance(&run_id).await })
    };
    wait_for_status(&engine, &run_id, Ba, AgentStatus::Running).await;

    assert!(engine.cancel(&run_id).await.unwrap());
    assert_eq!(driver.await.unwrap().unwrap(), RunOutcome::Cancelled);

    let state = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(state.error(), Some("cancelled"));
    assert!(state.result(Ba).is_none());
    assert_eq!(state.agent_status("ba"), Some(AgentStatus::Skipped));
    assert_eq!(script.calls_for(Architect), 0);
}

#[tokio::test]
async fn test_cancel_while_awaiting_approval() {
    let script = Script::new();
    let engine = engine(&script);
    let run_id = started(&engine, UseCase::BotTeamSpec).await;
    engine.advance(&run_id).await.unwrap();

    assert!(engine.cancel(&run_id).await.unwrap());
    let state = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Failed);
    assert_eq!(state.approval_status(), Some(ApprovalStatus::Rejected));

    let err = engine
        .resume_after_approval(&run_id, ApprovalDecision::Approved, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_resume_when_not_pending_leaves_state_unchanged() {
    let script = Script::new();
    let engine = engine(&script);
    let run_id = started(&engine, UseCase::BotTeamSpec).await;

    let before = engine.snapshot(&run_id).await.unwrap();
    let err = engine
        .resume_after_approval(&run_id, ApprovalDecision::Approved, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    assert_eq!(engine.snapshot(&run_id).await.unwrap(), before);

    // A second decision after the first one is also refused
    engine.advance(&run_id).await.unwrap();
    engine
        .resume_after_approval(&run_id, ApprovalDecision::Approved, None)
        .await
        .unwrap();
    let settled = engine.snapshot(&run_id).await.unwrap();
    let err = engine
        .resume_after_approval(&run_id, ApprovalDecision::Rejected, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    assert_eq!(engine.snapshot(&run_id).await.unwrap(), settled);
}

#[tokio::test]
async fn test_execution_failure_is_terminal() {
    let script = Script::new();
    script.fail_execution("push rejected");
    let engine = engine(&script);
    let run_id = started(&engine, UseCase::DocGeneration).await;

    let err = engine.advance(&run_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Collaborator { .. }));
    let state = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(state.phase(), RunPhase::Failed);
    assert_eq!(state.agent_status("executor"), Some(AgentStatus::Failed));
    assert!(state.pr_url().is_none());
}

#[tokio::test]
async fn test_events_are_ordered_and_self_describing() {
    let script = Script::new();
    let (tx, mut rx) = mpsc::channel(256);
    let engine = Engine::builder(EngineConfig::default())
        .with_collaborator(script.clone())
        .with_event_channel(tx)
        .build()
        .unwrap();
    let run_id = started(&engine, UseCase::DocGeneration).await;
    engine.advance(&run_id).await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(events[0].kind, RunEventKind::Log);
    assert_eq!(events[0].delta.phase, RunPhase::ContextReady);
    assert_eq!(events[1].kind, RunEventKind::RunStarted);
    assert_eq!(events.last().unwrap().kind, RunEventKind::RunCompleted);
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));

    // Every phase the run passed through was published
    let mut phases: Vec<RunPhase> = events.iter().map(|e| e.delta.phase).collect();
    phases.dedup();
    assert_eq!(
        phases,
        vec![
            RunPhase::ContextReady,
            RunPhase::Generating,
            RunPhase::Evaluating,
            RunPhase::Executing,
            RunPhase::Done,
        ]
    );

    let last = events.last().unwrap();
    assert_eq!(last.delta.phase, RunPhase::Done);
    assert!(last.delta.pr_url.is_some());
    assert_eq!(last.delta.agent_statuses.len(), 4);
}

#[tokio::test]
async fn test_late_subscriber_gets_latest_snapshot() {
    let script = Script::new();
    let engine = engine(&script);
    let run_id = started(&engine, UseCase::BotTeamSpec).await;
    engine.advance(&run_id).await.unwrap();

    let sub = engine.subscribe(&run_id).await.unwrap();
    let latest = sub.latest.unwrap();
    assert_eq!(latest.kind, RunEventKind::ApprovalRequired);
    assert_eq!(latest.delta.approval_status, Some(ApprovalStatus::Pending));

    engine.cancel(&run_id).await.unwrap();
    let mut finished = engine.subscribe(&run_id).await.unwrap();
    assert_eq!(finished.latest.unwrap().kind, RunEventKind::RunFailed);
    assert!(finished.receiver.recv().await.is_err());
}

#[tokio::test]
async fn test_concurrent_advance_runs_graph_once() {
    let script = Script::new();
    script.step(Ba, Step::Delay(50));
    let engine = Arc::new(engine(&script));
    let run_id = started(&engine, UseCase::DocGeneration).await;

    let a = {
        let engine = engine.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move { engine.advance(&run_id).await })
    };
    let b = {
        let engine = engine.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move { engine.advance(&run_id).await })
    };

    assert_eq!(a.await.unwrap().unwrap(), RunOutcome::Done);
    assert_eq!(b.await.unwrap().unwrap(), RunOutcome::Done);
    assert_eq!(script.calls_for(Ba), 1);
    assert_eq!(script.executions(), 1);
}

#[tokio::test]
async fn test_feedback_only_once_on_finished_runs() {
    let script = Script::new();
    let store = Arc::new(MemoryRunStore::new());
    let engine = Engine::builder(EngineConfig::default())
        .with_collaborator(script.clone())
        .with_store(store.clone())
        .build()
        .unwrap();
    let run_id = started(&engine, UseCase::DocGeneration).await;

    let early = assert_err!(
        engine
            .record_feedback(&run_id, Feedback::new(Rating::Good, None))
            .await
    );
    assert!(matches!(early, EngineError::InvalidTransition { .. }));

    engine.advance(&run_id).await.unwrap();
    assert_ok!(
        engine
            .record_feedback(&run_id, Feedback::new(Rating::Good, Some("great".into())))
            .await
    );
    let again = assert_err!(
        engine
            .record_feedback(&run_id, Feedback::new(Rating::Bad, None))
            .await
    );
    assert!(matches!(again, EngineError::InvalidRunState(_)));
    assert_eq!(
        store.feedback(&run_id).unwrap().map(|f| f.rating),
        Some(Rating::Good)
    );
}

#[tokio::test]
async fn test_sqlite_store_keeps_final_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteRunStore::open_at(dir.path().join("runs.db")).unwrap());
    let script = Script::new();
    let engine = Engine::builder(EngineConfig::default())
        .with_collaborator(script.clone())
        .with_store(store.clone())
        .build()
        .unwrap();
    let run_id = started(&engine, UseCase::MediaGeneration).await;
    engine.advance(&run_id).await.unwrap();

    let runs = engine.list_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].phase, RunPhase::Done);

    let reopened = SqliteRunStore::open_at(dir.path().join("runs.db")).unwrap();
    let state = reopened.load(&run_id).unwrap().unwrap();
    assert_eq!(state.phase(), RunPhase::Done);
    assert!(state.pr_url().is_some());
}

fn sqlite_engine(script: &Arc<Script>, path: &std::path::Path) -> Engine {
    Engine::builder(EngineConfig::default())
        .with_collaborator(script.clone())
        .with_store(Arc::new(SqliteRunStore::open_at(path).unwrap()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_pending_approval_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");

    let (approved, cancelled) = {
        let script = Script::new();
        let engine = sqlite_engine(&script, &path);
        let approved = started(&engine, UseCase::BotTeamSpec).await;
        let cancelled = started(&engine, UseCase::WebAppCreation).await;
        for run_id in [&approved, &cancelled] {
            assert_eq!(
                engine.advance(run_id).await.unwrap(),
                RunOutcome::AwaitingApproval
            );
        }
        (approved, cancelled)
    };

    let script = Script::new();
    let engine = sqlite_engine(&script, &path);
    assert_eq!(
        engine.advance(&approved).await.unwrap(),
        RunOutcome::AwaitingApproval
    );

    let phase = engine
        .resume_after_approval(&approved, ApprovalDecision::Approved, None)
        .await
        .unwrap();
    assert_eq!(phase, RunPhase::Executing);
    assert_eq!(engine.advance(&approved).await.unwrap(), RunOutcome::Done);
    assert_eq!(script.executions(), 1);
    assert_eq!(script.calls().len(), 0);

    assert!(engine.cancel(&cancelled).await.unwrap());
    assert!(!engine.cancel(&cancelled).await.unwrap());

    let reopened = SqliteRunStore::open_at(&path).unwrap();
    let done = reopened.load(&approved).unwrap().unwrap();
    assert_eq!(done.phase(), RunPhase::Done);
    let failed = reopened.load(&cancelled).unwrap().unwrap();
    assert_eq!(failed.phase(), RunPhase::Failed);
    assert_eq!(failed.error(), Some("cancelled"));
    assert_eq!(failed.approval_status(), Some(ApprovalStatus::Rejected));
}

#[tokio::test]
async fn test_interrupted_generation_reruns_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");

    let run_id = {
        let script = Script::new();
        script.step(Ba, Step::Hang);
        let engine = Arc::new(sqlite_engine(&script, &path));
        let run_id = started(&engine, UseCase::DocGeneration).await;
        let driver = {
            let engine = engine.clone();
            let run_id = run_id.clone();
            tokio::spawn(async move { engine.advance(&run_id).await })
        };
        wait_for_status(&engine, &run_id, Ba, AgentStatus::Running).await;
        driver.abort();
        run_id
    };

    let script = Script::new();
    let engine = sqlite_engine(&script, &path);
    let stale = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(stale.agent_status("ba"), Some(AgentStatus::Running));

    assert_eq!(engine.advance(&run_id).await.unwrap(), RunOutcome::Done);
    assert_eq!(script.calls_for(Ba), 1);
    let state = engine.snapshot(&run_id).await.unwrap();
    assert_eq!(state.agent_status("ba"), Some(AgentStatus::Done));
}
