//! Integration tests for the PUG queue service
//!
//! These tests drive the dispatcher, queue and orchestrator together with an
//! in-memory record store, a scripted provisioner and the mock publisher:
//! - Full queue, ready check and match lifecycle
//! - Ready-check expiry and recovery
//! - Forced starts and resets
//! - Provisioning failures re-opening the queue

mod fixtures;

use fixtures::{
    envelope, failed, join_command, ready_command, running, settle, ScriptedProvisioner,
    TestSystem,
};
use pug_queue::orchestrator::MatchRecordStore;
use pug_queue::provisioning::SimulatedProvisioner;
use pug_queue::types::*;
use std::sync::Arc;
use std::time::Duration;

async fn join_all(system: &TestSystem, count: usize) {
    for i in 1..=count {
        let reply = system.dispatcher.dispatch(envelope(join_command(i))).await.unwrap();
        assert!(
            matches!(reply.outcome, CommandOutcome::Join(JoinOutcome::Accepted { .. })),
            "player {} was not accepted: {:?}",
            i,
            reply.outcome
        );
    }
}

async fn ready_all(system: &TestSystem, count: usize) -> Option<MatchFormation> {
    let mut formed = None;
    for i in 1..=count {
        let reply = system.dispatcher.dispatch(envelope(ready_command(i))).await.unwrap();
        if let CommandOutcome::Ready(ReadyOutcome::MatchFormed { formation }) = reply.outcome {
            formed = Some(formation);
        }
    }
    formed
}

fn started_match(system: &TestSystem) -> Option<MatchRecord> {
    system.gateway_events().into_iter().find_map(|event| match event {
        GatewayEvent::MatchStarted(started) => Some(started.record),
        _ => None,
    })
}

fn failure_reason(system: &TestSystem) -> Option<ProvisionFailure> {
    system.gateway_events().into_iter().find_map(|event| match event {
        GatewayEvent::MatchFailed(failed) => Some(failed.reason),
        _ => None,
    })
}

#[tokio::test]
async fn test_complete_match_workflow() {
    let provisioner = Arc::new(ScriptedProvisioner::ready_after(2));
    let system = TestSystem::new(4, provisioner.clone());
    let forwarder = system.dispatcher.spawn_event_forwarder();

    // Step 1: fill the queue
    join_all(&system, 4).await;
    settle().await;

    let status = system.queue.status().unwrap();
    assert_eq!(status.size, 4);
    assert!(status.ready_check_active);

    // Step 2: everyone confirms
    let formation = ready_all(&system, 4).await.expect("last ready forms the match");
    assert_eq!(formation.size(), 4);
    assert_eq!(formation.kind, FormationKind::ReadyCheck);
    assert_eq!(formation.region, "Sydney");
    assert_eq!(formation.red_team().len(), 2);
    assert_eq!(formation.blue_team().len(), 2);
    assert_eq!(formation.team_of("101"), Some(Team::Red));
    assert_eq!(formation.team_of("104"), Some(Team::Blue));

    // Step 3: server comes up
    system.dispatcher.wait_for_match_starts().await.unwrap();
    settle().await;

    let record = started_match(&system).expect("MatchStarted published");
    assert_eq!(record.server.public_address, "203.0.113.10");
    assert_eq!(record.map_name, "dm4");
    assert_eq!(provisioner.requests(), vec![("Sydney".to_string(), "dm4".to_string())]);
    assert_eq!(provisioner.poll_count(), 3);
    assert!(system.queue.status().unwrap().match_in_progress);

    let event_types: Vec<&str> = system
        .gateway_events()
        .iter()
        .map(|event| match event {
            GatewayEvent::ReadyCheckStarted(_) => "ReadyCheckStarted",
            GatewayEvent::MatchStarted(_) => "MatchStarted",
            _ => "other",
        })
        .collect();
    assert_eq!(event_types, vec!["ReadyCheckStarted", "MatchStarted"]);

    // Step 4: nobody can join while the match runs
    let reply = system.dispatcher.dispatch(envelope(join_command(9))).await.unwrap();
    assert_eq!(reply.outcome, CommandOutcome::Join(JoinOutcome::MatchInProgress));

    // Step 5: close it out
    let reply = system
        .dispatcher
        .dispatch(envelope(QueueCommand::CompleteMatch {
            match_id: record.match_id,
            outcome: MatchOutcome::Completed {
                winner: Some(Team::Red),
            },
        }))
        .await
        .unwrap();

    match reply.outcome {
        CommandOutcome::CompleteMatch { result } => {
            assert_eq!(result.status, MatchStatus::Completed);
            assert_eq!(result.winner, Some(Team::Red));
            assert_eq!(result.red_team, vec!["101".to_string(), "102".to_string()]);
            assert_eq!(result.blue_team, vec!["103".to_string(), "104".to_string()]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!reply.queue.match_in_progress);
    assert!(system
        .gateway_events()
        .iter()
        .any(|event| matches!(event, GatewayEvent::MatchCompleted(_))));

    // Step 6: statistics were updated
    let winner = system.records.player_profile("101").await.unwrap().unwrap();
    assert_eq!(winner.total_matches, 1);
    assert_eq!(winner.wins, 1);
    assert_eq!(winner.win_rate, 100.0);

    let loser = system.records.player_profile("104").await.unwrap().unwrap();
    assert_eq!(loser.losses, 1);
    assert_eq!(loser.win_rate, 0.0);

    let recent = system.records.recent_matches(5).await.unwrap();
    assert_eq!(recent.len(), 1);

    // Step 7: the queue is open again
    let reply = system.dispatcher.dispatch(envelope(join_command(1))).await.unwrap();
    assert!(matches!(
        reply.outcome,
        CommandOutcome::Join(JoinOutcome::Accepted { position: 1, .. })
    ));

    forwarder.abort();
    println!("✅ Complete match workflow test passed");
}

#[tokio::test(start_paused = true)]
async fn test_ready_check_timeout_keeps_players_queued() {
    let system = TestSystem::with_timeout(
        4,
        Duration::from_secs(60),
        Arc::new(SimulatedProvisioner::new()),
    );
    let forwarder = system.dispatcher.spawn_event_forwarder();

    join_all(&system, 4).await;
    for i in 1..=2 {
        system.dispatcher.dispatch(envelope(ready_command(i))).await.unwrap();
    }

    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;

    let cancelled = system
        .gateway_events()
        .into_iter()
        .find_map(|event| match event {
            GatewayEvent::ReadyCheckCancelled(cancelled) => Some(cancelled),
            _ => None,
        })
        .expect("ReadyCheckCancelled published");
    assert_eq!(cancelled.reason, CancelReason::Timeout);
    assert_eq!(cancelled.ready_count, 2);
    assert_eq!(cancelled.remaining.len(), 4);

    let status = system.queue.status().unwrap();
    assert_eq!(status.size, 4);
    assert!(!status.ready_check_active);
    assert!(!status.match_in_progress);

    // Late confirmations have nothing to attach to
    let reply = system.dispatcher.dispatch(envelope(ready_command(3))).await.unwrap();
    assert_eq!(reply.outcome, CommandOutcome::Ready(ReadyOutcome::NoActiveCheck));

    // Refilling the queue starts a fresh check
    system.dispatcher.dispatch(envelope(QueueCommand::Leave {
        player_id: "104".to_string(),
    }))
    .await
    .unwrap();
    let reply = system.dispatcher.dispatch(envelope(join_command(5))).await.unwrap();
    match reply.outcome {
        CommandOutcome::Join(JoinOutcome::Accepted { ready_check, .. }) => {
            let check = ready_check.expect("full queue starts a new check");
            assert_ne!(check.check_id, cancelled.check_id);
            assert_eq!(check.players.len(), 4);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    forwarder.abort();
    println!("✅ Ready check timeout test passed");
}

#[tokio::test]
async fn test_leaving_during_ready_check_keeps_it_running() {
    let system = TestSystem::new(4, Arc::new(SimulatedProvisioner::new()));

    join_all(&system, 4).await;
    system.dispatcher.dispatch(envelope(ready_command(1))).await.unwrap();

    let reply = system
        .dispatcher
        .dispatch(envelope(QueueCommand::Leave {
            player_id: "101".to_string(),
        }))
        .await
        .unwrap();

    assert_eq!(
        reply.outcome,
        CommandOutcome::Leave(LeaveOutcome::Removed {
            queue_size: 3,
            was_ready: true,
        })
    );
    assert!(reply.queue.ready_check_active);
    assert_eq!(reply.queue.ready_count, Some(0));

    // Rejoining does not restore the earlier confirmation
    let reply = system.dispatcher.dispatch(envelope(join_command(1))).await.unwrap();
    assert!(matches!(
        reply.outcome,
        CommandOutcome::Join(JoinOutcome::Accepted {
            position: 4,
            ready_check: None,
            ..
        })
    ));
    assert_eq!(reply.queue.ready_count, Some(0));

    let formation = ready_all(&system, 4).await.expect("check still completes");
    let order: Vec<&str> = formation.players.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(order, vec!["102", "103", "104", "101"]);
    system.dispatcher.wait_for_match_starts().await.unwrap();
}

#[tokio::test]
async fn test_provider_failure_reopens_queue() {
    let provisioner = Arc::new(ScriptedProvisioner::failing_requests("quota exceeded"));
    let system = TestSystem::new(4, provisioner.clone());

    join_all(&system, 4).await;
    ready_all(&system, 4).await.expect("match forms");
    system.dispatcher.wait_for_match_starts().await.unwrap();

    match failure_reason(&system) {
        Some(ProvisionFailure::Provider { message }) => {
            assert!(message.contains("quota exceeded"));
        }
        other => panic!("expected provider failure, got {:?}", other),
    }
    assert!(started_match(&system).is_none());
    assert!(system.orchestrator.active_match().unwrap().is_none());

    let reply = system.dispatcher.dispatch(envelope(join_command(7))).await.unwrap();
    assert!(matches!(
        reply.outcome,
        CommandOutcome::Join(JoinOutcome::Accepted { position: 1, .. })
    ));

    // The failed attempt is recorded without touching player statistics
    let recent = system.records.recent_matches(1).await.unwrap();
    assert_eq!(recent[0].status, MatchStatus::Failed);
    let profile = system.records.player_profile("101").await.unwrap().unwrap();
    assert_eq!(profile.total_matches, 0);
}

#[tokio::test]
async fn test_instance_entering_failed_state() {
    let provisioner = Arc::new(ScriptedProvisioner::new(vec![
        fixtures::pending(),
        failed("terminated"),
    ]));
    let system = TestSystem::new(2, provisioner.clone());

    join_all(&system, 2).await;
    ready_all(&system, 2).await.expect("match forms");
    system.dispatcher.wait_for_match_starts().await.unwrap();

    match failure_reason(&system) {
        Some(ProvisionFailure::InstanceFailed { status, .. }) => assert_eq!(status, "terminated"),
        other => panic!("expected instance failure, got {:?}", other),
    }
    assert_eq!(provisioner.poll_count(), 2);
    // Once before the request and once to clean up the dead instance
    assert_eq!(provisioner.termination_count(), 2);
    assert!(!system.queue.status().unwrap().match_in_progress);
}

#[tokio::test]
async fn test_server_never_becomes_ready() {
    let provisioner = Arc::new(ScriptedProvisioner::new(vec![fixtures::pending()]));
    let system = TestSystem::new(2, provisioner.clone());

    join_all(&system, 2).await;
    ready_all(&system, 2).await.expect("match forms");
    system.dispatcher.wait_for_match_starts().await.unwrap();

    match failure_reason(&system) {
        Some(ProvisionFailure::ReadinessTimeout { attempts, .. }) => assert_eq!(attempts, 4),
        other => panic!("expected readiness timeout, got {:?}", other),
    }
    assert_eq!(provisioner.poll_count(), 4);
    assert!(!system.queue.status().unwrap().match_in_progress);
}

#[tokio::test]
async fn test_force_start_supersedes_ready_check() {
    let provisioner = Arc::new(ScriptedProvisioner::new(vec![running("198.51.100.7")]));
    let system = TestSystem::new(4, provisioner);
    let forwarder = system.dispatcher.spawn_event_forwarder();

    join_all(&system, 4).await;
    system.dispatcher.dispatch(envelope(ready_command(1))).await.unwrap();

    let reply = system
        .dispatcher
        .dispatch(envelope(QueueCommand::ForceStart { minimum: None }))
        .await
        .unwrap();

    let formation = match reply.outcome {
        CommandOutcome::ForceStart {
            formation: Some(formation),
        } => formation,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(formation.kind, FormationKind::Forced);
    assert_eq!(formation.size(), 4);
    assert_eq!(reply.queue.size, 0);

    system.dispatcher.wait_for_match_starts().await.unwrap();
    settle().await;

    let reasons: Vec<CancelReason> = system
        .gateway_events()
        .into_iter()
        .filter_map(|event| match event {
            GatewayEvent::ReadyCheckCancelled(cancelled) => Some(cancelled.reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec![CancelReason::Superseded]);

    let record = started_match(&system).expect("forced match starts");
    assert_eq!(record.server.public_address, "198.51.100.7");

    // A second force start is refused while the match runs
    let reply = system
        .dispatcher
        .dispatch(envelope(QueueCommand::ForceStart { minimum: None }))
        .await
        .unwrap();
    assert_eq!(reply.outcome, CommandOutcome::ForceStart { formation: None });

    forwarder.abort();
}

#[tokio::test]
async fn test_force_start_below_minimum_is_refused() {
    let system = TestSystem::new(8, Arc::new(SimulatedProvisioner::new()));

    join_all(&system, 1).await;
    let reply = system
        .dispatcher
        .dispatch(envelope(QueueCommand::ForceStart { minimum: None }))
        .await
        .unwrap();

    assert_eq!(reply.outcome, CommandOutcome::ForceStart { formation: None });
    assert_eq!(reply.queue.size, 1);
}

#[tokio::test]
async fn test_reset_clears_queue_and_check() {
    let system = TestSystem::new(3, Arc::new(SimulatedProvisioner::new()));
    let forwarder = system.dispatcher.spawn_event_forwarder();

    join_all(&system, 3).await;
    let reply = system.dispatcher.dispatch(envelope(QueueCommand::Reset)).await.unwrap();

    assert_eq!(reply.outcome, CommandOutcome::Reset);
    assert_eq!(reply.queue.size, 0);
    assert!(!reply.queue.ready_check_active);

    settle().await;
    assert!(system.gateway_events().iter().any(|event| matches!(
        event,
        GatewayEvent::ReadyCheckCancelled(cancelled) if cancelled.reason == CancelReason::Reset
    )));

    forwarder.abort();
}

#[tokio::test]
async fn test_status_reports_ready_progress() {
    let system = TestSystem::new(3, Arc::new(SimulatedProvisioner::new()));

    join_all(&system, 3).await;
    system.dispatcher.dispatch(envelope(ready_command(2))).await.unwrap();

    let reply = system.dispatcher.dispatch(envelope(QueueCommand::Status)).await.unwrap();
    match reply.outcome {
        CommandOutcome::Status { ready: Some(ready) } => {
            assert_eq!(ready.ready_count, 1);
            assert_eq!(ready.required, 3);
            assert_eq!(ready.players_waiting, vec!["101".to_string(), "103".to_string()]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let members: Vec<bool> = reply.queue.members.iter().map(|m| m.ready).collect();
    assert_eq!(members, vec![false, true, false]);
}

#[tokio::test]
async fn test_completing_unknown_match_is_rejected() {
    let system = TestSystem::new(2, Arc::new(SimulatedProvisioner::new()));

    let reply = system
        .dispatcher
        .dispatch(envelope(QueueCommand::CompleteMatch {
            match_id: uuid::Uuid::new_v4(),
            outcome: MatchOutcome::Cancelled,
        }))
        .await
        .unwrap();

    assert!(matches!(reply.outcome, CommandOutcome::Rejected { .. }));
    assert_eq!(system.publisher.get_published_events().len(), 1);
}

#[tokio::test]
async fn test_cancelled_match_does_not_touch_statistics() {
    let system = TestSystem::new(2, Arc::new(ScriptedProvisioner::ready_after(0)));

    join_all(&system, 2).await;
    ready_all(&system, 2).await.expect("match forms");
    system.dispatcher.wait_for_match_starts().await.unwrap();

    let record = started_match(&system).expect("match started");
    let result = system
        .orchestrator
        .complete_match(record.match_id, MatchOutcome::Cancelled)
        .await
        .unwrap();

    assert_eq!(result.status, MatchStatus::Cancelled);
    assert_eq!(result.winner, None);
    let profile = system.records.player_profile("102").await.unwrap().unwrap();
    assert_eq!(profile.total_matches, 0);
    assert!(!system.queue.status().unwrap().match_in_progress);
}
