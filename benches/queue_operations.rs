//! Performance benchmarks for queue operations and match formation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pug_queue::queue::{assign_teams, select_region, MatchmakingQueue, QueueConfig, QueueState};
use pug_queue::types::{PlayerRef, ReadyOutcome};
use std::time::Duration;

const REGIONS: &[&str] = &["Sydney", "Perth", "Melbourne", "Sydney", "Auckland"];

fn bench_players(count: usize) -> Vec<PlayerRef> {
    (0..count)
        .map(|i| {
            PlayerRef::new(format!("bench_{}", i), format!("Bench {}", i))
                .with_region(REGIONS[i % REGIONS.len()])
        })
        .collect()
}

fn bench_config(capacity: usize) -> QueueConfig {
    QueueConfig {
        capacity,
        ready_check_timeout: Duration::from_secs(60),
        ..QueueConfig::default()
    }
}

fn bench_formation(c: &mut Criterion) {
    let mut group = c.benchmark_group("formation");

    for size in [2usize, 8, 16] {
        let players = bench_players(size);
        group.bench_with_input(BenchmarkId::new("assign_teams", size), &players, |b, players| {
            b.iter(|| assign_teams(black_box(players)))
        });
        group.bench_with_input(BenchmarkId::new("select_region", size), &players, |b, players| {
            b.iter(|| select_region(black_box(players), "Sydney"))
        });
    }

    group.finish();
}

fn bench_state_operations(c: &mut Criterion) {
    let players = bench_players(8);
    let now = chrono::Utc::now();

    c.bench_function("state_join_leave_cycle", |b| {
        let mut state = QueueState::new(bench_config(8));
        b.iter(|| {
            for player in players.iter().take(7) {
                black_box(state.join(player.clone(), now));
            }
            for player in players.iter().take(7) {
                black_box(state.leave(&player.id));
            }
        })
    });

    c.bench_function("state_fill_and_ready", |b| {
        b.iter(|| {
            let mut state = QueueState::new(bench_config(8));
            for player in &players {
                state.join(player.clone(), now);
            }
            let mut formed = None;
            for player in &players {
                formed = Some(state.mark_ready(&player.id, now));
            }
            black_box(formed)
        })
    });

    c.bench_function("state_snapshot", |b| {
        let mut state = QueueState::new(bench_config(8));
        for player in players.iter().take(6) {
            state.join(player.clone(), now);
        }
        b.iter(|| black_box(state.snapshot(now)))
    });
}

fn bench_queue_manager(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    // The ready-check timer is spawned onto the current runtime
    let _guard = runtime.enter();
    let players = bench_players(8);

    c.bench_function("queue_fill_ready_release", |b| {
        let queue = MatchmakingQueue::new(bench_config(8));
        b.iter(|| {
            for player in &players {
                queue.join(player.clone()).unwrap();
            }
            let mut formation_id = None;
            for player in &players {
                if let ReadyOutcome::MatchFormed { formation } = queue.mark_ready(&player.id).unwrap() {
                    formation_id = Some(formation.formation_id);
                }
            }
            if let Some(formation_id) = formation_id {
                queue.release_match(formation_id).unwrap();
            }
        })
    });

    c.bench_function("queue_status", |b| {
        let queue = MatchmakingQueue::new(bench_config(8));
        for player in players.iter().take(5) {
            queue.join(player.clone()).unwrap();
        }
        b.iter(|| black_box(queue.status().unwrap()))
    });
}

criterion_group!(
    benches,
    bench_formation,
    bench_state_operations,
    bench_queue_manager
);
criterion_main!(benches);
