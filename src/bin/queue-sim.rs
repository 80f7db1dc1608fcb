//! Queue Simulator CLI Tool
//!
//! Drives the queue, ready check and orchestrator in-process against the
//! simulated provisioner, printing every event the gateway would receive.
//!
//! Usage:
//!   cargo run --bin queue-sim -- --help
//!   cargo run --bin queue-sim full-match --players 8
//!   cargo run --bin queue-sim timeout --ready 5
//!   cargo run --bin queue-sim force-start --players 5
//!   cargo run --bin queue-sim provision-failure
//!   cargo run --bin queue-sim run-all

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pug_queue::amqp::MockEventPublisher;
use pug_queue::orchestrator::{InMemoryRecordStore, MatchOrchestrator, OrchestratorConfig};
use pug_queue::provisioning::SimulatedProvisioner;
use pug_queue::queue::{MatchmakingQueue, QueueConfig};
use pug_queue::service::CommandDispatcher;
use pug_queue::types::*;
use std::sync::Arc;
use std::time::Duration;

const REGIONS: &[&str] = &["Sydney", "Sydney", "Perth", "Sydney", "Melbourne"];

#[derive(Parser)]
#[command(name = "queue-sim")]
#[command(about = "Simulate pick-up game queue scenarios without a broker or cloud provider")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Queue capacity
    #[arg(long, default_value = "8")]
    capacity: usize,

    /// Ready-check timeout in seconds
    #[arg(long, default_value = "2")]
    ready_timeout: u64,

    /// Print full event payloads as JSON
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill the queue, ready everyone, start and complete a match
    FullMatch {
        #[arg(short, long)]
        players: Option<usize>,
    },
    /// Fill the queue and let the ready check expire
    Timeout {
        /// Players who ready up before the deadline
        #[arg(short, long, default_value = "3")]
        ready: usize,
    },
    /// Start a match with fewer players than capacity
    ForceStart {
        #[arg(short, long, default_value = "4")]
        players: usize,
    },
    /// Form a match whose server never comes up
    ProvisionFailure,
    /// Run every scenario in turn
    RunAll,
}

struct Simulation {
    dispatcher: CommandDispatcher,
    publisher: Arc<MockEventPublisher>,
    provisioner: Arc<SimulatedProvisioner>,
    verbose: bool,
    next_request: usize,
}

impl Simulation {
    fn new(cli: &Cli, provisioner: SimulatedProvisioner) -> Self {
        let queue = MatchmakingQueue::new(QueueConfig {
            capacity: cli.capacity,
            ready_check_timeout: Duration::from_secs(cli.ready_timeout),
            force_start_minimum: 2,
            ..QueueConfig::default()
        });
        let provisioner = Arc::new(provisioner);
        let orchestrator = Arc::new(MatchOrchestrator::new(
            queue,
            provisioner.clone(),
            Arc::new(InMemoryRecordStore::default()),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(100),
                max_poll_attempts: 5,
                ..OrchestratorConfig::default()
            },
        ));
        let publisher = Arc::new(MockEventPublisher::new());
        let dispatcher = CommandDispatcher::new(orchestrator, publisher.clone());

        Self {
            dispatcher,
            publisher,
            provisioner,
            verbose: cli.verbose,
            next_request: 1,
        }
    }

    async fn send(&mut self, command: QueueCommand) -> Result<CommandReply> {
        let request_id = format!("sim-{}", self.next_request);
        self.next_request += 1;

        let reply = self
            .dispatcher
            .dispatch(CommandEnvelope {
                request_id,
                command: command.clone(),
                timestamp: chrono::Utc::now(),
            })
            .await?;

        println!(
            "  → {:<15} queue={}/{}  {}",
            command.name(),
            reply.queue.size,
            reply.queue.capacity,
            describe_outcome(&reply.outcome)
        );
        Ok(reply)
    }

    async fn join_players(&mut self, count: usize) -> Result<()> {
        for i in 1..=count {
            self.send(QueueCommand::Join {
                player_id: format!("{}", 1000 + i),
                display_name: format!("Player{}", i),
                region: Some(REGIONS[i % REGIONS.len()].to_string()),
            })
            .await?;
        }
        Ok(())
    }

    async fn ready_players(&mut self, count: usize) -> Result<()> {
        for i in 1..=count {
            self.send(QueueCommand::Ready {
                player_id: format!("{}", 1000 + i),
            })
            .await?;
        }
        Ok(())
    }

    fn drain_events(&self) -> Vec<GatewayEvent> {
        let events: Vec<GatewayEvent> = self
            .publisher
            .get_published_events()
            .into_iter()
            .filter(|event| !matches!(event, GatewayEvent::CommandReply(_)))
            .collect();
        self.publisher.clear_events();

        for event in &events {
            println!("  📣 {}", describe_event(event));
            if self.verbose {
                if let Ok(json) = serde_json::to_string_pretty(event) {
                    println!("{}", json);
                }
            }
        }
        events
    }
}

fn describe_outcome(outcome: &CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Join(JoinOutcome::Accepted { position, .. }) => {
            format!("joined at #{}", position)
        }
        CommandOutcome::Join(other) => format!("{:?}", other),
        CommandOutcome::Ready(ReadyOutcome::Accepted {
            ready_count,
            required,
        }) => format!("ready {}/{}", ready_count, required),
        CommandOutcome::Ready(ReadyOutcome::MatchFormed { formation }) => {
            format!("match formed in {}", formation.region)
        }
        CommandOutcome::ForceStart {
            formation: Some(formation),
        } => format!("forced {}-player match", formation.size()),
        CommandOutcome::CompleteMatch { result } => {
            format!("{} after {} min", result.status, result.duration_minutes)
        }
        CommandOutcome::Profile {
            profile: Some(profile),
        } => format!(
            "{}: {} matches, {}W/{}L",
            profile.player.display_name, profile.total_matches, profile.wins, profile.losses
        ),
        CommandOutcome::RecentMatches { matches } => format!("{} recent matches", matches.len()),
        CommandOutcome::Servers { servers } => format!("{} servers running", servers.len()),
        CommandOutcome::Rejected { reason } => format!("rejected: {}", reason),
        other => format!("{:?}", other),
    }
}

fn describe_event(event: &GatewayEvent) -> String {
    match event {
        GatewayEvent::ReadyCheckStarted(e) => {
            format!("ready check started for {} players", e.players.len())
        }
        GatewayEvent::ReadyCheckCancelled(e) => format!(
            "ready check cancelled ({}), {} were ready",
            e.reason, e.ready_count
        ),
        GatewayEvent::MatchStarted(e) => format!(
            "match {} started on {} (red {} vs blue {})",
            e.record.match_id,
            e.record.server.public_address,
            e.record.formation.red_team().len(),
            e.record.formation.blue_team().len()
        ),
        GatewayEvent::MatchFailed(e) => format!("match failed: {}", e.reason),
        GatewayEvent::MatchCompleted(e) => format!("match completed: {}", e.result.status),
        GatewayEvent::CommandReply(reply) => format!("reply {}", reply.request_id),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn full_match(cli: &Cli, players: Option<usize>) -> Result<()> {
    println!("🎮 Scenario: full match");
    let mut sim = Simulation::new(cli, SimulatedProvisioner::new());
    let forwarder = sim.dispatcher.spawn_event_forwarder();

    let players = players.unwrap_or(cli.capacity);
    if players != cli.capacity {
        bail!("full-match needs exactly {} players", cli.capacity);
    }

    sim.join_players(players).await?;
    sim.ready_players(players).await?;
    sim.dispatcher.wait_for_match_starts().await?;
    settle().await;

    let match_id = sim
        .drain_events()
        .iter()
        .find_map(|event| match event {
            GatewayEvent::MatchStarted(started) => Some(started.record.match_id),
            _ => None,
        });
    let Some(match_id) = match_id else {
        bail!("match never started");
    };

    sim.send(QueueCommand::Servers).await?;
    sim.send(QueueCommand::CompleteMatch {
        match_id,
        outcome: MatchOutcome::Completed {
            winner: Some(Team::Red),
        },
    })
    .await?;
    sim.send(QueueCommand::RecentMatches { limit: 5 }).await?;
    sim.drain_events();

    forwarder.abort();
    println!("✅ Full match scenario complete\n");
    Ok(())
}

async fn timeout(cli: &Cli, ready: usize) -> Result<()> {
    println!("⏱️  Scenario: ready check timeout");
    let mut sim = Simulation::new(cli, SimulatedProvisioner::new());
    let forwarder = sim.dispatcher.spawn_event_forwarder();

    sim.join_players(cli.capacity).await?;
    sim.ready_players(ready.min(cli.capacity.saturating_sub(1))).await?;

    println!("  … waiting {}s for the deadline", cli.ready_timeout);
    tokio::time::sleep(Duration::from_secs(cli.ready_timeout) + Duration::from_millis(200)).await;
    sim.drain_events();

    let reply = sim.send(QueueCommand::Status).await?;
    println!(
        "  queue still holds {} players, ready check active: {}",
        reply.queue.size, reply.queue.ready_check_active
    );

    forwarder.abort();
    println!("✅ Timeout scenario complete\n");
    Ok(())
}

async fn force_start(cli: &Cli, players: usize) -> Result<()> {
    println!("⏩ Scenario: force start");
    let mut sim = Simulation::new(cli, SimulatedProvisioner::new());

    sim.join_players(players.min(cli.capacity.saturating_sub(1)))
        .await?;
    sim.send(QueueCommand::ForceStart { minimum: None }).await?;
    sim.dispatcher.wait_for_match_starts().await?;
    sim.drain_events();

    println!(
        "  servers requested: {}",
        sim.provisioner.requests()?.len()
    );
    println!("✅ Force start scenario complete\n");
    Ok(())
}

async fn provision_failure(cli: &Cli) -> Result<()> {
    println!("💥 Scenario: provisioning failure");
    let mut sim = Simulation::new(cli, SimulatedProvisioner::new().never_ready());

    sim.join_players(cli.capacity).await?;
    sim.ready_players(cli.capacity).await?;
    sim.dispatcher.wait_for_match_starts().await?;
    sim.drain_events();

    let reply = sim
        .send(QueueCommand::Join {
            player_id: "late".to_string(),
            display_name: "Latecomer".to_string(),
            region: None,
        })
        .await?;
    println!(
        "  queue re-opened: {}",
        !reply.queue.match_in_progress
    );
    println!("✅ Provisioning failure scenario complete\n");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    if cli.capacity < 2 {
        bail!("capacity must be at least 2");
    }

    match &cli.command {
        Commands::FullMatch { players } => full_match(&cli, *players).await,
        Commands::Timeout { ready } => timeout(&cli, *ready).await,
        Commands::ForceStart { players } => force_start(&cli, *players).await,
        Commands::ProvisionFailure => provision_failure(&cli).await,
        Commands::RunAll => {
            full_match(&cli, None).await?;
            timeout(&cli, 3).await?;
            force_start(&cli, 4).await?;
            provision_failure(&cli).await?;
            println!("🏁 All scenarios passed");
            Ok(())
        }
    }
}
