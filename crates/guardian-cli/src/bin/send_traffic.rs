//! CLI tool to fly scripted traffic against the coordination server.
//!
//! Every simulated aircraft gets its own WebSocket session, reports its
//! position at a fixed rate and prints what the server tells it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use futures_util::{SinkExt, StreamExt};
use guardian_cli::sim::scenarios::{
    create_approach_scenario, create_crossing_scenario, create_head_on_scenario,
};
use guardian_cli::sim::SimAircraft;
use guardian_core::{InboundMessage, LatLon, OutboundMessage, PositionReport, RunwayAction, RunwayRequest};
use tokio::time;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScenarioKind {
    HeadOn,
    Crossing,
    Approach,
}

/// Fly a traffic scenario against the Air Guardian server
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server WebSocket URL
    #[arg(long, default_value = "ws://localhost:3000/v1/ws")]
    url: String,

    #[arg(long, value_enum, default_value_t = ScenarioKind::HeadOn)]
    scenario: ScenarioKind,

    /// Scenario centre, or the active threshold for `approach`
    #[arg(long, default_value_t = -34.6)]
    lat: f64,

    #[arg(long, default_value_t = -58.4)]
    lon: f64,

    /// Landing direction of the active runway (approach only)
    #[arg(long, default_value_t = 90.0)]
    runway_heading: f64,

    /// Duration in seconds
    #[arg(long, default_value_t = 120)]
    duration: u64,

    /// Update rate in Hz
    #[arg(long, default_value_t = 1.0)]
    rate: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    anyhow::ensure!(args.rate > 0.0, "--rate must be positive");

    let center = LatLon::new(args.lat, args.lon);
    let scenario = match args.scenario {
        ScenarioKind::HeadOn => create_head_on_scenario(center),
        ScenarioKind::Crossing => create_crossing_scenario(center),
        ScenarioKind::Approach => create_approach_scenario(center, args.runway_heading),
    };

    println!("Running scenario '{}' against {}", scenario.name, args.url);
    println!("  Aircraft: {}", scenario.aircraft.len());
    println!("  Duration: {}s, Update rate: {}Hz", args.duration, args.rate);
    println!();

    let args = Arc::new(args);
    let mut tasks = Vec::new();
    for sim in scenario.aircraft {
        tasks.push(tokio::spawn(fly(sim, args.clone())));
    }

    for task in tasks {
        match task.await {
            Ok(Ok(sent)) => println!("Pilot finished after {} reports", sent),
            Ok(Err(e)) => eprintln!("Pilot failed: {:#}", e),
            Err(e) => eprintln!("Pilot task panicked: {}", e),
        }
    }

    println!("\nSimulation complete.");
    Ok(())
}

async fn fly(sim: SimAircraft, args: Arc<Args>) -> anyhow::Result<u32> {
    let (socket, _) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("{} could not connect", sim.id))?;
    let (mut sink, mut stream) = socket.split();

    let reader_id = sim.id.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            if let Message::Text(text) = frame {
                if let Ok(message) = serde_json::from_str::<OutboundMessage>(&text) {
                    print_inbound(&reader_id, &message);
                }
            }
        }
    });

    let start = time::Instant::now();
    let mut sent = 0u32;
    let mut interval = time::interval(Duration::from_secs_f64(1.0 / args.rate));

    loop {
        interval.tick().await;

        let elapsed = start.elapsed().as_secs_f64();
        if elapsed > args.duration as f64 {
            break;
        }

        let (at, altitude) = sim.path.position(elapsed);
        let report = PositionReport {
            id: sim.id.clone(),
            latitude: at.lat,
            longitude: at.lon,
            altitude,
            heading: sim.path.heading(elapsed),
            speed: if sim.path.finished(elapsed) { 0.0 } else { sim.path.speed_kmh() },
            category: sim.category.clone(),
            callsign: sim.id.clone(),
            icon: "2.png".to_string(),
        };
        send(&mut sink, &InboundMessage::Position(report)).await?;
        sent += 1;

        if sent == 1 && sim.request_landing {
            let request = RunwayRequest {
                action: RunwayAction::Land,
                id: sim.id.clone(),
                callsign: sim.id.clone(),
                category: sim.category.clone(),
                emergency: false,
                altitude: Some(altitude),
                ready: false,
            };
            send(&mut sink, &InboundMessage::RunwayRequest(request)).await?;
            println!("[{}] Requested landing", sim.id);
        }
    }

    send(&mut sink, &InboundMessage::Leave).await?;
    sink.close().await.ok();
    reader.abort();
    Ok(sent)
}

async fn send<S>(sink: &mut S, message: &InboundMessage) -> anyhow::Result<()>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = serde_json::to_string(message)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

fn print_inbound(id: &str, message: &OutboundMessage) {
    match message {
        OutboundMessage::Conflict(warning) => println!(
            "[{}] {:?} with {} at {:.0} m (tti {:?})",
            id, warning.alert_level, warning.other_id, warning.distance_m, warning.time_to_impact_secs
        ),
        OutboundMessage::ConflictClear { other_id, .. } => {
            println!("[{}] Clear of {}", id, other_id)
        }
        OutboundMessage::Instruction(instruction) => println!("[{}] Instruction: {}", id, instruction.text),
        OutboundMessage::TurnOrder { text, .. } => println!("[{}] {}", id, text),
        OutboundMessage::AircraftRemoved { id: removed } => println!("[{}] {} left", id, removed),
        _ => {}
    }
}
