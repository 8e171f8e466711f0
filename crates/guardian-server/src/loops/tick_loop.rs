//! Slow scheduling tick.
//!
//! Enforces phase timeouts, refreshes advisories, reruns the runway schedule
//! and broadcasts the traffic and runway snapshots.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::Config;
use crate::state::AppState;

pub async fn run_tick_loop(state: Arc<AppState>, config: Config, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(Duration::from_millis(config.tick_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Tick loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let envelopes = state.with_engine(|engine| engine.tick(Utc::now()));
                if !envelopes.is_empty() {
                    tracing::trace!("Tick produced {} message(s)", envelopes.len());
                }
                state.deliver(envelopes, None);
            }
        }
    }
}
