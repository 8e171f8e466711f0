//! Stale-aircraft sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::config::Config;
use crate::state::AppState;

pub async fn run_presence_loop(state: Arc<AppState>, config: Config, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(Duration::from_secs(config.sweep_interval_secs));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Presence loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let envelopes = state.with_engine(|engine| engine.sweep(Utc::now()));
                if !envelopes.is_empty() {
                    tracing::debug!(
                        "Presence sweep: {} message(s), {} session(s) open",
                        envelopes.len(),
                        state.session_count()
                    );
                }
                state.deliver(envelopes, None);
            }
        }
    }
}
