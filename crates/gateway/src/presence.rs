//! Is the user home?  Either a fixed answer or a periodic probe command
//! (typically a Bluetooth RSSI lookup against the user's phone).

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{PresenceConfig, PresenceMode};
use crate::state::SharedState;

/// Run the probe once.  Home means the command exited successfully within
/// `limit` and printed something; every failure reads as away.
pub async fn probe(command: &[String], limit: Duration) -> bool {
    let Some((program, args)) = command.split_first() else {
        return false;
    };

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match timeout(limit, child).await {
        Ok(Ok(out)) => {
            let home = out.status.success() && !String::from_utf8_lossy(&out.stdout).trim().is_empty();
            debug!(status = %out.status, home, "presence probe");
            home
        }
        Ok(Err(e)) => {
            warn!(%program, "presence probe failed to run: {e}");
            false
        }
        Err(_) => {
            debug!(%program, ?limit, "presence probe timed out");
            false
        }
    }
}

/// Keep `state.presence` current.  Static mode sets it once and returns.
pub async fn run(cfg: PresenceConfig, state: SharedState) {
    match cfg.mode {
        PresenceMode::Static => {
            state.write().await.record_presence(cfg.home);
            info!(home = cfg.home, "presence: static");
        }
        PresenceMode::Command => {
            info!(command = ?cfg.command, poll_sec = cfg.poll_sec, "presence: polling");
            let limit = Duration::from_secs(cfg.timeout_sec);
            let mut ticker = tokio::time::interval(Duration::from_secs(cfg.poll_sec));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let home = probe(&cfg.command, limit).await;
                state.write().await.record_presence(home);
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SystemState;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    const LIMIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn output_means_home() {
        assert!(probe(&cmd(&["echo", "-58"]), LIMIT).await);
    }

    #[tokio::test]
    async fn silent_success_means_away() {
        assert!(!probe(&cmd(&["true"]), LIMIT).await);
    }

    #[tokio::test]
    async fn failure_means_away() {
        assert!(!probe(&cmd(&["sh", "-c", "echo not connected; exit 1"]), LIMIT).await);
    }

    #[tokio::test]
    async fn missing_program_means_away() {
        assert!(!probe(&cmd(&["/nonexistent/probe"]), LIMIT).await);
        assert!(!probe(&[], LIMIT).await);
    }

    #[tokio::test]
    async fn slow_probe_times_out() {
        assert!(!probe(&cmd(&["sleep", "5"]), Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn static_mode_sets_state_once() {
        let state = Arc::new(RwLock::new(SystemState::new(&[], true)));
        let cfg = PresenceConfig {
            home: false,
            ..PresenceConfig::default()
        };
        run(cfg, Arc::clone(&state)).await;
        let st = state.read().await;
        assert!(!st.presence.home);
        assert!(st.presence.last_checked.is_some());
    }
}
