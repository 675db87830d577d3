//! Graceful shutdown sequence: on SIGINT/SIGTERM/SIGHUP, announce to
//! `#main` and force a final bans save, then exit. Preferences are written
//! on every change (see [`crate::prefs`]) so there is nothing to flush for
//! them at shutdown. Ported from `libshpool::daemon::signals::Handler`,
//! translated from its `signal_hook` + dedicated thread model to
//! `tokio::signal` futures, since this server already runs entirely on the
//! tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::ban::BanStore;
use crate::prefs::PrefsStore;
use crate::room::RoomRegistry;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(1);

/// Exit code used when the graceful shutdown sequence didn't finish within
/// [`SHUTDOWN_DEADLINE`].
pub const DEADLINE_MISSED_EXIT_CODE: i32 = 4;

pub struct ShutdownHandles {
    pub rooms: Arc<RoomRegistry>,
    pub bans: Arc<BanStore>,
    pub prefs: Arc<PrefsStore>,
}

/// Wait for a termination signal, then run the shutdown sequence and exit
/// the process. Never returns.
pub async fn wait_and_shutdown(handles: ShutdownHandles) -> ! {
    wait_for_signal().await;
    info!("shutdown signal received, saving state");

    let sequence = run_sequence(&handles);
    match tokio::time::timeout(SHUTDOWN_DEADLINE, sequence).await {
        Ok(()) => {
            info!("shutdown sequence complete");
            std::process::exit(0);
        }
        Err(_) => {
            error!("shutdown sequence did not finish within the deadline, exiting anyway");
            std::process::exit(DEADLINE_MISSED_EXIT_CODE);
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("installing SIGHUP handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
        _ = sighup.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn run_sequence(handles: &ShutdownHandles) {
    if let Some(main) = handles.rooms.get(crate::room::MAIN_ROOM).await {
        main.broadcast("** server is shutting down **".to_string());
    }

    if let Err(e) = handles.bans.save_now().await {
        warn!(error = %e, "failed to save bans during shutdown");
    }
}
