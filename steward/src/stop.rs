//! Cooperative stop flag shared between a front door and a running engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tokio::runtime::Builder;
use tracing::{info, warn};

use crate::exit_codes;

/// Cloneable handle to one stop request. Setting it never interrupts work in
/// flight; the engine and executors poll it at their checkpoints.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Raise `stop` on the first interrupt (Ctrl-C) and exit with
/// [`exit_codes::STOPPED`] on the second.
///
/// The listener is registered before this returns and then waits on its own
/// thread with a single-threaded runtime.
pub fn stop_on_interrupt(stop: &StopSignal) -> Result<()> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;

    #[cfg(unix)]
    let mut interrupts = {
        use tokio::signal::unix::{SignalKind, signal};
        let _guard = runtime.enter();
        signal(SignalKind::interrupt()).context("listen for SIGINT")?
    };

    let stop = stop.clone();
    thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    #[cfg(unix)]
                    let received = interrupts.recv().await.is_some();
                    #[cfg(not(unix))]
                    let received = tokio::signal::ctrl_c().await.is_ok();

                    if !received {
                        warn!("interrupt listener closed");
                        return;
                    }
                    if stop.is_stopped() {
                        warn!("second interrupt, exiting");
                        std::process::exit(exit_codes::STOPPED);
                    }
                    info!("interrupt received, stopping at the next checkpoint");
                    stop.request_stop();
                }
            });
        })
        .context("spawn interrupt listener")?;
    Ok(())
}
