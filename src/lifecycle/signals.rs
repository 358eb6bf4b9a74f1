//! OS signal handling.
//!
//! SIGTERM and SIGINT (Ctrl+C) fire the shutdown latch. Only the first
//! signal is logged; repeats are swallowed.

use tokio::signal;

use crate::lifecycle::Shutdown;

/// Which signal asked us to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    Interrupt,
}

impl StopSignal {
    fn name(&self) -> &'static str {
        match self {
            StopSignal::Terminate => "SIGTERM",
            StopSignal::Interrupt => "SIGINT",
        }
    }
}

/// Forward termination signals to `shutdown` until the process exits.
///
/// Handlers are registered before this returns, so a signal sent right
/// after the call is not lost.
pub fn spawn_signal_listener(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    let signals = match StopSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers; relying on programmatic shutdown");
            return tokio::spawn(async {});
        }
    };

    tokio::spawn(async move {
        let mut signals = signals;
        while let Some(received) = signals.recv().await {
            if shutdown.trigger() {
                tracing::info!(signal = received.name(), "Signal received: closing HTTP server");
            }
        }
    })
}

#[cfg(unix)]
struct StopSignals {
    terminate: signal::unix::Signal,
    interrupt: signal::unix::Signal,
}

#[cfg(unix)]
impl StopSignals {
    fn install() -> std::io::Result<Self> {
        use signal::unix::{signal as register, SignalKind};
        Ok(Self {
            terminate: register(SignalKind::terminate())?,
            interrupt: register(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> Option<StopSignal> {
        tokio::select! {
            s = self.terminate.recv() => s.map(|_| StopSignal::Terminate),
            s = self.interrupt.recv() => s.map(|_| StopSignal::Interrupt),
        }
    }
}

#[cfg(not(unix))]
struct StopSignals;

#[cfg(not(unix))]
impl StopSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<StopSignal> {
        match signal::ctrl_c().await {
            Ok(()) => Some(StopSignal::Interrupt),
            Err(e) => {
                tracing::error!(error = %e, "Ctrl+C handler failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_the_os_signals() {
        assert_eq!(StopSignal::Terminate.name(), "SIGTERM");
        assert_eq!(StopSignal::Interrupt.name(), "SIGINT");
    }
}
