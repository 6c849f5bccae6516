//! Signal handling
//!
//! SIGINT, SIGTERM and SIGQUIT end the run. SIGHUP either re-reads the config
//! file (when one was given) or ends the run too, so closing the terminal
//! still goes through worker cleanup. Every handler is registered before the
//! first worker can be spawned.

use drain_common::{ConfigOverrides, DrainConfig};
use std::io;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};

/// What SIGHUP means for this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hangup {
    /// Reload the config file
    Reload,
    /// Shut down like SIGTERM
    Shutdown,
}

/// Registered shutdown signals
pub struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    quit: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: Option<tokio::signal::unix::Signal>,
}

impl ShutdownSignals {
    #[cfg(unix)]
    pub fn register(hangup: Hangup) -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
            hangup: match hangup {
                Hangup::Shutdown => Some(signal(SignalKind::hangup())?),
                Hangup::Reload => None,
            },
        })
    }

    #[cfg(not(unix))]
    pub fn register(_hangup: Hangup) -> io::Result<Self> {
        Ok(Self {})
    }

    /// Resolves with the name of the first shutdown signal received
    #[cfg(unix)]
    pub async fn wait(self) -> &'static str {
        let Self {
            mut interrupt,
            mut terminate,
            mut quit,
            mut hangup,
        } = self;

        let hangup = async {
            match hangup.as_mut() {
                Some(sig) => {
                    sig.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
            _ = hangup => "SIGHUP",
        }
    }

    #[cfg(not(unix))]
    pub async fn wait(self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        "Ctrl+C"
    }
}

/// Register SIGHUP now, then reload `path` on every hangup and forward valid configs
pub fn spawn_reloader(
    path: PathBuf,
    overrides: ConfigOverrides,
    tx: mpsc::Sender<DrainConfig>,
) -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sighup = signal(SignalKind::hangup())?;
        info!("SIGHUP handler registered, listening for reload signals");

        tokio::spawn(async move {
            while sighup.recv().await.is_some() {
                info!("SIGHUP received, reloading {}", path.display());

                match DrainConfig::load(Some(&path), &overrides) {
                    Ok(config) => {
                        if tx.send(config).await.is_err() {
                            // control loop is gone
                            return;
                        }
                    }
                    Err(e) => error!("Reload failed, keeping current configuration: {}", e),
                }
            }
        });
    }

    #[cfg(not(unix))]
    {
        let _ = (path, overrides, tx);
        tracing::warn!("SIGHUP reload not available on this platform");
    }

    Ok(())
}
