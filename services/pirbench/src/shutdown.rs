// Interrupt handling: turns the first SIGINT/SIGTERM into a shared stop flag.
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;

/// Process-wide "stop issuing new requests" hint.
///
/// Written once by the signal listener, polled by the request loop. Work that
/// is already in flight is never aborted because of it.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag {
    inner: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }
}

/// Sets `flag` once `signal` resolves. Only the first delivery matters.
pub fn spawn_listener<F>(flag: ShutdownFlag, signal: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        signal.await;
        if !flag.is_triggered() {
            tracing::info!("interrupt received, finishing in-flight request");
        }
        flag.trigger();
    })
}

/// Listens for SIGINT and, on unix, SIGTERM.
///
/// The SIGTERM handler is installed before this returns, so a signal raised
/// right after the call is already observed. Must run inside a tokio runtime.
#[cfg(unix)]
pub fn spawn_signal_listener(flag: ShutdownFlag) -> JoinHandle<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let term = match signal(SignalKind::terminate()) {
        Ok(term) => Some(term),
        Err(err) => {
            tracing::warn!(error = %err, "cannot listen for SIGTERM");
            None
        }
    };
    spawn_listener(flag, async move {
        match term {
            Some(mut term) => {
                tokio::select! {
                    _ = wait_ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            None => wait_ctrl_c().await,
        }
    })
}

/// Listens for SIGINT.
#[cfg(not(unix))]
pub fn spawn_signal_listener(flag: ShutdownFlag) -> JoinHandle<()> {
    spawn_listener(flag, wait_ctrl_c())
}

async fn wait_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot listen for interrupts; runs will not stop early");
        // Without a handler the flag must stay unset, so park forever.
        std::future::pending::<()>().await;
    }
}
