use crate::Error;
use flume::RecvTimeoutError;
use nix::sys::signal::Signal as NixSignal;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::{
    runtime::{Builder, Runtime},
    signal::unix::{Signal, SignalKind, signal},
};
use tracing::{debug, info, warn};

/// Outcome of waiting on a timeout trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Fired,
    Idle,
    /// The trigger can never fire again.
    Closed,
}

/// Something the operator can use to time a run out.
pub trait TimeoutTrigger: Send + 'static {
    /// Block for at most `timeout` waiting for the trigger.
    fn poll(&mut self, timeout: Duration) -> Poll;
}

/// In-process trigger: any message (or none, once all senders are gone)
/// decides the outcome.
impl TimeoutTrigger for flume::Receiver<()> {
    fn poll(&mut self, timeout: Duration) -> Poll {
        match self.recv_timeout(timeout) {
            Ok(()) => Poll::Fired,
            Err(RecvTimeoutError::Timeout) => Poll::Idle,
            Err(RecvTimeoutError::Disconnected) => Poll::Closed,
        }
    }
}

/// Fires when the process receives the configured signal.
///
/// Installing the handler replaces the signal's default disposition, so the
/// signal no longer kills the process on its own.
#[derive(Debug)]
pub struct SignalTrigger {
    runtime: Runtime,
    signal: Signal,
}

impl SignalTrigger {
    pub fn new(kind: NixSignal) -> Result<Self, Error> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::SignalHandler)?;
        let signal = {
            let _guard = runtime.enter();
            signal(SignalKind::from_raw(kind as libc::c_int)).map_err(Error::SignalHandler)?
        };
        debug!(signal = %kind, "timeout handler installed");
        Ok(Self { runtime, signal })
    }
}

impl TimeoutTrigger for SignalTrigger {
    fn poll(&mut self, timeout: Duration) -> Poll {
        let signal = &mut self.signal;
        match self
            .runtime
            .block_on(async move { tokio::time::timeout(timeout, signal.recv()).await })
        {
            Ok(Some(())) => Poll::Fired,
            Ok(None) => Poll::Closed,
            Err(_elapsed) => Poll::Idle,
        }
    }
}

/// Auxiliary thread that waits for a timeout trigger and runs `on_fire`
/// once.
#[derive(Debug)]
pub(crate) struct Watcher {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    pub(crate) fn spawn<T, F>(mut trigger: T, poll_interval: Duration, on_fire: F) -> Result<Self, Error>
    where
        T: TimeoutTrigger,
        F: FnOnce() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let handle = thread::Builder::new()
            .name("bbtrace-timeout".into())
            .spawn({
                let running = Arc::clone(&running);
                move || {
                    debug!("timeout watcher started");
                    while running.load(Ordering::Acquire) {
                        match trigger.poll(poll_interval) {
                            Poll::Idle => continue,
                            Poll::Fired => {
                                info!("timeout triggered");
                                running.store(false, Ordering::Release);
                                on_fire();
                                break;
                            }
                            Poll::Closed => break,
                        }
                    }
                    debug!("timeout watcher finished");
                }
            })
            .map_err(Error::Spawn)?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Ask the thread to stop and wait for it, unless called from the
    /// watcher itself.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("timeout watcher panicked");
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const POLL: Duration = Duration::from_millis(10);

    #[test]
    fn fires_once_on_message() {
        let (tx, rx) = flume::unbounded();
        let (done_tx, done_rx) = flume::bounded(1);
        let fired = Arc::new(AtomicUsize::new(0));
        let mut watcher = Watcher::spawn(rx, POLL, {
            let fired = Arc::clone(&fired);
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
                done_tx.send(()).unwrap();
            }
        })
        .unwrap();

        tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // the thread is gone, a second trigger has nobody to reach
        let _ = tx.send(());
        watcher.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_without_firing() {
        let (_tx, rx) = flume::unbounded::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let watcher = Watcher::spawn(rx, POLL, {
            let fired = Arc::clone(&fired);
            move || fired.store(true, Ordering::SeqCst)
        })
        .unwrap();

        drop(watcher);
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn closed_trigger_ends_the_thread() {
        let (tx, rx) = flume::unbounded::<()>();
        drop(tx);
        let mut watcher = Watcher::spawn(rx, POLL, || panic!("must not fire")).unwrap();
        watcher.stop();
    }

    #[test]
    fn signal_trigger_fires_on_signal() {
        let mut trigger = SignalTrigger::new(NixSignal::SIGUSR1).unwrap();
        assert_eq!(trigger.poll(POLL), Poll::Idle);

        nix::sys::signal::raise(NixSignal::SIGUSR1).unwrap();
        assert_eq!(trigger.poll(Duration::from_secs(5)), Poll::Fired);
    }
}
