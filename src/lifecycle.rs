// System
use std::future::Future;

// Third Party
use futures::pin_mut;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Draining,
    Terminated,
}

/// A termination request delivered by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

/// Exit status when credentials or the client cannot be set up, before `Running`.
pub const STARTUP_FAILURE_EXIT_CODE: i32 = 2;

/// How the controller left `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The subscriber returned on its own or after cancellation.
    Completed,
    /// A second signal arrived before the subscriber finished draining.
    Forced,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Completed => 0,
            Outcome::Forced => 1,
        }
    }
}

/// Receiving half of the cancellation flag handed to the subscriber.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl ShutdownListener {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown has been requested, or the controller is gone.
    pub async fn cancelled(&mut self) {
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }
}

pub struct Controller {
    phase: watch::Sender<Phase>,
    shutdown: watch::Sender<bool>,
}

impl Controller {
    pub fn new() -> (Self, ShutdownListener) {
        let (phase, _) = watch::channel(Phase::Starting);
        let (shutdown, receiver) = watch::channel(false);
        (Self { phase, shutdown }, ShutdownListener { receiver })
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn transition(&self, next: Phase) {
        debug!("Lifecycle phase {:?} -> {:?}", self.phase(), next);
        self.phase.send_replace(next);
    }

    /// Set the cancellation flag. Returns false if it was already set.
    fn cancel(&self) -> bool {
        self.shutdown.send_if_modified(|stop| {
            if *stop {
                false
            } else {
                *stop = true;
                true
            }
        })
    }

    /// Drive `subscriber` until it returns, cancelling it on the first signal and giving up on it
    /// at the second.
    pub async fn run<F>(self, subscriber: F, mut signals: mpsc::UnboundedReceiver<Signal>) -> Outcome
    where
        F: Future<Output = ()>,
    {
        pin_mut!(subscriber);
        self.transition(Phase::Running);
        let mut listening = true;

        loop {
            tokio::select! {
                _ = &mut subscriber => {
                    self.transition(Phase::Terminated);
                    return Outcome::Completed;
                }
                signal = signals.recv(), if listening => match signal {
                    Some(signal) if self.phase() == Phase::Running => {
                        debug!("Received {:?}", signal);
                        info!("Shutting Down");
                        self.transition(Phase::Draining);
                        self.cancel();
                    }
                    Some(signal) => {
                        warn!("Received {:?} while draining, exiting immediately", signal);
                        self.transition(Phase::Terminated);
                        return Outcome::Forced;
                    }
                    None => {
                        // No more signals can arrive; only the subscriber can end the run.
                        listening = false;
                    }
                },
            }
        }
    }
}

#[cfg(unix)]
pub fn setup_exit_hooks() -> std::io::Result<mpsc::UnboundedReceiver<Signal>> {
    use std::sync::{atomic::AtomicBool, Arc};

    use signal_hook::consts::{SIGINT, SIGTERM};
    use tokio::signal::unix::{signal, SignalKind};

    // Backstop for a wedged runtime: the second SIGINT/SIGTERM exits with status 1 straight from
    // the signal handler. The conditional shutdown has to be registered before the flag setter.
    let draining = Arc::new(AtomicBool::new(false));
    for sig in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(sig, 1, Arc::clone(&draining))?;
        signal_hook::flag::register(sig, Arc::clone(&draining))?;
    }

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = interrupt.recv() => Signal::Interrupt,
                Some(()) = terminate.recv() => Signal::Terminate,
                else => break,
            };
            if sender.send(received).is_err() {
                break;
            }
        }
    });
    Ok(receiver)
}

#[cfg(not(unix))]
pub fn setup_exit_hooks() -> std::io::Result<mpsc::UnboundedReceiver<Signal>> {
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if sender.send(Signal::Interrupt).is_err() {
                break;
            }
        }
    });
    Ok(receiver)
}

#[cfg(test)]
mod tests {
    // System
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    // Third Party
    use tokio::sync::mpsc;

    // Local
    use super::{Controller, Outcome, Phase, Signal, STARTUP_FAILURE_EXIT_CODE};

    #[test]
    fn test_exit_codes_are_distinct() {
        assert_eq!(Outcome::Completed.exit_code(), 0);
        assert_eq!(Outcome::Forced.exit_code(), 1);
        assert_ne!(STARTUP_FAILURE_EXIT_CODE, Outcome::Completed.exit_code());
        assert_ne!(STARTUP_FAILURE_EXIT_CODE, Outcome::Forced.exit_code());
    }

    #[tokio::test]
    async fn test_subscriber_exit_completes() {
        let (controller, _listener) = Controller::new();
        let phases = controller.subscribe_phase();
        let (_signals_tx, signals) = mpsc::unbounded_channel();

        let outcome = controller.run(async {}, signals).await;
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(*phases.borrow(), Phase::Terminated);
    }

    #[tokio::test]
    async fn test_first_signal_drains_and_cancels_once() {
        let (controller, listener) = Controller::new();
        let phases = controller.subscribe_phase();
        assert_eq!(controller.phase(), Phase::Starting);
        let (signals_tx, signals) = mpsc::unbounded_channel();
        signals_tx.send(Signal::Terminate).unwrap();

        // Count every change the cancellation flag goes through, until the controller drops it.
        let changes = Arc::new(AtomicUsize::new(0));
        let mut observer = listener.receiver.clone();
        let observed = {
            let changes = Arc::clone(&changes);
            tokio::spawn(async move {
                while observer.changed().await.is_ok() {
                    changes.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let subscriber = {
            let mut listener = listener.clone();
            let phases = phases.clone();
            async move {
                listener.cancelled().await;
                assert!(listener.is_cancelled());
                assert_eq!(*phases.borrow(), Phase::Draining);
            }
        };
        let outcome = controller.run(subscriber, signals).await;

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(*phases.borrow(), Phase::Terminated);
        observed.await.unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (controller, listener) = Controller::new();
        assert!(controller.cancel());
        assert!(!controller.cancel());
        assert!(listener.is_cancelled());
    }

    #[tokio::test]
    async fn test_second_signal_forces_exit() {
        let (controller, _listener) = Controller::new();
        let phases = controller.subscribe_phase();
        let (signals_tx, signals) = mpsc::unbounded_channel();
        signals_tx.send(Signal::Interrupt).unwrap();
        signals_tx.send(Signal::Terminate).unwrap();

        // Never finishes draining.
        let outcome = controller.run(futures::future::pending::<()>(), signals).await;
        assert_eq!(outcome, Outcome::Forced);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(*phases.borrow(), Phase::Terminated);
    }

    #[tokio::test]
    async fn test_closed_signal_channel_keeps_running() {
        let (controller, listener) = Controller::new();
        let (signals_tx, signals) = mpsc::unbounded_channel::<Signal>();
        drop(signals_tx);

        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let subscriber = async move {
            let _ = done_rx.await;
        };
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = done_tx.send(());
        });

        let outcome = controller.run(subscriber, signals).await;
        assert_eq!(outcome, Outcome::Completed);
        assert!(!listener.is_cancelled());
    }
}
