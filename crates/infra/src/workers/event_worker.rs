use std::io;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use stockledger_events::{EventBus, Subscription};
use stockledger_inventory::MutationEvent;

use crate::ledger_store::LedgerStore;
use crate::notifications::{NotificationDispatcher, PushTransport};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Generic event worker loop.
///
/// - Subscribes to an event bus
/// - Applies a handler to each message on a dedicated thread
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct EventWorker;

impl EventWorker {
    /// Spawn a worker thread that processes messages from a bus subscription.
    ///
    /// The subscription is taken before this returns, so nothing published
    /// afterwards is missed.
    pub fn spawn<M, B, H, E>(name: &'static str, bus: &B, mut handler: H) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: EventBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    /// Spawn the notification worker: every committed mutation goes through `dispatcher`.
    ///
    /// Transport failures are logged and the event is dropped.
    pub fn spawn_notifications<S, T, B>(
        bus: &B,
        dispatcher: Arc<NotificationDispatcher<S, T>>,
    ) -> io::Result<WorkerHandle>
    where
        S: LedgerStore + ?Sized + 'static,
        T: PushTransport + ?Sized + 'static,
        B: EventBus<MutationEvent> + ?Sized,
    {
        Self::spawn("notification-dispatcher", bus, move |event: MutationEvent| {
            dispatcher.handle(&event).map(|_| ())
        })
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
) where
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    let tick = Duration::from_millis(250);
    info!(worker = name, "worker started");

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = %err, "worker handler failed; message dropped");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use stockledger_events::InMemoryEventBus;

    #[test]
    fn handles_messages_until_shutdown() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let handle = EventWorker::spawn("test-worker", &bus, move |n: u32| {
            counter.fetch_add(n as usize, Ordering::SeqCst);
            Ok::<(), String>(())
        })
        .unwrap();

        bus.publish(2).unwrap();
        bus.publish(3).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        handle.shutdown();
    }

    #[test]
    fn handler_errors_do_not_stop_the_worker() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let handle = EventWorker::spawn("flaky-worker", &bus, move |n: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 { Err("boom".to_string()) } else { Ok(()) }
        })
        .unwrap();

        bus.publish(0).unwrap();
        bus.publish(1).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        handle.shutdown();
    }
}
