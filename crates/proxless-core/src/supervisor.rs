//! Restart guard for process-lifetime loops.
//!
//! The idle sweep and the discovery loops must outlive any single failure.
//! [`supervise`] runs the loop body as its own task; when that task panics
//! or returns before shutdown, the failure is logged and a fresh body is
//! launched from the factory. There is no retry cap: the loop lives as long
//! as the process does.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

/// Pause between a failure and the relaunch.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Run `factory()` under supervision until `shutdown` flips to `true`.
pub async fn supervise<F, Fut>(name: &'static str, shutdown: watch::Receiver<bool>, factory: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    supervise_with_delay(name, RESTART_DELAY, shutdown, factory).await;
}

/// [`supervise`] with an explicit restart delay.
pub async fn supervise_with_delay<F, Fut>(
    name: &'static str,
    restart_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut factory: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    info!(task = name, "supervised task starting");
    let mut restarts: u64 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut handle = tokio::spawn(factory());

        tokio::select! {
            result = &mut handle => {
                if *shutdown.borrow() {
                    break;
                }
                match result {
                    Ok(()) => warn!(task = name, "task returned unexpectedly; restarting"),
                    Err(e) if e.is_panic() => error!(task = name, "task panicked; restarting"),
                    Err(e) => error!(task = name, error = %e, "task aborted; restarting"),
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => {
                handle.abort();
                break;
            }
        }

        restarts += 1;
        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
        info!(task = name, restarts, "relaunching supervised task");
    }

    info!(task = name, "supervised task stopped");
}

/// Resolves once `shutdown` holds `true` or its sender is gone. Other
/// sends are ignored.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn restarts_after_panic() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = runs.clone();
        let supervisor = tokio::spawn(supervise_with_delay(
            "panicky",
            Duration::from_millis(5),
            rx,
            move || {
                let counter = counter.clone();
                async move {
                    let run = counter.fetch_add(1, Ordering::SeqCst);
                    if run < 2 {
                        panic!("boom");
                    }
                    // Third run behaves and parks until aborted.
                    std::future::pending::<()>().await;
                }
            },
        ));

        for _ in 0..200 {
            if runs.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn restarts_after_early_return() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = runs.clone();
        let supervisor = tokio::spawn(supervise_with_delay(
            "returns",
            Duration::from_millis(1),
            rx,
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        for _ in 0..200 {
            if runs.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(runs.load(Ordering::SeqCst) >= 3);

        tx.send(true).unwrap();
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn stops_immediately_when_already_shut_down() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = watch::channel(true);

        let counter = runs.clone();
        supervise("never", rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn false_send_does_not_stop_the_task() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = runs.clone();
        let supervisor = tokio::spawn(supervise_with_delay(
            "steady",
            Duration::from_millis(1),
            rx,
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    std::future::pending::<()>().await;
                }
            },
        ));

        for _ in 0..200 {
            if runs.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!supervisor.is_finished());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        wait_for_shutdown(&mut rx).await;
    }
}
