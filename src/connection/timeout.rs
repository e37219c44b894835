//! Per-connection idle timeout.
//!
//! The timer is a small spawned task that sleeps until its deadline and then
//! aborts the connection's worker task. Rescheduling aborts the pending timer
//! before a new one is spawned, so a connection never has two live timers.

use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

#[derive(Debug)]
pub(crate) struct IdleTimeout {
    duration: Duration,
    target: AbortHandle,
    timer: Option<AbortHandle>,
}

impl IdleTimeout {
    /// Arms a timeout that aborts `target` after `duration` of silence.
    pub(crate) fn arm(duration: Duration, target: AbortHandle) -> Self {
        let mut timeout = Self {
            duration,
            target,
            timer: None,
        };
        timeout.reset();
        timeout
    }

    /// Replaces the pending timer with one firing `duration` from now.
    pub(crate) fn reset(&mut self) {
        self.cancel();

        let deadline = Instant::now() + self.duration;
        let target = self.target.clone();
        let timer = tokio::spawn(async move {
            sleep_until(deadline).await;
            debug!("idle timeout expired, cancelling worker");
            target.abort();
        });
        self.timer = Some(timer.abort_handle());
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for IdleTimeout {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_task() -> tokio::task::JoinHandle<()> {
        tokio::spawn(std::future::pending())
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration() {
        let task = idle_task();
        let _timeout = IdleTimeout::arm(Duration::from_secs(5), task.abort_handle());

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(!task.is_finished());

        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_pushes_deadline_out() {
        let task = idle_task();
        let mut timeout = IdleTimeout::arm(Duration::from_secs(5), task.abort_handle());

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(4)).await;
            timeout.reset();
        }
        tokio::task::yield_now().await;
        assert!(!task.is_finished());
        assert!(timeout.is_armed());

        timeout.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn drop_disarms() {
        let task = idle_task();
        drop(IdleTimeout::arm(Duration::from_secs(1), task.abort_handle()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!task.is_finished());
        task.abort();
    }
}
