/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_QUIET: Duration = Duration::from_millis(500);

/// Emits the last pushed value once `quiet` has passed without another push.
///
/// Every push restarts the timer and replaces the pending value. When the
/// debouncer is dropped, a value still waiting is flushed right away.
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn spawn(quiet: Duration) -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<T>();
        let task = tokio::spawn(async move {
            let mut pending: Option<T> = None;
            let timer = tokio::time::sleep(quiet);
            tokio::pin!(timer);
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(value) => {
                            pending = Some(value);
                            timer.as_mut().reset(Instant::now() + quiet);
                        }
                        None => break,
                    },
                    () = &mut timer, if pending.is_some() => {
                        if let Some(value) = pending.take() {
                            if out_tx.send(value).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            if let Some(value) = pending.take() {
                let _ = out_tx.send(value);
            }
        });
        (Self { tx, task }, out_rx)
    }

    /// `false` once the receiving side is gone.
    pub fn push(&self, value: T) -> bool {
        self.tx.send(value).is_ok() && !self.task.is_finished()
    }

    /// Closes the input and waits for the task to exit.
    ///
    /// A value still inside its quiet period is emitted immediately, without
    /// waiting for the timer, so input that ends mid-typing is not lost.
    pub async fn finish(self) {
        let Debouncer { tx, task } = self;
        drop(tx);
        let _ = task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_last_keystroke_is_emitted() {
        let start = Instant::now();
        let (debouncer, mut out) = Debouncer::spawn(DEFAULT_QUIET);

        debouncer.push("s");
        settle().await;
        tokio::time::advance(Duration::from_millis(300)).await;
        settle().await;
        debouncer.push("su");
        settle().await;
        tokio::time::advance(Duration::from_millis(300)).await;
        settle().await;
        // 600ms after the first key, but only 300ms after the second.
        assert!(out.try_recv().is_err());

        debouncer.push("sun");
        settle().await;
        assert_eq!(out.recv().await, Some("sun"));
        assert!(start.elapsed() >= Duration::from_millis(1100));
        assert!(out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_emit_separately() {
        let (debouncer, mut out) = Debouncer::spawn(Duration::from_millis(100));
        debouncer.push(1);
        assert_eq!(out.recv().await, Some(1));
        debouncer.push(2);
        debouncer.push(3);
        assert_eq!(out.recv().await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn finish_flushes_the_pending_value() {
        let start = Instant::now();
        let (debouncer, mut out) = Debouncer::spawn(DEFAULT_QUIET);
        debouncer.push("beach".to_string());
        debouncer.finish().await;
        assert!(start.elapsed() < DEFAULT_QUIET);
        assert_eq!(out.recv().await.as_deref(), Some("beach"));
        assert_eq!(out.recv().await, None);
    }
}
