use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use super::save;
use crate::models::AppState;
use crate::storage::Storage;

enum Command {
    Save(Arc<AppState>),
    Clear,
    Flush(oneshot::Sender<()>),
}

enum Wake {
    Command(Command),
    QuietPeriodElapsed,
    Closed,
}

type SavedHook = Box<dyn Fn(DateTime<Utc>) + Send + Sync>;

/// Background writer that coalesces snapshots and saves only the newest one once no
/// newer snapshot has arrived for the quiet period.
pub struct Saver {
    storage: Arc<dyn Storage>,
    key: String,
    quiet: Duration,
    on_saved: SavedHook,
    rx: mpsc::UnboundedReceiver<Command>,
}

/// Sending side of a running [`Saver`]. Dropping every handle flushes and stops the task.
#[derive(Clone)]
pub struct SaverHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl Saver {
    /// Spawns the writer on the current tokio runtime. `on_saved` runs after every
    /// successful write with the stamp that was persisted.
    pub fn spawn<F>(
        storage: Arc<dyn Storage>,
        key: String,
        quiet: Duration,
        on_saved: F,
    ) -> SaverHandle
    where
        F: Fn(DateTime<Utc>) + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let saver = Saver {
            storage,
            key,
            quiet,
            on_saved: Box::new(on_saved),
            rx,
        };
        tokio::spawn(saver.run());
        SaverHandle { tx }
    }

    async fn run(mut self) {
        let mut pending: Option<Arc<AppState>> = None;

        loop {
            let wake = if pending.is_some() {
                tokio::select! {
                    command = self.rx.recv() => command.map_or(Wake::Closed, Wake::Command),
                    _ = tokio::time::sleep(self.quiet) => Wake::QuietPeriodElapsed,
                }
            } else {
                self.rx.recv().await.map_or(Wake::Closed, Wake::Command)
            };

            match wake {
                Wake::Command(Command::Save(state)) => pending = Some(state),
                Wake::Command(Command::Clear) => {
                    pending = None;
                    if let Err(err) = self.storage.remove(&self.key).await {
                        tracing::warn!(
                            key = %self.key,
                            error = %err,
                            "failed to clear stored state"
                        );
                    }
                }
                Wake::Command(Command::Flush(ack)) => {
                    self.write(pending.take()).await;
                    let _ = ack.send(());
                }
                Wake::QuietPeriodElapsed => self.write(pending.take()).await,
                Wake::Closed => {
                    self.write(pending.take()).await;
                    break;
                }
            }
        }
    }

    async fn write(&self, state: Option<Arc<AppState>>) {
        let Some(state) = state else {
            return;
        };
        if let Some(stamp) = save(self.storage.as_ref(), &self.key, &state).await {
            (self.on_saved)(stamp);
        }
    }
}

impl SaverHandle {
    /// Queues a snapshot, superseding any snapshot still waiting for its quiet period.
    pub fn schedule(&self, state: Arc<AppState>) {
        if self.tx.send(Command::Save(state)).is_err() {
            tracing::warn!("saver has stopped, change kept in memory only");
        }
    }

    /// Drops any waiting snapshot and deletes the stored document.
    pub fn clear(&self) {
        let _ = self.tx.send(Command::Clear);
    }

    /// Writes any waiting snapshot now and waits for the write to finish.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{load, DEFAULT_STORAGE_KEY};
    use crate::seed::default_state;
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(onboarded: bool) -> Arc<AppState> {
        let mut state = default_state();
        state.has_seen_onboarding = onboarded;
        Arc::new(state)
    }

    fn spawn(storage: &Arc<MemoryStorage>) -> SaverHandle {
        Saver::spawn(
            storage.clone(),
            DEFAULT_STORAGE_KEY.to_string(),
            Duration::from_millis(500),
            |_| {},
        )
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_snapshots_coalesce_into_one_write() {
        let storage = Arc::new(MemoryStorage::new());
        let saver = spawn(&storage);

        saver.schedule(snapshot(false));
        tokio::time::sleep(Duration::from_millis(100)).await;
        saver.schedule(snapshot(false));
        tokio::time::sleep(Duration::from_millis(100)).await;
        saver.schedule(snapshot(true));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(storage.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(storage.write_count(), 1);
        let stored = load(storage.as_ref(), DEFAULT_STORAGE_KEY).await;
        assert!(stored.has_seen_onboarding);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_immediately() {
        let storage = Arc::new(MemoryStorage::new());
        let saver = spawn(&storage);

        saver.schedule(snapshot(true));
        saver.flush().await;
        assert_eq!(storage.write_count(), 1);

        saver.flush().await;
        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_discards_pending_and_removes_key() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert_raw(DEFAULT_STORAGE_KEY, "old");
        let saver = spawn(&storage);

        saver.schedule(snapshot(true));
        saver.clear();
        saver.flush().await;

        assert_eq!(storage.write_count(), 0);
        assert_eq!(storage.raw(DEFAULT_STORAGE_KEY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_flushes() {
        let storage = Arc::new(MemoryStorage::new());
        let saver = spawn(&storage);

        saver.schedule(snapshot(true));
        drop(saver);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn saved_hook_sees_each_write() {
        let storage = Arc::new(MemoryStorage::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let saver = Saver::spawn(
            storage.clone(),
            DEFAULT_STORAGE_KEY.to_string(),
            Duration::from_millis(500),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        saver.schedule(snapshot(false));
        saver.flush().await;
        saver.schedule(snapshot(true));
        saver.flush().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
