use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use jiff::SignedDuration;
use tokio::{
    runtime::Handle,
    sync::{Notify, mpsc},
};
use tracing::warn;

use crate::store::{StoreError, TaskQueue};

use super::Task;

#[derive(Debug, Default)]
struct Tracker {
    /// delayed tasks not yet delivered
    pending: AtomicUsize,
    delivered: Notify,
}

/// In-process queue. Delayed tasks sleep on the runtime, then land on the channel.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<Task>,
    tracker: Arc<Tracker>,
}

impl ChannelQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            tracker: Arc::new(Tracker::default()),
        };
        (queue, rx)
    }

    pub fn pending(&self) -> usize {
        self.tracker.pending.load(Ordering::SeqCst)
    }

    /// Resolves after a delayed task was delivered
    pub async fn delivered(&self) {
        self.tracker.delivered.notified().await
    }
}

impl TaskQueue for ChannelQueue {
    fn enqueue(&self, task: Task, delay: SignedDuration) -> Result<(), StoreError> {
        if delay <= SignedDuration::ZERO {
            return self
                .tx
                .send(task)
                .map_err(|_| StoreError::Queue("channel closed".to_string()));
        }

        let handle = Handle::try_current().map_err(|e| StoreError::Queue(e.to_string()))?;
        self.tracker.pending.fetch_add(1, Ordering::SeqCst);

        let tx = self.tx.clone();
        let tracker = self.tracker.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay.unsigned_abs()).await;
            if let Err(e) = tx.send(task) {
                warn!("dropping delayed {} task: {e}", e.0.name());
            }
            tracker.pending.fetch_sub(1, Ordering::SeqCst);
            tracker.delivered.notify_one();
        });
        Ok(())
    }
}
