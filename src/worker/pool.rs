use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::{
    sync::{Semaphore, mpsc},
    task::{JoinError, JoinSet},
};
use tracing::{Instrument, Level, error, info, span};
use uuid::Uuid;

use super::{IngestContext, Task, TaskOutcome, WorkerError, queue::ChannelQueue};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub tasks: usize,
    pub ingested: usize,
    pub points: usize,
    pub deferred: usize,
    pub busy: usize,
    pub failed: usize,
    pub errors: usize,
}

impl PoolSummary {
    fn record(&mut self, result: Result<Result<TaskOutcome, WorkerError>, JoinError>) {
        match result {
            Ok(Ok(TaskOutcome::Ingested { points, .. })) => {
                self.ingested += 1;
                self.points += points;
            }
            Ok(Ok(TaskOutcome::Deferred { .. })) => self.deferred += 1,
            Ok(Ok(TaskOutcome::Busy { .. })) => self.busy += 1,
            Ok(Ok(TaskOutcome::Failed(_))) => self.failed += 1,
            Ok(Err(e)) => {
                error!("task error: {e}");
                self.errors += 1;
            }
            Err(e) => {
                error!("task panicked: {e}");
                self.errors += 1;
            }
        }
    }
}

/// Runs tasks from `input` and from the requeue channel with at most
/// `config.workers` in flight. Returns once `input` is exhausted and nothing
/// is running or waiting to be redelivered.
pub async fn run<S>(
    ctx: Arc<IngestContext>,
    queue: ChannelQueue,
    mut requeued: mpsc::UnboundedReceiver<Task>,
    mut input: S,
) -> PoolSummary
where
    S: Stream<Item = Task> + Unpin,
{
    let limit = Arc::new(Semaphore::new(ctx.config.workers.max(1)));
    let mut running = JoinSet::new();
    let mut summary = PoolSummary::default();
    let mut input_done = false;

    loop {
        if input_done && running.is_empty() && queue.pending() == 0 && requeued.is_empty() {
            break;
        }

        let task = tokio::select! {
            task = input.next(), if !input_done => match task {
                Some(task) => task,
                None => {
                    info!("input exhausted");
                    input_done = true;
                    continue;
                }
            },
            Some(task) = requeued.recv() => task,
            Some(result) = running.join_next(), if !running.is_empty() => {
                summary.record(result);
                continue;
            }
            _ = queue.delivered() => continue,
        };

        let Ok(permit) = limit.clone().acquire_owned().await else {
            break;
        };
        summary.tasks += 1;

        let ctx = ctx.clone();
        let span = span!(Level::INFO, "Task", name = task.name(), run = %Uuid::now_v7());
        running.spawn(
            async move {
                let _permit = permit;
                task.run(ctx).await
            }
            .instrument(span),
        );
    }

    info!(
        "done: {} task(s), {} ingested ({} points), {} deferred, {} busy, {} failed, {} error(s)",
        summary.tasks,
        summary.ingested,
        summary.points,
        summary.deferred,
        summary.busy,
        summary.failed,
        summary.errors
    );
    summary
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;

    use super::*;
    use crate::{
        config::IngestConfig,
        report::builder::ReportBuilder,
        store::{
            BlobStore, CursorStore,
            fs::FsBlobStore,
            memory::{MemoryCounterStore, MemoryCursorStore, MemoryNotifier, MemoryPointStore},
            SystemClock,
        },
        worker::{Collaborators, ProcessReportArgs, ReportRef},
    };

    #[tokio::test]
    async fn test_pool_ingests_and_stops() {
        let root = std::env::temp_dir().join(format!("streamer-pool-{}", Uuid::now_v7()));
        let blobs = Arc::new(FsBlobStore::new(&root));
        let received: Timestamp = "2024-05-01T12:00:00Z".parse().unwrap();

        let mut tasks = Vec::new();
        for (report_id, first) in [(1u32, 10u32), (2, 13)] {
            let data = ReportBuilder::new(0xa, report_id)
                .sent_timestamp(100)
                .reading(0x5001, first, 10, 1)
                .reading(0x5001, first + 1, 20, 2)
                .build();
            let key = format!("{report_id}.bin");
            blobs.put("reports", &key, &data).unwrap();
            tasks.push(Task::ProcessReport(ProcessReportArgs {
                device_slug: "d--0000-0000-0000-000a".to_string(),
                report: ReportRef {
                    bucket: "reports".to_string(),
                    key,
                    received,
                },
                start_id: None,
                end_id: None,
            }));
        }

        let (queue, requeued) = ChannelQueue::channel();
        let cursors = Arc::new(MemoryCursorStore::default());
        let clock = Arc::new(SystemClock);
        let store = Collaborators {
            blobs,
            points: Arc::new(MemoryPointStore::default()),
            cursors: cursors.clone(),
            counters: Arc::new(MemoryCounterStore::new(clock.clone())),
            notifier: Arc::new(MemoryNotifier::default()),
            queue: Arc::new(queue.clone()),
            clock,
        };
        let config = IngestConfig {
            workers: 1,
            ..IngestConfig::default()
        };
        let ctx = Arc::new(IngestContext::new(config, store));

        let summary = run(ctx, queue, requeued, futures_util::stream::iter(tasks)).await;
        assert_eq!(summary.tasks, 2);
        assert_eq!(summary.ingested, 2);
        assert_eq!(summary.points, 4);
        assert_eq!(summary.errors, 0);

        let cursor = cursors.load(crate::ids::StreamerKey::new(0xa, 0)).unwrap().unwrap();
        assert_eq!(cursor.last_processed_id, 14);
        std::fs::remove_dir_all(root).unwrap();
    }
}
