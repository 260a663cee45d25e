use std::{error::Error, sync::Arc};

use clap::Parser;
use clap_derive::Parser;
use futures_util::stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use streamer_ingest::{
    config::IngestConfig,
    store::{
        SystemClock, TracingNotifier,
        fs::{FsBlobStore, FsCursorStore, FsPointStore},
        memory::MemoryCounterStore,
    },
    worker::{Collaborators, IngestContext, Task, pool, queue::ChannelQueue},
};

/// Reconciles streamer reports. Reads one JSON task per line on stdin.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RON config file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = IngestConfig::load(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    info!(
        "starting {} workers, blobs in {}, state in {}",
        config.workers,
        config.blob_root.display(),
        config.state_root.display()
    );

    let clock = Arc::new(SystemClock);
    let (queue, requeued) = ChannelQueue::channel();
    let store = Collaborators {
        blobs: Arc::new(FsBlobStore::new(&config.blob_root)),
        points: Arc::new(FsPointStore::open(&config.state_root)?),
        cursors: Arc::new(FsCursorStore::open(&config.state_root)?),
        counters: Arc::new(MemoryCounterStore::new(clock.clone())),
        notifier: Arc::new(TracingNotifier),
        queue: Arc::new(queue.clone()),
        clock,
    };
    let ctx = Arc::new(IngestContext::new(config, store));

    let lines = BufReader::new(tokio::io::stdin()).lines();
    let input = stream::unfold(lines, |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match Task::from_json(&line) {
                    Ok(task) => return Some((task, lines)),
                    Err(e) => warn!("skipping task: {e}"),
                },
                Ok(None) => return None,
                Err(e) => {
                    warn!("reading stdin: {e}");
                    return None;
                }
            }
        }
    });

    let summary = pool::run(ctx, queue, requeued, Box::pin(input)).await;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
