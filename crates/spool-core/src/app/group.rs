use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use super::reaper_loop::ReaperLoop;
use super::worker_loop::{ItemHandler, WorkerLoop};

/// Worker group handle.
/// - every loop watches the same shutdown flag
/// - `shutdown_and_join()` waits for all of them
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl Default for WorkerGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerGroup {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    /// Spawn `n` copies of `worker`, numbered from 0.
    pub fn spawn_workers<H: ItemHandler>(&mut self, n: usize, worker: WorkerLoop<H>) {
        for worker_id in 0..n {
            let worker = worker.clone().with_worker_id(worker_id);
            let rx = self.shutdown_tx.subscribe();
            self.joins.push(tokio::spawn(worker.run(rx)));
        }
    }

    pub fn spawn_reaper(&mut self, reaper: ReaperLoop) {
        let rx = self.shutdown_tx.subscribe();
        self.joins.push(tokio::spawn(reaper.run(rx)));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new work. In-flight handlers are not interrupted.
    pub fn request_shutdown(&self) {
        // send_replace never fails, even with no receivers left
        self.shutdown_tx.send_replace(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                warn!(error = %err, "loop task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::app::worker_loop::tests::RecordingHandler;
    use crate::domain::{BoxId, ItemId, NewItem};
    use crate::queue::RetryPolicy;
    use crate::queue::testing::harness;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn workers_drain_the_outbox() {
        let h = harness();
        let outbox = h.store.outbox(h.tenant);
        let box_id = BoxId::generate();
        let mut previous: Option<ItemId> = None;
        let mut expected = Vec::new();
        for _ in 0..6 {
            let item_id = ItemId::generate();
            let mut item = NewItem::new(box_id, item_id, "ok");
            if let Some(dep) = previous {
                item = item.depends_on(dep);
            }
            outbox.insert(item).unwrap();
            expected.push(item_id);
            previous = Some(item_id);
        }

        let handler = Arc::new(RecordingHandler::default());
        let mut group = WorkerGroup::new();
        group.spawn_workers(
            3,
            WorkerLoop::new(
                outbox.clone(),
                handler.clone(),
                RetryPolicy::default(),
                Duration::from_millis(10),
            ),
        );
        group.spawn_reaper(ReaperLoop::new(
            outbox.clone(),
            h.store.inbox(h.tenant),
            Duration::from_secs(60),
            Duration::from_millis(10),
        ));
        assert_eq!(group.len(), 4);

        for _ in 0..500 {
            if handler.seen().len() == expected.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        group.shutdown_and_join().await;

        // the chain forces one delivery at a time, in order
        assert_eq!(handler.seen(), expected);
        assert_eq!(outbox.status().unwrap().total_rows, 0);
    }

    #[tokio::test]
    async fn empty_group_shuts_down() {
        let group = WorkerGroup::new();
        assert!(group.is_empty());
        group.shutdown_and_join().await;
    }
}
