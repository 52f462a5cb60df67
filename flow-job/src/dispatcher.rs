//! Fixed pool of workers.  Jobs for one target always land on the same
//! worker, so a target is never processed by two workers at once.
use flow_core::deps::futures_core::future::BoxFuture;
use flow_core::deps::{log, tokio};
use flow_core::error::{FlowError, FlowResult};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type Job = BoxFuture<'static, Value>;

struct Task {
    target: String,
    job: Job,
    reply_tx: oneshot::Sender<Value>,
}

pub struct TargetDispatcher {
    workers: Vec<mpsc::Sender<Task>>,
    handles: Vec<JoinHandle<usize>>,
}

impl TargetDispatcher {
    pub fn start(workers: usize, queue_size: usize) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, mut rx) = mpsc::channel::<Task>(queue_size.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(async move {
                let mut done = 0;
                while let Some(Task { target, job, reply_tx }) = rx.recv().await {
                    log::debug!("worker {} runs {}", worker, target);
                    let result = job.await;
                    if reply_tx.send(result).is_err() {
                        log::warn!("nobody waits for the result of {}", target);
                    }
                    done += 1;
                }
                done
            }));
        }
        TargetDispatcher {
            workers: senders,
            handles,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_for(&self, target: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        target.hash(&mut hasher);
        (hasher.finish() % self.workers.len() as u64) as usize
    }

    /// Queues `job` on the target's worker; the receiver yields its result.
    pub async fn submit(&self, target: &str, job: Job) -> FlowResult<oneshot::Receiver<Value>> {
        let worker = self.worker_for(target);
        let (reply_tx, reply_rx) = oneshot::channel();
        let task = Task {
            target: target.to_string(),
            job,
            reply_tx,
        };
        self.workers[worker]
            .send(task)
            .await
            .map_err(|e| FlowError::send_error("TargetDispatcher", format!("worker {}", worker), e))?;
        Ok(reply_rx)
    }

    /// Lets the queued jobs finish and returns how many ran.
    pub async fn shutdown(self) -> FlowResult<usize> {
        drop(self.workers);
        let mut done = 0;
        for handle in self.handles {
            done += handle.await?;
        }
        Ok(done)
    }
}
