//! Token Stream Pipeline
//!
//! Demand-based fan-out of backend output fragments to independent
//! consumers. Each subscriber runs on its own task with its own bounded
//! queue; the queue capacity is the subscriber's demand window. A slow
//! consumer can exhaust only its own window, so one subscriber's pacing
//! never passes through another subscriber's callback.
//!
//! Completion and errors fan out to every subscriber independently, letting
//! each one flush or reset local state without affecting its siblings.
//! Both completion paths join the subscriber tasks, so everything a
//! consumer does in its finalizer happens-before the producer continues.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A consumer of the fragment stream
///
/// Callbacks run on the subscriber's own task. They should stay fast or
/// hand heavier work off to another job; the demand window only absorbs
/// short stalls.
#[async_trait]
pub trait StreamConsumer: Send + 'static {
    /// A fragment arrived
    async fn on_fragment(&mut self, fragment: &str);

    /// The stream completed normally; flush and finalize
    async fn on_complete(&mut self);

    /// The stream failed; reset local state
    async fn on_error(&mut self, error: &str);
}

/// What travels down a subscriber's queue
#[derive(Clone, Debug)]
enum Delivery {
    Fragment(String),
    Completed,
    Failed(String),
}

/// Demand-based fan-out pipeline over one backend stream
///
/// The producer (the send job) calls [`submit`](Self::submit) for each
/// fragment and finishes with exactly one of
/// [`complete_normally`](Self::complete_normally) or
/// [`complete_with_error`](Self::complete_with_error).
pub struct TokenStreamPipeline {
    senders: Vec<mpsc::Sender<Delivery>>,
    workers: Vec<JoinHandle<()>>,
    demand: usize,
}

impl TokenStreamPipeline {
    /// Create a pipeline whose subscribers each get a `demand`-deep queue
    #[must_use]
    pub fn new(demand: usize) -> Self {
        Self {
            senders: Vec::new(),
            workers: Vec::new(),
            demand: demand.max(1),
        }
    }

    /// Subscribe a consumer; it starts pulling immediately
    pub fn subscribe<C: StreamConsumer>(&mut self, mut consumer: C) {
        let (tx, mut rx) = mpsc::channel::<Delivery>(self.demand);
        let worker = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Some(Delivery::Fragment(fragment)) => consumer.on_fragment(&fragment).await,
                    Some(Delivery::Completed) => {
                        consumer.on_complete().await;
                        break;
                    }
                    Some(Delivery::Failed(error)) => {
                        consumer.on_error(&error).await;
                        break;
                    }
                    // Producer dropped without a terminal signal
                    None => {
                        consumer.on_error("pipeline dropped before completion").await;
                        break;
                    }
                }
            }
        });
        self.senders.push(tx);
        self.workers.push(worker);
    }

    /// Number of subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.senders.len()
    }

    /// Deliver a fragment to every subscriber
    ///
    /// Waits only for subscribers whose demand window is exhausted.
    pub async fn submit(&self, fragment: &str) {
        let sends = self
            .senders
            .iter()
            .map(|tx| tx.send(Delivery::Fragment(fragment.to_owned())));
        for result in futures::future::join_all(sends).await {
            if result.is_err() {
                // Subscriber task ended early (panicked consumer); nothing to do
                tracing::warn!("fragment dropped by a dead subscriber");
            }
        }
    }

    /// Signal normal completion to every subscriber and wait for them to flush
    pub async fn complete_normally(self) {
        Self::finish(self.senders, self.workers, Delivery::Completed).await;
    }

    /// Signal failure to every subscriber and wait for them to reset
    pub async fn complete_with_error(self, error: impl Into<String>) {
        Self::finish(self.senders, self.workers, Delivery::Failed(error.into())).await;
    }

    async fn finish(senders: Vec<mpsc::Sender<Delivery>>, workers: Vec<JoinHandle<()>>, terminal: Delivery) {
        let sends = senders.iter().map(|tx| tx.send(terminal.clone()));
        let _ = futures::future::join_all(sends).await;
        drop(senders);
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "pipeline subscriber task failed");
            }
        }
    }
}
