//! Batched wait-until-ready scheduling.
//!
//! Handlers do not poll the provider themselves. They register a predicate
//! with the watcher of their resource family and the watcher folds every
//! pending wait into one `Read*` call per tick, so polling cost scales with
//! the tick period and not with the number of concurrent operations.

use crate::error::CloudError;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};

/// Environment variable overriding the poll interval, e.g. `500ms`.
pub const READ_STATUS_INTERVAL_ENV: &str = "READ_STATUS_INTERVAL";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
const SUBMIT_QUEUE: usize = 256;

/// A resource the watcher can locate inside a batch read.
pub trait Watched: Clone + Send + Sync + 'static {
    /// Provider identifier of the resource.
    fn resource_id(&self) -> &str;
}

/// One batched read over a set of resource ids.
#[async_trait]
pub trait BatchReader<R>: Send + Sync + 'static {
    /// Reads every resource in `ids` in a single provider call. Ids missing
    /// from the reply are simply absent from the result.
    async fn read_batch(&self, ids: &[String]) -> Result<Vec<R>, CloudError>;
}

type Predicate<R> = Box<dyn Fn(Option<&R>) -> Result<bool, CloudError> + Send>;

struct Waiter<R> {
    id: String,
    predicate: Predicate<R>,
    reply: oneshot::Sender<Result<Option<R>, CloudError>>,
}

/// Handle to a background watch loop. Cheap to clone; the loop exits once
/// every handle is dropped and no waits are pending.
pub struct ResourceWatcher<R> {
    submit: mpsc::Sender<Waiter<R>>,
}

impl<R> Clone for ResourceWatcher<R> {
    fn clone(&self) -> Self {
        Self {
            submit: self.submit.clone(),
        }
    }
}

impl<R: Watched> ResourceWatcher<R> {
    /// Starts a watch loop polling at the default interval
    /// (`READ_STATUS_INTERVAL` override).
    pub fn start(name: &'static str, reader: Arc<dyn BatchReader<R>>) -> Self {
        Self::with_interval(name, reader, interval_from_env())
    }

    /// Starts a watch loop with an explicit poll interval.
    pub fn with_interval(
        name: &'static str,
        reader: Arc<dyn BatchReader<R>>,
        interval: Duration,
    ) -> Self {
        let (submit, inbox) = mpsc::channel(SUBMIT_QUEUE);
        tokio::spawn(watch_loop(name, reader, inbox, interval));
        Self { submit }
    }

    /// Waits until `predicate` holds for the resource with the given id.
    ///
    /// The predicate receives `None` when the id is absent from the batch
    /// reply. Dropping the returned future cancels the wait; the loop drops
    /// the registration on its next tick without waking other waiters.
    pub async fn wait_until<P>(&self, id: &str, predicate: P) -> Result<Option<R>, CloudError>
    where
        P: Fn(Option<&R>) -> Result<bool, CloudError> + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let waiter = Waiter {
            id: id.to_string(),
            predicate: Box::new(predicate),
            reply,
        };
        self.submit
            .send(waiter)
            .await
            .map_err(|_| CloudError::WatcherClosed)?;
        response.await.map_err(|_| CloudError::WatcherClosed)?
    }
}

async fn watch_loop<R: Watched>(
    name: &'static str,
    reader: Arc<dyn BatchReader<R>>,
    mut inbox: mpsc::Receiver<Waiter<R>>,
    interval: Duration,
) {
    // first tick lands one full interval from now
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    let mut waiters: Vec<Waiter<R>> = Vec::new();
    let mut open = true;
    loop {
        if open {
            tokio::select! {
                submitted = inbox.recv() => match submitted {
                    Some(waiter) => waiters.push(waiter),
                    None => open = false,
                },
                _ = ticker.tick() => poll_once(name, &reader, &mut waiters).await,
            }
        } else {
            if waiters.is_empty() {
                return;
            }
            ticker.tick().await;
            poll_once(name, &reader, &mut waiters).await;
        }
    }
}

async fn poll_once<R: Watched>(
    name: &'static str,
    reader: &Arc<dyn BatchReader<R>>,
    waiters: &mut Vec<Waiter<R>>,
) {
    // cancelled callers release their slot without a read
    waiters.retain(|waiter| !waiter.reply.is_closed());
    if waiters.is_empty() {
        return;
    }

    let mut ids: Vec<String> = Vec::new();
    for waiter in waiters.iter() {
        if !ids.contains(&waiter.id) {
            ids.push(waiter.id.clone());
        }
    }

    let resources = match reader.read_batch(&ids).await {
        Ok(resources) => resources,
        Err(error) => {
            // transient failure: waiters stay pending for the next tick
            tracing::warn!(watcher = name, error = %error, "batch read failed");
            return;
        }
    };

    let by_id: HashMap<&str, &R> = resources
        .iter()
        .map(|resource| (resource.resource_id(), resource))
        .collect();

    let mut remaining = Vec::with_capacity(waiters.len());
    for waiter in waiters.drain(..) {
        let resource = by_id.get(waiter.id.as_str()).copied();
        match (waiter.predicate)(resource) {
            Ok(true) => {
                let _ = waiter.reply.send(Ok(resource.cloned()));
            }
            Ok(false) => remaining.push(waiter),
            Err(error) => {
                let _ = waiter.reply.send(Err(error));
            }
        }
    }
    *waiters = remaining;
}

fn interval_from_env() -> Duration {
    match std::env::var(READ_STATUS_INTERVAL_ENV) {
        Ok(raw) => humantime::parse_duration(&raw)
            .ok()
            .or_else(|| raw.parse::<u64>().ok().map(Duration::from_secs))
            .unwrap_or(DEFAULT_INTERVAL),
        Err(_) => DEFAULT_INTERVAL,
    }
}
