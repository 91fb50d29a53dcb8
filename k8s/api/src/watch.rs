//! A `watcher::Event` stream that retries transient watch errors (and an
//! exhausted stream) after a short delay, but gives up and propagates
//! anything that looks like an authorization or resource-shape problem —
//! no amount of waiting fixes a watch the apiserver will never honor.

use std::fmt::Debug;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use kube::runtime::watcher;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;

const RESTART_DELAY: Duration = Duration::from_secs(1);

type EventStream<T> = Pin<Box<dyn Stream<Item = watcher::Result<watcher::Event<T>>> + Send>>;

pub struct Watch<T> {
    api: Api<T>,
    config: watcher::Config,
    inner: EventStream<T>,
}

/// Errors that retrying can't fix: the apiserver rejected the request
/// itself (bad RBAC, missing/mismatched CRD), not just this one attempt.
/// Everything else — connection resets, a closed stream, an expired
/// resourceVersion forcing a relist — is transient and gets retried.
fn is_fatal(error: &watcher::Error) -> bool {
    let message = error.to_string();
    [
        "401 Unauthorized",
        "403 Forbidden",
        "404 Not Found",
        "the server could not find the requested resource",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

impl<T> Watch<T>
where
    T: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    T::DynamicType: Default,
{
    pub fn new(api: Api<T>, config: watcher::Config) -> Self {
        let inner = Self::start(&api, config.clone());
        Self {
            api,
            config,
            inner,
        }
    }

    fn start(api: &Api<T>, config: watcher::Config) -> EventStream<T> {
        watcher::watcher(api.clone(), config).boxed()
    }

    /// Pull the next watch event, restarting the underlying stream on a
    /// transient error or exhaustion. Returns `Err` only for a fatal
    /// error, which the caller must propagate instead of retrying.
    pub async fn recv(&mut self) -> Result<watcher::Event<T>, watcher::Error> {
        loop {
            match self.inner.next().await {
                Some(Ok(event)) => return Ok(event),
                Some(Err(error)) if is_fatal(&error) => {
                    tracing::error!(%error, "fatal watch error, giving up");
                    return Err(error);
                }
                Some(Err(error)) => {
                    tracing::warn!(%error, "watch error, restarting");
                }
                None => {
                    tracing::warn!("watch stream ended, restarting");
                }
            }
            tokio::time::sleep(RESTART_DELAY).await;
            self.inner = Self::start(&self.api, self.config.clone());
        }
    }
}
