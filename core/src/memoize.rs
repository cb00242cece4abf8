//! Single-flight memoization with per-entry expiry
//!
//! A [`Memo`] wraps an async fetch function. Concurrent calls for the same key
//! share one in-flight fetch and all receive its result. Successful results
//! are kept until the expiry the fetch function returned; failures are never
//! kept, so the next call fetches again.
//!
//! The fetch runs in its own task. A caller that stops waiting (for example
//! because it was wrapped in `tokio::time::timeout`) detaches without
//! disturbing the others; the task is aborted once the last waiter detaches.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::ApiError;
use crate::platform::Clock;

/// The shared fetch ended without producing a result (aborted or panicked)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("shared fetch was interrupted")]
pub struct Interrupted;

impl From<Interrupted> for ApiError {
    fn from(err: Interrupted) -> Self {
        ApiError::upstream_error(err.to_string())
    }
}

type FetchFn<K, V, E> = dyn Fn(K) -> BoxFuture<'static, Result<(V, u64), E>> + Send + Sync;

struct InFlight<V, E> {
    id: u64,
    waiters: Vec<oneshot::Sender<Result<V, E>>>,
    refs: usize,
    abort: AbortHandle,
}

struct Entry<V, E> {
    value: Option<(V, u64)>,
    call: Option<InFlight<V, E>>,
}

impl<V, E> Default for Entry<V, E> {
    fn default() -> Self {
        Self {
            value: None,
            call: None,
        }
    }
}

struct State<K, V, E> {
    entries: HashMap<K, Entry<V, E>>,
    next_id: u64,
}

struct Inner<K, V, E> {
    fetch: Box<FetchFn<K, V, E>>,
    clock: Arc<dyn Clock>,
    state: Mutex<State<K, V, E>>,
}

impl<K: Eq + Hash, V, E> Inner<K, V, E> {
    fn lock(&self) -> MutexGuard<'_, State<K, V, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Eq + Hash, V, E> State<K, V, E> {
    /// Drop an entry that holds neither a value nor a call
    fn prune(&mut self, key: &K) {
        if let Some(entry) = self.entries.get(key) {
            if entry.value.is_none() && entry.call.is_none() {
                self.entries.remove(key);
            }
        }
    }
}

/// Memoized, deduplicating wrapper around an async fetch function
///
/// The fetch function returns the value together with its absolute expiry in
/// Unix seconds. Cloning a `Memo` shares the cache.
pub struct Memo<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for Memo<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V, E> Memo<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
    E: From<Interrupted> + Clone + Send + 'static,
{
    pub fn new<F, Fut>(clock: Arc<dyn Clock>, fetch: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(V, u64), E>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                fetch: Box::new(move |key| Box::pin(fetch(key))),
                clock,
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    /// Return the cached value for `key`, or join the fetch that produces it
    pub async fn call(&self, key: K) -> Result<V, E> {
        let (receiver, id) = {
            let mut state = self.inner.lock();
            let now = self.inner.clock.now_secs();
            let State { entries, next_id } = &mut *state;
            let entry = entries.entry(key.clone()).or_default();

            if let Some((value, expires_at)) = &entry.value {
                if now < *expires_at {
                    return Ok(value.clone());
                }
            }

            let (sender, receiver) = oneshot::channel();
            match &mut entry.call {
                Some(call) => {
                    call.waiters.push(sender);
                    call.refs += 1;
                    (receiver, call.id)
                }
                None => {
                    *next_id += 1;
                    let id = *next_id;
                    // the task cannot touch the entry before this lock is released
                    let task = tokio::spawn(run(self.inner.clone(), key.clone(), id));
                    entry.call = Some(InFlight {
                        id,
                        waiters: vec![sender],
                        refs: 1,
                        abort: task.abort_handle(),
                    });
                    (receiver, id)
                }
            }
        };

        let _waiter = Waiter {
            inner: &self.inner,
            key: &key,
            id,
        };
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(Interrupted.into()),
        }
    }
}

/// Detaches one caller from an in-flight fetch when its future is dropped
struct Waiter<'a, K: Eq + Hash, V, E> {
    inner: &'a Inner<K, V, E>,
    key: &'a K,
    id: u64,
}

impl<K: Eq + Hash, V, E> Drop for Waiter<'_, K, V, E> {
    fn drop(&mut self) {
        let abort = {
            let mut state = self.inner.lock();
            let Some(entry) = state.entries.get_mut(self.key) else {
                return;
            };
            let Some(call) = entry.call.as_mut().filter(|c| c.id == self.id) else {
                // already completed
                return;
            };
            call.refs -= 1;
            if call.refs > 0 {
                return;
            }
            let abort = entry.call.take().map(|c| c.abort);
            state.prune(self.key);
            abort
        };
        if let Some(abort) = abort {
            abort.abort();
        }
    }
}

/// Clears the in-flight marker if the fetch task ends without completing
struct Completion<K: Eq + Hash, V, E> {
    inner: Arc<Inner<K, V, E>>,
    key: K,
    id: u64,
    armed: bool,
}

impl<K: Eq + Hash, V, E> Drop for Completion<K, V, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.lock();
        if let Some(entry) = state.entries.get_mut(&self.key) {
            if entry.call.as_ref().is_some_and(|c| c.id == self.id) {
                // dropping the senders wakes the waiters with `Interrupted`
                entry.call = None;
            }
        }
        state.prune(&self.key);
    }
}

async fn run<K, V, E>(inner: Arc<Inner<K, V, E>>, key: K, id: u64)
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    let mut completion = Completion {
        inner: inner.clone(),
        key: key.clone(),
        id,
        armed: true,
    };
    let result = (inner.fetch)(key.clone()).await;
    completion.armed = false;

    let waiters = {
        let mut state = inner.lock();
        let Some(entry) = state.entries.get_mut(&key) else {
            return;
        };
        let Some(call) = entry.call.take_if(|c| c.id == id) else {
            return;
        };
        if let Ok((value, expires_at)) = &result {
            entry.value = Some((value.clone(), *expires_at));
        }
        state.prune(&key);
        call.waiters
    };

    let result = result.map(|(value, _)| value);
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}
