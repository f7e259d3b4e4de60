//! Concurrent fan-out across the fleet.
//!
//! A producer is one async task per (host, page). It takes one limiter slot
//! for the duration of the network call, releases the slot, schedules the
//! next-page continuation, and only then pushes elements into the stage
//! channel. That ordering is what keeps the engine deadlock-free: no task
//! ever blocks on the channel while holding a slot, and the channel always
//! has a live sender while a pagination tail is outstanding.
//!
//! Channels close when the last producer's sender clone is dropped, so a
//! consumer can simply drain to completion and then read the limiter's
//! error log.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::gitlab::Page;
use crate::hosts::Host;
use crate::limiter::{Limiter, TaskGuard};

/// One typed record produced by a single upstream call, tagged with the host
/// that produced it and whether the response came from the local cache.
#[derive(Debug, Clone)]
pub struct Element<T> {
    pub host: Host,
    pub payload: T,
    pub cached: bool,
}

/// Boxed future returned by a page fetcher.
pub type PageFuture<T> = Pin<Box<dyn Future<Output = Result<Page<T>>> + Send>>;

/// A page fetcher: one network call for `(host, page)`.
pub type PageFetcher<T> = Arc<dyn Fn(Host, u32) -> PageFuture<T> + Send + Sync>;

/// Create a stage channel. Capacity one: producers hand elements directly to
/// the consumer and park otherwise.
pub fn stage_channel<T>() -> (mpsc::Sender<Element<T>>, mpsc::Receiver<Element<T>>) {
    mpsc::channel(1)
}

/// Spawn the paginated producer for one host, starting at page 1.
pub fn spawn_paged<T: Send + 'static>(
    host: Host,
    fetch: PageFetcher<T>,
    limiter: Arc<Limiter>,
    tx: mpsc::Sender<Element<T>>,
    cancel: CancellationToken,
) {
    spawn_page(host, 1, fetch, limiter, tx, cancel);
}

fn spawn_page<T: Send + 'static>(
    host: Host,
    page: u32,
    fetch: PageFetcher<T>,
    limiter: Arc<Limiter>,
    tx: mpsc::Sender<Element<T>>,
    cancel: CancellationToken,
) {
    // Register before spawning so `wait` cannot observe a transient zero
    // between a parent finishing and its continuation starting.
    limiter.add(1);
    tokio::spawn(run_page(host, page, fetch, limiter, tx, cancel));
}

async fn run_page<T: Send + 'static>(
    host: Host,
    page: u32,
    fetch: PageFetcher<T>,
    limiter: Arc<Limiter>,
    tx: mpsc::Sender<Element<T>>,
    cancel: CancellationToken,
) {
    let _guard = TaskGuard::new(Arc::clone(&limiter));

    if cancel.is_cancelled() {
        return;
    }

    let permit = limiter.lock().await;
    let result = tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        r = fetch(host.clone(), page) => r,
    };
    drop(permit);

    let page_data = match result {
        Ok(p) => p,
        Err(e) => {
            limiter.error(host, e);
            return;
        }
    };

    // Schedule the tail before pushing: the continuation's sender clone
    // keeps the channel open however long the pushes below take.
    if let Some(next) = page_data.next_page {
        if !cancel.is_cancelled() {
            spawn_page(
                host.clone(),
                next,
                Arc::clone(&fetch),
                Arc::clone(&limiter),
                tx.clone(),
                cancel.clone(),
            );
        }
    }

    for item in page_data.items {
        let element = Element {
            host: host.clone(),
            payload: item,
            cached: page_data.cached,
        };
        if tx.send(element).await.is_err() {
            return;
        }
    }
}

/// Spawn a producer that makes exactly one call under one limiter slot and
/// pushes at most one element. `Ok(None)` emits nothing (a miss, not an
/// error).
pub fn spawn_single<T, F, Fut>(
    host: Host,
    limiter: Arc<Limiter>,
    tx: mpsc::Sender<Element<T>>,
    cancel: CancellationToken,
    op: F,
) where
    T: Send + 'static,
    F: FnOnce(Host) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<(T, bool)>>> + Send + 'static,
{
    limiter.add(1);
    tokio::spawn(async move {
        let _guard = TaskGuard::new(Arc::clone(&limiter));

        if cancel.is_cancelled() {
            return;
        }

        let permit = limiter.lock().await;
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            r = op(host.clone()) => r,
        };
        drop(permit);

        match result {
            Ok(Some((payload, cached))) => {
                let _ = tx
                    .send(Element {
                        host,
                        payload,
                        cached,
                    })
                    .await;
            }
            Ok(None) => {}
            Err(e) => limiter.error(host, e),
        }
    });
}

/// Spawn a producer whose operation manages limiter slots itself (flows that
/// make several calls, each under its own slot).
pub fn spawn_self_locking<T, F, Fut>(
    host: Host,
    limiter: Arc<Limiter>,
    tx: mpsc::Sender<Element<T>>,
    cancel: CancellationToken,
    op: F,
) where
    T: Send + 'static,
    F: FnOnce(Host, Arc<Limiter>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<(T, bool)>>> + Send + 'static,
{
    limiter.add(1);
    tokio::spawn(async move {
        let _guard = TaskGuard::new(Arc::clone(&limiter));

        if cancel.is_cancelled() {
            return;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            r = op(host.clone(), Arc::clone(&limiter)) => r,
        };

        match result {
            Ok(Some((payload, cached))) => {
                let _ = tx
                    .send(Element {
                        host,
                        payload,
                        cached,
                    })
                    .await;
            }
            Ok(None) => {}
            Err(e) => limiter.error(host, e),
        }
    });
}

/// Drain a stage channel into a buffer. Returns once every producer's
/// sender clone has been dropped.
pub async fn collect<T>(mut rx: mpsc::Receiver<Element<T>>) -> Vec<Element<T>> {
    let mut elements = Vec::new();
    while let Some(element) = rx.recv().await {
        elements.push(element);
    }
    elements
}
