use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::cache::CacheKey;

use super::types::RenderResult;

type SharedRender = Shared<BoxFuture<'static, RenderResult>>;

struct InFlight {
    generation: u64,
    render: SharedRender,
}

/// Tracks renders currently in progress so concurrent callers for the same
/// key can await one shared result instead of rendering again.
#[derive(Default, Clone)]
pub struct InFlightRenders {
    renders: Arc<DashMap<CacheKey, InFlight>>,
    generations: Arc<AtomicU64>,
}

impl InFlightRenders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the render already running for `key`, or start one with `start`.
    ///
    /// `start` receives the [`RenderGuard`] for the new entry. The entry lives
    /// until that guard drops, so it must travel with the render itself and
    /// not with any caller awaiting it.
    pub async fn run<F>(&self, key: CacheKey, start: F) -> RenderResult
    where
        F: FnOnce(RenderGuard) -> BoxFuture<'static, RenderResult>,
    {
        let render = match self.renders.entry(key.clone()) {
            Entry::Occupied(occupied) => occupied.get().render.clone(),
            Entry::Vacant(vacant) => {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                let guard = RenderGuard {
                    key,
                    generation,
                    renders: Arc::clone(&self.renders),
                };
                let render = start(guard).shared();
                vacant.insert(InFlight {
                    generation,
                    render: render.clone(),
                });
                render
            }
        };

        render.await
    }

    pub fn len(&self) -> usize {
        self.renders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renders.is_empty()
    }
}

/// Removes its in-flight entry on drop.
pub struct RenderGuard {
    key: CacheKey,
    generation: u64,
    renders: Arc<DashMap<CacheKey, InFlight>>,
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        let generation = self.generation;
        self.renders
            .remove_if(&self.key, |_, current| current.generation == generation);
    }
}
