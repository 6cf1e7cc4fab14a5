//! Parallel tile rendering.
//!
//! A [`RenderPool`] owns a fixed set of worker threads, each with its own
//! display-format scratch tile. A render call fans one job per tile out to
//! the workers and returns once all of them have handed their pixels to the
//! callback. Dropping the pool waits for every worker to exit.

use std::sync::Mutex;

use crossbeam_channel::Receiver;
use document::CanvasDiff;
use model::{Pixel8, TILE_LENGTH, TilePos, TileRect, pixels15_to_8};

mod flatten;

pub use flatten::{RenderParams, flatten_view_tile};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render pool needs at least one thread")]
    NoThreads,
    #[error("failed to start render threads: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

pub struct RenderPool {
    pool: Option<rayon::ThreadPool>,
    scratch: Vec<Mutex<Box<[Pixel8]>>>,
    /// Receives the index of each worker as it exits.
    exited: Receiver<usize>,
}

impl RenderPool {
    pub fn new(thread_count: usize) -> Result<Self, RenderError> {
        if thread_count == 0 {
            return Err(RenderError::NoThreads);
        }
        let (exit_sender, exited) = crossbeam_channel::unbounded();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .thread_name(|index| format!("render-{index}"))
            .exit_handler(move |index| {
                let _ = exit_sender.send(index);
            })
            .build()?;
        let scratch = (0..thread_count)
            .map(|_| Mutex::new(vec![Pixel8::default(); TILE_LENGTH].into_boxed_slice()))
            .collect();
        log::info!("render pool started with {thread_count} threads");
        Ok(Self {
            pool: Some(pool),
            scratch,
            exited,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.scratch.len()
    }

    /// Flattens every tile in `positions` and passes the display pixels to
    /// `callback` together with the index of the worker that produced them.
    /// Blocks until all tiles are done. Callbacks run concurrently.
    pub fn render<F>(&self, params: &RenderParams<'_>, positions: &[TilePos], callback: &F)
    where
        F: Fn(TilePos, &[Pixel8], usize) + Sync,
    {
        let Some(pool) = &self.pool else {
            return;
        };
        if positions.is_empty() {
            return;
        }
        let counts = params.view.tile_counts();
        pool.scope(|scope| {
            for &pos in positions {
                let Ok(index) = counts.tile_index(pos) else {
                    log::warn!("skipping tile ({}, {}) outside the canvas", pos.x, pos.y);
                    continue;
                };
                scope.spawn(move |_| self.render_tile(params, pos, index, callback));
            }
        });
    }

    /// Renders every tile and clears `diff`.
    pub fn render_everything<F>(&self, params: &RenderParams<'_>, diff: &mut CanvasDiff, callback: &F)
    where
        F: Fn(TilePos, &[Pixel8], usize) + Sync,
    {
        diff.each_pos_reset(|_| {});
        let positions: Vec<TilePos> = params.view.tile_counts().positions().collect();
        self.render(params, &positions, callback);
    }

    /// Renders the dirty tiles inside the tile rectangle
    /// `left..=right`, `top..=bottom`, clamped to the canvas. Dirty tiles
    /// outside of it stay pending.
    #[allow(clippy::too_many_arguments)]
    pub fn render_tile_range<F>(
        &self,
        params: &RenderParams<'_>,
        diff: &mut CanvasDiff,
        left: i64,
        top: i64,
        right: i64,
        bottom: i64,
        callback: &F,
    ) where
        F: Fn(TilePos, &[Pixel8], usize) + Sync,
    {
        let Some(bounds) = TileRect::clamped(left, top, right, bottom, params.view.tile_counts()) else {
            return;
        };
        let mut positions = Vec::new();
        diff.each_pos_tile_bounds_reset(bounds, |pos| positions.push(pos));
        self.render(params, &positions, callback);
    }

    fn render_tile<F>(&self, params: &RenderParams<'_>, pos: TilePos, index: usize, callback: &F)
    where
        F: Fn(TilePos, &[Pixel8], usize) + Sync,
    {
        let thread_index = rayon::current_thread_index().unwrap_or(0);
        let tile = flatten_view_tile(params, index);
        let mut scratch = self.scratch[thread_index]
            .lock()
            .expect("render scratch lock poisoned");
        pixels15_to_8(&mut scratch, tile.pixels());
        callback(pos, &scratch, thread_index);
    }
}

impl RenderPool {
    /// Stops the workers and blocks until each one has exited. Returns how
    /// many exited.
    fn shutdown(&mut self) -> usize {
        let Some(pool) = self.pool.take() else {
            return 0;
        };
        drop(pool);
        let mut exited = 0;
        while exited < self.scratch.len() && self.exited.recv().is_ok() {
            exited += 1;
        }
        exited
    }
}

impl Drop for RenderPool {
    fn drop(&mut self) {
        let exited = self.shutdown();
        log::info!("render pool stopped, {exited} threads joined");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document::{BasicCompositor, CanvasState, ViewModeFilter};
    use model::Color;
    use protocol::{LayerCreate, Message, MessageBody};
    use std::collections::HashSet;

    fn canvas() -> CanvasState {
        let resize = Message::new(
            1,
            MessageBody::CanvasResize {
                top: 0,
                right: 200,
                bottom: 130,
                left: 0,
            },
        );
        let layer = Message::new(
            1,
            MessageBody::LayerCreate(LayerCreate {
                id: 1,
                parent: None,
                group: false,
                fill: Color::BLACK,
                title: String::new(),
            }),
        );
        CanvasState::new()
            .apply(&BasicCompositor, &resize)
            .and_then(|state| state.apply(&BasicCompositor, &layer))
            .expect("canvas")
    }

    fn collect(
        pool: &RenderPool,
        f: impl FnOnce(&RenderPool, &(dyn Fn(TilePos, &[Pixel8], usize) + Sync)),
    ) -> HashSet<TilePos> {
        let seen = Mutex::new(Vec::new());
        let callback = |pos: TilePos, pixels: &[Pixel8], thread_index: usize| {
            assert!(thread_index < pool.thread_count());
            assert_eq!(pixels[0].a, u8::MAX);
            seen.lock().expect("seen lock").push(pos);
        };
        f(pool, &callback);
        let seen = seen.into_inner().expect("seen lock");
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(unique.len(), seen.len(), "tile rendered twice");
        unique
    }

    #[test]
    fn render_everything_visits_each_tile_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let state = canvas();
        let filter = ViewModeFilter::Normal;
        let params = RenderParams {
            view: &state,
            compositor: &BasicCompositor,
            filter: &filter,
            onion_skins: None,
            checker: None,
        };
        let pool = RenderPool::new(3).expect("pool");
        let mut diff = CanvasDiff::new();
        let seen = collect(&pool, |pool, callback| {
            pool.render_everything(&params, &mut diff, &callback)
        });
        assert_eq!(seen.len(), 12);
        assert!(diff.is_empty());
    }

    #[test]
    fn tile_ranges_are_clamped_and_leave_the_rest_pending() {
        let state = canvas();
        let filter = ViewModeFilter::Normal;
        let params = RenderParams {
            view: &state,
            compositor: &BasicCompositor,
            filter: &filter,
            onion_skins: None,
            checker: None,
        };
        let pool = RenderPool::new(2).expect("pool");
        let mut diff = CanvasDiff::new();
        diff.diff(&CanvasState::new(), &state);

        let seen = collect(&pool, |pool, callback| {
            pool.render_tile_range(&params, &mut diff, -5, -5, 0, 10, &callback)
        });
        let expected: HashSet<_> = (0..3).map(|y| TilePos { x: 0, y }).collect();
        assert_eq!(seen, expected);
        assert!(diff.is_dirty(TilePos { x: 3, y: 2 }));
        assert!(!diff.is_dirty(TilePos { x: 0, y: 1 }));
    }

    #[test]
    fn shutdown_waits_for_every_worker() {
        let state = canvas();
        let filter = ViewModeFilter::Normal;
        let params = RenderParams {
            view: &state,
            compositor: &BasicCompositor,
            filter: &filter,
            onion_skins: None,
            checker: None,
        };
        let mut pool = RenderPool::new(4).expect("pool");
        let mut diff = CanvasDiff::new();
        let seen = collect(&pool, |pool, callback| {
            pool.render_everything(&params, &mut diff, &callback)
        });
        assert_eq!(seen.len(), 12);

        assert_eq!(pool.shutdown(), 4);
        assert_eq!(pool.shutdown(), 0);
        diff.check_all();
        let after = collect(&pool, |pool, callback| {
            pool.render_everything(&params, &mut diff, &callback)
        });
        assert!(after.is_empty());
    }

    #[test]
    fn zero_threads_is_rejected() {
        assert!(matches!(RenderPool::new(0), Err(RenderError::NoThreads)));
    }
}
