#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::prelude::*;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::ThreadPool;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::OnceLock;

/// Crate-local Rayon pool for row-parallel layer evaluation.
///
/// Building the global pool can fail on starved hosts and Rayon then panics on first use, so
/// the calculator uses its own pool and runs sequentially when none can be created.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
static ROW_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn desired_threads() -> usize {
    std::env::var("RAYON_NUM_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn build_pool() -> Option<ThreadPool> {
    let requested = desired_threads();
    let build = |n| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("formula-grid-{i}"))
            .build()
    };
    match build(requested) {
        Ok(pool) => Some(pool),
        Err(err) if requested > 1 => {
            log::warn!("failed to start {requested} worker threads ({err}); retrying with one");
            build(1).ok()
        }
        Err(err) => {
            log::warn!("failed to start worker thread ({err}); evaluating sequentially");
            None
        }
    }
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn row_pool() -> Option<&'static ThreadPool> {
    ROW_POOL.get_or_init(build_pool).as_ref()
}

/// Run `f(state, y, row)` for every `width`-sized row of `cells`.
///
/// Each worker gets its own `state` from `init`; rows are processed in parallel when a pool is
/// available and `parallel` is set.
pub(crate) fn for_each_row<S, I, F>(cells: &mut [f64], width: usize, parallel: bool, init: I, f: F)
where
    I: Fn() -> S + Send + Sync,
    F: Fn(&mut S, usize, &mut [f64]) + Send + Sync,
{
    if width == 0 {
        return;
    }

    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    if parallel {
        if let Some(pool) = row_pool() {
            pool.install(|| {
                cells
                    .par_chunks_mut(width)
                    .enumerate()
                    .for_each_init(&init, |state, (y, row)| f(state, y, row));
            });
            return;
        }
    }
    #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
    let _ = parallel;

    let mut state = init();
    for (y, row) in cells.chunks_mut(width).enumerate() {
        f(&mut state, y, row);
    }
}
