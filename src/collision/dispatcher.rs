//! Chooses a collision algorithm per pair and drives the narrow phase over
//! the overlapping-pair cache.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::algorithm::{CollisionAlgorithm, DispatchFunc, DispatchInfo};
use super::broadphase::{OverlappingPairCache, Pair};
use super::convex_concave::ConvexConcaveAlgorithm;
use super::convex_convex::ConvexConvexAlgorithm;
use super::manifold::{ManifoldPool, PersistentManifold};
use crate::config::{CollisionConfig, CCD_ALLOWED_PENETRATION};
use crate::core::collision_object::CollisionObject;
use crate::utils::logging::ScopedTimer;
use crate::utils::task_pool::{TaskPool, TaskPriority};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DispatchStats {
    pub dispatches: u64,
    pub pairs_processed: usize,
    pub algorithms_created: usize,
    /// Pairs whose time of impact fell inside the last continuous pass.
    pub impacts: usize,
    pub narrowphase_time: Duration,
}

#[derive(Debug)]
pub struct CollisionDispatcher {
    config: CollisionConfig,
    pool: Arc<ManifoldPool>,
    stats: DispatchStats,
    step_count: u64,
    task_pool: Option<Arc<TaskPool>>,
}

impl Default for CollisionDispatcher {
    fn default() -> Self {
        Self::new(CollisionConfig::default())
    }
}

impl CollisionDispatcher {
    pub fn new(config: CollisionConfig) -> Self {
        Self {
            config,
            pool: ManifoldPool::shared(config.manifold_pool_capacity),
            stats: DispatchStats::default(),
            step_count: 0,
            task_pool: None,
        }
    }

    /// Attaches a pool that runs both narrow-phase passes. While attached it
    /// takes precedence over `parallel_dispatch`.
    pub fn set_task_pool(&mut self, task_pool: Option<Arc<TaskPool>>) {
        if let Some(pool) = &task_pool {
            debug!("narrow phase runs on a task pool with {} workers", pool.worker_count());
        }
        self.task_pool = task_pool;
    }

    pub fn task_pool(&self) -> Option<&Arc<TaskPool>> {
        self.task_pool.as_ref()
    }

    pub fn config(&self) -> &CollisionConfig {
        &self.config
    }

    /// Replaces the configuration. Existing algorithms pick it up on their
    /// next dispatch.
    pub fn set_config(&mut self, config: CollisionConfig) {
        if config != self.config {
            debug!("collision dispatcher configuration replaced: {config:?}");
        }
        self.config = config;
    }

    pub fn pool(&self) -> &Arc<ManifoldPool> {
        &self.pool
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// False when neither body can move.
    pub fn needs_collision(&self, body0: &CollisionObject, body1: &CollisionObject) -> bool {
        !(body0.is_static_or_kinematic() && body1.is_static_or_kinematic())
    }

    /// False when either body is a sensor. Such pairs still get manifolds but
    /// never lower a hit fraction in the continuous pass.
    pub fn needs_response(&self, body0: &CollisionObject, body1: &CollisionObject) -> bool {
        contact_response(body0, body1)
    }

    /// Picks the algorithm for a pair by shape class. Concave/concave pairs
    /// have none.
    pub fn find_algorithm(
        &self,
        index0: usize,
        body0: &CollisionObject,
        index1: usize,
        body1: &CollisionObject,
    ) -> Option<Box<dyn CollisionAlgorithm>> {
        let pool = Arc::clone(&self.pool);
        match (body0.shape.is_convex(), body1.shape.is_convex()) {
            (true, true) => Some(Box::new(ConvexConvexAlgorithm::new(
                index0,
                index1,
                pool,
                self.config,
            ))),
            (true, false) => Some(Box::new(ConvexConcaveAlgorithm::new(
                index0,
                index1,
                false,
                pool,
                self.config,
            ))),
            (false, true) => Some(Box::new(ConvexConcaveAlgorithm::new(
                index0,
                index1,
                true,
                pool,
                self.config,
            ))),
            (false, false) => None,
        }
    }

    /// Builds the per-step dispatch parameters from the current configuration.
    pub fn dispatch_info(&mut self, time_step: f32, dispatch_func: DispatchFunc) -> DispatchInfo {
        self.step_count += 1;
        DispatchInfo {
            time_step,
            step_count: self.step_count,
            dispatch_func,
            allowed_ccd_penetration: CCD_ALLOWED_PENETRATION,
            config: self.config,
        }
    }

    /// Runs the narrow phase for every pair in `cache`. `objects` is indexed
    /// by the proxies' client ids.
    ///
    /// The continuous pass resets every object's hit fraction, then lowers
    /// it to the earliest time of impact among the pairs it takes part in.
    pub fn dispatch_all_collision_pairs<T>(
        &mut self,
        cache: &mut OverlappingPairCache,
        objects: &mut [T],
        info: &DispatchInfo,
    ) where
        T: AsRef<CollisionObject> + AsMut<CollisionObject> + Sync,
    {
        let info = DispatchInfo {
            config: self.config,
            ..*info
        };
        let parallel = self.config.parallel_dispatch;

        let mut created = 0;
        for pair in cache.pairs_mut() {
            if pair.algorithm.is_some() {
                continue;
            }
            let (index0, index1) = (pair.proxy0.client, pair.proxy1.client);
            let (Some(body0), Some(body1)) = (objects.get(index0), objects.get(index1)) else {
                continue;
            };
            if !self.needs_collision(body0.as_ref(), body1.as_ref()) {
                continue;
            }
            pair.algorithm = self.find_algorithm(index0, body0.as_ref(), index1, body1.as_ref());
            if pair.algorithm.is_some() {
                created += 1;
            }
        }

        let mut elapsed = Duration::ZERO;
        let mut impacts = 0;
        let processed = {
            let _timer = ScopedTimer::accumulate("narrowphase", &mut elapsed);
            match info.dispatch_func {
                DispatchFunc::Discrete => match &self.task_pool {
                    Some(pool) => {
                        let snapshot = snapshot_objects(objects);
                        run_on_pool(pool, cache, snapshot, move |pair, objects| {
                            process_pair(pair, objects, &info).then_some(())
                        })
                        .len()
                    }
                    None => process_pairs(cache.pairs_mut(), objects, &info, parallel),
                },
                DispatchFunc::Continuous => {
                    if !self.config.ccd_enabled {
                        0
                    } else {
                        for object in objects.iter_mut() {
                            object.as_mut().reset_hit_fraction();
                        }
                        let hits = match &self.task_pool {
                            Some(pool) => {
                                let snapshot = snapshot_objects(objects);
                                run_on_pool(pool, cache, snapshot, move |pair, objects| {
                                    pair_time_of_impact(pair, objects, &info)
                                })
                            }
                            None => time_of_impacts(cache.pairs_mut(), objects, &info, parallel),
                        };
                        impacts = hits.len();
                        for (index0, index1, fraction) in hits {
                            objects[index0].as_mut().clamp_hit_fraction(fraction);
                            objects[index1].as_mut().clamp_hit_fraction(fraction);
                        }
                        cache.len()
                    }
                }
            }
        };

        self.stats.dispatches += 1;
        self.stats.pairs_processed = processed;
        self.stats.algorithms_created += created;
        self.stats.impacts = impacts;
        self.stats.narrowphase_time = elapsed;
    }

    /// Copies of every manifold held by the cache's algorithms.
    pub fn collect_manifolds(&self, cache: &OverlappingPairCache) -> Vec<PersistentManifold> {
        let mut out = Vec::new();
        for pair in cache.pairs() {
            if let Some(algorithm) = &pair.algorithm {
                algorithm.collect_manifolds(&mut out);
            }
        }
        out
    }
}

fn pair_bodies<'o, T: AsRef<CollisionObject>>(
    pair: &Pair,
    objects: &'o [T],
) -> Option<(&'o CollisionObject, &'o CollisionObject)> {
    let body0 = objects.get(pair.proxy0.client)?;
    let body1 = objects.get(pair.proxy1.client)?;
    Some((body0.as_ref(), body1.as_ref()))
}

fn contact_response(body0: &CollisionObject, body1: &CollisionObject) -> bool {
    body0.has_contact_response() && body1.has_contact_response()
}

fn process_pair<T: AsRef<CollisionObject>>(pair: &mut Pair, objects: &[T], info: &DispatchInfo) -> bool {
    let Some((body0, body1)) = pair_bodies(pair, objects) else {
        return false;
    };
    match pair.algorithm.as_mut() {
        Some(algorithm) => {
            algorithm.process_collision(body0, body1, info);
            true
        }
        None => false,
    }
}

fn pair_time_of_impact<T: AsRef<CollisionObject>>(
    pair: &mut Pair,
    objects: &[T],
    info: &DispatchInfo,
) -> Option<(usize, usize, f32)> {
    let (body0, body1) = pair_bodies(pair, objects)?;
    if !contact_response(body0, body1) {
        return None;
    }
    let algorithm = pair.algorithm.as_mut()?;
    let fraction = algorithm.calculate_time_of_impact(body0, body1, info);
    (fraction < 1.0).then_some((pair.proxy0.client, pair.proxy1.client, fraction))
}

fn process_pairs<T>(pairs: &mut [Pair], objects: &[T], info: &DispatchInfo, parallel: bool) -> usize
where
    T: AsRef<CollisionObject> + Sync,
{
    #[cfg(feature = "parallel")]
    {
        if parallel {
            return pairs
                .par_iter_mut()
                .map(|pair| process_pair(pair, objects, info))
                .filter(|&done| done)
                .count();
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel;

    pairs
        .iter_mut()
        .map(|pair| process_pair(pair, objects, info))
        .filter(|&done| done)
        .count()
}

fn time_of_impacts<T>(
    pairs: &mut [Pair],
    objects: &[T],
    info: &DispatchInfo,
    parallel: bool,
) -> Vec<(usize, usize, f32)>
where
    T: AsRef<CollisionObject> + Sync,
{
    #[cfg(feature = "parallel")]
    {
        if parallel {
            return pairs
                .par_iter_mut()
                .filter_map(|pair| pair_time_of_impact(pair, objects, info))
                .collect();
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel;

    pairs
        .iter_mut()
        .filter_map(|pair| pair_time_of_impact(pair, objects, info))
        .collect()
}

fn snapshot_objects<T: AsRef<CollisionObject>>(objects: &[T]) -> Arc<Vec<CollisionObject>> {
    Arc::new(objects.iter().map(|object| object.as_ref().clone()).collect())
}

type FinishedChunk<R> = (usize, Vec<Pair>, Vec<R>);

/// Runs `job` over contiguous chunks of the cache's pairs on `pool`, with the
/// calling thread draining the queue too. Pairs return to the cache in their
/// original order and results come back in pair order.
fn run_on_pool<R, F>(
    pool: &TaskPool,
    cache: &mut OverlappingPairCache,
    objects: Arc<Vec<CollisionObject>>,
    job: F,
) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(&mut Pair, &[CollisionObject]) -> Option<R> + Send + Sync + 'static,
{
    let pairs = cache.take_pairs();
    let total = pairs.len();
    let chunk_len = total.div_ceil(pool.worker_count() + 1).max(1);
    let job = Arc::new(job);
    let finished: Arc<Mutex<Vec<FinishedChunk<R>>>> = Arc::new(Mutex::new(Vec::new()));

    let mut remaining = pairs.into_iter();
    for index in 0.. {
        let mut chunk: Vec<Pair> = remaining.by_ref().take(chunk_len).collect();
        if chunk.is_empty() {
            break;
        }
        let job = Arc::clone(&job);
        let objects = Arc::clone(&objects);
        let finished = Arc::clone(&finished);
        pool.push(TaskPriority::Normal, move || {
            let results: Vec<R> = chunk
                .iter_mut()
                .filter_map(|pair| job(pair, objects.as_slice()))
                .collect();
            finished.lock().push((index, chunk, results));
        });
    }
    pool.work_and_wait();

    let mut finished = std::mem::take(&mut *finished.lock());
    finished.sort_by_key(|(index, ..)| *index);
    let mut pairs = Vec::with_capacity(total);
    let mut results = Vec::new();
    for (_, chunk, chunk_results) in finished {
        pairs.extend(chunk);
        results.extend(chunk_results);
    }
    if pairs.len() != total {
        warn!("{} pairs lost to a failed narrow-phase task", total - pairs.len());
    }
    cache.restore_pairs(pairs);
    results
}
