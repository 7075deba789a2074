//! Broadphase proxies and the overlapping-pair cache.
//!
//! The cache keeps pairs in a sorted vector keyed by the proxies' unique ids,
//! which makes `(a, b)` and `(b, a)` the same entry. Overlap detection is a
//! brute-force AABB sweep; any spatial structure can drive
//! [`OverlappingPairCache::add_overlapping_pair`] instead.

use std::cmp::Ordering;

use log::trace;

use super::algorithm::CollisionAlgorithm;
use crate::core::types::Aabb;
use crate::utils::allocator::{Arena, Handle};

pub const DEFAULT_FILTER: u16 = 1;
pub const STATIC_FILTER: u16 = 2;
pub const KINEMATIC_FILTER: u16 = 4;
pub const ALL_FILTER: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proxy {
    /// Index of the collision object this proxy stands for.
    pub client: usize,
    pub filter_group: u16,
    pub filter_mask: u16,
    pub unique_id: u32,
    pub aabb: Aabb,
}

impl Proxy {
    /// Both proxies must accept each other's group.
    pub fn accepts(&self, other: &Proxy) -> bool {
        (self.filter_group & other.filter_mask) != 0 && (other.filter_group & self.filter_mask) != 0
    }
}

/// Stable reference to a proxy stored in an [`OverlappingPairCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyRef {
    pub handle: Handle,
    pub unique_id: u32,
    pub client: usize,
}

/// Candidate pair, stored with the smaller unique id first.
#[derive(Debug)]
pub struct Pair {
    pub proxy0: ProxyRef,
    pub proxy1: ProxyRef,
    pub algorithm: Option<Box<dyn CollisionAlgorithm>>,
    pub user_info: u64,
}

impl Pair {
    pub fn key(&self) -> (u32, u32) {
        (self.proxy0.unique_id, self.proxy1.unique_id)
    }

    pub fn contains(&self, unique_id: u32) -> bool {
        self.proxy0.unique_id == unique_id || self.proxy1.unique_id == unique_id
    }
}

impl PartialEq for Pair {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Pair {}

impl PartialOrd for Pair {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pair {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

fn canonical(a: ProxyRef, b: ProxyRef) -> (ProxyRef, ProxyRef) {
    if a.unique_id <= b.unique_id {
        (a, b)
    } else {
        (b, a)
    }
}

/// Builds a pair in canonical order; argument order does not matter.
pub fn make_pair(a: ProxyRef, b: ProxyRef) -> Pair {
    let (proxy0, proxy1) = canonical(a, b);
    Pair {
        proxy0,
        proxy1,
        algorithm: None,
        user_info: 0,
    }
}

#[derive(Debug, Default)]
pub struct OverlappingPairCache {
    proxies: Arena<Proxy>,
    pairs: Vec<Pair>,
    next_unique_id: u32,
}

impl OverlappingPairCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_proxy(
        &mut self,
        client: usize,
        filter_group: u16,
        filter_mask: u16,
        aabb: Aabb,
    ) -> ProxyRef {
        let unique_id = self.next_unique_id;
        self.next_unique_id += 1;
        let handle = self.proxies.insert(Proxy {
            client,
            filter_group,
            filter_mask,
            unique_id,
            aabb,
        });
        ProxyRef {
            handle,
            unique_id,
            client,
        }
    }

    pub fn proxy(&self, proxy: &ProxyRef) -> Option<&Proxy> {
        self.proxies.get(proxy.handle)
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Removes the proxy and every pair that references it. Algorithms owned
    /// by those pairs are dropped, returning their manifolds.
    pub fn destroy_proxy(&mut self, proxy: &ProxyRef) -> Option<Proxy> {
        let removed = self.proxies.remove(proxy.handle)?;
        let before = self.pairs.len();
        self.pairs.retain(|pair| !pair.contains(removed.unique_id));
        trace!(
            "proxy {} destroyed with {} pairs",
            removed.unique_id,
            before - self.pairs.len()
        );
        Some(removed)
    }

    pub fn set_proxy_aabb(&mut self, proxy: &ProxyRef, aabb: Aabb) -> bool {
        match self.proxies.get_mut(proxy.handle) {
            Some(stored) => {
                stored.aabb = aabb;
                true
            }
            None => false,
        }
    }

    /// Whether the filters of both proxies let them collide.
    pub fn needs_broadphase_collision(&self, a: &ProxyRef, b: &ProxyRef) -> bool {
        match (self.proxy(a), self.proxy(b)) {
            (Some(pa), Some(pb)) => pa.accepts(pb),
            _ => false,
        }
    }

    fn search(&self, a: &ProxyRef, b: &ProxyRef) -> Result<usize, usize> {
        let (p0, p1) = canonical(*a, *b);
        let key = (p0.unique_id, p1.unique_id);
        self.pairs.binary_search_by(|pair| pair.key().cmp(&key))
    }

    /// Registers a candidate pair. Returns false when the pair is filtered
    /// out, refers to the same proxy twice, or already exists.
    pub fn add_overlapping_pair(&mut self, a: &ProxyRef, b: &ProxyRef) -> bool {
        if a.unique_id == b.unique_id || !self.needs_broadphase_collision(a, b) {
            return false;
        }
        match self.search(a, b) {
            Ok(_) => false,
            Err(index) => {
                self.pairs.insert(index, make_pair(*a, *b));
                true
            }
        }
    }

    pub fn remove_overlapping_pair(&mut self, a: &ProxyRef, b: &ProxyRef) -> Option<Pair> {
        let index = self.search(a, b).ok()?;
        Some(self.pairs.remove(index))
    }

    pub fn find_pair(&self, a: &ProxyRef, b: &ProxyRef) -> Option<&Pair> {
        let index = self.search(a, b).ok()?;
        self.pairs.get(index)
    }

    pub fn find_pair_mut(&mut self, a: &ProxyRef, b: &ProxyRef) -> Option<&mut Pair> {
        let index = self.search(a, b).ok()?;
        self.pairs.get_mut(index)
    }

    /// Adds pairs whose AABBs started overlapping and removes the ones that
    /// stopped. Existing pairs keep their algorithm.
    pub fn update_overlapping_pairs(&mut self) -> usize {
        let proxies: Vec<(ProxyRef, Aabb)> = self
            .proxies
            .iter()
            .map(|(handle, proxy)| {
                (
                    ProxyRef {
                        handle,
                        unique_id: proxy.unique_id,
                        client: proxy.client,
                    },
                    proxy.aabb,
                )
            })
            .collect();

        for (i, (a, aabb_a)) in proxies.iter().enumerate() {
            for (b, aabb_b) in &proxies[i + 1..] {
                if aabb_a.overlaps(aabb_b) {
                    self.add_overlapping_pair(a, b);
                } else if self.search(a, b).is_ok() {
                    self.remove_overlapping_pair(a, b);
                }
            }
        }
        self.pairs.len()
    }

    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }

    pub fn pairs_mut(&mut self) -> &mut [Pair] {
        &mut self.pairs
    }

    /// Moves the pairs out so they can be handed to worker threads. They
    /// must come back through [`OverlappingPairCache::restore_pairs`] in the
    /// same order.
    pub(crate) fn take_pairs(&mut self) -> Vec<Pair> {
        std::mem::take(&mut self.pairs)
    }

    pub(crate) fn restore_pairs(&mut self, pairs: Vec<Pair>) {
        debug_assert!(pairs.windows(2).all(|w| w[0] < w[1]));
        self.pairs = pairs;
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
