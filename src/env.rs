//! Environment Services
//!
//! Effects can require services from an environment. The environment is a
//! small persistent type-map: each service is stored under its concrete
//! type, and `provide` layers narrow or extend the map for a subtree of
//! the computation.
//!
//! The default environment carries two services: a wall [`Clock`] and a
//! [`RandomSource`].
//!
//! # Example
//!
//! ```rust,ignore
//! use ichor::env::{Env, SystemClock};
//!
//! let env = Env::default_env();
//! let clock = env.get::<SystemClock>().unwrap();
//! let now = clock.current_time_millis();
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A persistent map of services keyed by concrete type.
///
/// Cloning is cheap; `with` produces a new map sharing nothing mutable
/// with the original, so provided environments never leak upward.
#[derive(Clone, Default)]
pub struct Env {
    services: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Env {
    /// An empty environment.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The default environment: wall clock plus a random source.
    pub fn default_env() -> Self {
        Self::empty()
            .with(SystemClock)
            .with(SplitMix64::from_entropy())
    }

    /// Extend the environment with a service, replacing any existing
    /// service of the same type.
    pub fn with<S: Any + Send + Sync>(&self, service: S) -> Self {
        let mut services: HashMap<_, _> = (*self.services).clone();
        services.insert(TypeId::of::<S>(), Arc::new(service) as Arc<dyn Any + Send + Sync>);
        Self {
            services: Arc::new(services),
        }
    }

    /// Look up a service by type.
    pub fn get<S: Any + Send + Sync>(&self) -> Option<Arc<S>> {
        self.services
            .get(&TypeId::of::<S>())
            .cloned()
            .and_then(|s| s.downcast::<S>().ok())
    }

    /// Whether a service of the given type is present.
    pub fn contains<S: Any + Send + Sync>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<S>())
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Env({} services)", self.services.len())
    }
}

/// Wall-clock access.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn current_time_millis(&self) -> u64;
}

/// The live system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current_time_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A source of pseudo-random numbers.
pub trait RandomSource: Send + Sync {
    /// The next raw 64-bit value.
    fn next_u64(&self) -> u64;

    /// The next value uniformly distributed in `[0, 1)`.
    fn next_f64(&self) -> f64 {
        // 53 mantissa bits of uniform randomness
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// SplitMix64 generator. Small state, statistically solid, and cheap
/// enough to share behind an atomic.
#[derive(Debug)]
pub struct SplitMix64 {
    state: AtomicU64,
}

impl SplitMix64 {
    /// Create a generator with an explicit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            state: AtomicU64::new(seed),
        }
    }

    /// Create a generator seeded from the wall clock.
    pub fn from_entropy() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e37_79b9_7f4a_7c15);
        Self::new(nanos)
    }
}

impl RandomSource for SplitMix64 {
    fn next_u64(&self) -> u64 {
        let mut z = self
            .state
            .fetch_add(0x9e37_79b9_7f4a_7c15, Ordering::Relaxed)
            .wrapping_add(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}
