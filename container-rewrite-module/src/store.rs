// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Concurrency-safe storage of per-container rule sets and resolved paths.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{Resolution, ResolutionCache};
use crate::rules::RuleSet;
use crate::storage::Timestamp;

/// The rules known for a container.
///
/// `Unloaded` and `NoRules` are deliberately distinct: an unloaded container has never been
/// refreshed (nothing is known about it), while `NoRules` records the observation that the
/// container exists but carries no rules file — no reload is needed until its modification
/// time changes again.
#[derive(Debug, Clone)]
pub(crate) enum RuleState {
    /// Nothing has been loaded for this container yet.
    Unloaded,
    /// The container was loaded and has no rules file.
    NoRules,
    /// The container’s compiled rules.
    Rules(Arc<RuleSet>),
}

/// Rules, refresh bookkeeping and resolved paths for one container, guarded as a unit.
#[derive(Debug)]
struct ContainerState {
    rules: RuleState,
    last_refresh: Timestamp,
    resolved: ResolutionCache,
}

/// Map from container identifier to its current rule state and resolution cache.
///
/// Every container is guarded by its own lock, held only for in-memory work — a rules swap for
/// one container never blocks lookups for another. [`replace`](Self::replace) swaps the rule
/// set and refresh timestamp and drops the container’s cached resolutions in a single critical
/// section, so readers either see the old rules with the old resolutions or the new rules with
/// an empty cache, never a mix. [`resolve`](Self::resolve) computes outcomes under the same
/// lock, pinning the exact rule snapshot a cached resolution was derived from.
#[derive(Debug)]
pub(crate) struct RuleTable {
    cache_capacity: usize,
    containers: RwLock<HashMap<String, Arc<Mutex<ContainerState>>>>,
}

impl RuleTable {
    /// Creates an empty table; each container’s resolution cache is bounded by
    /// `cache_capacity`.
    pub(crate) fn new(cache_capacity: usize) -> Self {
        Self {
            cache_capacity,
            containers: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, container: &str) -> Option<Arc<Mutex<ContainerState>>> {
        self.containers.read().get(container).map(Arc::clone)
    }

    /// Returns the current rule state for a container without any I/O.
    pub(crate) fn get(&self, container: &str) -> RuleState {
        match self.entry(container) {
            Some(entry) => entry.lock().rules.clone(),
            None => RuleState::Unloaded,
        }
    }

    /// Returns the store modification time observed when the container was last refreshed, or
    /// `None` if it never was.
    pub(crate) fn last_refresh(&self, container: &str) -> Option<Timestamp> {
        self.entry(container).map(|entry| entry.lock().last_refresh)
    }

    /// Atomically replaces a container’s rules and refresh timestamp, invalidating all of its
    /// cached resolutions. `None` records the container as having no rules file.
    pub(crate) fn replace(
        &self,
        container: &str,
        rules: Option<Arc<RuleSet>>,
        timestamp: Timestamp,
    ) {
        let entry = {
            let mut containers = self.containers.write();
            Arc::clone(containers.entry(container.to_owned()).or_insert_with(|| {
                Arc::new(Mutex::new(ContainerState {
                    rules: RuleState::Unloaded,
                    last_refresh: 0,
                    resolved: ResolutionCache::new(self.cache_capacity),
                }))
            }))
        };

        let mut state = entry.lock();
        state.rules = match rules {
            Some(rules) => RuleState::Rules(rules),
            None => RuleState::NoRules,
        };
        state.last_refresh = timestamp;
        state.resolved.invalidate();
    }

    /// Resolves a container-inner path through the container’s cache.
    ///
    /// On a cache miss `compute` is invoked exactly once with the container’s current rule
    /// state, and its outcome — including [`Resolution::NoMatch`] — is cached. The whole
    /// lookup-compute-insert sequence runs under the container’s lock, so concurrent callers
    /// for the same container never compute the same key twice.
    ///
    /// For a container that was never loaded there is nothing to cache against; `compute` is
    /// invoked with [`RuleState::Unloaded`] and the outcome is returned uncached.
    pub(crate) fn resolve(
        &self,
        container: &str,
        key: &str,
        compute: impl FnOnce(&RuleState) -> Resolution,
    ) -> Resolution {
        let Some(entry) = self.entry(container) else {
            return compute(&RuleState::Unloaded);
        };

        let mut state = entry.lock();
        let state = &mut *state;
        let rules = &state.rules;
        state.resolved.resolve(key, || compute(rules))
    }
}
