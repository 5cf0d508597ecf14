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

//! Bounded cache of already resolved container-inner paths.

use lru::LruCache;
use std::fmt::{self, Debug};
use std::num::NonZeroUsize;

/// Outcome of resolving a container-inner path against a container’s rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// A rule matched, producing this redirect target (container prefix included, query string
    /// not yet appended).
    Redirect(String),
    /// No rule matched. Cached like any other outcome so that repeated requests for paths
    /// outside the rules don’t re-run pattern matching every time.
    NoMatch,
}

impl Resolution {
    /// Whether this outcome redirects the request.
    pub(crate) fn is_redirect(&self) -> bool {
        matches!(self, Self::Redirect(_))
    }
}

/// Access-ordered cache from container-inner path to [`Resolution`], bounded per container.
///
/// Both reads and writes refresh an entry’s recency, so hot paths survive while one-off lookups
/// get evicted once the bound is reached. Eviction removes the single least-recently-accessed
/// entry per insertion beyond the bound.
pub(crate) struct ResolutionCache {
    entries: LruCache<String, Resolution>,
}

impl ResolutionCache {
    /// Creates an empty cache holding at most `capacity` resolutions.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Returns the cached outcome for `key`, invoking `compute` exactly once to produce and
    /// remember it when absent.
    pub(crate) fn resolve(
        &mut self,
        key: &str,
        compute: impl FnOnce() -> Resolution,
    ) -> Resolution {
        if let Some(resolution) = self.entries.get(key) {
            return resolution.clone();
        }

        let resolution = compute();
        self.entries.put(key.to_owned(), resolution.clone());
        resolution
    }

    /// Drops all cached resolutions.
    pub(crate) fn invalidate(&mut self) {
        self.entries.clear();
    }
}

impl Debug for ResolutionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("len", &self.entries.len())
            .field("cap", &self.entries.cap())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl ResolutionCache {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }
}
