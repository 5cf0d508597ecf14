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

//! The public routing surface.

use log::{debug, trace};

use crate::cache::Resolution;
use crate::configuration::ContainerRewriteConf;
use crate::refresh::{Refresher, Routability};
use crate::storage::ContainerStore;
use crate::store::{RuleState, RuleTable};

/// Handler deciding whether a request path belongs to a container and where it redirects to.
///
/// One instance owns the process-wide rule table and resolution caches; construct it once at
/// startup and share it across request handlers (e.g. behind an `Arc`). Both entry points are
/// total: failures of the storage backend are logged and degrade the affected request to “not
/// handled”, they are never surfaced to the host.
#[derive(Debug)]
pub struct ContainerRewriteHandler<S> {
    store: S,
    suffix: String,
    table: RuleTable,
    refresher: Refresher,
}

impl<S: ContainerStore> ContainerRewriteHandler<S> {
    /// Creates a handler routing into containers of the given store.
    pub fn new(conf: ContainerRewriteConf, store: S) -> Self {
        Self {
            store,
            suffix: conf.container_suffix,
            table: RuleTable::new(conf.resolution_cache_size),
            refresher: Refresher::new(conf.rules_file),
        }
    }

    /// Access to the underlying container store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Splits a path into container identifier and container-inner remainder.
    ///
    /// The identifier spans from after the leading `/` to the end of the first occurrence of
    /// the container suffix, so it may cover several path segments for containers nested in
    /// directories. A suffix occurrence earlier than position 2 would make the identifier
    /// empty and never routes.
    fn split_path<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        if !path.starts_with('/') {
            return None;
        }

        let index = path.find(&self.suffix)?;
        if index < 2 {
            return None;
        }

        let end = index + self.suffix.len();
        Some((&path[1..end], &path[end..]))
    }

    fn rewrite(state: &RuleState, container: &str, inner: &str) -> Resolution {
        let rules = match state {
            RuleState::Rules(rules) => rules,
            RuleState::Unloaded | RuleState::NoRules => return Resolution::NoMatch,
        };

        match rules.rewrite(inner) {
            Some(rewritten) => Resolution::Redirect(format!("/{container}{rewritten}")),
            None => Resolution::NoMatch,
        }
    }

    /// Checks whether some rewrite rule applies to this request path.
    ///
    /// This is the per-request hot path: it refreshes the container’s rules from the store
    /// when their modification time requires it and answers from the container’s resolution
    /// cache otherwise. Hosts call this to decide whether [`handle`](Self::handle) should be
    /// given the request at all.
    pub async fn is_routable(&self, path: &str) -> bool {
        let Some((container, inner)) = self.split_path(path) else {
            trace!("path {path:?} doesn’t address a container");
            return false;
        };

        let routability = self
            .refresher
            .ensure_fresh(&self.store, &self.table, container)
            .await;
        if routability == Routability::NotRoutable {
            return false;
        }

        let key = match inner.find('?') {
            Some(index) => &inner[..index],
            None => inner,
        };
        let resolution = self
            .table
            .resolve(container, key, |state| Self::rewrite(state, container, key));
        trace!("resolved path {path:?} within container {container} to {resolution:?}");
        resolution.is_redirect()
    }

    /// Produces the redirect target for a request path, with the query string appended.
    ///
    /// Reads the same rule table [`is_routable`](Self::is_routable) refreshed, without further
    /// store calls. Returns `None` when no rule matches — the host should fall through to its
    /// other handlers then.
    pub fn handle(&self, path: &str, query: Option<&str>) -> Option<String> {
        let (container, inner) = self.split_path(path)?;

        let RuleState::Rules(rules) = self.table.get(container) else {
            return None;
        };
        if rules.is_empty() {
            return None;
        }
        let rewritten = rules.rewrite(inner)?;

        let mut target = format!("/{container}{rewritten}");
        if let Some(query) = query.filter(|query| !query.is_empty()) {
            target.push(if target.contains('?') { '&' } else { '?' });
            target.push_str(query);
        }

        debug!("redirecting {path} to {target}");
        Some(target)
    }
}
