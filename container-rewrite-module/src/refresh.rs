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

//! Staleness detection and rule reloading.

use log::{debug, error, trace, warn};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::properties;
use crate::rules::{RuleError, RuleSet};
use crate::storage::{ContainerStore, StoreError, Timestamp};
use crate::store::RuleTable;

/// Whether a container can be routed into at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routability {
    /// The container exists, the rule table is as fresh as we could make it.
    Routable,
    /// The container doesn’t exist, or the store failed for this request.
    NotRoutable,
}

#[derive(Debug, Error)]
enum ReloadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Rules(#[from] RuleError),
}

/// Decides when a container’s compiled rules are stale against the external store and reloads
/// them.
///
/// Reloads are serialized per container: concurrent requests observing the same staleness take
/// the container’s reload lock in turn, and all but the first find the table fresh again after
/// the re-check. Containers never contend on each other’s locks.
#[derive(Debug)]
pub(crate) struct Refresher {
    rules_file: String,
    reload_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Refresher {
    /// Creates a refresher loading rules from the file named `rules_file` inside each
    /// container.
    pub(crate) fn new(rules_file: String) -> Self {
        Self {
            rules_file,
            reload_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn reload_lock(&self, container: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.reload_locks.lock();
        Arc::clone(
            locks
                .entry(container.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Ensures the rule table entry for `container` is no older than the store’s current
    /// modification time, reloading it if necessary.
    ///
    /// Store failures other than [`StoreError::NotFound`] are logged and degrade this request
    /// to [`Routability::NotRoutable`]; the table is left untouched, so previously loaded
    /// rules keep serving subsequent requests. A rules file that fails to parse likewise
    /// leaves the previous state in force, but the container stays routable with it.
    pub(crate) async fn ensure_fresh<S: ContainerStore>(
        &self,
        store: &S,
        table: &RuleTable,
        container: &str,
    ) -> Routability {
        match store.exists(container).await {
            Ok(true) => {}
            Ok(false) | Err(StoreError::NotFound) => {
                trace!("container {container} does not exist");
                return Routability::NotRoutable;
            }
            Err(err) => {
                warn!("failed checking for container {container}: {err}");
                return Routability::NotRoutable;
            }
        }

        let current = match store.last_modified(container).await {
            Ok(timestamp) => timestamp,
            // The container disappeared between the two store calls.
            Err(StoreError::NotFound) => {
                trace!("container {container} gone before its modification time was read");
                return Routability::NotRoutable;
            }
            Err(err) => {
                warn!("failed reading modification time of container {container}: {err}");
                return Routability::NotRoutable;
            }
        };

        let stale =
            |recorded: Option<Timestamp>| recorded.map_or(true, |recorded| recorded < current);
        if stale(table.last_refresh(container)) {
            let lock = self.reload_lock(container);
            let _guard = lock.lock().await;

            // Another request may have completed the reload while we waited for the lock.
            if stale(table.last_refresh(container)) {
                match self.reload(store, table, container, current).await {
                    Ok(()) => {}
                    Err(ReloadError::Store(StoreError::NotFound)) => {
                        trace!("container {container} gone during rules reload");
                        return Routability::NotRoutable;
                    }
                    Err(ReloadError::Store(err)) => {
                        warn!("failed reloading rules for container {container}: {err}");
                        return Routability::NotRoutable;
                    }
                    Err(ReloadError::Rules(err)) => {
                        // Stale-but-valid rules beat no rules, keep whatever was loaded
                        // before and retry on the next request.
                        error!("rejecting rules file of container {container}: {err}");
                    }
                }
            }
        }

        Routability::Routable
    }

    async fn reload<S: ContainerStore>(
        &self,
        store: &S,
        table: &RuleTable,
        container: &str,
        timestamp: Timestamp,
    ) -> Result<(), ReloadError> {
        debug!("reloading rewrite rules for container {container}");

        let handle = store.open(container).await?;
        let result = self.load_rules(store, &handle, container).await;
        store.close(handle).await;

        let rules = result?;
        table.replace(container, rules, timestamp);
        Ok(())
    }

    async fn load_rules<S: ContainerStore>(
        &self,
        store: &S,
        handle: &S::Container,
        container: &str,
    ) -> Result<Option<Arc<RuleSet>>, ReloadError> {
        let Some(bytes) = store.read_file(handle, &self.rules_file).await? else {
            debug!(
                "container {container} has no {} file, recording it as rule-less",
                self.rules_file
            );
            return Ok(None);
        };

        let text = std::str::from_utf8(&bytes).map_err(RuleError::from)?;
        let pairs = properties::parse(text);
        let rules = RuleSet::compile(
            pairs
                .iter()
                .map(|(pattern, replacement)| (pattern.as_str(), replacement.as_str())),
        )?;
        debug!(
            "compiled {} rewrite rule(s) for container {container}",
            rules.len()
        );
        Ok(Some(Arc::new(rules)))
    }
}
