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

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::configuration::ContainerRewriteConf;
use crate::handler::ContainerRewriteHandler;
use crate::storage::{ContainerStore, StoreError, Timestamp};

use test_log::test;

#[derive(Debug, Default)]
struct MockContainer {
    modified: Option<Timestamp>,
    rules: Option<String>,
}

/// Scripted in-memory store: containers with settable modification times and rules file
/// contents, call counting and fault injection.
#[derive(Debug, Default)]
pub(crate) struct MockStore {
    containers: Mutex<HashMap<String, MockContainer>>,
    calls: AtomicUsize,
    opens: AtomicUsize,
    failing: AtomicBool,
}

impl MockStore {
    fn put_rules(&self, container: &str, modified: Timestamp, rules: &str) {
        self.containers.lock().insert(
            container.to_owned(),
            MockContainer {
                modified: Some(modified),
                rules: Some(rules.to_owned()),
            },
        );
    }

    fn put_empty(&self, container: &str, modified: Timestamp) {
        self.containers.lock().insert(
            container.to_owned(),
            MockContainer {
                modified: Some(modified),
                rules: None,
            },
        );
    }

    /// A container that passes the existence check but fails the modification time lookup,
    /// like one deleted between the two store calls.
    fn put_phantom(&self, container: &str) {
        self.containers
            .lock()
            .insert(container.to_owned(), MockContainer::default());
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Total number of store calls made.
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of containers opened, i.e. reloads attempted past the staleness check.
    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn record_call(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Backend("injected failure".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerStore for MockStore {
    type Container = String;

    async fn exists(&self, container: &str) -> Result<bool, StoreError> {
        self.record_call()?;
        Ok(self.containers.lock().contains_key(container))
    }

    async fn last_modified(&self, container: &str) -> Result<Timestamp, StoreError> {
        self.record_call()?;
        self.containers
            .lock()
            .get(container)
            .and_then(|container| container.modified)
            .ok_or(StoreError::NotFound)
    }

    async fn open(&self, container: &str) -> Result<Self::Container, StoreError> {
        self.record_call()?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.containers.lock().contains_key(container) {
            Ok(container.to_owned())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn read_file(
        &self,
        container: &Self::Container,
        name: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.record_call()?;

        // Give concurrent requests a chance to pile up on the reload lock.
        tokio::task::yield_now().await;

        if name != ContainerRewriteConf::default().rules_file {
            return Ok(None);
        }
        Ok(self
            .containers
            .lock()
            .get(container)
            .and_then(|container| container.rules.as_ref())
            .map(|rules| rules.clone().into_bytes()))
    }

    async fn close(&self, _container: Self::Container) {}
}

fn make_handler() -> ContainerRewriteHandler<MockStore> {
    ContainerRewriteHandler::new(ContainerRewriteConf::default(), MockStore::default())
}

fn store(handler: &ContainerRewriteHandler<MockStore>) -> &MockStore {
    handler.store()
}

#[test(tokio::test)]
async fn routes_and_rewrites() {
    let handler = make_handler();
    store(&handler).put_rules("c.box", 1, "foo/(.*)=baz/$1");

    assert!(handler.is_routable("/c.box/foo/bar").await);
    assert_eq!(
        handler.handle("/c.box/foo/bar", None),
        Some("/c.box/baz/bar".to_owned())
    );
}

#[test(tokio::test)]
async fn full_match_required() {
    let handler = make_handler();
    store(&handler).put_rules("c.box", 1, "foo/([^/]*)=baz/$1");

    assert!(handler.is_routable("/c.box/foo/bar").await);
    assert!(!handler.is_routable("/c.box/foo/bar/extra").await);
    assert_eq!(handler.handle("/c.box/foo/bar/extra", None), None);
}

#[test(tokio::test)]
async fn first_match_wins() {
    let handler = make_handler();
    store(&handler).put_rules("c.box", 1, "a=x\n(.*)=y");

    // The catch-all comes second in the file, so it must not win for /a.
    assert!(handler.is_routable("/c.box/a").await);
    assert_eq!(handler.handle("/c.box/a", None), Some("/c.box/x".to_owned()));
    assert_eq!(handler.handle("/c.box/b", None), Some("/c.box/y".to_owned()));
}

#[test(tokio::test)]
async fn query_string_appended() {
    let handler = make_handler();
    store(&handler).put_rules("c.box", 1, "a=b\nold=new?y=2");
    assert!(handler.is_routable("/c.box/a").await);

    assert_eq!(
        handler.handle("/c.box/a", Some("x=1")),
        Some("/c.box/b?x=1".to_owned())
    );
    assert_eq!(
        handler.handle("/c.box/old", Some("x=1")),
        Some("/c.box/new?y=2&x=1".to_owned())
    );
    assert_eq!(handler.handle("/c.box/a", None), Some("/c.box/b".to_owned()));
    assert_eq!(
        handler.handle("/c.box/a", Some("")),
        Some("/c.box/b".to_owned())
    );
}

#[test(tokio::test)]
async fn query_string_stripped_from_cache_key() {
    let handler = make_handler();
    store(&handler).put_rules("c.box", 1, "a=b");

    assert!(handler.is_routable("/c.box/a?x=1").await);
    assert!(handler.is_routable("/c.box/a?x=2").await);
    assert!(handler.is_routable("/c.box/a").await);
}

#[test(tokio::test)]
async fn non_container_paths_skip_the_store() {
    let handler = make_handler();
    store(&handler).put_rules("c.box", 1, "a=b");

    assert!(!handler.is_routable("").await);
    assert!(!handler.is_routable("/plain/path").await);
    assert!(!handler.is_routable("/.box/a").await);
    assert!(!handler.is_routable("c.box/a").await);
    assert_eq!(store(&handler).calls(), 0);
}

#[test(tokio::test)]
async fn missing_container_not_routable() {
    let handler = make_handler();

    assert!(!handler.is_routable("/ghost.box/a").await);
    assert_eq!(handler.handle("/ghost.box/a", None), None);
    assert_eq!(store(&handler).opens(), 0);
}

#[test(tokio::test)]
async fn container_without_rules_file() {
    let handler = make_handler();
    store(&handler).put_empty("c.box", 1);

    assert!(!handler.is_routable("/c.box/a").await);
    assert_eq!(store(&handler).opens(), 1);

    // “No rules” is remembered, the second request must not reload.
    assert!(!handler.is_routable("/c.box/a").await);
    assert_eq!(store(&handler).opens(), 1);
}

#[test(tokio::test)]
async fn no_reload_while_timestamp_unchanged() {
    let handler = make_handler();
    store(&handler).put_rules("c.box", 5, "a=b");

    assert!(handler.is_routable("/c.box/a").await);
    assert!(handler.is_routable("/c.box/a").await);
    assert!(!handler.is_routable("/c.box/other").await);
    assert_eq!(store(&handler).opens(), 1);
}

#[test(tokio::test)]
async fn equal_timestamp_is_fresh() {
    let handler = make_handler();
    store(&handler).put_rules("c.box", 5, "a=b");
    assert!(handler.is_routable("/c.box/a").await);

    // Same modification time, changed contents: must not reload.
    store(&handler).put_rules("c.box", 5, "a=changed");
    assert!(handler.is_routable("/c.box/a").await);
    assert_eq!(handler.handle("/c.box/a", None), Some("/c.box/b".to_owned()));
    assert_eq!(store(&handler).opens(), 1);
}

#[test(tokio::test)]
async fn newer_timestamp_reloads_and_invalidates() {
    let handler = make_handler();
    store(&handler).put_rules("c.box", 1, "a=x");
    assert!(handler.is_routable("/c.box/a").await);
    assert_eq!(handler.handle("/c.box/a", None), Some("/c.box/x".to_owned()));

    store(&handler).put_rules("c.box", 2, "a=z");
    assert!(handler.is_routable("/c.box/a").await);
    assert_eq!(handler.handle("/c.box/a", None), Some("/c.box/z".to_owned()));
    assert_eq!(store(&handler).opens(), 2);

    // Rules removed entirely: cached resolutions must go with them.
    store(&handler).put_empty("c.box", 3);
    assert!(!handler.is_routable("/c.box/a").await);
    assert_eq!(handler.handle("/c.box/a", None), None);
}

#[test(tokio::test)]
async fn malformed_rules_keep_previous_set() {
    let handler = make_handler();
    store(&handler).put_rules("c.box", 1, "a=x");
    assert!(handler.is_routable("/c.box/a").await);

    store(&handler).put_rules("c.box", 2, "broken(=y");
    assert!(handler.is_routable("/c.box/a").await);
    assert_eq!(handler.handle("/c.box/a", None), Some("/c.box/x".to_owned()));

    // The reload was attempted and will be attempted again, the timestamp was not advanced.
    assert!(store(&handler).opens() >= 2);

    // A fixed rules file takes over.
    store(&handler).put_rules("c.box", 3, "a=y");
    assert!(handler.is_routable("/c.box/a").await);
    assert_eq!(handler.handle("/c.box/a", None), Some("/c.box/y".to_owned()));
}

#[test(tokio::test)]
async fn store_failure_degrades_request_only() {
    let handler = make_handler();
    store(&handler).put_rules("c.box", 1, "a=x");
    assert!(handler.is_routable("/c.box/a").await);

    store(&handler).set_failing(true);
    assert!(!handler.is_routable("/c.box/a").await);

    // Previously loaded rules survive the outage, no reload needed afterwards.
    store(&handler).set_failing(false);
    assert!(handler.is_routable("/c.box/a").await);
    assert_eq!(handler.handle("/c.box/a", None), Some("/c.box/x".to_owned()));
    assert_eq!(store(&handler).opens(), 1);
}

#[test(tokio::test)]
async fn container_deleted_between_store_calls() {
    let handler = make_handler();
    store(&handler).put_phantom("c.box");

    assert!(!handler.is_routable("/c.box/a").await);
    assert_eq!(store(&handler).opens(), 0);
}

#[test(tokio::test)]
async fn concurrent_requests_reload_once() {
    let handler = Arc::new(make_handler());
    store(&handler).put_rules("c.box", 1, "a=x");

    let tasks = (0..8)
        .map(|_| {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.is_routable("/c.box/a").await })
        })
        .collect::<Vec<_>>();

    for task in tasks {
        assert!(task.await.unwrap());
    }
    assert_eq!(store(&handler).opens(), 1);
}

#[test(tokio::test)]
async fn unrelated_containers_unaffected_by_bad_one() {
    let handler = make_handler();
    store(&handler).put_rules("good.box", 1, "a=x");
    store(&handler).put_rules("bad.box", 1, "broken(=y");

    assert!(!handler.is_routable("/bad.box/a").await);
    assert!(handler.is_routable("/good.box/a").await);
    assert_eq!(
        handler.handle("/good.box/a", None),
        Some("/good.box/x".to_owned())
    );
}
