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

//! # Container Rewrite Module
//!
//! This crate routes HTTP request paths into *containers*: named data units addressed as the
//! first part of the path and identified by a file name suffix such as `.box`. Each container
//! carries its own URL-rewrite rules in a small rules file, so the people maintaining a
//! container control its routing without touching server configuration — rule changes are
//! picked up at request time, no restart required.
//!
//! Given a rules file `rewrite.properties` inside the container `notes.box`:
//!
//! ```text
//! # send the start page to the app’s main view
//! start=app/main
//! files/(.*)=download/$1
//! ```
//!
//! a request for `/notes.box/files/report.txt` redirects to `/notes.box/download/report.txt`.
//! Patterns are regular expressions matching the entire path inside the container, evaluated
//! in file order with the first match winning; replacements may reference capture groups using
//! the [`regex`] crate’s `$1`/`${name}` syntax. Pattern and replacement are both taken to
//! start with `/`, whether written that way or not.
//!
//! ## Caching and staleness
//!
//! Compiled rules are kept per container and reloaded only when the store reports a newer
//! modification time for the container. Resolved paths — including paths no rule matches —
//! are remembered in a bounded per-container cache with least-recently-used eviction, so
//! repeated requests don’t re-run pattern matching. A reload atomically drops the affected
//! container’s cached resolutions, and reloads for one container never block requests for
//! another.
//!
//! A rules file that fails to compile is rejected as a whole and the previously loaded rules
//! stay in force; storage failures are logged and degrade the affected request to “not
//! handled”. Neither is ever surfaced to the host as an error.
//!
//! ## Code example
//!
//! The handler is storage-agnostic, hosts provide an implementation of the
//! [`ContainerStore`](storage::ContainerStore) capability (see the `fs-container-store` crate
//! for a directory-backed one) and call [`is_routable`](ContainerRewriteHandler::is_routable)
//! and [`handle`](ContainerRewriteHandler::handle) from their request phase:
//!
//! ```rust
//! use async_trait::async_trait;
//! use container_rewrite_module::configuration::ContainerRewriteConf;
//! use container_rewrite_module::storage::{ContainerStore, StoreError, Timestamp};
//! use container_rewrite_module::ContainerRewriteHandler;
//!
//! /// Store with a single container holding a single rule.
//! #[derive(Debug)]
//! struct DemoStore;
//!
//! #[async_trait]
//! impl ContainerStore for DemoStore {
//!     type Container = ();
//!
//!     async fn exists(&self, container: &str) -> Result<bool, StoreError> {
//!         Ok(container == "demo.box")
//!     }
//!
//!     async fn last_modified(&self, _container: &str) -> Result<Timestamp, StoreError> {
//!         Ok(0)
//!     }
//!
//!     async fn open(&self, _container: &str) -> Result<Self::Container, StoreError> {
//!         Ok(())
//!     }
//!
//!     async fn read_file(
//!         &self,
//!         _container: &Self::Container,
//!         _name: &str,
//!     ) -> Result<Option<Vec<u8>>, StoreError> {
//!         Ok(Some(b"start=app/main".to_vec()))
//!     }
//!
//!     async fn close(&self, _container: Self::Container) {}
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let handler = ContainerRewriteHandler::new(ContainerRewriteConf::default(), DemoStore);
//! assert!(handler.is_routable("/demo.box/start").await);
//! assert_eq!(
//!     handler.handle("/demo.box/start", Some("view=1")),
//!     Some("/demo.box/app/main?view=1".to_owned())
//! );
//! # });
//! ```
//!
//! The host issues the actual `3xx` response for the returned redirect target and falls
//! through to its other handlers when `handle` returns `None`.

pub mod configuration;
pub mod storage;

mod cache;
mod handler;
mod properties;
mod refresh;
mod rules;
mod store;

#[cfg(test)]
mod tests;

pub use handler::ContainerRewriteHandler;
