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

//! The storage capability consumed by the router.

use async_trait::async_trait;
use thiserror::Error;

/// A container modification time in milliseconds since the Unix epoch, at whatever granularity
/// the storage backend provides.
pub type Timestamp = u64;

/// Errors produced by a container store.
///
/// Hosts never see these errors: the router logs them and degrades the affected request to
/// “not routable”. The [`NotFound`](Self::NotFound) variant is special-cased — it is a normal
/// negative outcome (container absent or identifier malformed), not a failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The container does not exist, or the identifier cannot possibly name one.
    #[error("container not found")]
    NotFound,

    /// An I/O failure in the storage backend.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Interface to the backend holding the containers.
///
/// A container is a named data unit carrying its own rewrite rules in a file. The router only
/// ever asks for existence, the structural modification time (to decide whether its compiled
/// rules are stale) and the contents of the rules file. Calls are allowed to block on network
/// or disk; the router never invokes them while holding one of its in-memory locks.
///
/// Implementations must hand back any resources acquired by [`open`](Self::open) when
/// [`close`](Self::close) is called — the router guarantees a `close` call for every
/// successful `open`, on success and failure paths alike.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// Handle for an opened container, valid until passed to [`close`](Self::close).
    type Container: Send;

    /// Checks whether the container exists in the store.
    async fn exists(&self, container: &str) -> Result<bool, StoreError>;

    /// Returns the time the container structure was last modified.
    ///
    /// Only changes to this value trigger a rules reload, so it should reflect modifications
    /// to the container’s contents, not mere data access.
    async fn last_modified(&self, container: &str) -> Result<Timestamp, StoreError>;

    /// Opens the container for reading.
    async fn open(&self, container: &str) -> Result<Self::Container, StoreError>;

    /// Reads a named file out of the opened container.
    ///
    /// Returns `None` if no such file exists in the container, which is distinct from any
    /// error condition.
    async fn read_file(
        &self,
        container: &Self::Container,
        name: &str,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Releases an opened container.
    ///
    /// Failures during release are the implementation’s to log, the router cannot act on them.
    async fn close(&self, container: Self::Container);
}
