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

//! # Filesystem Container Store
//!
//! A [`ContainerStore`] implementation backing `container-rewrite-module` with plain
//! directories: a container is a directory underneath the configured root whose name carries
//! the container suffix, e.g. `<root>/notes.box/`, holding the rules file as a regular file.
//! The structural modification time of a container is the newest modification time among the
//! directory itself and its direct entries, so both adding files and editing the rules file
//! make the router pick up changes.
//!
//! Container identifiers come straight from request paths; anything that doesn’t resolve to
//! a plain relative path below the root (`..`, absolute paths) is reported as not found
//! rather than as an error.

use async_trait::async_trait;
use container_rewrite_module::storage::{ContainerStore, StoreError, Timestamp};
use log::trace;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// Container store reading containers from directories under a root directory.
#[derive(Debug, Clone)]
pub struct FsContainerStore {
    root: PathBuf,
}

impl FsContainerStore {
    /// Creates a store for containers located directly or in subdirectories under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves a container identifier below the root, rejecting identifiers that could
    /// escape it.
    fn container_path(&self, container: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(container);
        let plain = !container.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !plain {
            trace!("rejecting container identifier {container:?}");
            return Err(StoreError::NotFound);
        }
        Ok(self.root.join(relative))
    }

    async fn dir_metadata(&self, container: &str) -> Result<Option<Metadata>, StoreError> {
        let path = self.container_path(container)?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => Ok(Some(metadata)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn timestamp(metadata: &Metadata) -> Timestamp {
    metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(Timestamp::MAX)
        })
}

#[async_trait]
impl ContainerStore for FsContainerStore {
    type Container = PathBuf;

    async fn exists(&self, container: &str) -> Result<bool, StoreError> {
        match self.container_path(container) {
            Ok(_) => Ok(self.dir_metadata(container).await?.is_some()),
            Err(StoreError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn last_modified(&self, container: &str) -> Result<Timestamp, StoreError> {
        let metadata = self
            .dir_metadata(container)
            .await?
            .ok_or(StoreError::NotFound)?;

        let mut latest = timestamp(&metadata);

        // Entries deleted while we scan are no reason to fail, the next request will observe
        // the resulting directory modification anyway.
        let path = self.container_path(container)?;
        let mut entries = fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(metadata) = entry.metadata().await {
                latest = latest.max(timestamp(&metadata));
            }
        }

        Ok(latest)
    }

    async fn open(&self, container: &str) -> Result<Self::Container, StoreError> {
        let path = self.container_path(container)?;
        match self.dir_metadata(container).await? {
            Some(_) => Ok(path),
            None => Err(StoreError::NotFound),
        }
    }

    async fn read_file(
        &self,
        container: &Self::Container,
        name: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        // The file has to be a direct entry of the container directory.
        let valid = !name.is_empty()
            && Path::new(name)
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
            && Path::new(name).components().count() == 1;
        if !valid {
            return Ok(None);
        }

        match fs::read(container.join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn close(&self, _container: Self::Container) {}
}
