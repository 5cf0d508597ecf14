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

//! Structures required to deserialize Container Rewrite Module configuration from YAML
//! configuration files.

use serde::Deserialize;

/// Configuration file settings of the container rewrite module
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerRewriteConf {
    /// File name suffix identifying a container in the request path, e.g. `.box`. A path is
    /// considered for routing only if this suffix occurs at position 2 or later, i.e. the
    /// container name has at least one character.
    pub container_suffix: String,

    /// Name of the rules file looked up inside each container
    pub rules_file: String,

    /// Maximum number of resolved paths remembered per container before the least recently
    /// used one is evicted
    pub resolution_cache_size: usize,
}

impl Default for ContainerRewriteConf {
    fn default() -> Self {
        Self {
            container_suffix: ".box".to_owned(),
            rules_file: "rewrite.properties".to_owned(),
            resolution_cache_size: 100,
        }
    }
}
