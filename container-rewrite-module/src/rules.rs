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

//! Compilation of raw rule pairs into matchers with full-match semantics.

use regex::Regex;
use thiserror::Error;

/// Errors producing a rule set from a rules file.
///
/// Any of these fails the entire reload for the affected container, the previously compiled
/// rule set stays in force.
#[derive(Debug, Error)]
pub(crate) enum RuleError {
    /// The rules file is not valid UTF-8.
    #[error("rules file is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// A rule pattern failed to compile.
    #[error("invalid rule pattern {pattern:?}: {source}")]
    Pattern {
        /// The normalized pattern that failed to compile
        pattern: String,
        /// The underlying regular expression error
        source: Box<regex::Error>,
    },
}

/// A single compiled rewrite rule.
#[derive(Debug)]
pub(crate) struct Rule {
    pattern: Regex,
    replacement: String,
}

impl Rule {
    /// Compiles a raw `pattern=replacement` pair.
    ///
    /// Pattern and replacement are both normalized to start with `/`. The pattern is wrapped in
    /// `^(?:…)$` so that it only ever matches the entire path — capture group numbering is
    /// unaffected by the non-capturing wrapper. The replacement is kept as written, capture
    /// group references use the regex crate’s `$1`/`${name}` syntax.
    fn new(pattern: &str, replacement: &str) -> Result<Self, RuleError> {
        let pattern = normalize(pattern);
        let replacement = normalize(replacement);
        let anchored = format!("^(?:{pattern})$");
        let pattern = Regex::new(&anchored).map_err(|source| RuleError::Pattern {
            pattern: pattern.into_owned(),
            source: source.into(),
        })?;
        Ok(Self {
            pattern,
            replacement: replacement.into_owned(),
        })
    }

    /// Applies the rule, returning the rewritten path if the pattern matches the entire input.
    fn rewrite(&self, path: &str) -> Option<String> {
        if self.pattern.is_match(path) {
            Some(self.pattern.replace(path, &self.replacement).into_owned())
        } else {
            None
        }
    }
}

fn normalize(value: &str) -> std::borrow::Cow<'_, str> {
    if value.starts_with('/') {
        value.into()
    } else {
        format!("/{value}").into()
    }
}

/// An ordered set of compiled rules for one container.
///
/// Order is the rules file order, resolution stops at the first rule whose pattern matches the
/// entire path (first-match-wins — rule authors control precedence via file ordering).
#[derive(Debug, Default)]
pub(crate) struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compiles raw pairs into a rule set, preserving their order.
    ///
    /// A single malformed pattern fails the whole set, nothing is partially populated.
    pub(crate) fn compile<'a, I>(pairs: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let rules = pairs
            .into_iter()
            .map(|(pattern, replacement)| Rule::new(pattern, replacement))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Returns `true` if the set contains no rules (file present but empty).
    pub(crate) fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of rules in the set.
    pub(crate) fn len(&self) -> usize {
        self.rules.len()
    }

    /// Rewrites a container-inner path via the first matching rule.
    pub(crate) fn rewrite(&self, path: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.rewrite(path))
    }
}
