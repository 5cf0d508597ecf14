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

//! Parser for the line-oriented `pattern=replacement` rules file format.

/// Parses the rules file text into key/value pairs, preserving file order.
///
/// Format rules:
///
/// * Each non-empty line holds one `key=value` pair, split on the first unescaped `=`.
/// * Lines whose first non-whitespace character is `#` are comments.
/// * Whitespace around key and value is trimmed.
/// * `\=` produces a literal `=` inside the key; every other backslash is kept verbatim, so
///   regular expression escapes like `\.` survive unchanged.
/// * A line without a separator becomes a key with an empty value.
/// * A duplicate key replaces the earlier value but keeps the earlier position.
pub(crate) fn parse(text: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = split_pair(line);
        let key = key.trim().to_owned();
        let value = value.trim().to_owned();
        if let Some(existing) = pairs.iter_mut().find(|(existing, _)| *existing == key) {
            existing.1 = value;
        } else {
            pairs.push((key, value));
        }
    }
    pairs
}

/// Splits a line on the first `=` not preceded by a backslash, unescaping `\=` in the key.
fn split_pair(line: &str) -> (String, &str) {
    let mut key = String::new();
    let mut chars = line.char_indices();
    while let Some((index, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, '=')) => key.push('='),
                Some((_, next)) => {
                    key.push('\\');
                    key.push(next);
                }
                None => key.push('\\'),
            },
            '=' => return (key, &line[index + 1..]),
            ch => key.push(ch),
        }
    }
    (key, "")
}
