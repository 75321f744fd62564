// Copyright (c) 2025 BorealDB Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Option values and per-object option maps.
//!
//! Options are free-form string keys. Each object kind carries a denylist of
//! keys that become immutable once the object is initialized; everything
//! else stays mutable for the lifetime of the object.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Value of a single option, matching the four SetOption wire variants.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Bytes(Vec<u8>),
    Int(i64),
    Double(f64),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as a boolean flag.
    ///
    /// Strings accept `true`/`yes`/`1` case-insensitively; numeric values
    /// are truthy when non-zero. Bytes are never truthy.
    pub fn truthy(&self) -> bool {
        match self {
            OptionValue::String(s) => {
                s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("yes") || s == "1"
            }
            OptionValue::Int(i) => *i != 0,
            OptionValue::Double(d) => *d != 0.0,
            OptionValue::Bytes(_) => false,
        }
    }
}

/// Keys that become immutable after `databaseInit`.
pub const DATABASE_SEALED_KEYS: &[&str] = &["uri"];

/// Keys that become immutable after `connectionInit`.
pub const CONNECTION_SEALED_KEYS: &[&str] =
    &["uri", "account", "user", "password", "token", "warehouse"];

/// Statements have no sealed keys; every statement option stays mutable.
pub const STATEMENT_SEALED_KEYS: &[&str] = &[];

/// Statement option: truthy values request asynchronous query submission.
pub const OPT_ASYNC_EXEC: &str = "borealdb.statement.async_exec";

/// Database options consumed by logging initialization.
pub const OPT_LOG_LEVEL: &str = "borealdb.log_level";
pub const OPT_LOG_FILE: &str = "borealdb.log_file";

/// Connection option toggling autocommit (truthy semantics).
pub const OPT_AUTOCOMMIT: &str = "autocommit";

/// An option map with a fixed set of keys sealed at initialization time.
#[derive(Debug, Clone, Default)]
pub struct OptionMap {
    entries: HashMap<String, OptionValue>,
}

impl OptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `value` under `key`.
    ///
    /// When `sealed` is set (the owning object is initialized), keys on the
    /// `sealed_keys` denylist are rejected with `INVALID_STATE`.
    pub fn set(
        &mut self,
        key: String,
        value: OptionValue,
        sealed: bool,
        sealed_keys: &[&str],
    ) -> Result<()> {
        if sealed && sealed_keys.contains(&key.as_str()) {
            return Err(Error::invalid_state()
                .message(format!("option '{key}' cannot be changed after initialization")));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(OptionValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
