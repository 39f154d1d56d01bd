// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Editable-settings registry.
//!
//! The "write to attribute by topic name" protocol is an explicit
//! name → accessor table with typed parsers, not reflection. Each setting is
//! backed by a [`SettingCell`]: a shared cell with its own short-held lock,
//! written by bus callbacks and read by the control tick.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Payload codec for a setting's value type.
pub trait SettingValue: Clone + Send + 'static {
    fn parse(raw: &str) -> Result<Self, RawValue>;
    fn render(&self) -> String;
}

/// The unparseable payload, carried for logging.
#[derive(Debug, Clone)]
pub struct RawValue(pub String);

impl SettingValue for f64 {
    fn parse(raw: &str) -> Result<Self, RawValue> {
        raw.trim().parse().map_err(|_| RawValue(raw.to_string()))
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

impl SettingValue for u8 {
    fn parse(raw: &str) -> Result<Self, RawValue> {
        raw.trim().parse().map_err(|_| RawValue(raw.to_string()))
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

/// Strings accept any payload - the raw-string fallback of the set protocol.
impl SettingValue for String {
    fn parse(raw: &str) -> Result<Self, RawValue> {
        Ok(raw.to_string())
    }

    fn render(&self) -> String {
        self.clone()
    }
}

/// Optional floats render as the empty string when unset; publishing an
/// empty retained payload clears the broker's slot.
impl SettingValue for Option<f64> {
    fn parse(raw: &str) -> Result<Self, RawValue> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(|_| RawValue(raw.to_string()))
    }

    fn render(&self) -> String {
        match self {
            Some(v) => v.to_string(),
            None => String::new(),
        }
    }
}

/// Shared cell behind one editable setting.
pub struct SettingCell<T> {
    value: Arc<Mutex<T>>,
}

impl<T: Clone> SettingCell<T> {
    pub fn new(initial: T) -> Self {
        Self { value: Arc::new(Mutex::new(initial)) }
    }

    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    pub fn set(&self, value: T) {
        *self.value.lock() = value;
    }
}

impl<T> Clone for SettingCell<T> {
    fn clone(&self) -> Self {
        Self { value: Arc::clone(&self.value) }
    }
}

/// Object-safe view of a cell used to route `…/set` writes.
pub trait AnySetting: Send + Sync {
    /// Current value, rendered as a bus payload.
    fn render(&self) -> String;

    /// Parse and store a new value; returns the rendered stored value.
    fn apply(&self, raw: &str) -> Result<String, SettingError>;
}

struct CellEntry<T> {
    name: String,
    cell: SettingCell<T>,
}

impl<T: SettingValue> AnySetting for CellEntry<T> {
    fn render(&self) -> String {
        self.cell.get().render()
    }

    fn apply(&self, raw: &str) -> Result<String, SettingError> {
        match T::parse(raw) {
            Ok(value) => {
                let rendered = value.render();
                self.cell.set(value);
                Ok(rendered)
            }
            Err(RawValue(raw)) => Err(SettingError::Parse { name: self.name.clone(), raw }),
        }
    }
}

/// Ordered name → setting table. Declared once at job construction; the
/// order is what `$properties` advertises.
#[derive(Default)]
pub struct Settings {
    entries: IndexMap<String, Arc<dyn AnySetting>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cell under a name. The cell stays shared with the caller.
    pub fn register<T: SettingValue>(&mut self, name: &str, cell: &SettingCell<T>) {
        self.entries.insert(
            name.to_string(),
            Arc::new(CellEntry { name: name.to_string(), cell: cell.clone() }),
        );
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AnySetting>> {
        self.entries.get(name)
    }

    /// Declared names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn AnySetting>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Setting write failures. Unknown names never reach here - they are
/// silently ignored upstream.
#[derive(Debug, Error)]
pub enum SettingError {
    #[error("cannot parse {raw:?} as a value for `{name}`")]
    Parse { name: String, raw: String },
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
