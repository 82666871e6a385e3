// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed variables over the persisted process context.
//!
//! Every value a step keeps between invocations lives in a [`VariableScope`],
//! addressed through a [`Variable<T>`] handle. Handles carry the Rust type of
//! the value, and the stored representation carries a type tag, so a read with
//! the wrong type is reported as [`VariableError::TypeMismatch`] instead of
//! producing a silently wrong value.
//!
//! The scope keeps the values loaded at the start of an invocation apart from
//! the changes made during it. The driver commits the changes when the
//! invocation returns a phase and rolls them back when it fails.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A value type that can be stored in the process context.
///
/// `TYPE_TAG` is persisted next to the value and must be unique per Rust type.
pub trait VariableValue: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable tag identifying the stored type.
    const TYPE_TAG: &'static str;
}

/// Implements [`VariableValue`] for one or more types.
///
/// ```ignore
/// impl_variable_value!(MyRecord => "my-record");
/// ```
#[macro_export]
macro_rules! impl_variable_value {
    ($($ty:ty => $tag:literal),+ $(,)?) => {
        $(
            impl $crate::variables::VariableValue for $ty {
                const TYPE_TAG: &'static str = $tag;
            }
        )+
    };
}

impl_variable_value!(
    String => "string",
    bool => "bool",
    i32 => "int",
    i64 => "long",
    u32 => "uint",
    u64 => "ulong",
    Vec<String> => "string-list",
    BTreeMap<String, Vec<String>> => "string-list-map",
);

/// Serialized value together with its type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    /// Type tag of the value, see [`VariableValue::TYPE_TAG`].
    pub type_tag: String,
    /// JSON representation of the value.
    pub value: serde_json::Value,
}

impl StoredValue {
    /// Serialize a typed value.
    pub fn encode<T: VariableValue>(name: &str, value: &T) -> Result<Self, VariableError> {
        let value = serde_json::to_value(value).map_err(|source| VariableError::Serialization {
            name: name.to_string(),
            source,
        })?;
        Ok(Self {
            type_tag: T::TYPE_TAG.to_string(),
            value,
        })
    }

    /// Deserialize into `T`, checking the type tag first.
    pub fn decode<T: VariableValue>(&self, name: &str) -> Result<T, VariableError> {
        if self.type_tag != T::TYPE_TAG {
            return Err(VariableError::TypeMismatch {
                name: name.to_string(),
                expected: T::TYPE_TAG,
                found: self.type_tag.clone(),
            });
        }
        serde_json::from_value(self.value.clone()).map_err(|source| VariableError::Serialization {
            name: name.to_string(),
            source,
        })
    }
}

/// A single pending modification of the context.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableChange {
    /// Variable name.
    pub name: String,
    /// New value, or `None` when the variable was removed.
    pub value: Option<StoredValue>,
}

/// Errors raised when reading or writing context variables.
#[derive(Debug, thiserror::Error)]
pub enum VariableError {
    /// A required variable has no value and no default.
    #[error("variable '{name}' is not set")]
    Missing {
        /// Variable name.
        name: String,
    },

    /// The stored value was written with a different type.
    #[error("variable '{name}' holds a value of type '{found}', expected '{expected}'")]
    TypeMismatch {
        /// Variable name.
        name: String,
        /// Type tag of the handle used for the access.
        expected: &'static str,
        /// Type tag found in the store.
        found: String,
    },

    /// The value could not be converted to or from JSON.
    #[error("variable '{name}' could not be serialized: {source}")]
    Serialization {
        /// Variable name.
        name: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Named, typed handle into the process context.
pub struct Variable<T> {
    name: Cow<'static, str>,
    default: Option<fn() -> T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Variable<T> {
    /// Handle without a default; reading an unset value yields `None`.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            default: None,
            _marker: PhantomData,
        }
    }

    /// Handle whose unset value reads as `default()`.
    pub const fn with_default(name: &'static str, default: fn() -> T) -> Self {
        Self {
            name: Cow::Borrowed(name),
            default: Some(default),
            _marker: PhantomData,
        }
    }

    /// Handle with a name computed at runtime (per-module bookkeeping, iteration indices).
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            default: None,
            _marker: PhantomData,
        }
    }

    /// Name of the variable in the store.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn default_value(&self) -> Option<T> {
        self.default.map(|default| default())
    }
}

impl<T> Clone for Variable<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            default: self.default,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Variable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// Variables of one action instance for the duration of one invocation.
#[derive(Debug, Clone, Default)]
pub struct VariableScope {
    committed: HashMap<String, StoredValue>,
    pending: BTreeMap<String, Option<StoredValue>>,
}

impl VariableScope {
    /// Empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope over values loaded from a store.
    pub fn from_snapshot(values: HashMap<String, StoredValue>) -> Self {
        Self {
            committed: values,
            pending: BTreeMap::new(),
        }
    }

    fn raw(&self, name: &str) -> Option<&StoredValue> {
        match self.pending.get(name) {
            Some(change) => change.as_ref(),
            None => self.committed.get(name),
        }
    }

    /// Read a variable, falling back to the handle's default when unset.
    pub fn get<T: VariableValue>(&self, var: &Variable<T>) -> Result<Option<T>, VariableError> {
        match self.raw(var.name()) {
            Some(stored) => stored.decode(var.name()).map(Some),
            None => Ok(var.default_value()),
        }
    }

    /// Read a variable that must be present.
    pub fn require<T: VariableValue>(&self, var: &Variable<T>) -> Result<T, VariableError> {
        self.get(var)?.ok_or_else(|| VariableError::Missing {
            name: var.name().to_string(),
        })
    }

    /// Write a variable.
    ///
    /// Fails if the name already holds a value of a different type.
    pub fn set<T: VariableValue>(&mut self, var: &Variable<T>, value: T) -> Result<(), VariableError> {
        if let Some(existing) = self.raw(var.name())
            && existing.type_tag != T::TYPE_TAG
        {
            return Err(VariableError::TypeMismatch {
                name: var.name().to_string(),
                expected: T::TYPE_TAG,
                found: existing.type_tag.clone(),
            });
        }
        let stored = StoredValue::encode(var.name(), &value)?;
        self.pending.insert(var.name().to_string(), Some(stored));
        Ok(())
    }

    /// Remove a variable.
    pub fn remove<T: VariableValue>(&mut self, var: &Variable<T>) {
        let name = var.name().to_string();
        if self.committed.contains_key(&name) {
            self.pending.insert(name, None);
        } else {
            self.pending.remove(&name);
        }
    }

    /// Whether a value (not a default) is present under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.raw(name).is_some()
    }

    /// Whether the current invocation changed anything.
    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drop every change made since the last commit.
    pub fn rollback(&mut self) {
        self.pending.clear();
    }

    /// Take the pending changes for persisting and fold them into the committed view.
    pub fn take_changes(&mut self) -> Vec<VariableChange> {
        let pending = std::mem::take(&mut self.pending);
        let mut changes = Vec::with_capacity(pending.len());
        for (name, value) in pending {
            match &value {
                Some(stored) => {
                    self.committed.insert(name.clone(), stored.clone());
                }
                None => {
                    self.committed.remove(&name);
                }
            }
            changes.push(VariableChange { name, value });
        }
        changes
    }

    /// All current values, pending changes applied.
    pub fn snapshot(&self) -> HashMap<String, StoredValue> {
        let mut values = self.committed.clone();
        for (name, change) in &self.pending {
            match change {
                Some(stored) => {
                    values.insert(name.clone(), stored.clone());
                }
                None => {
                    values.remove(name);
                }
            }
        }
        values
    }
}
