//! Write-once, on-demand resolution of named values.
//!
//! A [`Lazy`] holds a table of `name -> identifier` pairs together with a
//! resolver function. Nothing is resolved up front: the first call to
//! [`Lazy::get`] for a name hands the identifier to the resolver and stores
//! the result, every later call returns a clone of the same [`Arc`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ResolveError;

type Resolver<T> = Box<dyn Fn(&str) -> anyhow::Result<Arc<T>> + Send + Sync>;

struct Entry<T: ?Sized> {
    identifier: String,
    value: Mutex<Option<Arc<T>>>,
}

pub struct Lazy<T: ?Sized> {
    entries: BTreeMap<String, Entry<T>>,
    resolver: Resolver<T>,
}

impl<T: ?Sized> Lazy<T> {
    pub fn new<I, K, V, F>(entries: I, resolver: F) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        F: Fn(&str) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let entries = entries
            .into_iter()
            .map(|(name, identifier)| {
                let entry = Entry {
                    identifier: identifier.into(),
                    value: Mutex::new(None),
                };

                (name.into(), entry)
            })
            .collect();

        Self {
            entries,
            resolver: Box::new(resolver),
        }
    }

    /// Returns the value for `name`, resolving it on first access.
    ///
    /// A failed resolution is reported to the caller and nothing is stored,
    /// so the next access tries again.
    pub fn get(&self, name: &str) -> Result<Arc<T>, ResolveError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ResolveError::Unknown(name.to_string()))?;

        // Held across resolution so concurrent readers never resolve twice.
        let mut slot = entry.value.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(value) = &*slot {
            return Ok(value.clone());
        }

        let value = (self.resolver)(&entry.identifier).map_err(|error| ResolveError::Failed {
            name: name.to_string(),
            identifier: entry.identifier.clone(),
            error,
        })?;

        tracing::debug!(name, identifier = %entry.identifier, "resolved");
        *slot = Some(value.clone());

        Ok(value)
    }

    pub fn identifier(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|entry| entry.identifier.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|entry| {
            entry
                .value
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }
}

impl<T: ?Sized> Debug for Lazy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, &v.identifier)))
            .finish()
    }
}
