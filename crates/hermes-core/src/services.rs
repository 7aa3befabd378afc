//! Shared dependencies handed to every stage.
//!
//! A [`Services`] container is built once when the runtime is assembled and
//! shared (behind an `Arc`) by every message's [`Injection`](crate::Injection).
//! Services are looked up either by type or by a caller-chosen name.
//!
//! # Example
//!
//! ```rust
//! use hermes_core::Services;
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! let mut services = Services::new();
//! services.insert(Arc::new(Database { url: "postgres://localhost/db".into() }));
//! services.insert_named("greeting", Arc::new(String::from("hello")));
//!
//! let db: Arc<Database> = services.get().unwrap();
//! assert_eq!(db.url, "postgres://localhost/db");
//! assert_eq!(*services.named::<String>("greeting").unwrap(), "hello");
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A required service was missing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("service {type_name}{} is not registered", quoted(.name.as_deref()))]
pub struct ServiceError {
    /// Type that was requested.
    pub type_name: &'static str,
    /// Name used for the lookup, if any.
    pub name: Option<String>,
}

fn quoted(name: Option<&str>) -> String {
    name.map(|n| format!(" '{n}'")).unwrap_or_default()
}

impl ServiceError {
    fn missing<T>(name: Option<&str>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            name: name.map(str::to_string),
        }
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

/// Type- and name-keyed service container.
#[derive(Default, Clone)]
pub struct Services {
    typed: HashMap<TypeId, Entry>,
    named: HashMap<String, Entry>,
}

impl Services {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service under its type, replacing any previous one.
    pub fn insert<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.typed.insert(TypeId::of::<T>(), service);
    }

    /// Registers a service under `name`.
    pub fn insert_named<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, service: Arc<T>) {
        self.named.insert(name.into(), service);
    }

    /// Looks up a service by type.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.typed
            .get(&TypeId::of::<T>())
            .and_then(|s| Arc::clone(s).downcast::<T>().ok())
    }

    /// Looks up a service by type, failing if it is missing.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ServiceError> {
        self.get().ok_or_else(|| ServiceError::missing::<T>(None))
    }

    /// Looks up a named service. Returns `None` if missing or of another type.
    pub fn named<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.named
            .get(name)
            .and_then(|s| Arc::clone(s).downcast::<T>().ok())
    }

    /// Looks up a named service, failing if it is missing.
    pub fn require_named<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ServiceError> {
        self.named(name)
            .ok_or_else(|| ServiceError::missing::<T>(Some(name)))
    }

    /// Total number of registered services.
    pub fn len(&self) -> usize {
        self.typed.len() + self.named.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.named.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Services")
            .field("typed", &self.typed.len())
            .field("named", &names)
            .finish()
    }
}
