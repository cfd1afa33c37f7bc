//! Name-keyed catalog of check and report constructors.
//!
//! Components are registered on a [`RegistryBuilder`] during startup and
//! the builder is then sealed into an immutable [`Registry`]. Cached entries
//! are instantiated once at seal time, so every later [`Registry::build`]
//! for that name hands out the same `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::checks::{Check, Report};

/// Errors raised by registration and lookup.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A constructor is already registered under this name.
    #[error("component {0:?} is already registered")]
    DuplicateName(String),

    /// No constructor is registered under this name.
    #[error("component {0:?} is not registered")]
    NotFound(String),

    /// The name is registered, but as the other kind of component.
    #[error("component {name:?} is not a {expected}")]
    KindMismatch {
        /// Requested name.
        name: String,
        /// Kind the caller asked for.
        expected: ComponentKind,
    },
}

/// The two kinds of registrable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// A measurement routine.
    Check,
    /// An interpretive routine.
    Report,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Check => f.write_str("check"),
            Self::Report => f.write_str("report"),
        }
    }
}

/// A built component instance.
#[derive(Clone)]
pub enum Component {
    /// Check instance.
    Check(Arc<dyn Check>),
    /// Report instance.
    Report(Arc<dyn Report>),
}

impl Component {
    /// Registered name of the instance.
    pub fn name(&self) -> &str {
        match self {
            Self::Check(c) => c.name(),
            Self::Report(r) => r.name(),
        }
    }

    /// Kind of the instance.
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Check(_) => ComponentKind::Check,
            Self::Report(_) => ComponentKind::Report,
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(match self.kind() {
            ComponentKind::Check => "Check",
            ComponentKind::Report => "Report",
        })
        .field(&self.name())
        .finish()
    }
}

/// Constructor closure. Anything a component needs is captured by the closure.
pub type Constructor = Box<dyn Fn() -> Component + Send + Sync>;

// ---------------------------------------------------------------------------
// RegistryBuilder
// ---------------------------------------------------------------------------

struct Entry {
    constructor: Constructor,
    cached: bool,
}

/// Mutable registration phase of a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, Entry>,
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl RegistryBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `constructor` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if `name` is taken.
    pub fn subscribe(
        &mut self,
        name: &str,
        constructor: Constructor,
        cached: bool,
    ) -> Result<&mut Self, RegistryError> {
        if self.entries.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_owned()));
        }
        self.entries.insert(
            name.to_owned(),
            Entry {
                constructor,
                cached,
            },
        );
        Ok(self)
    }

    /// Register a check constructor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if `name` is taken.
    pub fn subscribe_check<F, C>(
        &mut self,
        name: &str,
        constructor: F,
        cached: bool,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: Check + 'static,
    {
        self.subscribe(
            name,
            Box::new(move || Component::Check(Arc::new(constructor()))),
            cached,
        )
    }

    /// Register a report constructor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if `name` is taken.
    pub fn subscribe_report<F, R>(
        &mut self,
        name: &str,
        constructor: F,
        cached: bool,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Report + 'static,
    {
        self.subscribe(
            name,
            Box::new(move || Component::Report(Arc::new(constructor()))),
            cached,
        )
    }

    /// Finish registration. Cached entries are built here, once.
    pub fn seal(self) -> Registry {
        let entries = self
            .entries
            .into_iter()
            .map(|(name, entry)| {
                let sealed = if entry.cached {
                    debug!(component = %name, "building cached component");
                    Sealed::Cached((entry.constructor)())
                } else {
                    Sealed::Fresh(entry.constructor)
                };
                (name, sealed)
            })
            .collect();
        Registry { entries }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

enum Sealed {
    Cached(Component),
    Fresh(Constructor),
}

/// Immutable, shareable component catalog.
pub struct Registry {
    entries: HashMap<String, Sealed>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish()
    }
}

impl Registry {
    /// Instance registered under `name`; the shared one for cached entries.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown names.
    pub fn build(&self, name: &str) -> Result<Component, RegistryError> {
        match self.entries.get(name) {
            Some(Sealed::Cached(component)) => Ok(component.clone()),
            Some(Sealed::Fresh(constructor)) => Ok(constructor()),
            None => Err(RegistryError::NotFound(name.to_owned())),
        }
    }

    /// Build `name` and require it to be a check.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] or [`RegistryError::KindMismatch`].
    pub fn build_check(&self, name: &str) -> Result<Arc<dyn Check>, RegistryError> {
        match self.build(name)? {
            Component::Check(check) => Ok(check),
            Component::Report(_) => Err(RegistryError::KindMismatch {
                name: name.to_owned(),
                expected: ComponentKind::Check,
            }),
        }
    }

    /// Build `name` and require it to be a report.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] or [`RegistryError::KindMismatch`].
    pub fn build_report(&self, name: &str) -> Result<Arc<dyn Report>, RegistryError> {
        match self.build(name)? {
            Component::Report(report) => Ok(report),
            Component::Check(_) => Err(RegistryError::KindMismatch {
                name: name.to_owned(),
                expected: ComponentKind::Report,
            }),
        }
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Sorted registered names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
