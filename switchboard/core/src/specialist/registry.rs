//! Specialist Registry
//!
//! The ordered, immutable set of specialists available to the router. Built
//! once at startup and shared by reference; nothing mutates it afterwards, so
//! concurrent pipelines read it without locking.

use std::sync::Arc;

use thiserror::Error;

use super::Specialist;

/// Errors from building or querying the registry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No specialists were configured
    #[error("specialist registry is empty")]
    Empty,

    /// Two specialists share a name
    #[error("duplicate specialist name: {0}")]
    DuplicateName(String),

    /// Lookup for a name that is not registered
    #[error("unknown specialist: {0}")]
    NotFound(String),
}

/// Ordered collection of specialists; the first entry is the default
pub struct SpecialistRegistry {
    specialists: Vec<Arc<dyn Specialist>>,
}

impl std::fmt::Debug for SpecialistRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecialistRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl SpecialistRegistry {
    /// Build the registry
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Empty`] for an empty list and
    /// [`RegistryError::DuplicateName`] if two specialists share a name.
    pub fn new(specialists: Vec<Arc<dyn Specialist>>) -> Result<Self, RegistryError> {
        if specialists.is_empty() {
            return Err(RegistryError::Empty);
        }

        for (i, specialist) in specialists.iter().enumerate() {
            if specialists[..i]
                .iter()
                .any(|earlier| earlier.name() == specialist.name())
            {
                return Err(RegistryError::DuplicateName(specialist.name().to_string()));
            }
        }

        Ok(Self { specialists })
    }

    /// Specialist names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.specialists.iter().map(|s| s.name()).collect()
    }

    /// Look up a specialist by exact name
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no specialist has that name.
    pub fn get(&self, name: &str) -> Result<&Arc<dyn Specialist>, RegistryError> {
        self.specialists
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Whether a specialist with this name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.specialists.iter().any(|s| s.name() == name)
    }

    /// The default specialist, used whenever routing cannot decide
    #[must_use]
    pub fn default_specialist(&self) -> &Arc<dyn Specialist> {
        // Non-empty by construction
        &self.specialists[0]
    }

    /// Iterate specialists in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Specialist>> {
        self.specialists.iter()
    }

    /// Number of registered specialists
    #[must_use]
    pub fn len(&self) -> usize {
        self.specialists.len()
    }

    /// Always false; kept for API symmetry with `len`
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }
}
