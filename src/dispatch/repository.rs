use std::collections::BTreeMap;
use tracing::debug;

use super::traits::MiddlewareBox;
use crate::error::BootError;
use crate::loader::Injectable;

/// What a middleware builder produces: one middleware, or a named group
/// whose members are addressed as `__group.member`.
#[derive(Clone)]
pub enum MiddlewareEntry {
    Single(MiddlewareBox),
    Group(BTreeMap<String, MiddlewareBox>),
}

/// Builds one repository entry from the boot-time context.
pub type MiddlewareBuilder = fn(&Injectable) -> Result<MiddlewareEntry, BootError>;

/// Name-addressable middleware, populated once at boot.
#[derive(Default, Clone)]
pub struct MiddlewareRepository {
    entries: BTreeMap<String, MiddlewareEntry>,
}

impl MiddlewareRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every builder. Any builder failure or empty group aborts boot.
    pub fn load(
        builders: &[(&'static str, MiddlewareBuilder)],
        injectable: &Injectable,
    ) -> Result<Self, BootError> {
        let mut repository = Self::new();
        for (name, build) in builders {
            let entry = build(injectable)?;
            repository.insert(name, entry)?;
        }
        debug!("Loaded {} middleware entries", repository.entries.len());
        Ok(repository)
    }

    pub fn insert(&mut self, name: &str, entry: MiddlewareEntry) -> Result<(), BootError> {
        if let MiddlewareEntry::Group(members) = &entry {
            if members.is_empty() {
                return Err(BootError::InvalidMiddleware {
                    name: name.to_string(),
                });
            }
        }
        if self.entries.contains_key(name) {
            return Err(BootError::DuplicateMiddleware(name.to_string()));
        }
        debug!("Registered middleware {}", name);
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    /// Resolves `__name` or `__group.member` to a runnable middleware.
    /// A bare group name resolves to nothing.
    pub fn resolve(&self, identifier: &str) -> Option<MiddlewareBox> {
        let (name, member) = match identifier.split_once('.') {
            Some((name, member)) => (name, Some(member)),
            None => (identifier, None),
        };

        match (self.entries.get(name)?, member) {
            (MiddlewareEntry::Single(mw), None) => Some(mw.clone()),
            (MiddlewareEntry::Group(members), Some(member)) => members.get(member).cloned(),
            _ => None,
        }
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.resolve(identifier).is_some()
    }

    /// Every resolvable identifier, groups expanded
    pub fn identifiers(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (name, entry) in &self.entries {
            match entry {
                MiddlewareEntry::Single(_) => out.push(name.clone()),
                MiddlewareEntry::Group(members) => {
                    out.extend(members.keys().map(|m| format!("{}.{}", name, m)));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::traits::{Flow, Middleware, Step};
    use crate::error::ApiError;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Noop;

    #[async_trait]
    impl Middleware for Noop {
        async fn handle(&self, _step: Step<'_>) -> Result<Flow, ApiError> {
            Ok(Flow::next())
        }
    }

    fn noop() -> MiddlewareBox {
        Arc::new(Noop)
    }

    #[test]
    fn test_resolves_singles_and_group_members() {
        let mut repo = MiddlewareRepository::new();
        repo.insert("__auth", MiddlewareEntry::Single(noop())).unwrap();
        let mut group = BTreeMap::new();
        group.insert("api".to_string(), noop());
        group.insert("auth".to_string(), noop());
        repo.insert("__rateLimit", MiddlewareEntry::Group(group)).unwrap();

        assert!(repo.contains("__auth"));
        assert!(repo.contains("__rateLimit.auth"));
        assert!(!repo.contains("__rateLimit"));
        assert!(!repo.contains("__rateLimit.nope"));
        assert!(!repo.contains("__auth.member"));
        assert!(!repo.contains("__missing"));
        assert_eq!(
            repo.identifiers(),
            vec!["__auth", "__rateLimit.api", "__rateLimit.auth"]
        );
    }

    #[test]
    fn test_empty_group_is_rejected() {
        let mut repo = MiddlewareRepository::new();
        let err = repo
            .insert("__empty", MiddlewareEntry::Group(BTreeMap::new()))
            .unwrap_err();
        assert!(matches!(err, BootError::InvalidMiddleware { .. }));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut repo = MiddlewareRepository::new();
        repo.insert("__auth", MiddlewareEntry::Single(noop())).unwrap();
        assert!(repo.insert("__auth", MiddlewareEntry::Single(noop())).is_err());
    }
}
