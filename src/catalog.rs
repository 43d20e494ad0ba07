//! Catalog collaborator: item normalization and scope.
//!
//! Master-data resolution lives outside this crate. The engine only needs two
//! answers from it: which canonical item a raw item id rolls up to, and
//! whether a canonical item is in scope for the run. `StaticCatalog` is an
//! in-memory implementation for embedded use and tests.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use regex::Regex;

use crate::error::ValidationError;
use crate::ids::ItemId;

/// Resolves raw item ids supplied by the input feeds.
pub trait CatalogResolver: Send + Sync {
    /// Returns the canonical (parent) id for a raw item id.
    ///
    /// Quantities of all raw ids sharing a canonical id are summed.
    fn canonical(&self, item: &ItemId) -> ItemId;

    /// Returns true if the canonical item takes part in the run.
    fn in_scope(&self, item: &ItemId) -> bool;
}

/// Which canonical items a run covers.
#[derive(Clone, Default)]
pub enum ItemScope {
    /// Every item.
    #[default]
    All,
    /// An explicit set of items.
    Only(BTreeSet<ItemId>),
    /// Items whose id matches a pattern.
    Matching(Regex),
}

impl ItemScope {
    /// Builds a pattern scope.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidScopePattern` if the pattern does not compile.
    pub fn matching(pattern: &str) -> Result<Self, ValidationError> {
        Regex::new(pattern)
            .map(Self::Matching)
            .map_err(|e| ValidationError::InvalidScopePattern {
                reason: e.to_string(),
            })
    }

    /// Builds an explicit-set scope.
    pub fn only<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ItemId>,
    {
        Self::Only(items.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn contains(&self, item: &ItemId) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(item),
            Self::Matching(re) => re.is_match(item.as_str()),
        }
    }
}

impl fmt::Debug for ItemScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Only(set) => f.debug_tuple("Only").field(&set.len()).finish(),
            Self::Matching(re) => f.debug_tuple("Matching").field(&re.as_str()).finish(),
        }
    }
}

/// In-memory catalog with a child-to-parent map and a scope.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    parents: HashMap<ItemId, ItemId>,
    scope: ItemScope,
}

impl StaticCatalog {
    /// A catalog where every item is its own parent and in scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the catalog to a scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ItemScope) -> Self {
        self.scope = scope;
        self
    }

    /// Maps a child item to its parent.
    #[must_use]
    pub fn with_parent(mut self, child: impl Into<ItemId>, parent: impl Into<ItemId>) -> Self {
        self.parents.insert(child.into(), parent.into());
        self
    }

    /// Maps many children at once.
    #[must_use]
    pub fn with_parents<I, C, P>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, P)>,
        C: Into<ItemId>,
        P: Into<ItemId>,
    {
        self.parents
            .extend(pairs.into_iter().map(|(c, p)| (c.into(), p.into())));
        self
    }
}

impl CatalogResolver for StaticCatalog {
    fn canonical(&self, item: &ItemId) -> ItemId {
        // Parent chains are resolved with a hop limit so a cyclic map can't hang a run.
        let mut current = item;
        for _ in 0..16 {
            match self.parents.get(current) {
                Some(parent) if parent != current => current = parent,
                _ => break,
            }
        }
        current.clone()
    }

    fn in_scope(&self, item: &ItemId) -> bool {
        self.scope.contains(item)
    }
}
