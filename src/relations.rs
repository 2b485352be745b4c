//! Toggling many-to-many edges such as likes and follows.

use async_trait::async_trait;
use thiserror::Error;

use crate::repository::RepositoryError;

/// A named many-to-many relation. Sources are always users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// user → post
    Likes,
    /// user → user
    Follows,
}

impl Relation {
    pub fn verb(self) -> &'static str {
        match self {
            Relation::Likes => "like",
            Relation::Follows => "follow",
        }
    }

    /// Whether a source may point at itself. Only meaningful when both ends
    /// are the same kind of entity.
    pub fn allows_self_reference(self) -> bool {
        match self {
            Relation::Likes => true,
            Relation::Follows => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub relation: Relation,
    pub source: i64,
    pub target: i64,
}

impl Edge {
    pub fn new(relation: Relation, source: i64, target: i64) -> Self {
        Self {
            relation,
            source,
            target,
        }
    }

    fn is_self_reference(&self) -> bool {
        !self.relation.allows_self_reference() && self.source == self.target
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
}

#[derive(Debug, Error)]
pub enum RelationError {
    #[error("cannot {} yourself", .0.verb())]
    SelfReference(Relation),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Set semantics over (source, target) pairs per relation.
#[async_trait]
pub trait EdgeStore: Send + Sync {
    async fn has_edge(&self, edge: Edge) -> Result<bool, RepositoryError>;

    /// Insert if absent. Returns whether a row was added.
    async fn add_edge(&self, edge: Edge) -> Result<bool, RepositoryError>;

    /// Delete if present. Returns whether a row was removed.
    async fn remove_edge(&self, edge: Edge) -> Result<bool, RepositoryError>;

    /// Targets of `source`, ascending.
    async fn edge_targets(
        &self,
        relation: Relation,
        source: i64,
    ) -> Result<Vec<i64>, RepositoryError>;
}

fn check(edge: &Edge) -> Result<(), RelationError> {
    if edge.is_self_reference() {
        return Err(RelationError::SelfReference(edge.relation));
    }
    Ok(())
}

/// Remove the edge if present, otherwise add it.
pub async fn toggle<S: EdgeStore + ?Sized>(
    store: &S,
    relation: Relation,
    source: i64,
    target: i64,
) -> Result<ToggleOutcome, RelationError> {
    let edge = Edge::new(relation, source, target);
    check(&edge)?;

    if store.has_edge(edge).await? {
        store.remove_edge(edge).await?;
        tracing::debug!(?relation, source, target, "edge removed");
        Ok(ToggleOutcome::Removed)
    } else {
        store.add_edge(edge).await?;
        tracing::debug!(?relation, source, target, "edge added");
        Ok(ToggleOutcome::Added)
    }
}

pub async fn add<S: EdgeStore + ?Sized>(
    store: &S,
    relation: Relation,
    source: i64,
    target: i64,
) -> Result<bool, RelationError> {
    let edge = Edge::new(relation, source, target);
    check(&edge)?;
    Ok(store.add_edge(edge).await?)
}

pub async fn remove<S: EdgeStore + ?Sized>(
    store: &S,
    relation: Relation,
    source: i64,
    target: i64,
) -> Result<bool, RelationError> {
    let edge = Edge::new(relation, source, target);
    check(&edge)?;
    Ok(store.remove_edge(edge).await?)
}
