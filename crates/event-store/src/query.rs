use crate::{EntityId, Offset};

/// Builder for constructing event queries.
///
/// Results are always ordered by global [`Offset`]. A query with only a tag
/// and a starting offset is the "read everything of this family from here"
/// primitive that change feeds are built on.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Filter by entity ID.
    pub entity_id: Option<EntityId>,

    /// Filter by event-family tag.
    pub tag: Option<String>,

    /// Filter by minimum global offset (inclusive).
    pub from_offset: Option<Offset>,

    /// Maximum number of events to return.
    pub limit: Option<usize>,
}

impl EventQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a specific entity.
    pub fn for_entity(entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..Default::default()
        }
    }

    /// Creates a query for every event carrying a tag.
    pub fn for_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Default::default()
        }
    }

    /// Filters to events at or after this global offset.
    pub fn from_offset(mut self, offset: Offset) -> Self {
        self.from_offset = Some(offset);
        self
    }

    /// Limits the number of events returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
