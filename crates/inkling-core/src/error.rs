//! Domain error taxonomy.
//!
//! Every request-validation, authentication, and lookup failure that a
//! caller can surface to a user is an [`AnalysisError`] variant with a
//! stable machine-readable code and an HTTP status.

use thiserror::Error;

/// A rejection raised before any stream is opened or any state is created.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("no fragments provided")]
    MissingFragments,

    #[error("at least {min} fragment ids required")]
    NotEnoughFragments { min: usize },

    #[error("maximum {max} fragments allowed, got {got}")]
    TooManyFragments { max: usize, got: usize },

    #[error("fragment {index} has no content")]
    EmptyFragment { index: usize },

    #[error("fragment ids are required")]
    MissingIds,

    #[error("too many fragments (max {max}), got {got}")]
    TooManyIds { max: usize, got: usize },

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("tag ids are required")]
    MissingTagIds,

    #[error("story not found or access denied")]
    StoryNotFound,

    #[error("fragments not found")]
    FragmentsNotFound,

    #[error("authentication required")]
    AuthRequired,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("cannot relate a fragment to itself")]
    SelfRelation,

    #[error("relation already exists")]
    RelationExists,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("search query is required")]
    MissingQuery,

    #[error("query too long (max {max} characters)")]
    QueryTooLong { max: usize },
}

impl AnalysisError {
    /// Stable upper-snake code sent in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::MissingFragments | AnalysisError::NotEnoughFragments { .. } => {
                "MISSING_FRAGMENTS"
            }
            AnalysisError::TooManyFragments { .. } => "TOO_MANY_FRAGMENTS",
            AnalysisError::EmptyFragment { .. } => "EMPTY_FRAGMENT",
            AnalysisError::MissingIds => "MISSING_IDS",
            AnalysisError::TooManyIds { .. } => "TOO_MANY_IDS",
            AnalysisError::InvalidAction(_) => "INVALID_ACTION",
            AnalysisError::MissingTagIds => "MISSING_TAG_IDS",
            AnalysisError::StoryNotFound => "STORY_NOT_FOUND",
            AnalysisError::FragmentsNotFound => "FRAGMENTS_NOT_FOUND",
            AnalysisError::AuthRequired => "AUTH_REQUIRED",
            AnalysisError::MissingField(_) => "MISSING_FIELDS",
            AnalysisError::SelfRelation => "SELF_RELATION",
            AnalysisError::RelationExists => "RELATION_EXISTS",
            AnalysisError::NotFound(_) => "NOT_FOUND",
            AnalysisError::MissingQuery => "MISSING_QUERY",
            AnalysisError::QueryTooLong { .. } => "QUERY_TOO_LONG",
        }
    }

    /// HTTP status code this error maps to.
    pub fn status(&self) -> u16 {
        match self {
            AnalysisError::AuthRequired => 401,
            AnalysisError::StoryNotFound
            | AnalysisError::FragmentsNotFound
            | AnalysisError::NotFound(_) => 404,
            AnalysisError::RelationExists => 409,
            _ => 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_enough_fragments_message() {
        let err = AnalysisError::NotEnoughFragments { min: 2 };
        assert_eq!(err.to_string(), "at least 2 fragment ids required");
        assert_eq!(err.code(), "MISSING_FRAGMENTS");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AnalysisError::AuthRequired.status(), 401);
        assert_eq!(AnalysisError::StoryNotFound.status(), 404);
        assert_eq!(AnalysisError::RelationExists.status(), 409);
        assert_eq!(
            AnalysisError::TooManyFragments { max: 50, got: 51 }.code(),
            "TOO_MANY_FRAGMENTS"
        );
    }

    #[test]
    fn test_search_and_content_errors_are_bad_requests() {
        let err = AnalysisError::QueryTooLong { max: 200 };
        assert_eq!(err.to_string(), "query too long (max 200 characters)");
        assert_eq!(err.code(), "QUERY_TOO_LONG");
        assert_eq!(err.status(), 400);
        assert_eq!(AnalysisError::MissingQuery.code(), "MISSING_QUERY");
        assert_eq!(AnalysisError::EmptyFragment { index: 2 }.status(), 400);
    }
}
