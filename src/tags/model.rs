use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum normalized tag name length in characters.
pub const TAG_NAME_MAX_LENGTH: usize = 50;

pub const DEFAULT_AUTOCOMPLETE_LIMIT: u32 = 10;
pub const MAX_AUTOCOMPLETE_LIMIT: u32 = 50;

/// A label owned by one user. Names are unique per owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A normalized tag name: trimmed, lowercased, 1 to 50 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagName(String);

impl TagName {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let name = raw.trim().to_lowercase();
        if name.is_empty() {
            return Err(ValidationError::new("name", "Tag name cannot be empty"));
        }
        if name.chars().count() > TAG_NAME_MAX_LENGTH {
            return Err(ValidationError::new(
                "name",
                format!("Tag name must be {TAG_NAME_MAX_LENGTH} characters or less"),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TagName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of an owner's tags, ordered by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagPage {
    pub tags: Vec<Tag>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// JSON body for `POST /api/v1/tags`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
}

/// Query string of `GET /api/v1/tags`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTagsParams {
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Query string of `GET /api/v1/tags/autocomplete`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutocompleteParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<u32>,
}

/// Validate an autocomplete limit, defaulting to 10.
pub fn autocomplete_limit(raw: Option<u32>) -> Result<u32, ValidationError> {
    let limit = raw.unwrap_or(DEFAULT_AUTOCOMPLETE_LIMIT);
    if !(1..=MAX_AUTOCOMPLETE_LIMIT).contains(&limit) {
        return Err(ValidationError::new(
            "limit",
            format!("limit must be between 1 and {MAX_AUTOCOMPLETE_LIMIT}"),
        ));
    }
    Ok(limit)
}
