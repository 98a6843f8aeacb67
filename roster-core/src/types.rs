//! Domain types for the child roster.
//!
//! Records serialize with camelCase field names so the stored JSON matches
//! the document layout used by the remote collection.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for the parent account that owns a roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParentId(pub String);

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ParentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed identifier for a child record. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChildId(pub String);

impl ChildId {
    /// `child_<unix-millis>_<9 random alphanumerics>`.
    pub fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self(format!("child_{}_{suffix}", Utc::now().timestamp_millis()))
    }
}

impl fmt::Display for ChildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ChildId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChildId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Learning band derived from a child's age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AgeGroup {
    #[default]
    #[serde(rename = "3-5")]
    ThreeToFive,
    #[serde(rename = "6-8")]
    SixToEight,
    #[serde(rename = "9-12")]
    NineToTwelve,
}

impl AgeGroup {
    pub fn for_age(age: u32) -> Self {
        match age {
            0..=5 => AgeGroup::ThreeToFive,
            6..=8 => AgeGroup::SixToEight,
            _ => AgeGroup::NineToTwelve,
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeGroup::ThreeToFive => write!(f, "3-5"),
            AgeGroup::SixToEight => write!(f, "6-8"),
            AgeGroup::NineToTwelve => write!(f, "9-12"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One child profile in a parent's roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRecord {
    pub id: ChildId,
    pub name: String,
    pub age: u32,
    pub age_group: AgeGroup,
    pub parent_id: ParentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_email: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl ChildRecord {
    /// Build a fresh record with a newly generated id.
    pub fn new(parent_id: ParentId, name: impl Into<String>, age: u32, parent_email: Option<String>) -> Self {
        Self {
            id: ChildId::generate(),
            name: name.into(),
            age,
            age_group: AgeGroup::for_age(age),
            parent_id,
            parent_email: parent_email.and_then(|e| normalize_email(&e)),
            created_at: Utc::now(),
            avatar: None,
        }
    }

    /// Case-insensitive email match; records without an email never match.
    pub fn email_matches(&self, email: &str) -> bool {
        match (self.parent_email.as_deref(), normalize_email(email)) {
            (Some(own), Some(other)) => own.trim().eq_ignore_ascii_case(&other),
            _ => false,
        }
    }

    /// Apply a partial update. `ageGroup` follows `age`.
    pub fn apply(&mut self, patch: &ChildPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(age) = patch.age {
            if age != self.age {
                self.age = age;
                self.age_group = AgeGroup::for_age(age);
            }
        }
        if let Some(avatar) = &patch.avatar {
            self.avatar = avatar.clone();
        }
        if let Some(email) = &patch.parent_email {
            self.parent_email = normalize_email(email);
        }
    }
}

/// Fields a caller may change on an existing record.
///
/// `avatar: Some(None)` clears the avatar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildPatch {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub avatar: Option<Option<String>>,
    pub parent_email: Option<String>,
}

impl ChildPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.age.is_none() && self.avatar.is_none() && self.parent_email.is_none()
    }
}

/// Trim and lowercase an email; blank input yields `None`.
pub fn normalize_email(email: &str) -> Option<String> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_lowercase())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
