//! The scrapbook document: root aggregate of the shared store.

use crate::elements::Element;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who may see a scrapbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

/// Role granted to a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorRole {
    Viewer,
    Editor,
}

impl CollaboratorRole {
    /// Numeric level used by access-list bookkeeping.
    pub fn permission_level(self) -> u8 {
        match self {
            CollaboratorRole::Editor => 2,
            CollaboratorRole::Viewer => 1,
        }
    }
}

/// A user granted access to a scrapbook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collaborator {
    pub id: String,
    #[serde(default)]
    pub email: String,
    pub role: CollaboratorRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl Collaborator {
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: CollaboratorRole) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role,
            name: None,
            photo_url: None,
        }
    }

    pub fn access_entry(&self, scrapbook_id: &str) -> AccessEntry {
        AccessEntry {
            id: scrapbook_id.to_string(),
            permission_level: self.role.permission_level(),
        }
    }
}

/// Entry in a user's list of scrapbooks shared with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    pub id: String,
    pub permission_level: u8,
}

/// A shared canvas document.
///
/// `elements` is the single source of truth for the visual state and is
/// always written as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scrapbook {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub owner_id: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub collaborators: Vec<Collaborator>,
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_thumbnail_update: Option<DateTime<Utc>>,
}

impl Scrapbook {
    /// Create an empty private scrapbook.
    pub fn new(id: impl Into<String>, title: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            owner_id: owner_id.into(),
            visibility: Visibility::Private,
            collaborators: Vec::new(),
            elements: Vec::new(),
            last_modified: None,
            last_modified_by: None,
            thumbnail: None,
            last_thumbnail_update: None,
        }
    }

    pub fn collaborator(&self, user_id: &str) -> Option<&Collaborator> {
        self.collaborators.iter().find(|c| c.id == user_id)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Partial update of a scrapbook. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapbookPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<Element>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_thumbnail_update: Option<DateTime<Utc>>,
}

impl ScrapbookPatch {
    /// Whole-array element write stamped with its author.
    pub fn elements(elements: Vec<Element>, modified_by: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            elements: Some(elements),
            last_modified: Some(at),
            last_modified_by: Some(modified_by.into()),
            ..Self::default()
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn visibility(visibility: Visibility) -> Self {
        Self {
            visibility: Some(visibility),
            ..Self::default()
        }
    }

    pub fn thumbnail(url: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            thumbnail: Some(url.into()),
            last_thumbnail_update: Some(at),
            last_modified: Some(at),
            ..Self::default()
        }
    }

    /// Apply the set fields onto `doc`.
    pub fn apply_to(&self, doc: &mut Scrapbook) {
        if let Some(title) = &self.title {
            doc.title = title.clone();
        }
        if let Some(visibility) = self.visibility {
            doc.visibility = visibility;
        }
        if let Some(elements) = &self.elements {
            doc.elements = elements.clone();
        }
        if let Some(at) = self.last_modified {
            doc.last_modified = Some(at);
        }
        if let Some(by) = &self.last_modified_by {
            doc.last_modified_by = Some(by.clone());
        }
        if let Some(url) = &self.thumbnail {
            doc.thumbnail = Some(url.clone());
        }
        if let Some(at) = self.last_thumbnail_update {
            doc.last_thumbnail_update = Some(at);
        }
    }
}
