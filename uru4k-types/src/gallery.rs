//! Records returned by the template backend

use chrono::{DateTime, Utc};

use crate::{Finger, Template, UserId};

/// Single template fetched for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTemplate {
    pub template: Template,
    pub finger: Finger,
    pub created_at: Option<DateTime<Utc>>,
}

/// One candidate considered during identification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryEntry {
    pub user_id: UserId,
    pub user_name: String,
    pub user_email: Option<String>,
    pub finger: Finger,
    pub template: Template,
}

/// User listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub finger_count: u32,
}
