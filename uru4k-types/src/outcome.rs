//! Successful results of the SDK entry points

use crate::{Finger, Score, UserId};

/// Enrollment stored for `user_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollOutcome {
    pub user_id: UserId,
    pub finger: Finger,
}

/// Live finger matched the stored template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub user_id: UserId,
    pub score: Score,
    /// Finger requested by the caller, if any
    pub finger: Option<Finger>,
}

/// Live finger matched a gallery entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyOutcome {
    pub user_id: UserId,
    pub user_name: String,
    pub user_email: Option<String>,
    pub finger: Finger,
    pub score: Score,
    /// Position of the match in the gallery
    pub index: usize,
}
