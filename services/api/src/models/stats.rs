//! Moderation dashboard counts

use serde::Serialize;

/// Aggregate counts for administrators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdminStats {
    pub users: u64,
    pub total: u64,
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
}
