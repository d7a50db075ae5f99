//! Expiration overlay record.
//!
//! # Invariants
//! - No entry for an id means the entity never expires.
//! - An entry whose date is in the past, or equal to now, marks the entity
//!   as expired. A future date or `None` does not.

use crate::model::entity::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Optional expiry timestamp for one entity id, stored apart from the
/// entity document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationEntry {
    pub id: EntityId,
    pub expiration_date: Option<DateTime<Utc>>,
}

impl ExpirationEntry {
    pub fn new(id: impl Into<EntityId>, expiration_date: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            expiration_date,
        }
    }

    /// Entry meaning "never expires".
    pub fn never(id: impl Into<EntityId>) -> Self {
        Self::new(id, None)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration_date, Some(date) if date <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::ExpirationEntry;
    use chrono::{Duration, Utc};

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(ExpirationEntry::new("a", Some(now)).is_expired_at(now));
        assert!(ExpirationEntry::new("a", Some(now - Duration::seconds(1))).is_expired_at(now));
        assert!(!ExpirationEntry::new("a", Some(now + Duration::seconds(1))).is_expired_at(now));
        assert!(!ExpirationEntry::never("a").is_expired_at(now));
    }
}
