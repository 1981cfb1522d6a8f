//! Password reset token model

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Outstanding reset token for one email address
#[derive(Debug, Clone, Serialize)]
pub struct ResetToken {
    pub token: String,
    pub email: String,
    /// Issue time; re-requesting a link moves it forward
    pub updated_at: DateTime<Utc>,
}

impl ResetToken {
    pub fn issue(email: impl Into<String>) -> Self {
        Self {
            token: uuid::Uuid::new_v4().simple().to_string(),
            email: email.into(),
            updated_at: Utc::now(),
        }
    }

    /// A token is expired once `ttl` or more has passed since it was issued
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.updated_at >= ttl
    }
}

/// Result of looking up a reset token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetTokenStatus {
    Valid,
    Invalid,
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn token_issued_at(updated_at: DateTime<Utc>) -> ResetToken {
        ResetToken {
            token: "t".into(),
            email: "a@example.com".into(),
            updated_at,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let issued = Utc::now();
        let token = token_issued_at(issued);
        let ttl = Duration::hours(24);

        assert!(!token.is_expired_at(issued + Duration::minutes(23 * 60 + 59), ttl));
        assert!(token.is_expired_at(issued + Duration::hours(24), ttl));
        assert!(token.is_expired_at(issued + Duration::hours(25), ttl));
    }

    proptest! {
        #[test]
        fn prop_expired_iff_age_at_least_ttl(age_secs in 0i64..(3 * 24 * 3600)) {
            let issued = Utc::now();
            let token = token_issued_at(issued);
            let ttl = Duration::hours(24);

            let expired = token.is_expired_at(issued + Duration::seconds(age_secs), ttl);
            prop_assert_eq!(expired, age_secs >= 24 * 3600);
        }
    }
}
