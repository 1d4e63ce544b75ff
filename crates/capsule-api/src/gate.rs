//! Unlock gate: decides whether a requester may read a capsule and performs
//! the lazy `unlocked` transition.
//!
//! The owner may always read. Anyone else may read once `now >= unlock_at`.
//! The first read at or after `unlock_at` (owner or not) flips the stored flag
//! through an atomic compare-and-set, so concurrent first reads are harmless:
//! at most one of them changes the row and all of them report `unlocked`.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use capsule_db::Database;
use capsule_types::models::Capsule;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// `unlock_due` is set when the unlock time has passed but the stored
    /// flag is still false.
    Allow { unlock_due: bool },
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("capsule not found")]
    NotFound,
    #[error("capsule is locked")]
    Locked,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::NotFound => ApiError::NotFound("Time Capsule"),
            GateError::Locked => ApiError::Locked,
            GateError::Store(e) => ApiError::Internal(e),
        }
    }
}

/// Pure access decision for `requester` reading `capsule` at `now`.
pub fn authorize(requester: Uuid, capsule: &Capsule, now: DateTime<Utc>) -> Decision {
    let time_reached = capsule.unlock_time_reached(now);

    if !capsule.is_owned_by(requester) && !time_reached {
        return Decision::Deny(DenyReason::Locked);
    }

    Decision::Allow {
        unlock_due: time_reached && !capsule.unlocked,
    }
}

/// Load a capsule through the gate.
///
/// Persisting the unlock flag is best-effort: a failed write is logged and
/// the content is still returned, since the decision has already been made.
pub fn open(
    db: &Database,
    requester: Uuid,
    capsule_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Capsule, GateError> {
    let mut capsule = db.get_capsule(capsule_id)?.ok_or(GateError::NotFound)?;

    match authorize(requester, &capsule, now) {
        Decision::Deny(DenyReason::Locked) => {
            debug!("Capsule {} is locked for {} until {}", capsule.id, requester, capsule.unlock_at);
            Err(GateError::Locked)
        }
        Decision::Allow { unlock_due } => {
            if unlock_due {
                match db.mark_unlocked(capsule.id, now) {
                    Ok(true) => info!("Capsule {} unlocked", capsule.id),
                    // Another request flipped it first
                    Ok(false) => {}
                    Err(e) => warn!("Failed to persist unlock of capsule {}: {:#}", capsule.id, e),
                }
                capsule.unlocked = true;
            }
            Ok(capsule)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};

    fn capsule(owner_id: Uuid, unlock_at: DateTime<Utc>) -> Capsule {
        Capsule {
            id: Uuid::new_v4(),
            owner_id,
            title: "to future me".into(),
            message: Some("hi".into()),
            files: vec![],
            unlock_at,
            created_at: unlock_at - Duration::days(365),
            unlocked: false,
        }
    }

    /// Offsets around the unlock instant, from a year before to a year after.
    fn offsets() -> Vec<Duration> {
        vec![
            Duration::days(-365),
            Duration::hours(-1),
            Duration::milliseconds(-1),
            Duration::zero(),
            Duration::milliseconds(1),
            Duration::hours(1),
            Duration::days(365),
        ]
    }

    #[test]
    fn owner_is_always_allowed() {
        let owner = Uuid::new_v4();
        let unlock_at = Utc::now();
        let c = capsule(owner, unlock_at);

        for offset in offsets() {
            assert!(authorize(owner, &c, unlock_at + offset).is_allowed(), "offset {offset}");
        }
    }

    #[test]
    fn non_owner_allowed_iff_unlock_time_reached() {
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let unlock_at = Utc::now();
        let c = capsule(owner, unlock_at);

        for offset in offsets() {
            let now = unlock_at + offset;
            assert_eq!(
                authorize(stranger, &c, now).is_allowed(),
                now >= unlock_at,
                "offset {offset}"
            );
        }
    }

    #[test]
    fn locked_capsule_denies_with_reason() {
        let c = capsule(Uuid::new_v4(), Utc::now() + Duration::hours(1));
        assert_eq!(
            authorize(Uuid::new_v4(), &c, Utc::now()),
            Decision::Deny(DenyReason::Locked)
        );
    }

    #[test]
    fn unlock_due_only_when_time_reached_and_flag_unset() {
        let owner = Uuid::new_v4();
        let unlock_at = Utc::now();
        let mut c = capsule(owner, unlock_at);

        // Owner before unlock time: allowed, nothing to flip
        assert_eq!(
            authorize(owner, &c, unlock_at - Duration::hours(1)),
            Decision::Allow { unlock_due: false }
        );
        // Owner after unlock time also triggers the transition
        assert_eq!(
            authorize(owner, &c, unlock_at + Duration::hours(1)),
            Decision::Allow { unlock_due: true }
        );

        c.unlocked = true;
        assert_eq!(
            authorize(Uuid::new_v4(), &c, unlock_at + Duration::hours(1)),
            Decision::Allow { unlock_due: false }
        );
    }

    fn stored(db: &Database, unlock_in: Duration) -> (Uuid, Capsule) {
        let owner = Uuid::new_v4();
        db.create_user(&owner.to_string(), &format!("u{}", owner.simple()), &format!("{}@example.com", owner.simple()), "hash", Utc::now())
            .unwrap();
        let c = capsule(owner, Utc::now().trunc_subsecs(3) + unlock_in);
        db.insert_capsule(&c).unwrap();
        (owner, c)
    }

    #[test]
    fn open_missing_capsule() {
        let db = Database::open_in_memory().unwrap();
        let err = open(&db, Uuid::new_v4(), Uuid::new_v4(), Utc::now()).unwrap_err();
        assert!(matches!(err, GateError::NotFound));
    }

    #[test]
    fn open_locked_capsule_as_stranger() {
        let db = Database::open_in_memory().unwrap();
        let (_, c) = stored(&db, Duration::hours(1));

        let err = open(&db, Uuid::new_v4(), c.id, Utc::now()).unwrap_err();
        assert!(matches!(err, GateError::Locked));
        assert!(!db.get_capsule(c.id).unwrap().unwrap().unlocked);
    }

    #[test]
    fn open_locked_capsule_as_owner_leaves_flag_unset() {
        let db = Database::open_in_memory().unwrap();
        let (owner, c) = stored(&db, Duration::hours(1));

        let opened = open(&db, owner, c.id, Utc::now()).unwrap();
        assert_eq!(opened.message, c.message);
        assert!(!opened.unlocked);
        assert!(!db.get_capsule(c.id).unwrap().unwrap().unlocked);
    }

    #[test]
    fn open_past_capsule_unlocks_once_and_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let (_, c) = stored(&db, Duration::hours(-1));
        let stranger = Uuid::new_v4();

        let first = open(&db, stranger, c.id, Utc::now()).unwrap();
        assert!(first.unlocked);
        assert!(db.get_capsule(c.id).unwrap().unwrap().unlocked);

        let second = open(&db, stranger, c.id, Utc::now()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn failed_unlock_write_still_returns_content() {
        let db = Database::open_in_memory().unwrap();
        let (_, c) = stored(&db, Duration::hours(-1));
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER refuse_unlock BEFORE UPDATE ON capsules
                 BEGIN SELECT RAISE(ABORT, 'read-only'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        let opened = open(&db, Uuid::new_v4(), c.id, Utc::now()).unwrap();
        assert!(opened.unlocked);
        assert_eq!(opened.message, c.message);
        assert!(!db.get_capsule(c.id).unwrap().unwrap().unlocked);
    }
}
