//! Credential selection.
//!
//! [`select`] is a pure function over a credential list: it splits expired
//! credentials from still-valid ones and picks the engine-managed credential
//! with the most lifetime left.

use chrono::{DateTime, Duration, Utc};

use crate::model::CredentialRecord;

/// The credential the engine currently relies on, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveCandidate {
    /// The longest-lived credential whose name carries the managed prefix.
    Selected {
        record: CredentialRecord,
        remaining: Duration,
    },

    /// No managed, unexpired credential exists. Triggers bootstrap creation.
    NoCandidate,
}

impl ActiveCandidate {
    /// The selected record, if any.
    pub fn record(&self) -> Option<&CredentialRecord> {
        match self {
            ActiveCandidate::Selected { record, .. } => Some(record),
            ActiveCandidate::NoCandidate => None,
        }
    }
}

/// Result of partitioning a credential list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Credentials whose end time is strictly before the reference time.
    pub expired: Vec<CredentialRecord>,

    /// Every other credential, managed or not, in input order.
    pub valid: Vec<CredentialRecord>,

    /// The rotation candidate chosen among managed valid credentials.
    pub active: ActiveCandidate,
}

/// Partition `records` against `now` and choose the active candidate.
///
/// A credential is a candidate when it is not expired, has an end time, and
/// its display name starts with `display_name_prefix`. The candidate with the
/// greatest `end_time - now` wins; ties keep the first one in input order.
pub fn select(
    records: &[CredentialRecord],
    now: DateTime<Utc>,
    display_name_prefix: &str,
) -> Selection {
    let (expired, valid): (Vec<_>, Vec<_>) = records
        .iter()
        .cloned()
        .partition(|record| record.is_expired_at(now));

    let mut best: Option<(&CredentialRecord, Duration)> = None;
    for record in valid
        .iter()
        .filter(|r| r.display_name.starts_with(display_name_prefix))
    {
        let Some(remaining) = record.remaining_at(now) else {
            continue;
        };
        // strict comparison keeps the earliest record on ties
        if best.is_none_or(|(_, longest)| remaining > longest) {
            best = Some((record, remaining));
        }
    }

    let active = match best {
        Some((record, remaining)) => ActiveCandidate::Selected {
            record: record.clone(),
            remaining,
        },
        None => ActiveCandidate::NoCandidate,
    };

    Selection {
        expired,
        valid,
        active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CredentialId;

    const PREFIX: &str = "By credrotor";

    fn record(name: &str, end: Option<DateTime<Utc>>) -> CredentialRecord {
        CredentialRecord::new(CredentialId::generate(), name, None, end)
    }

    #[test]
    fn test_partition_covers_every_record() {
        let now = Utc::now();
        let records = vec![
            record("By credrotor 1", Some(now - Duration::hours(1))),
            record("By credrotor 2", Some(now + Duration::minutes(10))),
            record("manual", Some(now + Duration::days(6))),
            record("manual old", Some(now - Duration::days(1))),
            record("no end", None),
        ];

        let selection = select(&records, now, PREFIX);

        assert_eq!(selection.expired.len() + selection.valid.len(), records.len());
        assert!(selection.expired.iter().all(|r| r.is_expired_at(now)));
        assert!(selection.valid.iter().all(|r| !r.is_expired_at(now)));
        for r in &records {
            assert!(selection.expired.contains(r) || selection.valid.contains(r));
        }
    }

    #[test]
    fn test_scenario_prefers_managed_credential() {
        let now = Utc::now();
        let records = vec![
            record("By credrotor 1", Some(now - Duration::hours(1))),
            record("By credrotor 2", Some(now + Duration::minutes(10))),
            record("other", Some(now + Duration::days(6))),
        ];

        let selection = select(&records, now, PREFIX);

        assert_eq!(selection.expired, vec![records[0].clone()]);
        assert_eq!(
            selection.active,
            ActiveCandidate::Selected {
                record: records[1].clone(),
                remaining: Duration::minutes(10),
            }
        );
    }

    #[test]
    fn test_longest_remaining_wins() {
        let now = Utc::now();
        let records = vec![
            record("By credrotor 1", Some(now + Duration::hours(1))),
            record("By credrotor 3", Some(now + Duration::days(2))),
            record("By credrotor 2", Some(now + Duration::hours(5))),
        ];

        let selection = select(&records, now, PREFIX);
        let chosen = selection.active.record().unwrap();

        assert_eq!(chosen, &records[1]);
        for r in &records {
            assert!(chosen.remaining_at(now) >= r.remaining_at(now));
        }
    }

    #[test]
    fn test_ties_keep_input_order() {
        let now = Utc::now();
        let end = Some(now + Duration::hours(3));
        let records = vec![record("By credrotor a", end), record("By credrotor b", end)];

        let selection = select(&records, now, PREFIX);
        assert_eq!(selection.active.record(), Some(&records[0]));
    }

    #[test]
    fn test_empty_list_has_no_candidate() {
        let selection = select(&[], Utc::now(), PREFIX);
        assert!(selection.expired.is_empty());
        assert_eq!(selection.active, ActiveCandidate::NoCandidate);
    }

    #[test]
    fn test_only_expired_or_unmanaged_has_no_candidate() {
        let now = Utc::now();
        let records = vec![
            record("By credrotor 1", Some(now - Duration::minutes(1))),
            record("manual", Some(now + Duration::days(30))),
            record("By credrotor open", None),
        ];

        let selection = select(&records, now, PREFIX);
        assert_eq!(selection.expired.len(), 1);
        assert_eq!(selection.active, ActiveCandidate::NoCandidate);
    }

    #[test]
    fn test_credential_ending_now_is_still_valid() {
        let now = Utc::now();
        let records = vec![record("By credrotor 1", Some(now))];

        let selection = select(&records, now, PREFIX);
        assert!(selection.expired.is_empty());
        assert_eq!(
            selection.active,
            ActiveCandidate::Selected {
                record: records[0].clone(),
                remaining: Duration::zero(),
            }
        );
    }
}
