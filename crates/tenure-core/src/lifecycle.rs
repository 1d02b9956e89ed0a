//! Lifecycle classification and the recompute step that runs before every save

use chrono::{DateTime, Utc};
use tenure_api::{
    EntitlementState, EntitlementView, GRANT_EVALUATION_MODE, GrantState, GrantView,
    TimeRemaining,
};
use tenure_store::{Entitlement, Grant};

use crate::{ExpiryError, expiry, remaining};

/// Classify an entitlement. Expired once `now` reaches the expiry instant;
/// near expiry while at most `near_expiry_days` whole days remain.
pub fn classify_entitlement(
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    near_expiry_days: u32,
) -> EntitlementState {
    if now >= expires_at {
        return EntitlementState::Expired;
    }

    if remaining(expires_at, now).days <= near_expiry_days as i64 {
        EntitlementState::NearExpiry
    } else {
        EntitlementState::Active
    }
}

/// Classify a grant. A cleared flag wins over elapsed time.
pub fn classify_grant(active: bool, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> GrantState {
    if !active {
        GrantState::Inactive
    } else if now >= expires_at {
        GrantState::Expired
    } else {
        GrantState::Admissible
    }
}

pub fn grant_expiry(grant: &Grant) -> Result<DateTime<Utc>, ExpiryError> {
    expiry(grant.anchor, &grant.duration, GRANT_EVALUATION_MODE)
}

pub fn entitlement_expiry(entitlement: &Entitlement) -> Result<DateTime<Utc>, ExpiryError> {
    expiry(
        entitlement.anchor,
        &entitlement.duration,
        entitlement.kind.evaluation_mode(),
    )
}

/// Point-in-time evaluation of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantEvaluation {
    pub expires_at: DateTime<Utc>,
    pub state: GrantState,
    pub remaining: TimeRemaining,
}

pub fn evaluate_grant(grant: &Grant, now: DateTime<Utc>) -> Result<GrantEvaluation, ExpiryError> {
    let expires_at = grant_expiry(grant)?;
    Ok(GrantEvaluation {
        expires_at,
        state: classify_grant(grant.active, now, expires_at),
        remaining: remaining(expires_at, now),
    })
}

/// Refresh the derived fields of an entitlement. Alert flags are left
/// alone. Returns whether anything changed.
pub fn recompute_entitlement(
    entitlement: &mut Entitlement,
    now: DateTime<Utc>,
    near_expiry_days: u32,
) -> Result<bool, ExpiryError> {
    let expires_at = entitlement_expiry(entitlement)?;
    let remaining_days = remaining(expires_at, now).days;
    let state = classify_entitlement(now, expires_at, near_expiry_days);

    let changed = entitlement.expires_at != expires_at
        || entitlement.remaining_days != remaining_days
        || entitlement.state != state;

    entitlement.expires_at = expires_at;
    entitlement.remaining_days = remaining_days;
    entitlement.state = state;

    Ok(changed)
}

pub fn grant_view(grant: &Grant, now: DateTime<Utc>) -> Result<GrantView, ExpiryError> {
    let evaluation = evaluate_grant(grant, now)?;
    Ok(GrantView {
        id: grant.id,
        identifier: grant.identifier.clone(),
        owner: grant.owner.clone(),
        anchor: grant.anchor,
        duration: grant.duration,
        expires_at: evaluation.expires_at,
        active: grant.active,
        state: evaluation.state,
        remaining: evaluation.remaining,
        last_validated_at: grant.last_validated_at,
        note: grant.note.clone(),
    })
}

pub fn entitlement_view(entitlement: &Entitlement) -> EntitlementView {
    EntitlementView {
        id: entitlement.id,
        kind: entitlement.kind,
        reference: entitlement.reference.clone(),
        label: entitlement.label.clone(),
        anchor: entitlement.anchor,
        duration: entitlement.duration,
        expires_at: entitlement.expires_at,
        remaining_days: entitlement.remaining_days,
        state: entitlement.state,
        alerts_sent: entitlement.alerts_sent.iter().copied().collect(),
        recipients: entitlement.recipients(),
        active: entitlement.active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tenure_api::EntitlementKind;
    use tenure_util::{DurationSpec, MacAddress};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn entitlement_states() {
        let expires = at(2025, 3, 1, 0);
        assert_eq!(classify_entitlement(at(2025, 1, 1, 0), expires, 30), EntitlementState::Active);
        // exactly 30 days out
        assert_eq!(classify_entitlement(at(2025, 1, 30, 0), expires, 30), EntitlementState::NearExpiry);
        // 30 days and some hours still count as 30 whole days
        assert_eq!(classify_entitlement(at(2025, 1, 29, 12), expires, 30), EntitlementState::NearExpiry);
        assert_eq!(classify_entitlement(at(2025, 1, 29, 0), expires, 30), EntitlementState::Active);
        // hours left, zero whole days
        assert_eq!(classify_entitlement(at(2025, 2, 28, 12), expires, 30), EntitlementState::NearExpiry);
        assert_eq!(classify_entitlement(expires, expires, 30), EntitlementState::Expired);
        assert_eq!(classify_entitlement(at(2025, 4, 1, 0), expires, 30), EntitlementState::Expired);
    }

    #[test]
    fn grant_states() {
        let expires = at(2025, 1, 1, 10);
        assert_eq!(classify_grant(true, at(2025, 1, 1, 9), expires), GrantState::Admissible);
        assert_eq!(classify_grant(true, at(2025, 1, 1, 11), expires), GrantState::Expired);
        assert_eq!(classify_grant(true, expires, expires), GrantState::Expired);
        assert_eq!(classify_grant(false, at(2025, 1, 1, 9), expires), GrantState::Inactive);
        assert_eq!(classify_grant(false, at(2025, 1, 1, 11), expires), GrantState::Inactive);
    }

    #[test]
    fn grant_evaluated_in_fixed_mode() {
        let grant = Grant::new(
            MacAddress::parse("AA-BB-CC-DD-EE-FF").unwrap(),
            "ACME",
            at(2025, 1, 31, 0),
            DurationSpec::parse("1 mes").unwrap(),
        );
        let evaluation = evaluate_grant(&grant, at(2025, 2, 1, 0)).unwrap();
        assert_eq!(evaluation.expires_at, at(2025, 3, 2, 0));
        assert_eq!(evaluation.state, GrantState::Admissible);
        assert_eq!(evaluation.remaining.days, 29);
    }

    #[test]
    fn recompute_reports_changes_and_keeps_flags() {
        let mut entitlement = Entitlement::new(
            EntitlementKind::Certificate,
            "C-1",
            "Firma",
            at(2025, 1, 31, 0),
            DurationSpec::parse("1 mes").unwrap(),
        );
        entitlement.alerts_sent.insert(30);

        let now = at(2025, 2, 1, 6);
        assert!(recompute_entitlement(&mut entitlement, now, 30).unwrap());
        assert_eq!(entitlement.expires_at, at(2025, 2, 28, 0));
        assert_eq!(entitlement.remaining_days, 26);
        assert_eq!(entitlement.state, EntitlementState::NearExpiry);
        assert!(entitlement.alerts_sent.contains(&30));

        // Same instant, nothing to do
        assert!(!recompute_entitlement(&mut entitlement, now, 30).unwrap());

        // Hours later the whole-day count is unchanged
        assert!(!recompute_entitlement(&mut entitlement, at(2025, 2, 1, 12), 30).unwrap());

        assert!(recompute_entitlement(&mut entitlement, at(2025, 3, 1, 0), 30).unwrap());
        assert_eq!(entitlement.state, EntitlementState::Expired);
        assert_eq!(entitlement.remaining_days, -1);
    }
}
