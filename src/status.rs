//! Pure status calculation. Every status change in the crate goes through
//! [`calculate_status`]; nothing here performs I/O.
use super::agreement::{FeeAgreement, Terms};
use super::types::{
    DeclinableField, EventType, FeeAgreementStatus, Party, PaymentScheme, Responsible, Role,
};

use super::types::EventType as E;
use super::types::FeeAgreementStatus as S;

/// Next status for `event` applied to `current`, or `None` when the transition is
/// not part of the lifecycle. Creation events are only valid without a current status.
pub fn calculate_status(current: Option<S>, event: EventType) -> Option<S> {
    let Some(current) = current else {
        return match event {
            E::CreatedAndSentToCoachValidation => Some(S::PendingCoachValidation),
            E::CreatedAndSentToOperationsValidation => Some(S::PendingOperationsValidation),
            E::CreatedAndSentToSign => Some(S::PendingHiringAuthoritySignature),
            E::CreatedUnmanagedAndSentToOperationsValidation => {
                Some(S::PendingOperationsValidation)
            }
            E::CreatedUnmanagedSigned => Some(S::Signed),
            _ => None,
        };
    };

    match (current, event) {
        (S::PendingCoachValidation, E::ValidatedByCoach) => Some(S::PendingOperationsValidation),
        (S::PendingCoachValidation, E::ValidatedByCoachAndSentToSign) => {
            Some(S::PendingHiringAuthoritySignature)
        }
        (S::PendingCoachValidation, E::DeclinedByCoach) => Some(S::PendingCoachDeclinationUpdate),
        (S::PendingCoachDeclinationUpdate, E::SentToCoachValidationAfterDeclination) => {
            Some(S::PendingCoachValidation)
        }

        (S::PendingOperationsValidation, E::ValidatedByOperationsAndSentToSign) => {
            Some(S::PendingHiringAuthoritySignature)
        }
        (S::PendingOperationsValidation, E::UnmanagedValidatedByOperations) => Some(S::Signed),
        (S::PendingOperationsValidation, E::DeclinedByOperations) => {
            Some(S::PendingOperationsDeclinationUpdate)
        }
        (S::PendingOperationsDeclinationUpdate, E::SentToOperationsValidationAfterDeclination) => {
            Some(S::PendingOperationsValidation)
        }

        // the provider reported a request this side has not recorded yet
        (S::PendingCoachValidation | S::PendingOperationsValidation, E::SignatureRequestSentReconciled) => {
            Some(S::PendingHiringAuthoritySignature)
        }

        (S::PendingHiringAuthoritySignature, E::SignedByHiringAuthority) => {
            Some(S::PendingProductionDirectorSignature)
        }
        (S::PendingProductionDirectorSignature, E::SignedByProductionDirector) => Some(S::Signed),

        (
            S::PendingHiringAuthoritySignature | S::PendingProductionDirectorSignature,
            E::ViewedByHiringAuthority
            | E::ViewedByProductionDirector
            | E::SignatureEmailBounced
            | E::ReminderDeliveredByProvider
            | E::ReminderSent,
        ) => Some(current),
        (
            S::PendingHiringAuthoritySignature,
            E::ResentThroughDocuSign
            | E::HiringAuthorityEmailUpdated
            | E::ValidationRecordedAfterSent,
        ) => Some(current),

        (
            S::PendingHiringAuthoritySignature | S::PendingProductionDirectorSignature,
            E::ContractVoided,
        ) => Some(S::Void),
        (status, E::ValidationRequestCanceled) if status.is_validation_stage() => Some(S::Canceled),
        // only a request that went out can lapse, restore re-sends it as validated
        (status, E::Expired) if status.is_awaiting_signature() => Some(S::Expired),
        (S::Expired, E::RestoredFromExpiredAndSentToSign) => {
            Some(S::PendingHiringAuthoritySignature)
        }

        _ => None,
    }
}

/// Agreements on a non-standard scheme, or asking for non-default terms, need an
/// operations review after the coach.
pub fn requires_operations_validation(scheme: PaymentScheme, terms: &Terms) -> bool {
    scheme != PaymentScheme::Standard
        || terms.fee_percentage_change_requested
        || terms.guarantee_days_change_requested
        || terms.verbiage_changes_requested
}

/// Initial status and creation event for a managed agreement created by `role`.
pub fn initial_status_and_event(
    role: Role,
    scheme: PaymentScheme,
    terms: &Terms,
) -> (FeeAgreementStatus, EventType) {
    let event = match role {
        Role::Recruiter => E::CreatedAndSentToCoachValidation,
        Role::Coach | Role::RegionalDirector => {
            if requires_operations_validation(scheme, terms) {
                E::CreatedAndSentToOperationsValidation
            } else {
                E::CreatedAndSentToSign
            }
        }
        // operations acts as its own validator
        Role::Operations => E::CreatedAndSentToSign,
    };
    let status = calculate_status(None, event).unwrap_or(S::PendingCoachValidation);

    (status, event)
}

/// Initial status and creation event for an agreement signed outside the system.
pub fn initial_unmanaged_status_and_event(role: Role) -> (FeeAgreementStatus, EventType) {
    let event = match role {
        Role::Operations => E::CreatedUnmanagedSigned,
        _ => E::CreatedUnmanagedAndSentToOperationsValidation,
    };
    let status = calculate_status(None, event).unwrap_or(S::PendingOperationsValidation);

    (status, event)
}

/// Event recorded when the coach (or regional director) signs off.
pub fn coach_validation_event(agreement: &FeeAgreement) -> EventType {
    if requires_operations_validation(agreement.payment_scheme, &agreement.terms()) {
        E::ValidatedByCoach
    } else {
        E::ValidatedByCoachAndSentToSign
    }
}

/// Who is expected to act next. Derived only from the status and the agreement's parties.
pub fn current_responsible(status: FeeAgreementStatus, agreement: &FeeAgreement) -> Option<Responsible> {
    let responsible = |party, user_id: Option<&String>| Responsible {
        party,
        user_id: user_id.cloned(),
    };

    match status {
        S::PendingCoachValidation => Some(match &agreement.coach_id {
            Some(coach) => responsible(Party::Coach, Some(coach)),
            None => responsible(Party::RegionalDirector, agreement.regional_director_id.as_ref()),
        }),
        S::PendingOperationsValidation => Some(responsible(
            Party::Operations,
            agreement.operations_validator_id.as_ref(),
        )),
        S::PendingCoachDeclinationUpdate | S::PendingOperationsDeclinationUpdate => {
            Some(responsible(Party::Creator, Some(&agreement.creator_id)))
        }
        S::PendingHiringAuthoritySignature => Some(responsible(
            Party::HiringAuthority,
            Some(&agreement.hiring_authority_id),
        )),
        S::PendingProductionDirectorSignature => Some(responsible(
            Party::ProductionDirector,
            Some(&agreement.production_director_signer_id),
        )),
        S::Signed | S::Canceled | S::Void | S::Expired => None,
    }
}

/// Which user-triggered events each role may raise. Provider and system events
/// are never raised through this table.
pub fn role_can_trigger(role: Role, event: EventType) -> bool {
    match role {
        Role::Recruiter => matches!(
            event,
            E::CreatedAndSentToCoachValidation
                | E::CreatedUnmanagedAndSentToOperationsValidation
                | E::SentToCoachValidationAfterDeclination
                | E::SentToOperationsValidationAfterDeclination
                | E::ValidationRequestCanceled
                | E::ReminderSent
                | E::ResentThroughDocuSign
                | E::HiringAuthorityEmailUpdated
        ),
        Role::Coach | Role::RegionalDirector => matches!(
            event,
            E::CreatedAndSentToOperationsValidation
                | E::CreatedAndSentToSign
                | E::CreatedUnmanagedAndSentToOperationsValidation
                | E::ValidatedByCoach
                | E::ValidatedByCoachAndSentToSign
                | E::DeclinedByCoach
                | E::SentToCoachValidationAfterDeclination
                | E::SentToOperationsValidationAfterDeclination
                | E::ValidationRequestCanceled
                | E::ReminderSent
                | E::ResentThroughDocuSign
                | E::HiringAuthorityEmailUpdated
        ),
        Role::Operations => matches!(
            event,
            E::CreatedAndSentToSign
                | E::CreatedUnmanagedSigned
                | E::ValidatedByOperationsAndSentToSign
                | E::UnmanagedValidatedByOperations
                | E::DeclinedByOperations
                | E::ContractVoided
                | E::RestoredFromExpiredAndSentToSign
                | E::ReminderSent
                | E::ResentThroughDocuSign
                | E::HiringAuthorityEmailUpdated
        ),
    }
}

pub fn declinable_fields(scheme: PaymentScheme) -> &'static [DeclinableField] {
    use DeclinableField as F;
    match scheme {
        PaymentScheme::Standard | PaymentScheme::BaseSalary => {
            &[F::FeePercentage, F::GuaranteeDays, F::VerbiageChanges]
        }
        PaymentScheme::Flat => &[F::FlatFeeAmount, F::GuaranteeDays, F::VerbiageChanges],
        PaymentScheme::Conversion => &[F::FeePercentage, F::VerbiageChanges],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{FeeAgreement, Parties};
    use crate::types::SignatureProcessType;

    const ALL_STATUSES: [S; 10] = [
        S::PendingCoachValidation,
        S::PendingOperationsValidation,
        S::PendingCoachDeclinationUpdate,
        S::PendingOperationsDeclinationUpdate,
        S::PendingHiringAuthoritySignature,
        S::PendingProductionDirectorSignature,
        S::Signed,
        S::Canceled,
        S::Void,
        S::Expired,
    ];

    fn agreement(coach: Option<&str>) -> FeeAgreement {
        FeeAgreement::open(
            "fee1".into(),
            PaymentScheme::Standard,
            Parties {
                creator_id: "recruiter".into(),
                hiring_authority_id: "ha".into(),
                coach_id: coach.map(str::to_string),
                regional_director_id: Some("rd".into()),
                production_director_signer_id: "pd".into(),
                ..Parties::default()
            },
            Terms {
                fee_percentage: Some(20.0),
                guarantee_days: 30,
                ..Terms::default()
            },
            SignatureProcessType::FortPacManaged,
            S::PendingCoachValidation,
        )
    }

    #[test]
    fn happy_path_triples() {
        let triples = [
            (None, E::CreatedAndSentToCoachValidation, S::PendingCoachValidation),
            (
                Some(S::PendingCoachValidation),
                E::ValidatedByCoachAndSentToSign,
                S::PendingHiringAuthoritySignature,
            ),
            (
                Some(S::PendingHiringAuthoritySignature),
                E::SignedByHiringAuthority,
                S::PendingProductionDirectorSignature,
            ),
            (
                Some(S::PendingProductionDirectorSignature),
                E::SignedByProductionDirector,
                S::Signed,
            ),
        ];

        for (from, event, to) in triples {
            assert_eq!(calculate_status(from, event), Some(to), "{from:?} + {event:?}");
        }
    }

    #[test]
    fn declination_loops_back_to_validation() {
        assert_eq!(
            calculate_status(Some(S::PendingCoachValidation), E::DeclinedByCoach),
            Some(S::PendingCoachDeclinationUpdate)
        );
        assert_eq!(
            calculate_status(
                Some(S::PendingCoachDeclinationUpdate),
                E::SentToCoachValidationAfterDeclination
            ),
            Some(S::PendingCoachValidation)
        );
        assert_eq!(
            calculate_status(Some(S::PendingOperationsValidation), E::DeclinedByOperations),
            Some(S::PendingOperationsDeclinationUpdate)
        );
    }

    #[test]
    fn terminal_statuses_only_allow_restore_from_expired() {
        for status in ALL_STATUSES.into_iter().filter(S::is_terminal) {
            for event in [
                E::ValidatedByCoachAndSentToSign,
                E::ValidatedByOperationsAndSentToSign,
                E::SignedByHiringAuthority,
                E::ContractVoided,
                E::Expired,
                E::ValidationRequestCanceled,
                E::SignatureRequestSentReconciled,
            ] {
                assert_eq!(calculate_status(Some(status), event), None, "{status:?} + {event:?}");
            }
        }
        assert_eq!(
            calculate_status(Some(S::Expired), E::RestoredFromExpiredAndSentToSign),
            Some(S::PendingHiringAuthoritySignature)
        );
        assert_eq!(calculate_status(Some(S::Void), E::RestoredFromExpiredAndSentToSign), None);
    }

    #[test]
    fn only_requests_out_for_signature_expire() {
        for status in ALL_STATUSES {
            let expected = status.is_awaiting_signature().then_some(S::Expired);
            assert_eq!(calculate_status(Some(status), E::Expired), expected, "{status:?}");
        }
    }

    #[test]
    fn creation_events_need_an_empty_status() {
        for status in ALL_STATUSES {
            assert_eq!(calculate_status(Some(status), E::CreatedAndSentToSign), None);
        }
        assert_eq!(calculate_status(None, E::ValidatedByCoach), None);
    }

    #[test]
    fn log_only_events_keep_status() {
        for event in [E::ViewedByHiringAuthority, E::SignatureEmailBounced, E::ReminderSent] {
            assert_eq!(
                calculate_status(Some(S::PendingProductionDirectorSignature), event),
                Some(S::PendingProductionDirectorSignature)
            );
            assert!(event.is_log_only());
        }
    }

    #[test]
    fn sent_reconciliation_only_from_pre_signature_validation() {
        assert_eq!(
            calculate_status(Some(S::PendingOperationsValidation), E::SignatureRequestSentReconciled),
            Some(S::PendingHiringAuthoritySignature)
        );
        assert_eq!(
            calculate_status(
                Some(S::PendingHiringAuthoritySignature),
                E::SignatureRequestSentReconciled
            ),
            None
        );
    }

    #[test]
    fn initial_status_by_role() {
        let plain = Terms {
            fee_percentage: Some(20.0),
            ..Terms::default()
        };
        let changed = Terms {
            guarantee_days_change_requested: true,
            ..plain.clone()
        };

        assert_eq!(
            initial_status_and_event(Role::Recruiter, PaymentScheme::Standard, &plain),
            (S::PendingCoachValidation, E::CreatedAndSentToCoachValidation)
        );
        assert_eq!(
            initial_status_and_event(Role::Coach, PaymentScheme::Standard, &plain),
            (S::PendingHiringAuthoritySignature, E::CreatedAndSentToSign)
        );
        assert_eq!(
            initial_status_and_event(Role::RegionalDirector, PaymentScheme::Standard, &changed),
            (S::PendingOperationsValidation, E::CreatedAndSentToOperationsValidation)
        );
        assert_eq!(
            initial_status_and_event(Role::Coach, PaymentScheme::Conversion, &plain),
            (S::PendingOperationsValidation, E::CreatedAndSentToOperationsValidation)
        );
        assert_eq!(
            initial_status_and_event(Role::Operations, PaymentScheme::Flat, &plain),
            (S::PendingHiringAuthoritySignature, E::CreatedAndSentToSign)
        );
    }

    #[test]
    fn regional_director_covers_missing_coach() {
        let responsible = current_responsible(S::PendingCoachValidation, &agreement(None)).unwrap();
        assert_eq!(responsible.party, Party::RegionalDirector);
        assert_eq!(responsible.user_id.as_deref(), Some("rd"));

        let responsible =
            current_responsible(S::PendingCoachValidation, &agreement(Some("coach"))).unwrap();
        assert_eq!(responsible.party, Party::Coach);
    }

    #[test]
    fn nobody_is_responsible_for_terminal_agreements() {
        let agreement = agreement(Some("coach"));
        for status in ALL_STATUSES.into_iter().filter(S::is_terminal) {
            assert_eq!(current_responsible(status, &agreement), None);
        }
    }

    #[test]
    fn role_table() {
        assert!(role_can_trigger(Role::Coach, E::DeclinedByCoach));
        assert!(!role_can_trigger(Role::Recruiter, E::DeclinedByCoach));
        assert!(!role_can_trigger(Role::Coach, E::ContractVoided));
        assert!(role_can_trigger(Role::Operations, E::ContractVoided));
        assert!(!role_can_trigger(Role::Operations, E::ValidatedByCoach));
    }

    #[test]
    fn declinable_sets_are_distinct() {
        assert_ne!(
            declinable_fields(PaymentScheme::Standard),
            declinable_fields(PaymentScheme::Flat)
        );
        assert_ne!(
            declinable_fields(PaymentScheme::Flat),
            declinable_fields(PaymentScheme::Conversion)
        );
        assert_eq!(
            declinable_fields(PaymentScheme::Standard),
            declinable_fields(PaymentScheme::BaseSalary)
        );
    }
}
