//! Coach and operations review: validation, declination, resubmission, cancel.
use super::FeeAgreementService;
use crate::agreement::{AgreementRevision, DeclinationDetails, FeeAgreement};
use crate::error::{FeeAgreementError, OperationResult, settle};
use crate::status;
use crate::store::{AfterCommit, UnitOfWork};
use crate::types::{EventType, Role, TimeStamp};
use serde_json::json;

impl FeeAgreementService {
    /// Coach or regional director sign off. Operations users are routed to
    /// [`FeeAgreementService::operations_validation`].
    pub fn coach_validation(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within_sending(tx, |uow| {
            let role = self.role_of(user_id)?;
            if role == Role::Operations {
                return self.validate_as_operations(uow, fee_agreement_id, user_id);
            }

            let mut agreement = Self::load(uow, fee_agreement_id)?;
            let event = status::coach_validation_event(&agreement);
            Self::authorize(role, event)?;
            if !agreement.is_party_leader(user_id) {
                return Err(FeeAgreementError::forbidden());
            }

            agreement.clear_declination();
            if event.sends_to_sign() {
                agreement.validated_date = Some(TimeStamp::new());
            }
            self.apply(uow, &mut agreement, event, Some(user_id), json!({}), None)?;
            Ok(agreement)
        }))
    }

    pub fn coach_declination(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        declined_fields: &[String],
        declination_notes: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within(tx, |uow| {
            let role = self.role_of(user_id)?;
            Self::authorize(role, EventType::DeclinedByCoach)?;
            let mut agreement = Self::load(uow, fee_agreement_id)?;
            if !agreement.is_party_leader(user_id) {
                return Err(FeeAgreementError::forbidden());
            }

            self.decline(
                uow,
                &mut agreement,
                EventType::DeclinedByCoach,
                user_id,
                declined_fields,
                declination_notes,
            )?;
            Ok(agreement)
        }))
    }

    /// Creator resubmits the declined fields to the coach.
    pub fn send_to_coach_validation(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        revision: &AgreementRevision,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within(tx, |uow| {
            self.resubmit(
                uow,
                fee_agreement_id,
                user_id,
                revision,
                EventType::SentToCoachValidationAfterDeclination,
            )
        }))
    }

    pub fn operations_validation(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within_sending(tx, |uow| {
            self.validate_as_operations(uow, fee_agreement_id, user_id)
        }))
    }

    pub fn operations_declination(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        declined_fields: &[String],
        declination_notes: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within(tx, |uow| {
            let role = self.role_of(user_id)?;
            Self::authorize(role, EventType::DeclinedByOperations)?;
            let mut agreement = Self::load(uow, fee_agreement_id)?;
            agreement.operations_validator_id = Some(user_id.to_string());

            self.decline(
                uow,
                &mut agreement,
                EventType::DeclinedByOperations,
                user_id,
                declined_fields,
                declination_notes,
            )?;
            Ok(agreement)
        }))
    }

    /// Creator resubmits the declined fields to operations.
    pub fn send_to_operations_validation(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        revision: &AgreementRevision,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within(tx, |uow| {
            self.resubmit(
                uow,
                fee_agreement_id,
                user_id,
                revision,
                EventType::SentToOperationsValidationAfterDeclination,
            )
        }))
    }

    /// Withdraws an agreement that has not been sent out yet.
    pub fn cancel_validation_request(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within(tx, |uow| {
            let role = self.role_of(user_id)?;
            Self::authorize(role, EventType::ValidationRequestCanceled)?;
            let mut agreement = Self::load(uow, fee_agreement_id)?;
            if agreement.creator_id != user_id && !agreement.is_party_leader(user_id) {
                return Err(FeeAgreementError::forbidden());
            }

            let details = json!({ "previous_status": format!("{:?}", agreement.status) });
            self.apply(
                uow,
                &mut agreement,
                EventType::ValidationRequestCanceled,
                Some(user_id),
                details,
                None,
            )?;
            uow.after_commit(AfterCommit::UnlinkFeeAgreement(agreement.id.clone()));
            Ok(agreement)
        }))
    }

    fn validate_as_operations(
        &self,
        uow: &mut UnitOfWork,
        fee_agreement_id: &str,
        user_id: &str,
    ) -> Result<FeeAgreement, FeeAgreementError> {
        let role = self.role_of(user_id)?;
        let mut agreement = Self::load(uow, fee_agreement_id)?;
        let event = if agreement.is_unmanaged() {
            EventType::UnmanagedValidatedByOperations
        } else {
            EventType::ValidatedByOperationsAndSentToSign
        };
        Self::authorize(role, event)?;

        agreement.operations_validator_id = Some(user_id.to_string());
        agreement.clear_declination();
        if agreement.is_unmanaged() {
            // signed outside the system, the imported date becomes the signature date
            let signed = agreement.hiring_authority_sign_date;
            agreement.production_director_signed_date = signed;
            agreement.signed_date = signed;
            agreement.tracking_signed_date = signed.map(|date| date.next_business_day());
        } else {
            agreement.validated_date = Some(TimeStamp::new());
        }

        self.apply(uow, &mut agreement, event, Some(user_id), json!({}), None)?;
        if agreement.is_unmanaged() {
            uow.after_commit(AfterCommit::MarkAgreementDiscussed(agreement.id.clone()));
        }
        Ok(agreement)
    }

    /// Records a reviewer's declination. Nothing is staged when the declined
    /// fields or notes are invalid.
    fn decline(
        &self,
        uow: &mut UnitOfWork,
        agreement: &mut FeeAgreement,
        event: EventType,
        user_id: &str,
        declined_fields: &[String],
        declination_notes: &str,
    ) -> Result<(), FeeAgreementError> {
        let details =
            DeclinationDetails::validate(agreement.payment_scheme, declined_fields, declination_notes)?;
        let log_details = json!({
            "declined_fields": details
                .declined_fields
                .iter()
                .map(|field| field.as_str())
                .collect::<Vec<_>>(),
            "declination_notes": details.declination_notes,
        });

        agreement.current_declinator_id = Some(user_id.to_string());
        agreement.declination_details = Some(details);
        self.apply(uow, agreement, event, Some(user_id), log_details, None)
    }

    fn resubmit(
        &self,
        uow: &mut UnitOfWork,
        fee_agreement_id: &str,
        user_id: &str,
        revision: &AgreementRevision,
        event: EventType,
    ) -> Result<FeeAgreement, FeeAgreementError> {
        let role = self.role_of(user_id)?;
        Self::authorize(role, event)?;
        let mut agreement = Self::load(uow, fee_agreement_id)?;
        if agreement.creator_id != user_id {
            return Err(FeeAgreementError::forbidden());
        }
        Self::ensure_transition(&agreement, event)?;

        let declined: Vec<&str> = agreement
            .declined_fields()
            .iter()
            .map(|field| field.as_str())
            .collect();
        let log_details = json!({ "revised_fields": declined });

        agreement.apply_revision(revision);
        let floor = agreement.fee_floor(self.settings.minimum_fee_percentage);
        agreement.terms().validate(agreement.payment_scheme, floor)?;
        agreement.clear_declination();

        self.apply(uow, &mut agreement, event, Some(user_id), log_details, None)?;
        Ok(agreement)
    }
}
