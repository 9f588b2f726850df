//! Operator and system actions on agreements that are out for signature.
use super::FeeAgreementService;
use crate::agreement::FeeAgreement;
use crate::contract::SignerRole;
use crate::error::{FeeAgreementError, OperationResult, ValidationError, settle, settle_or_raise};
use crate::store::{AfterCommit, UnitOfWork};
use crate::types::{EventType, FeeAgreementStatus, SignatureProvider, TimeStamp};
use crate::utils::is_plausible_email;
use chrono::Duration;
use serde_json::json;

impl FeeAgreementService {
    /// Voids the upstream contract and closes the agreement. Operations only.
    pub fn void_contract(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within(tx, |uow| {
            let role = self.role_of(user_id)?;
            Self::authorize(role, EventType::ContractVoided)?;
            let mut agreement = Self::load(uow, fee_agreement_id)?;
            Self::ensure_transition(&agreement, EventType::ContractVoided)?;

            if let (Some(provider), Some(contract_id)) =
                (agreement.electronic_signature_provider, agreement.contract_id.as_deref())
            {
                self.contracts.void_contract(provider, contract_id)?;
            }

            let details = json!({ "contract_id": agreement.contract_id });
            self.apply(uow, &mut agreement, EventType::ContractVoided, Some(user_id), details, None)?;
            uow.after_commit(AfterCommit::UnlinkFeeAgreement(agreement.id.clone()));
            Ok(agreement)
        }))
    }

    /// System triggered expiry of a request out for signature. Voids the
    /// upstream contract.
    pub fn expire_fee_agreement(
        &self,
        fee_agreement_id: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within(tx, |uow| {
            let mut agreement = Self::load(uow, fee_agreement_id)?;
            Self::ensure_transition(&agreement, EventType::Expired)?;

            if let (Some(provider), Some(contract_id)) =
                (agreement.electronic_signature_provider, agreement.contract_id.as_deref())
            {
                self.contracts.void_contract(provider, contract_id)?;
            }

            let details = json!({ "previous_status": format!("{:?}", agreement.status) });
            self.apply(uow, &mut agreement, EventType::Expired, None, details, None)?;
            Ok(agreement)
        }))
    }

    /// Expires every agreement that has been waiting for signatures longer than
    /// the configured window. Returns the ids that were expired.
    pub fn expire_overdue(&self, now: TimeStamp) -> OperationResult<Vec<String>> {
        let agreements = match self.store.fee_agreements() {
            Ok(agreements) => agreements,
            Err(err) => return FeeAgreementError::from(err).into(),
        };
        let cutoff = now.to_datetime_utc() - Duration::days(self.settings.expiration_days);

        let mut expired = vec![];
        for agreement in agreements {
            let overdue = agreement.status.is_awaiting_signature()
                && agreement
                    .tracking_sent_to_sign_date
                    .is_some_and(|sent| sent.to_datetime_utc() < cutoff);
            if !overdue {
                continue;
            }

            let result = self.expire_fee_agreement(&agreement.id, None);
            if result.success {
                expired.push(agreement.id);
            } else {
                log::warn!(
                    "could not expire fee agreement {}: {}",
                    agreement.id,
                    result.message.unwrap_or_default()
                );
            }
        }

        OperationResult::ok(expired)
    }

    /// Brings an expired agreement back and sends it out again through the
    /// default provider. Operations only.
    pub fn restore_expired(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<OperationResult<FeeAgreement>, FeeAgreementError> {
        settle_or_raise(self.within(tx, |uow| {
            let role = self.role_of(user_id)?;
            Self::authorize(role, EventType::RestoredFromExpiredAndSentToSign)?;
            let mut agreement = Self::load(uow, fee_agreement_id)?;
            Self::ensure_transition(&agreement, EventType::RestoredFromExpiredAndSentToSign)?;
            if agreement.is_unmanaged() || agreement.validated_date.is_none() {
                return Err(FeeAgreementError::conflict(
                    "Only validated agreements that expired awaiting signature can be restored",
                ));
            }

            agreement.clear_contract();
            agreement.electronic_signature_provider = None;
            agreement.hiring_authority_sign_date = None;
            agreement.production_director_signed_date = None;

            self.apply(
                uow,
                &mut agreement,
                EventType::RestoredFromExpiredAndSentToSign,
                Some(user_id),
                json!({}),
                None,
            )?;
            Ok(agreement)
        }))
    }

    /// Moves a pending request from its current provider to DocuSign.
    pub fn resend_through_docusign(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within(tx, |uow| {
            let role = self.role_of(user_id)?;
            Self::authorize(role, EventType::ResentThroughDocuSign)?;
            let mut agreement = Self::load(uow, fee_agreement_id)?;
            Self::ensure_involved(role, &agreement, user_id)?;

            if agreement.status != FeeAgreementStatus::PendingHiringAuthoritySignature {
                return Err(FeeAgreementError::conflict(
                    "Only agreements pending hiring authority signature can be resent",
                ));
            }
            if agreement.electronic_signature_provider == Some(SignatureProvider::DocuSign) {
                return Err(FeeAgreementError::conflict(
                    "The fee agreement is already on DocuSign",
                ));
            }
            if agreement.verbiage_changes_requested {
                return Err(FeeAgreementError::conflict(
                    "Agreements with verbiage changes cannot be resent through DocuSign",
                ));
            }

            let previous = (agreement.electronic_signature_provider, agreement.contract_id.clone());
            if let (Some(provider), Some(contract_id)) = &previous {
                if let Err(err) = self.contracts.void_contract(*provider, contract_id) {
                    log::warn!(
                        "could not void {provider:?} contract {contract_id} of fee agreement {}: {err:#}",
                        agreement.id
                    );
                }
            }

            agreement.clear_contract();
            agreement.electronic_signature_provider = Some(SignatureProvider::DocuSign);
            let details = json!({
                "previous_provider": previous.0.map(|p| format!("{p:?}")),
                "previous_contract_id": previous.1,
            });
            self.apply(
                uow,
                &mut agreement,
                EventType::ResentThroughDocuSign,
                Some(user_id),
                details,
                None,
            )?;
            Ok(agreement)
        }))
    }

    /// Asks the provider to remind the signer currently expected to sign.
    /// HelloSign requests are limited to one reminder per cooldown window;
    /// DocuSign requests are not.
    pub fn send_reminder(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within(tx, |uow| {
            let role = self.role_of(user_id)?;
            Self::authorize(role, EventType::ReminderSent)?;
            let mut agreement = Self::load(uow, fee_agreement_id)?;
            Self::ensure_involved(role, &agreement, user_id)?;
            Self::ensure_transition(&agreement, EventType::ReminderSent)?;

            let (provider, contract_id) = Self::contract_of(&agreement)?;
            let now = TimeStamp::new();
            if provider == SignatureProvider::HelloSign {
                let cooldown = Duration::minutes(self.settings.reminder_cooldown_minutes);
                if let Some(last) = agreement.last_resend_time {
                    if now.to_datetime_utc() - last.to_datetime_utc() < cooldown {
                        return Err(ValidationError::ReminderCooldown.into());
                    }
                }
            }

            let signer = match agreement.status {
                FeeAgreementStatus::PendingProductionDirectorSignature => {
                    SignerRole::ProductionDirector
                }
                _ => SignerRole::HiringAuthority,
            };
            let email = self
                .contracts
                .get_signature_email_by_signer_role(provider, &contract_id, signer)?
                .ok_or_else(|| {
                    FeeAgreementError::conflict(format!(
                        "The signature request has no {} signer",
                        signer.label()
                    ))
                })?;
            self.contracts.send_reminder(provider, &contract_id, &email)?;

            agreement.last_resend_time = Some(now);
            let details = json!({ "signer_role": signer.label(), "email": email });
            self.apply(uow, &mut agreement, EventType::ReminderSent, Some(user_id), details, None)?;
            Ok(agreement)
        }))
    }

    /// Replaces the hiring authority signer email on the pending request.
    pub fn update_hiring_authority_email(
        &self,
        fee_agreement_id: &str,
        user_id: &str,
        email: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> OperationResult<FeeAgreement> {
        settle(self.within(tx, |uow| {
            let email = email.trim();
            if !is_plausible_email(email) {
                return Err(ValidationError::InvalidEmail(email.to_string()).into());
            }
            let role = self.role_of(user_id)?;
            Self::authorize(role, EventType::HiringAuthorityEmailUpdated)?;
            let mut agreement = Self::load(uow, fee_agreement_id)?;
            Self::ensure_involved(role, &agreement, user_id)?;
            Self::ensure_transition(&agreement, EventType::HiringAuthorityEmailUpdated)?;

            let (provider, contract_id) = Self::contract_of(&agreement)?;
            self.contracts
                .update_hiring_authority_signer_email(provider, &contract_id, email)?;

            let details = json!({ "previous_email": agreement.ha_email, "email": email });
            agreement.ha_email = Some(email.to_string());
            self.apply(
                uow,
                &mut agreement,
                EventType::HiringAuthorityEmailUpdated,
                Some(user_id),
                details,
                None,
            )?;
            Ok(agreement)
        }))
    }

    fn contract_of(agreement: &FeeAgreement) -> Result<(SignatureProvider, String), FeeAgreementError> {
        match (agreement.electronic_signature_provider, &agreement.contract_id) {
            (Some(provider), Some(contract_id)) => Ok((provider, contract_id.clone())),
            _ => Err(FeeAgreementError::conflict(
                "The fee agreement has no signature request",
            )),
        }
    }
}
