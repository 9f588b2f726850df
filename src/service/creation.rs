//! The four scheme specific creation flows and the unmanaged (externally signed) path.
use super::FeeAgreementService;
use crate::agreement::{FeeAgreement, FeeAgreementDraft, Parties, UnmanagedDocument, UnmanagedDraft};
use crate::error::{FeeAgreementError, OperationResult, ValidationError, settle_or_raise};
use crate::status;
use crate::store::{AfterCommit, UnitOfWork};
use crate::types::{EventType, PaymentScheme, Role, SignatureProcessType, TimeStamp};
use crate::utils::{fee_agreement_pdf_path, is_plausible_email, new_fee_agreement_id};
use serde_json::json;

impl FeeAgreementService {
    pub fn create_standard(
        &self,
        draft: &FeeAgreementDraft,
        user_id: &str,
        overridden_user_id: Option<&str>,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<OperationResult<FeeAgreement>, FeeAgreementError> {
        self.create(PaymentScheme::Standard, draft, user_id, overridden_user_id, tx)
    }

    pub fn create_flat(
        &self,
        draft: &FeeAgreementDraft,
        user_id: &str,
        overridden_user_id: Option<&str>,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<OperationResult<FeeAgreement>, FeeAgreementError> {
        self.create(PaymentScheme::Flat, draft, user_id, overridden_user_id, tx)
    }

    pub fn create_conversion(
        &self,
        draft: &FeeAgreementDraft,
        user_id: &str,
        overridden_user_id: Option<&str>,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<OperationResult<FeeAgreement>, FeeAgreementError> {
        self.create(PaymentScheme::Conversion, draft, user_id, overridden_user_id, tx)
    }

    pub fn create_base_salary(
        &self,
        draft: &FeeAgreementDraft,
        user_id: &str,
        overridden_user_id: Option<&str>,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<OperationResult<FeeAgreement>, FeeAgreementError> {
        self.create(PaymentScheme::BaseSalary, draft, user_id, overridden_user_id, tx)
    }

    fn create(
        &self,
        scheme: PaymentScheme,
        draft: &FeeAgreementDraft,
        user_id: &str,
        overridden_user_id: Option<&str>,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<OperationResult<FeeAgreement>, FeeAgreementError> {
        let result = self.within(tx, |uow| {
            self.create_managed(uow, scheme, draft, user_id, overridden_user_id)
        });
        settle_or_raise(result).map(OperationResult::into_created)
    }

    fn create_managed(
        &self,
        uow: &mut UnitOfWork,
        scheme: PaymentScheme,
        draft: &FeeAgreementDraft,
        user_id: &str,
        overridden_user_id: Option<&str>,
    ) -> Result<FeeAgreement, FeeAgreementError> {
        let role = self.role_of(user_id)?;
        // operations only creates on behalf of someone else
        let creator_id = match (role, overridden_user_id) {
            (Role::Operations, Some(overridden)) => overridden,
            (Role::Operations, None) => return Err(ValidationError::MissingTargetRecruiter.into()),
            (_, _) => user_id,
        };
        if creator_id != user_id {
            self.ensure_recruiter(creator_id)?;
        }

        self.check_company(&draft.company_id, &draft.hiring_authority_id)?;
        if !self
            .collaborators
            .companies
            .company_has_job_orders_to_sign(&draft.company_id)?
        {
            return Err(ValidationError::CompanyWithoutJobOrders.into());
        }
        for email in draft.ha_email.iter().chain(draft.cc_emails.iter()) {
            if !is_plausible_email(email) {
                return Err(ValidationError::InvalidEmail(email.clone()).into());
            }
        }

        let terms = draft.assemble_terms(
            scheme,
            self.settings.minimum_fee_percentage,
            self.settings.default_guarantee_days,
        )?;
        let (initial_status, event) = status::initial_status_and_event(role, scheme, &terms);
        Self::authorize(role, event)?;

        let parties = self.parties_for(
            &draft.company_id,
            &draft.hiring_authority_id,
            creator_id,
            role,
        )?;
        let mut agreement = FeeAgreement::open(
            new_fee_agreement_id()?,
            scheme,
            parties,
            terms,
            SignatureProcessType::FortPacManaged,
            initial_status,
        );
        agreement.cc_emails = draft.cc_emails.clone();
        agreement.ha_email = draft.ha_email.clone();
        if role == Role::Operations {
            agreement.operations_validator_id = Some(user_id.to_string());
        }
        if event == EventType::CreatedAndSentToSign {
            agreement.validated_date = Some(TimeStamp::new());
        }

        let details = json!({
            "payment_scheme": scheme.as_str(),
            "fee_percentage": agreement.fee_percentage,
            "flat_fee_amount": agreement.flat_fee_amount,
            "guarantee_days": agreement.guarantee_days,
            "verbiage_changes": agreement.verbiage_changes,
            "overridden_user_id": overridden_user_id.filter(|_| role == Role::Operations),
        });
        self.apply(uow, &mut agreement, event, Some(user_id), details, None)?;

        Ok(agreement)
    }

    /// Imports an agreement signed outside the signature flow.
    pub fn create_unmanaged(
        &self,
        draft: &UnmanagedDraft,
        user_id: &str,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<OperationResult<FeeAgreement>, FeeAgreementError> {
        let result = self.within(tx, |uow| self.create_unmanaged_in(uow, draft, user_id));
        settle_or_raise(result).map(OperationResult::into_created)
    }

    fn create_unmanaged_in(
        &self,
        uow: &mut UnitOfWork,
        draft: &UnmanagedDraft,
        user_id: &str,
    ) -> Result<FeeAgreement, FeeAgreementError> {
        let role = self.role_of(user_id)?;
        let target = draft.target_recruiter_id.as_deref().filter(|id| !id.is_empty());
        let creator_id = match role {
            Role::Recruiter => user_id,
            Role::Coach | Role::RegionalDirector => match target {
                Some(target) if target == user_id => {
                    return Err(ValidationError::SelfAssignment.into());
                }
                Some(target) => target,
                None => return Err(ValidationError::MissingTargetRecruiter.into()),
            },
            Role::Operations => target.ok_or(ValidationError::MissingTargetRecruiter)?,
        };
        if creator_id != user_id {
            self.ensure_recruiter(creator_id)?;
        }

        self.check_company(&draft.company_id, &draft.hiring_authority_id)?;
        let terms = draft.terms(
            self.settings.minimum_fee_percentage,
            self.settings.default_guarantee_days,
        )?;
        let (initial_status, event) = status::initial_unmanaged_status_and_event(role);
        Self::authorize(role, event)?;

        // the creator's own leadership, not the importing user's
        let parties = self.parties_for(
            &draft.company_id,
            &draft.hiring_authority_id,
            creator_id,
            Role::Recruiter,
        )?;
        let mut agreement = FeeAgreement::open(
            new_fee_agreement_id()?,
            draft.payment_scheme,
            parties,
            terms,
            SignatureProcessType::ExternalUnmanaged,
            initial_status,
        );
        agreement.validated_date = Some(draft.validated_date);
        agreement.hiring_authority_sign_date = Some(draft.signed_date);
        if event == EventType::CreatedUnmanagedSigned {
            agreement.operations_validator_id = Some(user_id.to_string());
            agreement.production_director_signed_date = Some(draft.signed_date);
            agreement.signed_date = Some(draft.signed_date);
            agreement.tracking_signed_date = Some(draft.signed_date.next_business_day());
        }

        let path = fee_agreement_pdf_path(&agreement.id);
        let files = &self.collaborators.files;
        // an upload is only removed from its staging path once the agreement is stored
        let (from, staged_upload) = match &draft.document {
            UnmanagedDocument::Upload(from) => (from, true),
            UnmanagedDocument::Attachment(from) => (from, false),
        };
        agreement.pdf_url = Some(files.copy_file(from, &path)?);

        let details = json!({
            "payment_scheme": draft.payment_scheme.as_str(),
            "validated_date": draft.validated_date.to_datetime_utc().to_rfc3339(),
            "signed_date": draft.signed_date.to_datetime_utc().to_rfc3339(),
            "target_recruiter_id": creator_id,
        });
        self.apply(uow, &mut agreement, event, Some(user_id), details, None)?;
        if staged_upload {
            uow.after_commit(AfterCommit::DeleteFile(from.clone()));
        }
        if event == EventType::CreatedUnmanagedSigned {
            uow.after_commit(AfterCommit::MarkAgreementDiscussed(agreement.id.clone()));
        }

        Ok(agreement)
    }

    fn ensure_recruiter(&self, user_id: &str) -> Result<(), FeeAgreementError> {
        if !self.collaborators.users.has_role(user_id, Role::Recruiter)? {
            return Err(ValidationError::NotARecruiter(user_id.to_string()).into());
        }
        Ok(())
    }

    fn check_company(&self, company_id: &str, hiring_authority_id: &str) -> Result<(), FeeAgreementError> {
        let companies = &self.collaborators.companies;
        if !companies.company_exists(company_id)? {
            return Err(FeeAgreementError::not_found("Company"));
        }
        let hiring_authority = companies
            .find_hiring_authority(hiring_authority_id)?
            .ok_or_else(|| FeeAgreementError::not_found("Hiring authority"))?;
        if hiring_authority.company_id != company_id {
            return Err(FeeAgreementError::Validation(
                "The hiring authority does not belong to the company".into(),
            ));
        }
        Ok(())
    }

    /// Resolves the creator's coach and regional director. A creator who is a
    /// leader fills their own seat.
    fn parties_for(
        &self,
        company_id: &str,
        hiring_authority_id: &str,
        creator_id: &str,
        creator_role: Role,
    ) -> Result<Parties, FeeAgreementError> {
        let leadership = self
            .collaborators
            .users
            .coach_and_regional_director(creator_id)?;
        let (coach_id, regional_director_id) = match creator_role {
            Role::Coach => (Some(creator_id.to_string()), leadership.regional_director_id),
            Role::RegionalDirector => (None, Some(creator_id.to_string())),
            Role::Recruiter | Role::Operations => {
                (leadership.coach_id, leadership.regional_director_id)
            }
        };

        Ok(Parties {
            company_id: company_id.to_string(),
            hiring_authority_id: hiring_authority_id.to_string(),
            creator_id: creator_id.to_string(),
            coach_id,
            regional_director_id,
            production_director_signer_id: self.settings.production_director_signer_id.clone(),
        })
    }
}
