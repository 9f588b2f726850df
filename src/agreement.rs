//! The fee agreement aggregate, its draft/revision inputs and term validation.
use super::error::ValidationError;
use super::status;
use super::types::{
    DeclinableField, FeeAgreementStatus, PaymentScheme, Responsible, SignatureProcessType,
    SignatureProvider, TimeStamp,
};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct DeclinationDetails {
    #[n(0)]
    pub declined_fields: Vec<DeclinableField>,
    #[n(1)]
    pub declination_notes: String,
}

impl DeclinationDetails {
    /// Checks a reviewer's declination against the scheme's allow-list.
    pub fn validate(
        scheme: PaymentScheme,
        declined_fields: &[String],
        declination_notes: &str,
    ) -> Result<Self, ValidationError> {
        if declined_fields.is_empty() {
            return Err(ValidationError::NoDeclinedFields);
        }
        if declination_notes.trim().is_empty() {
            return Err(ValidationError::BlankDeclinationNotes);
        }

        let allowed = status::declinable_fields(scheme);
        let mut fields = Vec::with_capacity(declined_fields.len());
        for name in declined_fields {
            let field: DeclinableField = name.parse()?;
            if !allowed.contains(&field) {
                return Err(ValidationError::FieldNotDeclinable { field, scheme });
            }
            if !fields.contains(&field) {
                fields.push(field);
            }
        }

        Ok(Self {
            declined_fields: fields,
            declination_notes: declination_notes.trim().to_string(),
        })
    }
}

/// Monetary and contractual terms. Exactly one of `fee_percentage` and
/// `flat_fee_amount` is set, depending on the payment scheme.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Terms {
    pub fee_percentage: Option<f64>,
    pub flat_fee_amount: Option<i64>, // minor currency units
    pub guarantee_days: u32,
    pub verbiage_changes: Option<String>,
    pub fee_percentage_change_requested: bool,
    pub guarantee_days_change_requested: bool,
    pub verbiage_changes_requested: bool,
}

impl Terms {
    /// `minimum_fee_percentage` only applies to the schemes that carry a floor.
    pub fn validate(
        &self,
        scheme: PaymentScheme,
        minimum_fee_percentage: f64,
    ) -> Result<(), ValidationError> {
        match scheme {
            PaymentScheme::Standard | PaymentScheme::BaseSalary => {
                let given = self
                    .fee_percentage
                    .ok_or(ValidationError::MissingFeePercentage(scheme.as_str()))?;
                if !given.is_finite() || given < minimum_fee_percentage {
                    return Err(ValidationError::FeeBelowMinimum {
                        minimum: minimum_fee_percentage,
                        given,
                    });
                }
            }
            PaymentScheme::Conversion => {
                let given = self
                    .fee_percentage
                    .ok_or(ValidationError::MissingFeePercentage(scheme.as_str()))?;
                if !given.is_finite() || given < 0.0 {
                    return Err(ValidationError::FeeBelowMinimum { minimum: 0.0, given });
                }
            }
            PaymentScheme::Flat => match self.flat_fee_amount {
                None => return Err(ValidationError::MissingFlatFee),
                Some(amount) if amount < 0 => return Err(ValidationError::NegativeFlatFee),
                Some(_) => {}
            },
        }
        Ok(())
    }
}

// used for constructing creation requests
#[derive(Debug, Clone, Default)]
pub struct FeeAgreementDraft {
    pub company_id: String,
    pub hiring_authority_id: String,
    pub fee_percentage: Option<f64>,
    pub flat_fee_amount: Option<i64>,
    pub guarantee_days: Option<u32>,
    pub verbiage_changes: Option<String>,
    pub fee_percentage_change_requested: bool,
    pub guarantee_days_change_requested: bool,
    pub cc_emails: Vec<String>,
    pub ha_email: Option<String>,
}

impl FeeAgreementDraft {
    pub fn new(company_id: &str, hiring_authority_id: &str) -> Self {
        Self {
            company_id: company_id.to_string(),
            hiring_authority_id: hiring_authority_id.to_string(),
            ..Self::default()
        }
    }
    pub fn set_fee_percentage(mut self, fee_percentage: f64) -> Self {
        self.fee_percentage = Some(fee_percentage);
        self
    }
    pub fn set_flat_fee_amount(mut self, amount: i64) -> Self {
        self.flat_fee_amount = Some(amount);
        self
    }
    pub fn set_guarantee_days(mut self, days: u32) -> Self {
        self.guarantee_days = Some(days);
        self
    }
    pub fn set_verbiage_changes(mut self, verbiage: &str) -> Self {
        self.verbiage_changes = Some(verbiage.to_string());
        self
    }
    pub fn request_fee_percentage_change(mut self) -> Self {
        self.fee_percentage_change_requested = true;
        self
    }
    pub fn request_guarantee_days_change(mut self) -> Self {
        self.guarantee_days_change_requested = true;
        self
    }
    pub fn add_cc_email(mut self, email: &str) -> Self {
        self.cc_emails.push(email.to_string());
        self
    }
    pub fn set_ha_email(mut self, email: &str) -> Self {
        self.ha_email = Some(email.to_string());
        self
    }

    /// Builds the scheme's terms, filling organisation defaults, then validates them.
    /// Fields that do not belong to the scheme are dropped.
    pub fn assemble_terms(
        &self,
        scheme: PaymentScheme,
        minimum_fee_percentage: f64,
        default_guarantee_days: u32,
    ) -> Result<Terms, ValidationError> {
        let (fee_percentage, flat_fee_amount) = match scheme {
            PaymentScheme::Flat => (None, self.flat_fee_amount),
            _ => (self.fee_percentage, None),
        };
        let verbiage_changes = self
            .verbiage_changes
            .as_ref()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let terms = Terms {
            fee_percentage,
            flat_fee_amount,
            guarantee_days: self.guarantee_days.unwrap_or(default_guarantee_days),
            verbiage_changes_requested: verbiage_changes.is_some(),
            verbiage_changes,
            fee_percentage_change_requested: self.fee_percentage_change_requested,
            guarantee_days_change_requested: self.guarantee_days_change_requested,
        };
        terms.validate(scheme, minimum_fee_percentage)?;

        Ok(terms)
    }
}

/// Values a creator sends back after a declination. Only declined fields are applied.
#[derive(Debug, Clone, Default)]
pub struct AgreementRevision {
    pub fee_percentage: Option<f64>,
    pub flat_fee_amount: Option<i64>,
    pub guarantee_days: Option<u32>,
    pub verbiage_changes: Option<String>,
}

impl AgreementRevision {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_fee_percentage(mut self, fee_percentage: f64) -> Self {
        self.fee_percentage = Some(fee_percentage);
        self
    }
    pub fn set_flat_fee_amount(mut self, amount: i64) -> Self {
        self.flat_fee_amount = Some(amount);
        self
    }
    pub fn set_guarantee_days(mut self, days: u32) -> Self {
        self.guarantee_days = Some(days);
        self
    }
    pub fn set_verbiage_changes(mut self, verbiage: &str) -> Self {
        self.verbiage_changes = Some(verbiage.to_string());
        self
    }
}

/// Where the externally signed document of an unmanaged agreement comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum UnmanagedDocument {
    /// A fresh upload sitting in temporary storage; moved into place.
    Upload(String),
    /// A file already attached elsewhere; copied so the original stays.
    Attachment(String),
}

#[derive(Debug, Clone)]
pub struct UnmanagedDraft {
    pub company_id: String,
    pub hiring_authority_id: String,
    pub payment_scheme: PaymentScheme,
    pub fee_percentage: Option<f64>,
    pub flat_fee_amount: Option<i64>,
    pub guarantee_days: Option<u32>,
    pub verbiage_changes: Option<String>,
    pub validated_date: TimeStamp,
    pub signed_date: TimeStamp,
    pub target_recruiter_id: Option<String>,
    pub document: UnmanagedDocument,
}

impl UnmanagedDraft {
    pub fn terms(
        &self,
        minimum_fee_percentage: f64,
        default_guarantee_days: u32,
    ) -> Result<Terms, ValidationError> {
        if self.signed_date < self.validated_date {
            return Err(ValidationError::SignedBeforeValidated);
        }
        let draft = FeeAgreementDraft {
            company_id: self.company_id.clone(),
            hiring_authority_id: self.hiring_authority_id.clone(),
            fee_percentage: self.fee_percentage,
            flat_fee_amount: self.flat_fee_amount,
            guarantee_days: self.guarantee_days,
            verbiage_changes: self.verbiage_changes.clone(),
            ..FeeAgreementDraft::default()
        };
        draft.assemble_terms(
            self.payment_scheme,
            SignatureProcessType::ExternalUnmanaged.fee_floor(minimum_fee_percentage),
            default_guarantee_days,
        )
    }
}

/// Everyone attached to an agreement at creation time.
#[derive(Debug, Clone, Default)]
pub struct Parties {
    pub company_id: String,
    pub hiring_authority_id: String,
    pub creator_id: String,
    pub coach_id: Option<String>,
    pub regional_director_id: Option<String>,
    pub production_director_signer_id: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct FeeAgreement {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub payment_scheme: PaymentScheme,
    #[n(2)]
    pub status: FeeAgreementStatus,
    #[n(3)]
    pub company_id: String,
    #[n(4)]
    pub hiring_authority_id: String,
    #[n(5)]
    pub creator_id: String,
    #[n(6)]
    pub coach_id: Option<String>,
    #[n(7)]
    pub regional_director_id: Option<String>,
    #[n(8)]
    pub production_director_signer_id: String,
    #[n(9)]
    pub operations_validator_id: Option<String>,
    #[n(10)]
    pub current_declinator_id: Option<String>,
    #[n(11)]
    pub current_responsible: Option<Responsible>,
    #[n(12)]
    pub fee_percentage: Option<f64>,
    #[n(13)]
    pub flat_fee_amount: Option<i64>,
    #[n(14)]
    pub guarantee_days: u32,
    #[n(15)]
    pub verbiage_changes: Option<String>,
    #[n(16)]
    pub fee_percentage_change_requested: bool,
    #[n(17)]
    pub guarantee_days_change_requested: bool,
    #[n(18)]
    pub verbiage_changes_requested: bool,
    #[n(19)]
    pub signature_process_type: SignatureProcessType,
    #[n(20)]
    pub electronic_signature_provider: Option<SignatureProvider>,
    #[n(21)]
    pub contract_id: Option<String>, // provider reference
    #[n(22)]
    pub sign_url: Option<String>,
    #[n(23)]
    pub pdf_url: Option<String>,
    #[n(24)]
    pub pdf_checksum: Option<String>,
    #[n(25)]
    pub template_id: Option<String>,
    #[n(26)]
    pub cc_emails: Vec<String>,
    #[n(27)]
    pub ha_email: Option<String>,
    #[n(28)]
    pub validated_date: Option<TimeStamp>,
    #[n(29)]
    pub hiring_authority_sign_date: Option<TimeStamp>,
    #[n(30)]
    pub production_director_signed_date: Option<TimeStamp>,
    #[n(31)]
    pub signed_date: Option<TimeStamp>,
    #[n(32)]
    pub tracking_sent_to_sign_date: Option<TimeStamp>,
    #[n(33)]
    pub tracking_signed_date: Option<TimeStamp>,
    #[n(34)]
    pub last_resend_time: Option<TimeStamp>,
    #[n(35)]
    pub declination_details: Option<DeclinationDetails>,
    #[n(36)]
    pub version: u64,
    #[n(37)]
    pub created_at: TimeStamp,
    #[n(38)]
    pub updated_at: TimeStamp,
}

impl FeeAgreement {
    /// A not yet persisted agreement. Status is only meaningful after the first
    /// transition has been applied.
    pub fn open(
        id: String,
        scheme: PaymentScheme,
        parties: Parties,
        terms: Terms,
        process_type: SignatureProcessType,
        initial_status: FeeAgreementStatus,
    ) -> Self {
        let now = TimeStamp::new();
        Self {
            id,
            payment_scheme: scheme,
            status: initial_status,
            company_id: parties.company_id,
            hiring_authority_id: parties.hiring_authority_id,
            creator_id: parties.creator_id,
            coach_id: parties.coach_id,
            regional_director_id: parties.regional_director_id,
            production_director_signer_id: parties.production_director_signer_id,
            operations_validator_id: None,
            current_declinator_id: None,
            current_responsible: None,
            fee_percentage: terms.fee_percentage,
            flat_fee_amount: terms.flat_fee_amount,
            guarantee_days: terms.guarantee_days,
            verbiage_changes: terms.verbiage_changes,
            fee_percentage_change_requested: terms.fee_percentage_change_requested,
            guarantee_days_change_requested: terms.guarantee_days_change_requested,
            verbiage_changes_requested: terms.verbiage_changes_requested,
            signature_process_type: process_type,
            electronic_signature_provider: None,
            contract_id: None,
            sign_url: None,
            pdf_url: None,
            pdf_checksum: None,
            template_id: None,
            cc_emails: vec![],
            ha_email: None,
            validated_date: None,
            hiring_authority_sign_date: None,
            production_director_signed_date: None,
            signed_date: None,
            tracking_sent_to_sign_date: None,
            tracking_signed_date: None,
            last_resend_time: None,
            declination_details: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn terms(&self) -> Terms {
        Terms {
            fee_percentage: self.fee_percentage,
            flat_fee_amount: self.flat_fee_amount,
            guarantee_days: self.guarantee_days,
            verbiage_changes: self.verbiage_changes.clone(),
            fee_percentage_change_requested: self.fee_percentage_change_requested,
            guarantee_days_change_requested: self.guarantee_days_change_requested,
            verbiage_changes_requested: self.verbiage_changes_requested,
        }
    }

    /// Fee floor the agreement's terms are held to on every revision.
    pub fn fee_floor(&self, minimum_fee_percentage: f64) -> f64 {
        self.signature_process_type.fee_floor(minimum_fee_percentage)
    }

    pub fn is_unmanaged(&self) -> bool {
        self.signature_process_type == SignatureProcessType::ExternalUnmanaged
    }

    pub fn is_party_leader(&self, user_id: &str) -> bool {
        self.coach_id.as_deref() == Some(user_id)
            || self.regional_director_id.as_deref() == Some(user_id)
    }

    pub fn declined_fields(&self) -> &[DeclinableField] {
        self.declination_details
            .as_ref()
            .map(|d| d.declined_fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn clear_declination(&mut self) {
        self.declination_details = None;
        self.current_declinator_id = None;
    }

    /// Applies the revised values of the previously declined fields only.
    pub fn apply_revision(&mut self, revision: &AgreementRevision) {
        for field in self.declined_fields().to_vec() {
            match field {
                DeclinableField::FeePercentage => {
                    if let Some(fee) = revision.fee_percentage {
                        self.fee_percentage = Some(fee);
                    }
                }
                DeclinableField::FlatFeeAmount => {
                    if let Some(amount) = revision.flat_fee_amount {
                        self.flat_fee_amount = Some(amount);
                    }
                }
                DeclinableField::GuaranteeDays => {
                    if let Some(days) = revision.guarantee_days {
                        self.guarantee_days = days;
                    }
                }
                DeclinableField::VerbiageChanges => {
                    if let Some(verbiage) = &revision.verbiage_changes {
                        let verbiage = verbiage.trim();
                        self.verbiage_changes_requested = !verbiage.is_empty();
                        self.verbiage_changes =
                            Some(verbiage.to_string()).filter(|v| !v.is_empty());
                    }
                }
            }
        }
    }

    /// Clears everything a previous signature request left behind.
    pub fn clear_contract(&mut self) {
        self.contract_id = None;
        self.sign_url = None;
        self.pdf_url = None;
        self.pdf_checksum = None;
        self.last_resend_time = None;
    }
}
