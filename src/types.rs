//! Shared vocabulary of the fee agreement workflow: statuses, events, roles and the
//! timestamp codec used by every persisted record.
use super::error::ValidationError;
use chrono::{DateTime, Datelike, TimeZone, Utc, Weekday};
use std::str::FromStr;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn from_unix(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0).map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Moves weekend dates onto the following Monday, keeping the time of day.
    pub fn next_business_day(&self) -> Self {
        let shift = match self.0.weekday() {
            Weekday::Sat => 2,
            Weekday::Sun => 1,
            _ => 0,
        };
        Self(self.0 + chrono::Duration::days(shift))
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentScheme {
    #[n(0)]
    Standard,
    #[n(1)]
    Flat,
    #[n(2)]
    Conversion,
    #[n(3)]
    BaseSalary,
}

impl PaymentScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentScheme::Standard => "standard",
            PaymentScheme::Flat => "flat",
            PaymentScheme::Conversion => "conversion",
            PaymentScheme::BaseSalary => "base_salary",
        }
    }
}

/// Roles ordered from least to most privileged, so `max` yields the highest role.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    #[n(0)]
    Recruiter,
    #[n(1)]
    Coach,
    #[n(2)]
    RegionalDirector,
    #[n(3)]
    Operations,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureProcessType {
    #[n(0)]
    FortPacManaged,
    #[n(1)]
    ExternalUnmanaged,
}

impl SignatureProcessType {
    /// Fee floor enforced on the terms. Agreements signed outside the system
    /// keep whatever was negotiated.
    pub fn fee_floor(&self, minimum_fee_percentage: f64) -> f64 {
        match self {
            SignatureProcessType::FortPacManaged => minimum_fee_percentage,
            SignatureProcessType::ExternalUnmanaged => 0.0,
        }
    }
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    serde::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum SignatureProvider {
    #[n(0)]
    HelloSign,
    #[n(1)]
    DocuSign,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeeAgreementStatus {
    #[n(0)]
    PendingCoachValidation,
    #[n(1)]
    PendingOperationsValidation,
    #[n(2)]
    PendingCoachDeclinationUpdate,
    #[n(3)]
    PendingOperationsDeclinationUpdate,
    #[n(4)]
    PendingHiringAuthoritySignature,
    #[n(5)]
    PendingProductionDirectorSignature,
    #[n(6)]
    Signed,
    #[n(7)]
    Canceled,
    #[n(8)]
    Void,
    #[n(9)]
    Expired,
}

impl FeeAgreementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FeeAgreementStatus::Signed
                | FeeAgreementStatus::Canceled
                | FeeAgreementStatus::Void
                | FeeAgreementStatus::Expired
        )
    }
    /// Statuses that still wait for an internal reviewer before anything is sent out.
    pub fn is_pre_signature_validation(&self) -> bool {
        matches!(
            self,
            FeeAgreementStatus::PendingCoachValidation
                | FeeAgreementStatus::PendingOperationsValidation
        )
    }
    pub fn is_validation_stage(&self) -> bool {
        self.is_pre_signature_validation()
            || matches!(
                self,
                FeeAgreementStatus::PendingCoachDeclinationUpdate
                    | FeeAgreementStatus::PendingOperationsDeclinationUpdate
            )
    }
    pub fn is_awaiting_signature(&self) -> bool {
        matches!(
            self,
            FeeAgreementStatus::PendingHiringAuthoritySignature
                | FeeAgreementStatus::PendingProductionDirectorSignature
        )
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    #[n(0)]
    CreatedAndSentToCoachValidation,
    #[n(1)]
    CreatedAndSentToOperationsValidation,
    #[n(2)]
    CreatedAndSentToSign,
    #[n(3)]
    CreatedUnmanagedAndSentToOperationsValidation,
    #[n(4)]
    CreatedUnmanagedSigned,
    #[n(5)]
    ValidatedByCoach,
    #[n(6)]
    ValidatedByCoachAndSentToSign,
    #[n(7)]
    DeclinedByCoach,
    #[n(8)]
    SentToCoachValidationAfterDeclination,
    #[n(9)]
    ValidatedByOperationsAndSentToSign,
    #[n(10)]
    DeclinedByOperations,
    #[n(11)]
    SentToOperationsValidationAfterDeclination,
    #[n(12)]
    UnmanagedValidatedByOperations,
    #[n(13)]
    SignatureRequestSentReconciled,
    #[n(14)]
    SignedByHiringAuthority,
    #[n(15)]
    SignedByProductionDirector,
    #[n(16)]
    ViewedByHiringAuthority,
    #[n(17)]
    ViewedByProductionDirector,
    #[n(18)]
    SignatureEmailBounced,
    #[n(19)]
    ReminderDeliveredByProvider,
    #[n(20)]
    ReminderSent,
    #[n(21)]
    ContractVoided,
    #[n(22)]
    ValidationRequestCanceled,
    #[n(23)]
    Expired,
    #[n(24)]
    RestoredFromExpiredAndSentToSign,
    #[n(25)]
    ResentThroughDocuSign,
    #[n(26)]
    HiringAuthorityEmailUpdated,
    #[n(27)]
    ValidationRecordedAfterSent,
}

impl EventType {
    pub fn is_creation(&self) -> bool {
        matches!(
            self,
            EventType::CreatedAndSentToCoachValidation
                | EventType::CreatedAndSentToOperationsValidation
                | EventType::CreatedAndSentToSign
                | EventType::CreatedUnmanagedAndSentToOperationsValidation
                | EventType::CreatedUnmanagedSigned
        )
    }
    /// Events that leave the status untouched and only extend the audit trail.
    pub fn is_log_only(&self) -> bool {
        matches!(
            self,
            EventType::ViewedByHiringAuthority
                | EventType::ViewedByProductionDirector
                | EventType::SignatureEmailBounced
                | EventType::ReminderDeliveredByProvider
                | EventType::ReminderSent
                | EventType::ResentThroughDocuSign
                | EventType::HiringAuthorityEmailUpdated
                | EventType::ValidationRecordedAfterSent
        )
    }
    pub fn sends_to_sign(&self) -> bool {
        matches!(
            self,
            EventType::CreatedAndSentToSign
                | EventType::ValidatedByCoachAndSentToSign
                | EventType::ValidatedByOperationsAndSentToSign
                | EventType::RestoredFromExpiredAndSentToSign
                | EventType::ResentThroughDocuSign
        )
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclinableField {
    #[n(0)]
    FeePercentage,
    #[n(1)]
    FlatFeeAmount,
    #[n(2)]
    GuaranteeDays,
    #[n(3)]
    VerbiageChanges,
}

impl DeclinableField {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclinableField::FeePercentage => "fee_percentage",
            DeclinableField::FlatFeeAmount => "flat_fee_amount",
            DeclinableField::GuaranteeDays => "guarantee_days",
            DeclinableField::VerbiageChanges => "verbiage_changes",
        }
    }
}

impl FromStr for DeclinableField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fee_percentage" => Ok(DeclinableField::FeePercentage),
            "flat_fee_amount" => Ok(DeclinableField::FlatFeeAmount),
            "guarantee_days" => Ok(DeclinableField::GuaranteeDays),
            "verbiage_changes" => Ok(DeclinableField::VerbiageChanges),
            other => Err(ValidationError::UnknownDeclinableField(other.to_string())),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Party {
    #[n(0)]
    Creator,
    #[n(1)]
    Coach,
    #[n(2)]
    RegionalDirector,
    #[n(3)]
    Operations,
    #[n(4)]
    HiringAuthority,
    #[n(5)]
    ProductionDirector,
}

/// Who is expected to act next on an agreement.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Responsible {
    #[n(0)]
    pub party: Party,
    #[n(1)]
    pub user_id: Option<String>, // none while a role, not a person, owns the step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: TimeStamp = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn weekend_dates_move_to_monday() {
        let saturday = TimeStamp::new_with(2024, 6, 15, 10, 0, 0).unwrap();
        let sunday = TimeStamp::new_with(2024, 6, 16, 10, 0, 0).unwrap();
        let monday = TimeStamp::new_with(2024, 6, 17, 10, 0, 0).unwrap();

        assert_eq!(saturday.next_business_day(), monday);
        assert_eq!(sunday.next_business_day(), monday);
        assert_eq!(monday.next_business_day(), monday);
    }

    #[test]
    fn highest_role_is_operations() {
        let roles = [Role::Coach, Role::Operations, Role::Recruiter];
        assert_eq!(roles.iter().max(), Some(&Role::Operations));
    }

    #[test]
    fn declinable_field_names_parse() {
        assert_eq!(
            "guarantee_days".parse::<DeclinableField>().unwrap(),
            DeclinableField::GuaranteeDays
        );
        assert!("company_id".parse::<DeclinableField>().is_err());
    }
}
