//! Audit records and the domain events published once a unit of work commits.
use super::types::{EventType, FeeAgreementStatus, TimeStamp};
use uuid7::uuid7;

/// One row per status-changing (or log-only) action. Never mutated after commit.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct EventLogEntry {
    #[n(0)]
    pub id: String, // uuid7, keeps per-agreement scans chronological
    #[n(1)]
    pub fee_agreement_id: String,
    #[n(2)]
    pub event_type: EventType,
    #[n(3)]
    pub triggered_by_user_id: Option<String>, // none for provider and system events
    #[n(4)]
    pub result_status: FeeAgreementStatus,
    #[n(5)]
    pub event_details: String, // json
    #[n(6)]
    pub real_date: Option<TimeStamp>,
    #[n(7)]
    pub associated_external_event_id: Option<String>,
    #[n(8)]
    pub created_at: TimeStamp,
}

impl EventLogEntry {
    pub fn new(
        fee_agreement_id: &str,
        event_type: EventType,
        triggered_by_user_id: Option<&str>,
        result_status: FeeAgreementStatus,
        event_details: &serde_json::Value,
    ) -> Self {
        Self {
            id: uuid7().to_string(),
            fee_agreement_id: fee_agreement_id.to_string(),
            event_type,
            triggered_by_user_id: triggered_by_user_id.map(str::to_string),
            result_status,
            event_details: event_details.to_string(),
            real_date: None,
            associated_external_event_id: None,
            created_at: TimeStamp::new(),
        }
    }
    pub fn with_external_event(mut self, event_id: &str, real_date: Option<TimeStamp>) -> Self {
        self.associated_external_event_id = Some(event_id.to_string());
        self.real_date = real_date;
        self
    }
    pub fn key(&self) -> String {
        format!("{}/{}", self.fee_agreement_id, self.id)
    }
    pub fn details(&self) -> serde_json::Value {
        serde_json::from_str(&self.event_details).unwrap_or(serde_json::Value::Null)
    }
    /// Provider timestamps win over the time the row was written.
    pub fn effective_date(&self) -> TimeStamp {
        self.real_date.unwrap_or(self.created_at)
    }
}

/// A signature provider callback exactly as it was received. The provider's
/// event hash is the primary key, which makes re-delivery a no-op.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct RawProviderEvent {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub fee_agreement_id: Option<String>,
    #[n(2)]
    pub event_type: String,
    #[n(3)]
    pub data: String,
    #[n(4)]
    pub real_date: Option<TimeStamp>,
    #[n(5)]
    pub received_at: TimeStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainEventName {
    CreatedAndSentToCoachValidation,
    CreatedAndSentToOperationsValidation,
    CreatedAndSentToSign,
    UnmanagedCreated,
    ValidatedByCoach,
    ValidatedByOperations,
    DeclinedByCoach,
    DeclinedByOperations,
    SentToCoachValidation,
    SentToOperationsValidation,
    SentToSign,
    SignedByHiringAuthority,
    FeeAgreementSigned,
    Voided,
    ValidationCanceled,
    Expired,
    Restored,
    ResentThroughDocuSign,
}

impl DomainEventName {
    /// The notification that corresponds to a committed lifecycle event, if any.
    pub fn for_event(event: EventType) -> Option<Self> {
        use DomainEventName as D;
        use EventType as E;

        match event {
            E::CreatedAndSentToCoachValidation => Some(D::CreatedAndSentToCoachValidation),
            E::CreatedAndSentToOperationsValidation => {
                Some(D::CreatedAndSentToOperationsValidation)
            }
            E::CreatedAndSentToSign => Some(D::CreatedAndSentToSign),
            E::CreatedUnmanagedAndSentToOperationsValidation => Some(D::UnmanagedCreated),
            E::ValidatedByCoach | E::ValidatedByCoachAndSentToSign => Some(D::ValidatedByCoach),
            E::DeclinedByCoach => Some(D::DeclinedByCoach),
            E::SentToCoachValidationAfterDeclination => Some(D::SentToCoachValidation),
            E::ValidatedByOperationsAndSentToSign => Some(D::ValidatedByOperations),
            E::DeclinedByOperations => Some(D::DeclinedByOperations),
            E::SentToOperationsValidationAfterDeclination => Some(D::SentToOperationsValidation),
            E::SignatureRequestSentReconciled => Some(D::SentToSign),
            E::SignedByHiringAuthority => Some(D::SignedByHiringAuthority),
            E::SignedByProductionDirector
            | E::CreatedUnmanagedSigned
            | E::UnmanagedValidatedByOperations => Some(D::FeeAgreementSigned),
            E::ContractVoided => Some(D::Voided),
            E::ValidationRequestCanceled => Some(D::ValidationCanceled),
            E::Expired => Some(D::Expired),
            E::RestoredFromExpiredAndSentToSign => Some(D::Restored),
            E::ResentThroughDocuSign => Some(D::ResentThroughDocuSign),
            E::ViewedByHiringAuthority
            | E::ViewedByProductionDirector
            | E::SignatureEmailBounced
            | E::ReminderDeliveredByProvider
            | E::ReminderSent
            | E::HiringAuthorityEmailUpdated
            | E::ValidationRecordedAfterSent => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub name: DomainEventName,
    pub fee_agreement_id: String,
    pub status: FeeAgreementStatus,
    pub triggered_by_user_id: Option<String>,
}

/// Subscribers for white sheet completion, placement eligibility, notifications.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: &DomainEvent);
}

/// Bus used when nothing else subscribes; only records the event in the log.
pub struct LogEventBus;

impl EventBus for LogEventBus {
    fn publish(&self, event: &DomainEvent) {
        log::info!(
            "fee agreement {} published {:?} ({:?})",
            event.fee_agreement_id,
            event.name,
            event.status
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_only_events_publish_nothing() {
        for event in [
            EventType::ViewedByHiringAuthority,
            EventType::SignatureEmailBounced,
            EventType::ReminderSent,
        ] {
            assert!(event.is_log_only());
            assert_eq!(DomainEventName::for_event(event), None);
        }
    }

    #[test]
    fn every_signing_path_publishes_fee_agreement_signed() {
        for event in [
            EventType::SignedByProductionDirector,
            EventType::CreatedUnmanagedSigned,
            EventType::UnmanagedValidatedByOperations,
        ] {
            assert_eq!(
                DomainEventName::for_event(event),
                Some(DomainEventName::FeeAgreementSigned)
            );
        }
    }

    #[test]
    fn keys_sort_chronologically_per_agreement() {
        let details = serde_json::json!({});
        let first = EventLogEntry::new(
            "fee1",
            EventType::CreatedAndSentToCoachValidation,
            Some("u"),
            FeeAgreementStatus::PendingCoachValidation,
            &details,
        );
        let second = EventLogEntry::new(
            "fee1",
            EventType::DeclinedByCoach,
            Some("u"),
            FeeAgreementStatus::PendingCoachDeclinationUpdate,
            &details,
        );

        assert!(first.key() < second.key());
        assert!(first.key().starts_with("fee1/"));
    }
}
