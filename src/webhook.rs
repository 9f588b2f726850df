//! Signature provider callback boundary: payload shape, authenticity check and
//! the dispatch table from provider event names to handler kinds.
use super::contract::SignerRole;
use super::error::ValidationError;
use super::types::TimeStamp;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventKind {
    Downloadable,
    Signed,
    Sent,
    Viewed,
    EmailBounce,
    Reminded,
}

/// Provider event names this system reacts to. Anything else is stored and ignored.
pub const PROVIDER_EVENT_HANDLERS: &[(&str, ProviderEventKind)] = &[
    ("signature_request_downloadable", ProviderEventKind::Downloadable),
    ("signature_request_signed", ProviderEventKind::Signed),
    ("signature_request_all_signed", ProviderEventKind::Signed),
    ("signature_request_sent", ProviderEventKind::Sent),
    ("signature_request_viewed", ProviderEventKind::Viewed),
    ("signature_request_email_bounce", ProviderEventKind::EmailBounce),
    ("signature_request_remind", ProviderEventKind::Reminded),
];

pub fn handler_for(event_type: &str) -> Option<ProviderEventKind> {
    PROVIDER_EVENT_HANDLERS
        .iter()
        .find(|(name, _)| *name == event_type)
        .map(|(_, kind)| *kind)
}

/// Providers send the event time either as a unix timestamp or as its string form.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EventTime {
    Number(i64),
    Text(String),
}

impl EventTime {
    pub fn as_text(&self) -> String {
        match self {
            EventTime::Number(secs) => secs.to_string(),
            EventTime::Text(text) => text.clone(),
        }
    }
    pub fn timestamp(&self) -> Option<TimeStamp> {
        let secs = match self {
            EventTime::Number(secs) => *secs,
            EventTime::Text(text) => text.trim().parse().ok()?,
        };
        TimeStamp::from_unix(secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventMetadata {
    #[serde(default)]
    pub related_signature_id: Option<String>,
    #[serde(default)]
    pub reported_for_account_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackEvent {
    pub event_type: String,
    pub event_hash: String,
    pub event_time: EventTime,
    #[serde(default)]
    pub event_metadata: EventMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestMetadata {
    #[serde(rename = "feeAgreementId", default)]
    pub fee_agreement_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackSignature {
    pub signature_id: String,
    #[serde(default)]
    pub signer_role: Option<String>,
    #[serde(default)]
    pub signer_email_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackSignatureRequest {
    #[serde(default)]
    pub signature_request_id: Option<String>,
    #[serde(default)]
    pub metadata: RequestMetadata,
    #[serde(default)]
    pub signatures: Vec<CallbackSignature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCallback {
    pub event: CallbackEvent,
    #[serde(default)]
    pub signature_request: Option<CallbackSignatureRequest>,
}

impl ProviderCallback {
    pub fn parse(payload: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(payload).map_err(|e| ValidationError::MalformedPayload(e.to_string()))
    }

    pub fn fee_agreement_id(&self) -> Option<&str> {
        self.signature_request
            .as_ref()
            .and_then(|request| request.metadata.fee_agreement_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn signature_request_id(&self) -> Option<&str> {
        self.signature_request
            .as_ref()
            .and_then(|request| request.signature_request_id.as_deref())
    }

    /// The signature the event is about, if the provider named one.
    pub fn related_signature(&self) -> Option<&CallbackSignature> {
        let related = self.event.event_metadata.related_signature_id.as_deref()?;
        self.signature_request
            .as_ref()?
            .signatures
            .iter()
            .find(|signature| signature.signature_id == related)
    }

    pub fn related_signer_role(&self) -> Option<SignerRole> {
        self.related_signature()
            .and_then(|signature| signature.signer_role.as_deref())
            .and_then(SignerRole::from_label)
    }

    pub fn real_date(&self) -> Option<TimeStamp> {
        self.event.event_time.timestamp()
    }
}

/// Hex encoded HMAC-SHA256 of `event_time ++ event_type`, keyed with the API key.
pub fn event_hash(api_key: &str, event_time: &str, event_type: &str) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(api_key.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid webhook api key: {e}"))?;
    mac.update(event_time.as_bytes());
    mac.update(event_type.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant time comparison of the callback's hash against the expected one.
pub fn verify(api_key: &str, callback: &ProviderCallback) -> Result<(), ValidationError> {
    let claimed =
        hex::decode(&callback.event.event_hash).map_err(|_| ValidationError::UnauthenticatedEvent)?;
    let mut mac = HmacSha256::new_from_slice(api_key.as_bytes())
        .map_err(|_| ValidationError::UnauthenticatedEvent)?;
    mac.update(callback.event.event_time.as_text().as_bytes());
    mac.update(callback.event.event_type.as_bytes());
    mac.verify_slice(&claimed)
        .map_err(|_| ValidationError::UnauthenticatedEvent)
}
