//! Signature provider callbacks: persisted raw first, then mapped onto lifecycle events.
use super::FeeAgreementService;
use crate::agreement::FeeAgreement;
use crate::collaborators::{Attachment, TemplatedEmail};
use crate::contract::SignerRole;
use crate::error::{FeeAgreementError, OperationResult};
use crate::event_log::RawProviderEvent;
use crate::store::{AfterCommit, UnitOfWork};
use crate::types::{EventType, FeeAgreementStatus, TimeStamp};
use crate::utils::fee_agreement_pdf_path;
use crate::webhook::{self, ProviderCallback, ProviderEventKind};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Duration;
use serde_json::json;

// webhook transitions race with user actions, a lost version check is retried
const CONFLICT_ATTEMPTS: u32 = 3;

impl FeeAgreementService {
    /// Entry point for provider callbacks. The raw event is stored before any
    /// processing; a re-delivered event returns the stored record untouched.
    pub fn handle_signature_event(&self, payload: &str) -> OperationResult<RawProviderEvent> {
        let callback = match ProviderCallback::parse(payload) {
            Ok(callback) => callback,
            Err(err) => {
                log::warn!("rejected provider callback: {err}");
                return FeeAgreementError::from(err).into();
            }
        };
        if let Err(err) = webhook::verify(&self.settings.webhook_api_key, &callback) {
            log::warn!(
                "rejected provider callback {} ({}): {err}",
                callback.event.event_hash,
                callback.event.event_type
            );
            return FeeAgreementError::Forbidden(err.to_string()).into();
        }

        let raw = RawProviderEvent {
            id: callback.event.event_hash.clone(),
            fee_agreement_id: callback.fee_agreement_id().map(str::to_string),
            event_type: callback.event.event_type.clone(),
            data: payload.to_string(),
            real_date: callback.real_date(),
            received_at: TimeStamp::new(),
        };
        match self.store.insert_provider_event(&raw) {
            Ok(None) => {}
            Ok(Some(stored)) => {
                log::info!("provider event {} already received, ignoring", stored.id);
                return OperationResult::ok(stored);
            }
            Err(err) => return FeeAgreementError::from(err).into(),
        }

        let (Some(kind), Some(fee_agreement_id)) =
            (webhook::handler_for(&raw.event_type), raw.fee_agreement_id.clone())
        else {
            log::debug!("provider event {} ({}) needs no processing", raw.id, raw.event_type);
            return OperationResult::ok(raw);
        };

        let result = self.retry_on_conflict(|| {
            self.within(None, |uow| {
                self.dispatch(uow, kind, &fee_agreement_id, &callback, &raw)
            })
        });
        match result {
            Ok(()) => {}
            Err(FeeAgreementError::NotFound(_)) => {
                log::warn!(
                    "provider event {} references unknown fee agreement {fee_agreement_id}",
                    raw.id
                );
                return OperationResult::ok(raw);
            }
            Err(err) => return err.into(),
        }

        if kind == ProviderEventKind::Sent {
            self.notify_cc_recipients(&fee_agreement_id);
        }
        OperationResult::ok(raw)
    }

    fn retry_on_conflict<T>(
        &self,
        mut op: impl FnMut() -> Result<T, FeeAgreementError>,
    ) -> Result<T, FeeAgreementError> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(FeeAgreementError::Conflict(message)) if attempt < CONFLICT_ATTEMPTS => {
                    log::debug!("provider event lost a race ({message}), retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn dispatch(
        &self,
        uow: &mut UnitOfWork,
        kind: ProviderEventKind,
        fee_agreement_id: &str,
        callback: &ProviderCallback,
        raw: &RawProviderEvent,
    ) -> Result<(), FeeAgreementError> {
        let mut agreement = Self::load(uow, fee_agreement_id)?;
        match kind {
            ProviderEventKind::Downloadable => self.on_downloadable(uow, &mut agreement, callback),
            ProviderEventKind::Signed => self.on_signed(uow, &mut agreement, callback, raw),
            ProviderEventKind::Sent => self.on_sent(uow, &mut agreement, callback, raw),
            ProviderEventKind::Viewed => self.on_viewed(uow, &mut agreement, callback, raw),
            ProviderEventKind::EmailBounce => self.on_email_bounce(uow, &mut agreement, callback, raw),
            ProviderEventKind::Reminded => self.on_reminded(uow, &mut agreement, raw),
        }
    }

    /// Caches the provider's PDF. Identical documents are not uploaded again.
    fn on_downloadable(
        &self,
        uow: &mut UnitOfWork,
        agreement: &mut FeeAgreement,
        callback: &ProviderCallback,
    ) -> Result<(), FeeAgreementError> {
        let provider = agreement
            .electronic_signature_provider
            .unwrap_or(self.contracts.default_provider());
        let Some(contract_id) = agreement
            .contract_id
            .clone()
            .or_else(|| callback.signature_request_id().map(str::to_string))
        else {
            log::warn!("fee agreement {} has no contract to download", agreement.id);
            return Ok(());
        };

        let encoded = self.contracts.get_files_in_base64(provider, &contract_id)?;
        let pdf = BASE64
            .decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("provider returned an undecodable document: {e}"))?;
        let checksum = sha256::digest(&pdf);
        if agreement.pdf_checksum.as_deref() == Some(checksum.as_str()) {
            return Ok(());
        }

        let url = self
            .collaborators
            .files
            .put(&fee_agreement_pdf_path(&agreement.id), &pdf)?;
        agreement.pdf_url = Some(url);
        agreement.pdf_checksum = Some(checksum);
        uow.stage(agreement);
        Ok(())
    }

    /// The signer is implied by the status the agreement is in.
    fn on_signed(
        &self,
        uow: &mut UnitOfWork,
        agreement: &mut FeeAgreement,
        callback: &ProviderCallback,
        raw: &RawProviderEvent,
    ) -> Result<(), FeeAgreementError> {
        let expected = match agreement.status {
            FeeAgreementStatus::PendingHiringAuthoritySignature => Some(SignerRole::HiringAuthority),
            FeeAgreementStatus::PendingProductionDirectorSignature => {
                Some(SignerRole::ProductionDirector)
            }
            _ => None,
        };
        if let (Some(expected), Some(reported)) = (expected, callback.related_signer_role()) {
            if expected != reported {
                log::warn!(
                    "provider event {} reports a {} signature on fee agreement {} waiting for the {}",
                    raw.id,
                    reported.label(),
                    agreement.id,
                    expected.label()
                );
            }
        }

        let signed_at = raw.real_date.unwrap_or_else(TimeStamp::new);
        match agreement.status {
            FeeAgreementStatus::PendingHiringAuthoritySignature => {
                agreement.hiring_authority_sign_date = Some(signed_at);
                self.apply(
                    uow,
                    agreement,
                    EventType::SignedByHiringAuthority,
                    None,
                    json!({}),
                    Some(raw),
                )
            }
            FeeAgreementStatus::PendingProductionDirectorSignature => {
                agreement.production_director_signed_date = Some(signed_at);
                agreement.signed_date = Some(signed_at);
                agreement.tracking_signed_date = Some(signed_at.next_business_day());
                self.apply(
                    uow,
                    agreement,
                    EventType::SignedByProductionDirector,
                    None,
                    json!({}),
                    Some(raw),
                )?;
                uow.after_commit(AfterCommit::MarkAgreementDiscussed(agreement.id.clone()));
                Ok(())
            }
            status => {
                log::info!(
                    "ignoring signature of fee agreement {} in status {status:?}",
                    agreement.id
                );
                Ok(())
            }
        }
    }

    /// Records the provider reference. An agreement still waiting for internal
    /// validation is moved to pending signature; anything later is left alone.
    fn on_sent(
        &self,
        uow: &mut UnitOfWork,
        agreement: &mut FeeAgreement,
        callback: &ProviderCallback,
        raw: &RawProviderEvent,
    ) -> Result<(), FeeAgreementError> {
        let mut changed = false;
        if agreement.contract_id.is_none() {
            if let Some(contract_id) = callback.signature_request_id() {
                agreement.contract_id = Some(contract_id.to_string());
                changed = true;
            }
        }
        if agreement.electronic_signature_provider.is_none() {
            agreement.electronic_signature_provider = Some(self.contracts.default_provider());
            changed = true;
        }

        if agreement.status.is_pre_signature_validation() {
            let sent_at = raw.real_date.unwrap_or_else(TimeStamp::new);
            agreement.tracking_sent_to_sign_date = Some(sent_at);
            agreement.validated_date.get_or_insert(sent_at);
            agreement.clear_declination();
            let details = json!({ "contract_id": agreement.contract_id });
            return self.apply(
                uow,
                agreement,
                EventType::SignatureRequestSentReconciled,
                None,
                details,
                Some(raw),
            );
        }

        if changed {
            uow.stage(agreement);
        }
        Ok(())
    }

    fn on_viewed(
        &self,
        uow: &mut UnitOfWork,
        agreement: &mut FeeAgreement,
        callback: &ProviderCallback,
        raw: &RawProviderEvent,
    ) -> Result<(), FeeAgreementError> {
        if !agreement.status.is_awaiting_signature() {
            return Ok(());
        }
        let viewer = callback.related_signer_role().unwrap_or(match agreement.status {
            FeeAgreementStatus::PendingProductionDirectorSignature => SignerRole::ProductionDirector,
            _ => SignerRole::HiringAuthority,
        });
        let event = match viewer {
            SignerRole::HiringAuthority => EventType::ViewedByHiringAuthority,
            SignerRole::ProductionDirector => EventType::ViewedByProductionDirector,
        };
        self.apply(uow, agreement, event, None, json!({}), Some(raw))
    }

    fn on_email_bounce(
        &self,
        uow: &mut UnitOfWork,
        agreement: &mut FeeAgreement,
        callback: &ProviderCallback,
        raw: &RawProviderEvent,
    ) -> Result<(), FeeAgreementError> {
        if !agreement.status.is_awaiting_signature() {
            return Ok(());
        }
        let details = json!({
            "signer_email": callback
                .related_signature()
                .and_then(|signature| signature.signer_email_address.clone()),
        });
        self.apply(
            uow,
            agreement,
            EventType::SignatureEmailBounced,
            None,
            details,
            Some(raw),
        )
    }

    /// Reminder callbacks stamped within the last hour are provider retry noise.
    fn on_reminded(
        &self,
        uow: &mut UnitOfWork,
        agreement: &mut FeeAgreement,
        raw: &RawProviderEvent,
    ) -> Result<(), FeeAgreementError> {
        if !agreement.status.is_awaiting_signature() {
            return Ok(());
        }
        if let Some(reminded_at) = raw.real_date {
            let age = TimeStamp::new().to_datetime_utc() - reminded_at.to_datetime_utc();
            if age.abs() < Duration::hours(1) {
                log::debug!("ignoring recent reminder callback {}", raw.id);
                return Ok(());
            }
        }
        self.apply(
            uow,
            agreement,
            EventType::ReminderDeliveredByProvider,
            None,
            json!({}),
            Some(raw),
        )
    }

    /// Sends the CC recipients a copy of the document. Failures are logged only.
    fn notify_cc_recipients(&self, fee_agreement_id: &str) {
        if let Err(err) = self.try_notify_cc_recipients(fee_agreement_id) {
            log::warn!("could not notify cc recipients of fee agreement {fee_agreement_id}: {err:#}");
        }
    }

    fn try_notify_cc_recipients(&self, fee_agreement_id: &str) -> anyhow::Result<()> {
        let Some(agreement) = self.store.fee_agreement(fee_agreement_id)? else {
            return Ok(());
        };
        if agreement.cc_emails.is_empty() {
            return Ok(());
        }
        let (Some(provider), Some(contract_id)) =
            (agreement.electronic_signature_provider, agreement.contract_id.as_deref())
        else {
            return Ok(());
        };

        let document = self.contracts.get_files_in_base64(provider, contract_id)?;
        self.collaborators.notifier.send_templated_email(TemplatedEmail {
            recipients: agreement.cc_emails.clone(),
            template_data: json!({
                "fee_agreement_id": agreement.id,
                "company_id": agreement.company_id,
                "payment_scheme": agreement.payment_scheme.as_str(),
            }),
            config_key: self.settings.cc_email_config_key.clone(),
            attachments: vec![Attachment {
                filename: "fee-agreement.pdf".to_string(),
                content_base64: document,
            }],
        })
    }
}
