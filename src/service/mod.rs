//! Service layer API for the fee agreement lifecycle
mod creation;
mod provider_events;
mod signature;
mod validation;

use super::agreement::FeeAgreement;
use super::collaborators::{CompanyDirectory, FileStore, Notifier, UserDirectory, WhiteSheets};
use super::contract::{ContractManager, Signer, SignerRole, SignatureRequest, fill_contract_information};
use super::error::{FeeAgreementError, OperationResult, ValidationError, settle};
use super::event_log::{DomainEvent, DomainEventName, EventBus, EventLogEntry, RawProviderEvent};
use super::settings::AgreementSettings;
use super::status;
use super::store::{AfterCommit, Store, UnitOfWork};
use super::types::{EventType, FeeAgreementStatus, Role, TimeStamp};
use serde_json::json;
use std::sync::Arc;

/// The back office interfaces the lifecycle engine reads from and notifies.
#[derive(Clone)]
pub struct Collaborators {
    pub companies: Arc<dyn CompanyDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub files: Arc<dyn FileStore>,
    pub notifier: Arc<dyn Notifier>,
    pub white_sheets: Arc<dyn WhiteSheets>,
}

pub struct FeeAgreementService {
    store: Store,
    settings: AgreementSettings,
    contracts: ContractManager,
    collaborators: Collaborators,
    events: Arc<dyn EventBus>,
}

impl FeeAgreementService {
    pub fn new(
        instance: Arc<sled::Db>,
        settings: AgreementSettings,
        contracts: ContractManager,
        collaborators: Collaborators,
        events: Arc<dyn EventBus>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store: Store::open(&instance)?,
            settings,
            contracts,
            collaborators,
            events,
        })
    }

    pub fn settings(&self) -> &AgreementSettings {
        &self.settings
    }

    /// Opens a unit of work a caller can thread through several operations.
    pub fn begin(&self) -> UnitOfWork {
        self.store.begin()
    }

    /// Commits a unit of work, then carries out its deferred collaborator
    /// writes and publishes its domain events.
    pub fn commit(&self, uow: UnitOfWork) -> Result<(), FeeAgreementError> {
        let committed = self.store.commit(uow)?;
        for effect in &committed.after_commit {
            self.run_after_commit(effect);
        }
        for event in &committed.domain_events {
            log::info!(
                "fee agreement {} committed as {:?}",
                event.fee_agreement_id,
                event.status
            );
            self.events.publish(event);
        }
        Ok(())
    }

    /// The agreement is already durable, a failed follow-up is logged only.
    fn run_after_commit(&self, effect: &AfterCommit) {
        let white_sheets = &self.collaborators.white_sheets;
        let result = match effect {
            AfterCommit::MarkAgreementDiscussed(id) => white_sheets.mark_agreement_discussed(id),
            AfterCommit::UnlinkFeeAgreement(id) => white_sheets.unlink_fee_agreement(id),
            AfterCommit::DeleteFile(path) => self.collaborators.files.delete(path),
        };
        if let Err(err) = result {
            log::warn!("could not complete {effect:?} after commit: {err:#}");
        }
    }

    /// Runs `op` in the caller's unit of work, or in a fresh one committed on
    /// success. A borrowed unit of work is restored to its state before `op`
    /// when `op` fails.
    pub(crate) fn within<T>(
        &self,
        tx: Option<&mut UnitOfWork>,
        op: impl FnOnce(&mut UnitOfWork) -> Result<T, FeeAgreementError>,
    ) -> Result<T, FeeAgreementError> {
        match tx {
            Some(uow) => {
                let savepoint = uow.savepoint();
                let result = op(uow);
                if result.is_err() {
                    uow.rollback_to(savepoint);
                }
                result
            }
            None => {
                let mut uow = self.store.begin();
                let value = op(&mut uow)?;
                self.commit(uow)?;
                Ok(value)
            }
        }
    }

    /// [`Self::within`] for validations that send the document out. When the
    /// provider's `sent` callback advanced the agreement while the request was
    /// in flight, the validation is recorded on top of that advance.
    pub(crate) fn within_sending(
        &self,
        tx: Option<&mut UnitOfWork>,
        op: impl FnOnce(&mut UnitOfWork) -> Result<FeeAgreement, FeeAgreementError>,
    ) -> Result<FeeAgreement, FeeAgreementError> {
        if tx.is_some() {
            return self.within(tx, op);
        }

        let mut uow = self.store.begin();
        let validated = op(&mut uow)?;
        let validation = uow
            .staged_event_logs()
            .last()
            .filter(|entry| entry.event_type.sends_to_sign())
            .cloned();
        match (self.commit(uow), validation) {
            (Ok(()), _) => Ok(validated),
            (Err(FeeAgreementError::Conflict(message)), Some(validation)) => self
                .record_validation_after_sent(&validated, &validation)?
                .ok_or(FeeAgreementError::Conflict(message)),
            (Err(err), _) => Err(err),
        }
    }

    /// Copies the validator's outcome onto an agreement the `sent` callback
    /// already moved to pending signature for the same contract. Returns `None`
    /// when the stored agreement moved anywhere else.
    fn record_validation_after_sent(
        &self,
        validated: &FeeAgreement,
        validation: &EventLogEntry,
    ) -> Result<Option<FeeAgreement>, FeeAgreementError> {
        let mut uow = self.store.begin();
        let mut agreement = Self::load(&mut uow, &validated.id)?;
        if agreement.status != FeeAgreementStatus::PendingHiringAuthoritySignature
            || agreement.contract_id != validated.contract_id
        {
            return Ok(None);
        }

        agreement.operations_validator_id = validated.operations_validator_id.clone();
        agreement.validated_date = validated.validated_date;
        agreement.template_id = validated.template_id.clone();
        agreement.sign_url = validated.sign_url.clone();
        agreement.electronic_signature_provider = validated.electronic_signature_provider;
        agreement.clear_declination();

        let triggered_by = validation.triggered_by_user_id.as_deref();
        let details = json!({
            "validated_event": format!("{:?}", validation.event_type),
            "contract_id": agreement.contract_id,
        });
        self.apply(
            &mut uow,
            &mut agreement,
            EventType::ValidationRecordedAfterSent,
            triggered_by,
            details,
            None,
        )?;
        if let Some(name) = DomainEventName::for_event(validation.event_type) {
            uow.defer(DomainEvent {
                name,
                fee_agreement_id: agreement.id.clone(),
                status: agreement.status,
                triggered_by_user_id: triggered_by.map(str::to_string),
            });
        }
        self.commit(uow)?;

        log::info!(
            "fee agreement {} was reported sent before its validation committed, validation recorded",
            agreement.id
        );
        Ok(Some(agreement))
    }

    pub fn find(&self, fee_agreement_id: &str) -> OperationResult<FeeAgreement> {
        settle(
            self.store
                .fee_agreement(fee_agreement_id)
                .map_err(FeeAgreementError::from)
                .and_then(|found| found.ok_or_else(|| FeeAgreementError::not_found("Fee agreement"))),
        )
    }

    /// Audit trail of the agreement, oldest first.
    pub fn history(&self, fee_agreement_id: &str) -> OperationResult<Vec<EventLogEntry>> {
        settle(self.load_history(fee_agreement_id))
    }

    fn load_history(&self, fee_agreement_id: &str) -> Result<Vec<EventLogEntry>, FeeAgreementError> {
        if self.store.fee_agreement(fee_agreement_id)?.is_none() {
            return Err(FeeAgreementError::not_found("Fee agreement"));
        }
        Ok(self.store.event_logs(fee_agreement_id)?)
    }

    fn load(uow: &mut UnitOfWork, fee_agreement_id: &str) -> Result<FeeAgreement, FeeAgreementError> {
        uow.fee_agreement(fee_agreement_id)?
            .ok_or_else(|| FeeAgreementError::not_found("Fee agreement"))
    }

    fn role_of(&self, user_id: &str) -> Result<Role, FeeAgreementError> {
        self.collaborators
            .users
            .highest_role(user_id)?
            .ok_or_else(FeeAgreementError::forbidden)
    }

    fn authorize(role: Role, event: EventType) -> Result<(), FeeAgreementError> {
        if !status::role_can_trigger(role, event) {
            return Err(FeeAgreementError::forbidden());
        }
        Ok(())
    }

    /// Creator, their leaders and operations may act on an agreement's signature request.
    fn ensure_involved(
        role: Role,
        agreement: &FeeAgreement,
        user_id: &str,
    ) -> Result<(), FeeAgreementError> {
        if role == Role::Operations
            || agreement.creator_id == user_id
            || agreement.is_party_leader(user_id)
        {
            return Ok(());
        }
        Err(FeeAgreementError::forbidden())
    }

    /// The status `event` leads to, or a conflict when it is not a legal move
    /// from the current one.
    fn ensure_transition(
        agreement: &FeeAgreement,
        event: EventType,
    ) -> Result<FeeAgreementStatus, FeeAgreementError> {
        let current = (!event.is_creation()).then_some(agreement.status);
        status::calculate_status(current, event).ok_or_else(|| {
            FeeAgreementError::conflict(format!(
                "Fee agreement in status {:?} does not accept {:?}",
                agreement.status, event
            ))
        })
    }

    /// Applies `event` to the agreement: recomputes status and responsible party,
    /// sends the document when the event requires it, stages the agreement with
    /// its single event log row and defers the matching domain event.
    fn apply(
        &self,
        uow: &mut UnitOfWork,
        agreement: &mut FeeAgreement,
        event: EventType,
        triggered_by: Option<&str>,
        details: serde_json::Value,
        external: Option<&RawProviderEvent>,
    ) -> Result<(), FeeAgreementError> {
        let next = Self::ensure_transition(agreement, event)?;

        if event.sends_to_sign() {
            self.send_to_sign(agreement)?;
        }

        agreement.status = next;
        agreement.current_responsible = status::current_responsible(next, agreement);
        uow.stage(agreement);

        let mut entry = EventLogEntry::new(&agreement.id, event, triggered_by, next, &details);
        if let Some(raw) = external {
            entry = entry.with_external_event(&raw.id, raw.real_date);
        }
        uow.append_event_log(entry);

        if let Some(name) = DomainEventName::for_event(event) {
            uow.defer(DomainEvent {
                name,
                fee_agreement_id: agreement.id.clone(),
                status: next,
                triggered_by_user_id: triggered_by.map(str::to_string),
            });
        }
        Ok(())
    }

    /// Sends the document through the agreement's provider (or the default one)
    /// and records the returned contract reference.
    fn send_to_sign(&self, agreement: &mut FeeAgreement) -> Result<(), FeeAgreementError> {
        let companies = &self.collaborators.companies;
        let company = companies
            .find_company(&agreement.company_id)?
            .ok_or_else(|| FeeAgreementError::not_found("Company"))?;
        let hiring_authority = companies
            .find_hiring_authority(&agreement.hiring_authority_id)?
            .ok_or_else(|| FeeAgreementError::not_found("Hiring authority"))?;
        let production_director = self
            .collaborators
            .users
            .find_user(&agreement.production_director_signer_id)?
            .ok_or_else(|| FeeAgreementError::not_found("Production director"))?;

        let hiring_authority_email = agreement
            .ha_email
            .clone()
            .or_else(|| hiring_authority.contact_email().map(str::to_string))
            .ok_or_else(|| ValidationError::InvalidEmail(hiring_authority.full_name.clone()))?;

        let template_id = self
            .settings
            .templates
            .for_scheme(agreement.payment_scheme)
            .to_string();
        let request = SignatureRequest::for_agreement(
            agreement,
            &template_id,
            &company,
            Signer {
                role: SignerRole::HiringAuthority,
                name: hiring_authority.full_name.clone(),
                email: hiring_authority_email,
            },
            Signer {
                role: SignerRole::ProductionDirector,
                name: production_director.full_name,
                email: production_director.email,
            },
        );

        let sent = self
            .contracts
            .send_fee_agreement(&request, agreement.electronic_signature_provider)?;
        let contract = fill_contract_information(&sent.contract_sent_details);

        agreement.template_id = Some(template_id);
        agreement.electronic_signature_provider = Some(sent.provider_id);
        agreement.contract_id = Some(contract.contract_id);
        agreement.sign_url = contract.sign_url;
        agreement.tracking_sent_to_sign_date = Some(TimeStamp::new());
        Ok(())
    }
}
