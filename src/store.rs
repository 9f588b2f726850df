//! sled persistence and the unit of work every lifecycle operation runs in.
use super::agreement::FeeAgreement;
use super::event_log::{DomainEvent, EventLogEntry, RawProviderEvent};
use super::types::TimeStamp;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::collections::{BTreeMap, HashMap};

const AGREEMENTS_TREE: &str = "fee_agreements";
const EVENT_LOGS_TREE: &str = "fee_agreement_event_logs";
const PROVIDER_EVENTS_TREE: &str = "provider_events";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("fee agreement {id} changed since it was read")]
    Conflict { id: String },
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

/// Collaborator writes held back until the unit of work is durable.
#[derive(Debug, Clone, PartialEq)]
pub enum AfterCommit {
    MarkAgreementDiscussed(String),
    UnlinkFeeAgreement(String),
    DeleteFile(String),
}

/// What a successful commit leaves for the caller to carry out.
#[derive(Debug, Default)]
pub struct Committed {
    pub domain_events: Vec<DomainEvent>,
    pub after_commit: Vec<AfterCommit>,
}

fn encode<T: minicbor::Encode<()>>(record: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(record).map_err(|e| StoreError::Encode(e.to_string()))
}

#[derive(Clone)]
pub struct Store {
    agreements: sled::Tree,
    event_logs: sled::Tree,
    provider_events: sled::Tree,
}

impl Store {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            agreements: db.open_tree(AGREEMENTS_TREE)?,
            event_logs: db.open_tree(EVENT_LOGS_TREE)?,
            provider_events: db.open_tree(PROVIDER_EVENTS_TREE)?,
        })
    }

    pub fn fee_agreement(&self, id: &str) -> Result<Option<FeeAgreement>, StoreError> {
        match self.agreements.get(id.as_bytes())? {
            Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn fee_agreements(&self) -> Result<Vec<FeeAgreement>, StoreError> {
        let mut agreements = vec![];
        for raw in self.agreements.iter().values() {
            agreements.push(minicbor::decode(&raw?)?);
        }
        Ok(agreements)
    }

    /// The agreement's audit trail, oldest first.
    pub fn event_logs(&self, fee_agreement_id: &str) -> Result<Vec<EventLogEntry>, StoreError> {
        let mut entries = vec![];
        for raw in self
            .event_logs
            .scan_prefix(format!("{fee_agreement_id}/").as_bytes())
            .values()
        {
            entries.push(minicbor::decode(&raw?)?);
        }
        Ok(entries)
    }

    pub fn provider_event(&self, event_hash: &str) -> Result<Option<RawProviderEvent>, StoreError> {
        match self.provider_events.get(event_hash.as_bytes())? {
            Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Stores the event unless its hash is already known. Returns the stored
    /// record when the event is a re-delivery.
    pub fn insert_provider_event(
        &self,
        event: &RawProviderEvent,
    ) -> Result<Option<RawProviderEvent>, StoreError> {
        let bytes = encode(event)?;
        match self
            .provider_events
            .compare_and_swap(event.id.as_bytes(), None::<&[u8]>, Some(bytes))?
        {
            Ok(()) => Ok(None),
            Err(existing) => match existing.current {
                Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
                None => Ok(None),
            },
        }
    }

    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork {
            store: self.clone(),
            staged: BTreeMap::new(),
            read_versions: HashMap::new(),
            event_logs: vec![],
            domain_events: vec![],
            after_commit: vec![],
        }
    }

    /// Applies every staged write in one multi-tree transaction. Fails with
    /// [`StoreError::Conflict`] when an agreement moved past the version the unit
    /// of work read. Returns the domain events to publish and the deferred
    /// collaborator writes.
    pub fn commit(&self, uow: UnitOfWork) -> Result<Committed, StoreError> {
        let UnitOfWork {
            staged,
            event_logs,
            domain_events,
            after_commit,
            ..
        } = uow;

        let mut agreements = Vec::with_capacity(staged.len());
        for (id, entry) in staged {
            agreements.push((id, entry.expected_version, encode(&entry.agreement)?));
        }
        let mut logs = Vec::with_capacity(event_logs.len());
        for entry in &event_logs {
            logs.push((entry.key(), encode(entry)?));
        }

        (&self.agreements, &self.event_logs)
            .transaction(|(agreements_tx, logs_tx)| {
                for (id, expected_version, bytes) in &agreements {
                    let current_version = match agreements_tx.get(id.as_bytes())? {
                        Some(raw) => Some(
                            minicbor::decode::<FeeAgreement>(&raw)
                                .map_err(|e| ConflictableTransactionError::Abort(e.into()))?
                                .version,
                        ),
                        None => None,
                    };
                    if current_version != *expected_version {
                        return Err(ConflictableTransactionError::Abort(StoreError::Conflict {
                            id: id.clone(),
                        }));
                    }
                    agreements_tx.insert(id.as_bytes(), bytes.as_slice())?;
                }
                for (key, bytes) in &logs {
                    logs_tx.insert(key.as_bytes(), bytes.as_slice())?;
                }
                Ok(())
            })
            .map_err(|err| match err {
                TransactionError::Abort(inner) => inner,
                TransactionError::Storage(inner) => StoreError::Backend(inner),
            })?;

        Ok(Committed {
            domain_events,
            after_commit,
        })
    }
}

struct Staged {
    agreement: FeeAgreement,
    expected_version: Option<u64>, // none for agreements that must not exist yet
}

/// Restores a borrowed unit of work after a failed operation.
pub struct Savepoint {
    staged: BTreeMap<String, FeeAgreement>,
    expected: BTreeMap<String, Option<u64>>,
    event_logs: usize,
    domain_events: usize,
    after_commit: usize,
}

/// Buffered writes of one logical transaction. Dropping it without
/// [`Store::commit`] discards everything.
pub struct UnitOfWork {
    store: Store,
    staged: BTreeMap<String, Staged>,
    read_versions: HashMap<String, Option<u64>>,
    event_logs: Vec<EventLogEntry>,
    domain_events: Vec<DomainEvent>,
    after_commit: Vec<AfterCommit>,
}

impl UnitOfWork {
    /// Reads through staged writes first.
    pub fn fee_agreement(&mut self, id: &str) -> Result<Option<FeeAgreement>, StoreError> {
        if let Some(entry) = self.staged.get(id) {
            return Ok(Some(entry.agreement.clone()));
        }
        let found = self.store.fee_agreement(id)?;
        self.read_versions
            .entry(id.to_string())
            .or_insert(found.as_ref().map(|a| a.version));
        Ok(found)
    }

    /// Stages the agreement, bumping its version relative to the first read.
    pub fn stage(&mut self, agreement: &mut FeeAgreement) {
        let expected_version = match self.staged.get(&agreement.id) {
            Some(entry) => entry.expected_version,
            None => self.read_versions.get(&agreement.id).copied().flatten(),
        };
        agreement.version = expected_version.map_or(1, |v| v + 1);
        agreement.updated_at = TimeStamp::new();

        self.staged.insert(
            agreement.id.clone(),
            Staged {
                agreement: agreement.clone(),
                expected_version,
            },
        );
    }

    pub fn append_event_log(&mut self, entry: EventLogEntry) {
        self.event_logs.push(entry);
    }

    pub fn defer(&mut self, event: DomainEvent) {
        self.domain_events.push(event);
    }

    pub fn after_commit(&mut self, effect: AfterCommit) {
        self.after_commit.push(effect);
    }

    pub fn staged_event_logs(&self) -> &[EventLogEntry] {
        &self.event_logs
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            staged: self
                .staged
                .iter()
                .map(|(id, entry)| (id.clone(), entry.agreement.clone()))
                .collect(),
            expected: self
                .staged
                .iter()
                .map(|(id, entry)| (id.clone(), entry.expected_version))
                .collect(),
            event_logs: self.event_logs.len(),
            domain_events: self.domain_events.len(),
            after_commit: self.after_commit.len(),
        }
    }

    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        let Savepoint {
            staged,
            mut expected,
            event_logs,
            domain_events,
            after_commit,
        } = savepoint;

        self.staged = staged
            .into_iter()
            .map(|(id, agreement)| {
                let expected_version = expected.remove(&id).flatten();
                (
                    id,
                    Staged {
                        agreement,
                        expected_version,
                    },
                )
            })
            .collect();
        self.event_logs.truncate(event_logs);
        self.domain_events.truncate(domain_events);
        self.after_commit.truncate(after_commit);
    }
}
