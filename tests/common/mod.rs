//! In-memory collaborators and a fake signature provider shared by the
//! integration tests. Every harness gets its own sled database in a temp dir.
#![allow(dead_code)]

use fee_approval::agreement::{FeeAgreement, FeeAgreementDraft};
use fee_approval::collaborators::{
    Company, CompanyDirectory, FileStore, HiringAuthority, Leadership, Notifier, TemplatedEmail,
    UserContact, UserDirectory, WhiteSheets,
};
use fee_approval::contract::{
    ContractManager, ContractSentDetails, SignatureClient, SignatureRequest, SignerRole,
    TemplateDetails,
};
use fee_approval::event_log::{DomainEvent, DomainEventName, EventBus};
use fee_approval::service::{Collaborators, FeeAgreementService};
use fee_approval::settings::{AgreementSettings, RetryPolicy};
use fee_approval::types::{Role, SignatureProvider};
use fee_approval::webhook;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

pub const API_KEY: &str = "test-webhook-key";
pub const COMPANY: &str = "company-1";
pub const EMPTY_COMPANY: &str = "company-2";
pub const HIRING_AUTHORITY: &str = "ha-1";
pub const EMPTY_COMPANY_HIRING_AUTHORITY: &str = "ha-2";
pub const RECRUITER: &str = "recruiter-1";
pub const OTHER_RECRUITER: &str = "recruiter-2";
pub const COACH: &str = "coach-1";
pub const REGIONAL_DIRECTOR: &str = "rd-1";
pub const OPERATIONS: &str = "ops-1";
pub const PRODUCTION_DIRECTOR: &str = "production-director";
pub const PDF_BASE64: &str = "JVBERi0xLjQKZmVlIGFncmVlbWVudA==";

pub struct FakeCompanies;

impl CompanyDirectory for FakeCompanies {
    fn find_company(&self, company_id: &str) -> anyhow::Result<Option<Company>> {
        Ok(self.company_exists(company_id)?.then(|| Company {
            id: company_id.to_string(),
            name: "Acme Robotics".to_string(),
        }))
    }
    fn company_exists(&self, company_id: &str) -> anyhow::Result<bool> {
        Ok(company_id == COMPANY || company_id == EMPTY_COMPANY)
    }
    fn find_hiring_authority(&self, hiring_authority_id: &str) -> anyhow::Result<Option<HiringAuthority>> {
        let company_id = match hiring_authority_id {
            HIRING_AUTHORITY => COMPANY,
            EMPTY_COMPANY_HIRING_AUTHORITY => EMPTY_COMPANY,
            _ => return Ok(None),
        };
        Ok(Some(HiringAuthority {
            id: hiring_authority_id.to_string(),
            company_id: company_id.to_string(),
            full_name: "Hana Ito".to_string(),
            email: Some("hana@personal.test".to_string()),
            work_email: Some("hana@acme.test".to_string()),
        }))
    }
    fn company_has_job_orders_to_sign(&self, company_id: &str) -> anyhow::Result<bool> {
        Ok(company_id == COMPANY)
    }
}

pub struct FakeUsers {
    roles: HashMap<&'static str, Vec<Role>>,
}

impl Default for FakeUsers {
    fn default() -> Self {
        let roles = HashMap::from([
            (RECRUITER, vec![Role::Recruiter]),
            (OTHER_RECRUITER, vec![Role::Recruiter]),
            (COACH, vec![Role::Recruiter, Role::Coach]),
            (REGIONAL_DIRECTOR, vec![Role::Coach, Role::RegionalDirector]),
            (OPERATIONS, vec![Role::Operations]),
        ]);
        Self { roles }
    }
}

impl UserDirectory for FakeUsers {
    fn highest_role(&self, user_id: &str) -> anyhow::Result<Option<Role>> {
        Ok(self
            .roles
            .get(user_id)
            .and_then(|roles| roles.iter().max().copied()))
    }
    fn has_role(&self, user_id: &str, role: Role) -> anyhow::Result<bool> {
        Ok(self
            .roles
            .get(user_id)
            .is_some_and(|roles| roles.contains(&role)))
    }
    fn coach_and_regional_director(&self, user_id: &str) -> anyhow::Result<Leadership> {
        let leadership = match user_id {
            RECRUITER => Leadership {
                coach_id: Some(COACH.to_string()),
                regional_director_id: Some(REGIONAL_DIRECTOR.to_string()),
            },
            OTHER_RECRUITER => Leadership {
                coach_id: None,
                regional_director_id: Some(REGIONAL_DIRECTOR.to_string()),
            },
            COACH => Leadership {
                coach_id: None,
                regional_director_id: Some(REGIONAL_DIRECTOR.to_string()),
            },
            _ => Leadership::default(),
        };
        Ok(leadership)
    }
    fn find_user(&self, user_id: &str) -> anyhow::Result<Option<UserContact>> {
        Ok(Some(UserContact {
            id: user_id.to_string(),
            full_name: format!("User {user_id}"),
            email: format!("{user_id}@agency.test"),
        }))
    }
}

#[derive(Default)]
pub struct FakeFiles {
    pub puts: Mutex<Vec<(String, Vec<u8>)>>,
    pub copies: Mutex<Vec<(String, String)>>,
    pub deletes: Mutex<Vec<String>>,
}

impl FileStore for FakeFiles {
    fn put(&self, path: &str, contents: &[u8]) -> anyhow::Result<String> {
        self.puts
            .lock()
            .unwrap()
            .push((path.to_string(), contents.to_vec()));
        Ok(format!("https://files.test/{path}"))
    }
    fn copy_file(&self, from: &str, to: &str) -> anyhow::Result<String> {
        self.copies
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string()));
        Ok(format!("https://files.test/{to}"))
    }
    fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.deletes.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<TemplatedEmail>>,
    pub failing: AtomicBool,
}

impl Notifier for FakeNotifier {
    fn send_templated_email(&self, email: TemplatedEmail) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("mail relay unavailable");
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeWhiteSheets {
    pub discussed: Mutex<Vec<String>>,
    pub unlinked: Mutex<Vec<String>>,
}

impl WhiteSheets for FakeWhiteSheets {
    fn mark_agreement_discussed(&self, fee_agreement_id: &str) -> anyhow::Result<()> {
        self.discussed
            .lock()
            .unwrap()
            .push(fee_agreement_id.to_string());
        Ok(())
    }
    fn unlink_fee_agreement(&self, fee_agreement_id: &str) -> anyhow::Result<()> {
        self.unlinked
            .lock()
            .unwrap()
            .push(fee_agreement_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBus {
    pub events: Mutex<Vec<DomainEvent>>,
}

impl RecordingBus {
    pub fn count(&self, name: DomainEventName) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.name == name)
            .count()
    }
}

impl EventBus for RecordingBus {
    fn publish(&self, event: &DomainEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

type SendHook = Box<dyn FnOnce() + Send>;

/// Provider double. Contract ids are `<prefix>-<fee agreement id>`.
pub struct FakeSignatureClient {
    provider: SignatureProvider,
    pub sent: Mutex<Vec<SignatureRequest>>,
    pub voided: Mutex<Vec<String>>,
    pub reminders: Mutex<Vec<(String, String)>>,
    pub signer_updates: Mutex<Vec<(String, String)>>,
    pub template_failures: AtomicU32,
    pub failing_void: AtomicBool,
    on_send: Mutex<Option<SendHook>>,
}

impl FakeSignatureClient {
    pub fn new(provider: SignatureProvider) -> Self {
        Self {
            provider,
            sent: Mutex::new(vec![]),
            voided: Mutex::new(vec![]),
            reminders: Mutex::new(vec![]),
            signer_updates: Mutex::new(vec![]),
            template_failures: AtomicU32::new(0),
            failing_void: AtomicBool::new(false),
            on_send: Mutex::new(None),
        }
    }

    pub fn contract_id_for(&self, fee_agreement_id: &str) -> String {
        match self.provider {
            SignatureProvider::HelloSign => format!("hs-{fee_agreement_id}"),
            SignatureProvider::DocuSign => format!("ds-{fee_agreement_id}"),
        }
    }

    /// Runs `hook` once, from inside the next `send`, after the provider has
    /// accepted the request but before the caller has stored anything.
    pub fn on_next_send(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_send.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl SignatureClient for FakeSignatureClient {
    fn provider(&self) -> SignatureProvider {
        self.provider
    }
    fn template_details(&self, template_id: &str) -> anyhow::Result<TemplateDetails> {
        let failures = self.template_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.template_failures.store(failures - 1, Ordering::SeqCst);
            anyhow::bail!("template service timed out");
        }
        Ok(TemplateDetails {
            template_id: template_id.to_string(),
            signer_roles: vec![
                SignerRole::HiringAuthority.label().to_string(),
                SignerRole::ProductionDirector.label().to_string(),
            ],
        })
    }
    fn send(
        &self,
        request: &SignatureRequest,
        _: &TemplateDetails,
    ) -> anyhow::Result<ContractSentDetails> {
        self.sent.lock().unwrap().push(request.clone());
        let contract_id = self.contract_id_for(&request.fee_agreement_id);

        let hook = self.on_send.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }

        Ok(match self.provider {
            SignatureProvider::HelloSign => ContractSentDetails::HelloSign {
                signing_url: Some(format!("https://sign.test/{contract_id}")),
                signature_request_id: contract_id,
            },
            SignatureProvider::DocuSign => ContractSentDetails::DocuSign {
                uri: Some(format!("/envelopes/{contract_id}")),
                envelope_id: contract_id,
            },
        })
    }
    fn void(&self, contract_id: &str) -> anyhow::Result<()> {
        if self.failing_void.load(Ordering::SeqCst) {
            anyhow::bail!("provider refused to void {contract_id}");
        }
        self.voided.lock().unwrap().push(contract_id.to_string());
        Ok(())
    }
    fn remind(&self, contract_id: &str, email: &str) -> anyhow::Result<()> {
        self.reminders
            .lock()
            .unwrap()
            .push((contract_id.to_string(), email.to_string()));
        Ok(())
    }
    fn files_in_base64(&self, _: &str) -> anyhow::Result<String> {
        Ok(PDF_BASE64.to_string())
    }
    fn update_signer_email(&self, contract_id: &str, _: SignerRole, email: &str) -> anyhow::Result<()> {
        self.signer_updates
            .lock()
            .unwrap()
            .push((contract_id.to_string(), email.to_string()));
        Ok(())
    }
    fn signer_email(&self, contract_id: &str, role: SignerRole) -> anyhow::Result<Option<String>> {
        let sent = self.sent.lock().unwrap();
        Ok(sent
            .iter()
            .rev()
            .find(|request| self.contract_id_for(&request.fee_agreement_id) == contract_id)
            .and_then(|request| request.signers.iter().find(|signer| signer.role == role))
            .map(|signer| signer.email.clone()))
    }
}

pub struct Harness {
    pub service: Arc<FeeAgreementService>,
    pub hellosign: Arc<FakeSignatureClient>,
    pub docusign: Arc<FakeSignatureClient>,
    pub files: Arc<FakeFiles>,
    pub notifier: Arc<FakeNotifier>,
    pub white_sheets: Arc<FakeWhiteSheets>,
    pub bus: Arc<RecordingBus>,
    _temp_dir: TempDir,
}

pub fn harness() -> anyhow::Result<Harness> {
    let _ = env_logger::builder().is_test(true).try_init();

    // one sled database per test, sled holds a file lock on it
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("fee_agreements.db"))?);

    let settings = AgreementSettings {
        webhook_api_key: API_KEY.to_string(),
        production_director_signer_id: PRODUCTION_DIRECTOR.to_string(),
        ..AgreementSettings::default()
    };
    let retry = RetryPolicy {
        attempts: settings.template_lookup_attempts,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    let hellosign = Arc::new(FakeSignatureClient::new(SignatureProvider::HelloSign));
    let docusign = Arc::new(FakeSignatureClient::new(SignatureProvider::DocuSign));
    let contracts = ContractManager::new(settings.default_provider, retry)
        .with_client(hellosign.clone())
        .with_client(docusign.clone());

    let files = Arc::new(FakeFiles::default());
    let notifier = Arc::new(FakeNotifier::default());
    let white_sheets = Arc::new(FakeWhiteSheets::default());
    let bus = Arc::new(RecordingBus::default());
    let collaborators = Collaborators {
        companies: Arc::new(FakeCompanies),
        users: Arc::new(FakeUsers::default()),
        files: files.clone(),
        notifier: notifier.clone(),
        white_sheets: white_sheets.clone(),
    };

    let service = FeeAgreementService::new(db, settings, contracts, collaborators, bus.clone())?;

    Ok(Harness {
        service: Arc::new(service),
        hellosign,
        docusign,
        files,
        notifier,
        white_sheets,
        bus,
        _temp_dir: temp_dir,
    })
}

pub fn standard_draft(fee_percentage: f64) -> FeeAgreementDraft {
    FeeAgreementDraft::new(COMPANY, HIRING_AUTHORITY).set_fee_percentage(fee_percentage)
}

impl Harness {
    /// Standard agreement created by the recruiter, pending coach validation.
    pub fn recruiter_agreement(&self) -> anyhow::Result<FeeAgreement> {
        let created = self
            .service
            .create_standard(&standard_draft(20.0), RECRUITER, None, None)?;
        created
            .into_data()
            .ok_or_else(|| anyhow::anyhow!("creation failed"))
    }

    /// Standard agreement created by the coach and sent straight to sign.
    pub fn sent_agreement(&self) -> anyhow::Result<FeeAgreement> {
        let created = self
            .service
            .create_standard(&standard_draft(20.0), COACH, None, None)?;
        created
            .into_data()
            .ok_or_else(|| anyhow::anyhow!("creation failed"))
    }

    pub fn reload(&self, fee_agreement_id: &str) -> anyhow::Result<FeeAgreement> {
        self.service
            .find(fee_agreement_id)
            .into_data()
            .ok_or_else(|| anyhow::anyhow!("fee agreement {fee_agreement_id} not found"))
    }

    pub fn history_len(&self, fee_agreement_id: &str) -> usize {
        self.service
            .history(fee_agreement_id)
            .into_data()
            .map_or(0, |entries| entries.len())
    }
}

/// Distinct provider event times, so every callback gets its own event hash.
pub fn next_event_time() -> i64 {
    static NEXT: AtomicI64 = AtomicI64::new(1_718_000_000);
    NEXT.fetch_add(60, Ordering::SeqCst)
}

/// A signed provider callback body.
pub fn callback(
    event_type: &str,
    event_time: i64,
    fee_agreement_id: Option<&str>,
    signature_request_id: &str,
    related_signer: Option<SignerRole>,
) -> String {
    let event_hash = webhook::event_hash(API_KEY, &event_time.to_string(), event_type)
        .unwrap_or_default();
    let related = related_signer.map(|role| match role {
        SignerRole::HiringAuthority => "sig-ha",
        SignerRole::ProductionDirector => "sig-pd",
    });

    serde_json::json!({
        "event": {
            "event_type": event_type,
            "event_time": event_time.to_string(),
            "event_hash": event_hash,
            "event_metadata": { "related_signature_id": related }
        },
        "signature_request": {
            "signature_request_id": signature_request_id,
            "metadata": { "feeAgreementId": fee_agreement_id },
            "signatures": [
                {
                    "signature_id": "sig-ha",
                    "signer_role": "Hiring Authority",
                    "signer_email_address": "hana@acme.test"
                },
                {
                    "signature_id": "sig-pd",
                    "signer_role": "Production Director",
                    "signer_email_address": "production-director@agency.test"
                }
            ]
        }
    })
    .to_string()
}
