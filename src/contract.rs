//! E-signature provider abstraction. The lifecycle engine only sees
//! [`ContractSent`] and [`ContractInformation`]; everything provider specific
//! stays behind [`SignatureClient`] and [`fill_contract_information`].
use super::agreement::FeeAgreement;
use super::collaborators::Company;
use super::settings::RetryPolicy;
use super::types::{PaymentScheme, SignatureProvider};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignerRole {
    HiringAuthority,
    ProductionDirector,
}

impl SignerRole {
    /// Role label as configured on the provider templates.
    pub fn label(&self) -> &'static str {
        match self {
            SignerRole::HiringAuthority => "Hiring Authority",
            SignerRole::ProductionDirector => "Production Director",
        }
    }
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Hiring Authority" => Some(SignerRole::HiringAuthority),
            "Production Director" => Some(SignerRole::ProductionDirector),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signer {
    pub role: SignerRole,
    pub name: String,
    pub email: String,
}

/// Provider neutral description of a document to send for signature.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureRequest {
    pub fee_agreement_id: String,
    pub template_id: String,
    pub title: String,
    pub signers: Vec<Signer>,
    pub cc_emails: Vec<String>,
    pub custom_fields: Vec<(String, String)>,
}

impl SignatureRequest {
    pub fn for_agreement(
        agreement: &FeeAgreement,
        template_id: &str,
        company: &Company,
        hiring_authority: Signer,
        production_director: Signer,
    ) -> Self {
        let mut custom_fields = vec![
            ("company_name".to_string(), company.name.clone()),
            ("guarantee_days".to_string(), agreement.guarantee_days.to_string()),
        ];
        match agreement.payment_scheme {
            PaymentScheme::Flat => {
                if let Some(amount) = agreement.flat_fee_amount {
                    custom_fields.push(("flat_fee_amount".to_string(), amount.to_string()));
                }
            }
            _ => {
                if let Some(fee) = agreement.fee_percentage {
                    custom_fields.push(("fee_percentage".to_string(), format!("{fee}")));
                }
            }
        }
        if let Some(verbiage) = &agreement.verbiage_changes {
            custom_fields.push(("verbiage_changes".to_string(), verbiage.clone()));
        }

        Self {
            fee_agreement_id: agreement.id.clone(),
            template_id: template_id.to_string(),
            title: format!("{} fee agreement", company.name),
            signers: vec![hiring_authority, production_director],
            cc_emails: agreement.cc_emails.clone(),
            custom_fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDetails {
    pub template_id: String,
    pub signer_roles: Vec<String>,
}

/// Raw answer of a provider after a document was sent.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractSentDetails {
    HelloSign {
        signature_request_id: String,
        signing_url: Option<String>,
    },
    DocuSign {
        envelope_id: String,
        uri: Option<String>,
    },
}

impl ContractSentDetails {
    pub fn provider(&self) -> SignatureProvider {
        match self {
            ContractSentDetails::HelloSign { .. } => SignatureProvider::HelloSign,
            ContractSentDetails::DocuSign { .. } => SignatureProvider::DocuSign,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContractSent {
    pub provider_id: SignatureProvider,
    pub contract_sent_details: ContractSentDetails,
}

/// The fields the agreement keeps about a sent contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractInformation {
    pub contract_id: String,
    pub sign_url: Option<String>,
}

/// Per provider adapter from the raw send response to the stored contract fields.
pub fn fill_contract_information(details: &ContractSentDetails) -> ContractInformation {
    match details {
        ContractSentDetails::HelloSign {
            signature_request_id,
            signing_url,
        } => ContractInformation {
            contract_id: signature_request_id.clone(),
            sign_url: signing_url.clone(),
        },
        ContractSentDetails::DocuSign { envelope_id, uri } => ContractInformation {
            contract_id: envelope_id.clone(),
            sign_url: uri.clone(),
        },
    }
}

/// One e-signature vendor. Implementations own the wire format.
pub trait SignatureClient: Send + Sync {
    fn provider(&self) -> SignatureProvider;
    fn template_details(&self, template_id: &str) -> anyhow::Result<TemplateDetails>;
    fn send(
        &self,
        request: &SignatureRequest,
        template: &TemplateDetails,
    ) -> anyhow::Result<ContractSentDetails>;
    fn void(&self, contract_id: &str) -> anyhow::Result<()>;
    fn remind(&self, contract_id: &str, email: &str) -> anyhow::Result<()>;
    fn files_in_base64(&self, contract_id: &str) -> anyhow::Result<String>;
    fn update_signer_email(
        &self,
        contract_id: &str,
        role: SignerRole,
        email: &str,
    ) -> anyhow::Result<()>;
    fn signer_email(&self, contract_id: &str, role: SignerRole) -> anyhow::Result<Option<String>>;
}

pub struct ContractManager {
    clients: BTreeMap<SignatureProvider, Arc<dyn SignatureClient>>,
    default_provider: SignatureProvider,
    retry: RetryPolicy,
}

impl ContractManager {
    pub fn new(default_provider: SignatureProvider, retry: RetryPolicy) -> Self {
        Self {
            clients: BTreeMap::new(),
            default_provider,
            retry,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn SignatureClient>) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    pub fn default_provider(&self) -> SignatureProvider {
        self.default_provider
    }

    fn client(&self, provider: SignatureProvider) -> anyhow::Result<&Arc<dyn SignatureClient>> {
        self.clients
            .get(&provider)
            .ok_or_else(|| anyhow::anyhow!("no signature client configured for {provider:?}"))
    }

    /// Sends the document through `provider`, or the configured default.
    pub fn send_fee_agreement(
        &self,
        request: &SignatureRequest,
        provider: Option<SignatureProvider>,
    ) -> anyhow::Result<ContractSent> {
        let provider = provider.unwrap_or(self.default_provider);
        let client = self.client(provider)?;

        let template = self.retry.run("signature template lookup", || {
            client.template_details(&request.template_id)
        })?;
        for signer in &request.signers {
            if !template.signer_roles.iter().any(|r| r == signer.role.label()) {
                anyhow::bail!(
                    "template {} has no {} signer role",
                    template.template_id,
                    signer.role.label()
                );
            }
        }

        let details = client.send(request, &template)?;
        if details.provider() != provider {
            anyhow::bail!("{provider:?} client answered with a {:?} contract", details.provider());
        }

        Ok(ContractSent {
            provider_id: provider,
            contract_sent_details: details,
        })
    }

    pub fn void_contract(&self, provider: SignatureProvider, contract_id: &str) -> anyhow::Result<()> {
        self.client(provider)?.void(contract_id)
    }

    pub fn send_reminder(
        &self,
        provider: SignatureProvider,
        contract_id: &str,
        email: &str,
    ) -> anyhow::Result<()> {
        self.client(provider)?.remind(contract_id, email)
    }

    pub fn get_files_in_base64(
        &self,
        provider: SignatureProvider,
        contract_id: &str,
    ) -> anyhow::Result<String> {
        self.client(provider)?.files_in_base64(contract_id)
    }

    pub fn update_hiring_authority_signer_email(
        &self,
        provider: SignatureProvider,
        contract_id: &str,
        email: &str,
    ) -> anyhow::Result<()> {
        self.client(provider)?
            .update_signer_email(contract_id, SignerRole::HiringAuthority, email)
    }

    pub fn get_signature_email_by_signer_role(
        &self,
        provider: SignatureProvider,
        contract_id: &str,
        role: SignerRole,
    ) -> anyhow::Result<Option<String>> {
        self.client(provider)?.signer_email(contract_id, role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FlakyTemplates {
        failures_left: Mutex<u32>,
    }

    impl SignatureClient for FlakyTemplates {
        fn provider(&self) -> SignatureProvider {
            SignatureProvider::HelloSign
        }
        fn template_details(&self, template_id: &str) -> anyhow::Result<TemplateDetails> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                anyhow::bail!("template service unavailable");
            }
            Ok(TemplateDetails {
                template_id: template_id.to_string(),
                signer_roles: vec!["Hiring Authority".into(), "Production Director".into()],
            })
        }
        fn send(
            &self,
            request: &SignatureRequest,
            _: &TemplateDetails,
        ) -> anyhow::Result<ContractSentDetails> {
            Ok(ContractSentDetails::HelloSign {
                signature_request_id: format!("sr-{}", request.fee_agreement_id),
                signing_url: None,
            })
        }
        fn void(&self, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn remind(&self, _: &str, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn files_in_base64(&self, _: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
        fn update_signer_email(&self, _: &str, _: SignerRole, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn signer_email(&self, _: &str, _: SignerRole) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    fn request() -> SignatureRequest {
        SignatureRequest {
            fee_agreement_id: "fee1".into(),
            template_id: "tpl".into(),
            title: "Acme fee agreement".into(),
            signers: vec![
                Signer {
                    role: SignerRole::HiringAuthority,
                    name: "Hana".into(),
                    email: "hana@acme.test".into(),
                },
                Signer {
                    role: SignerRole::ProductionDirector,
                    name: "Pat".into(),
                    email: "pat@agency.test".into(),
                },
            ],
            cc_emails: vec![],
            custom_fields: vec![],
        }
    }

    fn manager(failures: u32) -> ContractManager {
        let retry = RetryPolicy {
            attempts: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        ContractManager::new(SignatureProvider::HelloSign, retry).with_client(Arc::new(
            FlakyTemplates {
                failures_left: Mutex::new(failures),
            },
        ))
    }

    #[test]
    fn template_lookup_survives_transient_failures() {
        let sent = manager(4).send_fee_agreement(&request(), None).unwrap();

        assert_eq!(sent.provider_id, SignatureProvider::HelloSign);
        assert_eq!(
            fill_contract_information(&sent.contract_sent_details).contract_id,
            "sr-fee1"
        );
    }

    #[test]
    fn template_lookup_gives_up_after_five_attempts() {
        assert!(manager(5).send_fee_agreement(&request(), None).is_err());
    }

    #[test]
    fn unconfigured_provider_is_an_error() {
        let result = manager(0).send_fee_agreement(&request(), Some(SignatureProvider::DocuSign));
        assert!(result.is_err());
    }

    #[test]
    fn docusign_adapter_uses_envelope_id() {
        let info = fill_contract_information(&ContractSentDetails::DocuSign {
            envelope_id: "env-9".into(),
            uri: Some("/envelopes/env-9".into()),
        });
        assert_eq!(info.contract_id, "env-9");
        assert_eq!(info.sign_url.as_deref(), Some("/envelopes/env-9"));
    }
}
