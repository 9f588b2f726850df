//! Organisation defaults for fee agreements, loaded with the `config` crate.
use super::types::{PaymentScheme, SignatureProvider};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

const CONFIG_FILE: &str = "config/fee_agreements.toml";
const ENV_PREFIX: &str = "FEE_APPROVAL";

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateIds {
    #[serde(default = "default_standard_template")]
    pub standard: String,
    #[serde(default = "default_flat_template")]
    pub flat: String,
    #[serde(default = "default_conversion_template")]
    pub conversion: String,
    #[serde(default = "default_base_salary_template")]
    pub base_salary: String,
}

impl Default for TemplateIds {
    fn default() -> Self {
        Self {
            standard: default_standard_template(),
            flat: default_flat_template(),
            conversion: default_conversion_template(),
            base_salary: default_base_salary_template(),
        }
    }
}

impl TemplateIds {
    pub fn for_scheme(&self, scheme: PaymentScheme) -> &str {
        match scheme {
            PaymentScheme::Standard => &self.standard,
            PaymentScheme::Flat => &self.flat,
            PaymentScheme::Conversion => &self.conversion,
            PaymentScheme::BaseSalary => &self.base_salary,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgreementSettings {
    #[serde(default = "default_minimum_fee_percentage")]
    pub minimum_fee_percentage: f64,
    #[serde(default = "default_guarantee_days")]
    pub default_guarantee_days: u32,
    #[serde(default)]
    pub templates: TemplateIds,
    #[serde(default = "default_production_director")]
    pub production_director_signer_id: String,
    #[serde(default = "default_provider")]
    pub default_provider: SignatureProvider,
    #[serde(default = "default_reminder_cooldown_minutes")]
    pub reminder_cooldown_minutes: i64,
    #[serde(default = "default_template_lookup_attempts")]
    pub template_lookup_attempts: u32,
    #[serde(default = "default_template_lookup_base_delay_ms")]
    pub template_lookup_base_delay_ms: u64,
    #[serde(default = "default_template_lookup_max_delay_ms")]
    pub template_lookup_max_delay_ms: u64,
    #[serde(default = "default_expiration_days")]
    pub expiration_days: i64,
    #[serde(default)]
    pub webhook_api_key: String,
    #[serde(default = "default_cc_email_config_key")]
    pub cc_email_config_key: String,
}

fn default_minimum_fee_percentage() -> f64 {
    15.0
}

fn default_guarantee_days() -> u32 {
    30
}

fn default_standard_template() -> String {
    "fee-agreement-standard".to_string()
}

fn default_flat_template() -> String {
    "fee-agreement-flat".to_string()
}

fn default_conversion_template() -> String {
    "fee-agreement-conversion".to_string()
}

fn default_base_salary_template() -> String {
    "fee-agreement-base-salary".to_string()
}

fn default_production_director() -> String {
    "production-director".to_string()
}

fn default_provider() -> SignatureProvider {
    SignatureProvider::HelloSign
}

fn default_reminder_cooldown_minutes() -> i64 {
    60
}

fn default_template_lookup_attempts() -> u32 {
    5
}

fn default_template_lookup_base_delay_ms() -> u64 {
    250
}

fn default_template_lookup_max_delay_ms() -> u64 {
    4_000
}

fn default_expiration_days() -> i64 {
    30
}

fn default_cc_email_config_key() -> String {
    "feeAgreementSentCc".to_string()
}

impl Default for AgreementSettings {
    fn default() -> Self {
        Self {
            minimum_fee_percentage: default_minimum_fee_percentage(),
            default_guarantee_days: default_guarantee_days(),
            templates: TemplateIds::default(),
            production_director_signer_id: default_production_director(),
            default_provider: default_provider(),
            reminder_cooldown_minutes: default_reminder_cooldown_minutes(),
            template_lookup_attempts: default_template_lookup_attempts(),
            template_lookup_base_delay_ms: default_template_lookup_base_delay_ms(),
            template_lookup_max_delay_ms: default_template_lookup_max_delay_ms(),
            expiration_days: default_expiration_days(),
            webhook_api_key: String::new(),
            cc_email_config_key: default_cc_email_config_key(),
        }
    }
}

impl AgreementSettings {
    /// Loads `config/fee_agreements.toml` when present, overlaid by
    /// `FEE_APPROVAL__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        settings
            .get::<AgreementSettings>("fee_agreements")
            .or_else(|err| match err {
                ConfigError::NotFound(_) => Ok(AgreementSettings::default()),
                other => Err(ConfigError::Message(format!(
                    "Fee agreement configuration could not be loaded: {other}"
                ))),
            })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.template_lookup_attempts.max(1),
            base_delay: Duration::from_millis(self.template_lookup_base_delay_ms),
            max_delay: Duration::from_millis(self.template_lookup_max_delay_ms),
        }
    }
}

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> anyhow::Result<T>) -> anyhow::Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= self.attempts => {
                    return Err(err.context(format!("{what} failed after {} attempts", self.attempts)));
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    log::warn!("{what} failed (attempt {}), retrying in {delay:?}: {err:#}", attempt + 1);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
