//! Narrow interfaces onto the surrounding back office. Implementations live in
//! the CRUD layer; the lifecycle engine only ever reads through these traits.
use super::types::Role;

#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HiringAuthority {
    pub id: String,
    pub company_id: String,
    pub full_name: String,
    pub email: Option<String>,
    pub work_email: Option<String>,
}

impl HiringAuthority {
    pub fn contact_email(&self) -> Option<&str> {
        self.work_email.as_deref().or(self.email.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserContact {
    pub id: String,
    pub full_name: String,
    pub email: String,
}

/// The people above a user in the org chart.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Leadership {
    pub coach_id: Option<String>,
    pub regional_director_id: Option<String>,
}

pub trait CompanyDirectory: Send + Sync {
    fn find_company(&self, company_id: &str) -> anyhow::Result<Option<Company>>;
    fn company_exists(&self, company_id: &str) -> anyhow::Result<bool>;
    fn find_hiring_authority(&self, hiring_authority_id: &str) -> anyhow::Result<Option<HiringAuthority>>;
    fn company_has_job_orders_to_sign(&self, company_id: &str) -> anyhow::Result<bool>;
}

pub trait UserDirectory: Send + Sync {
    fn highest_role(&self, user_id: &str) -> anyhow::Result<Option<Role>>;
    fn has_role(&self, user_id: &str, role: Role) -> anyhow::Result<bool>;
    fn coach_and_regional_director(&self, user_id: &str) -> anyhow::Result<Leadership>;
    fn find_user(&self, user_id: &str) -> anyhow::Result<Option<UserContact>>;
}

/// Object storage for generated and uploaded documents. Returns public URLs.
pub trait FileStore: Send + Sync {
    fn put(&self, path: &str, contents: &[u8]) -> anyhow::Result<String>;
    fn copy_file(&self, from: &str, to: &str) -> anyhow::Result<String>;
    fn delete(&self, path: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_base64: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplatedEmail {
    pub recipients: Vec<String>,
    pub template_data: serde_json::Value,
    pub config_key: String,
    pub attachments: Vec<Attachment>,
}

pub trait Notifier: Send + Sync {
    fn send_templated_email(&self, email: TemplatedEmail) -> anyhow::Result<()>;
}

/// Job-order scoped records whose agreement discussion completes with a signature.
pub trait WhiteSheets: Send + Sync {
    fn mark_agreement_discussed(&self, fee_agreement_id: &str) -> anyhow::Result<()>;
    fn unlink_fee_agreement(&self, fee_agreement_id: &str) -> anyhow::Result<()>;
}
