//! Identifier and file helpers shared by the service layer

use bech32::Bech32m;
use uuid7::uuid7;

pub const FEE_AGREEMENT_HRP: &str = "fee";

// construct a unique time-ordered id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub fn new_fee_agreement_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(FEE_AGREEMENT_HRP)
}

/// Storage path of the signed document of an agreement.
pub fn fee_agreement_pdf_path(fee_agreement_id: &str) -> String {
    format!("fee_agreements/{fee_agreement_id}/fee-agreement.pdf")
}

/// Cheap structural check, full validation is the mail provider's job.
pub fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.trim().split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}
