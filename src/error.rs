use super::store::StoreError;
use super::types::{DeclinableField, PaymentScheme};

/// Message returned to callers in place of any infrastructure detail.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "There was a problem processing the fee agreement, please try again later";

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Fee percentage {given} is below the minimum of {minimum}")]
    FeeBelowMinimum { minimum: f64, given: f64 },
    #[error("A fee percentage is required for the {0} payment scheme")]
    MissingFeePercentage(&'static str),
    #[error("A flat fee amount is required for the flat payment scheme")]
    MissingFlatFee,
    #[error("The flat fee amount must be zero or greater")]
    NegativeFlatFee,
    #[error("Signed date must not be earlier than the validated date")]
    SignedBeforeValidated,
    #[error("Unknown declinable field: {0}")]
    UnknownDeclinableField(String),
    #[error("Field {} cannot be declined for the {} payment scheme", .field.as_str(), .scheme.as_str())]
    FieldNotDeclinable {
        field: DeclinableField,
        scheme: PaymentScheme,
    },
    #[error("At least one declined field is required")]
    NoDeclinedFields,
    #[error("Declination notes are required")]
    BlankDeclinationNotes,
    #[error("The agreement cannot be assigned to the same user that creates it")]
    SelfAssignment,
    #[error("A target recruiter is required")]
    MissingTargetRecruiter,
    #[error("User {0} is not a recruiter")]
    NotARecruiter(String),
    #[error("The company has no job orders")]
    CompanyWithoutJobOrders,
    #[error("Only one reminder per hour is allowed")]
    ReminderCooldown,
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),
    #[error("Webhook event could not be authenticated")]
    UnauthenticatedEvent,
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),
}

#[derive(thiserror::Error, Debug)]
pub enum FeeAgreementError {
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("infrastructure failure: {0:#}")]
    Infrastructure(#[from] anyhow::Error),
}

impl FeeAgreementError {
    pub fn forbidden() -> Self {
        FeeAgreementError::Forbidden("You are not allowed to perform this action".into())
    }
    pub fn not_found(what: &str) -> Self {
        FeeAgreementError::NotFound(format!("{what} not found"))
    }
    pub fn conflict(message: impl Into<String>) -> Self {
        FeeAgreementError::Conflict(message.into())
    }
    pub fn code(&self) -> u16 {
        match self {
            FeeAgreementError::Forbidden(_) => 403,
            FeeAgreementError::NotFound(_) => 404,
            FeeAgreementError::Validation(_) => 400,
            FeeAgreementError::Conflict(_) => 409,
            FeeAgreementError::Infrastructure(_) => 500,
        }
    }
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, FeeAgreementError::Infrastructure(_))
    }
}

impl From<ValidationError> for FeeAgreementError {
    fn from(value: ValidationError) -> Self {
        FeeAgreementError::Validation(value.to_string())
    }
}

impl From<StoreError> for FeeAgreementError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict { id } => FeeAgreementError::Conflict(format!(
                "Fee agreement {id} was modified concurrently, reload and try again"
            )),
            other => FeeAgreementError::Infrastructure(other.into()),
        }
    }
}

/// Caller-facing outcome of every lifecycle operation. Callers branch on `success`.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult<T> {
    pub success: bool,
    pub code: u16,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> OperationResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            code: 200,
            message: None,
            data: Some(data),
        }
    }
    pub fn failure(code: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            message: Some(message.into()),
            data: None,
        }
    }
    /// Marks a successful result as a freshly created resource.
    pub fn into_created(self) -> Self {
        if self.success {
            return Self { code: 201, ..self };
        }
        self
    }
    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

impl<T> From<FeeAgreementError> for OperationResult<T> {
    fn from(value: FeeAgreementError) -> Self {
        if let FeeAgreementError::Infrastructure(err) = &value {
            log::error!("fee agreement operation failed: {err:#}");
            return OperationResult::failure(500, GENERIC_FAILURE_MESSAGE);
        }
        OperationResult::failure(value.code(), value.to_string())
    }
}

/// Folds every failure into a result value.
pub fn settle<T>(result: Result<T, FeeAgreementError>) -> OperationResult<T> {
    match result {
        Ok(data) => OperationResult::ok(data),
        Err(err) => err.into(),
    }
}

/// Like [`settle`], but hands infrastructure failures back to the caller so a
/// surrounding unit of work can be aborted.
pub fn settle_or_raise<T>(
    result: Result<T, FeeAgreementError>,
) -> Result<OperationResult<T>, FeeAgreementError> {
    match result {
        Ok(data) => Ok(OperationResult::ok(data)),
        Err(err) if err.is_infrastructure() => {
            log::error!("fee agreement operation failed: {err:#}");
            Err(err)
        }
        Err(err) => Ok(err.into()),
    }
}
