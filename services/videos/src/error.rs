use crate::object_store::ObjectStoreError;
use thiserror::Error;

pub const EMPTY_FILES: &str = "Please select files to upload";
pub const DUPLICATE_ORD: &str = "already exists ord";
pub const INVALID_ORD: &str = "Please Select Valid Ord";
pub const ACT_NAME_REQUIRED: &str = "Please enter act name";

/// Errors returned by the video service
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Program not found for Id : {0}")]
    NotFound(i64),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Object storage failure: {0}")]
    StorageFailure(#[from] ObjectStoreError),

    #[error("Repository error: {0}")]
    Repository(#[from] sqlx::Error),
}

impl VideoError {
    pub fn empty_files() -> Self {
        Self::InvalidInput(EMPTY_FILES.to_string())
    }

    pub fn invalid_ord() -> Self {
        Self::InvalidInput(INVALID_ORD.to_string())
    }

    pub fn missing_act_name() -> Self {
        Self::InvalidInput(ACT_NAME_REQUIRED.to_string())
    }

    pub fn duplicate_ord() -> Self {
        Self::Conflict(DUPLICATE_ORD.to_string())
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Conflict(_) => "CONFLICT",
            Self::StorageFailure(_) => "STORAGE_FAILURE",
            Self::Repository(_) => "REPOSITORY_ERROR",
        }
    }
}
