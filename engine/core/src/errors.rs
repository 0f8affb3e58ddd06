use crate::meta::MetaError;
use crate::program::ProgramError;
use crate::status::Status;
use crate::Didentifier;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("operation {name} failed: {reason}")]
    Operation { name: String, reason: String },

    #[error("the pipeline declares no operations")]
    EmptyPipeline,

    #[error("the terminal operation must be a pure function, not a composite")]
    CompositeTerminal,
}

impl PipelineError {
    pub fn operation(name: &str, reason: impl Into<String>) -> Self {
        Self::Operation { name: name.to_owned(), reason: reason.into() }
    }
}

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("dataset {0} already exists")]
    AlreadyExists(Didentifier),

    #[error("dataset {0} does not exist")]
    DatasetNotFound(Didentifier),

    #[error("dataset {0} has no blocks")]
    EmptyDataset(Didentifier),

    #[error("no operation named {0}")]
    OperationNotFound(String),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("job timed out waiting for execution round {0}")]
    RoundTimeout(usize),
}

impl EngineError {
    /// The status code reported across the gateway boundary for this failure
    pub fn status(&self) -> Status {
        match self {
            Self::AlreadyExists(_) => Status::AlreadyExists,
            Self::DatasetNotFound(_) | Self::EmptyDataset(_) | Self::OperationNotFound(_) => Status::NotFound,
            Self::Program(_) => Status::NotAllowed,
            Self::Meta(_) | Self::Pipeline(_) | Self::Storage(_) | Self::RoundTimeout(_) => Status::InvalidData,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
