use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("failed to read config {path}: {reason}")]
    ConfigRead { path: String, reason: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("load error: {0}")]
    Load(#[from] trellis_loader::LoadError),

    #[error("store error: {0}")]
    Store(#[from] trellis_store::StoreError),

    #[error("assembly error: {0}")]
    Assemble(#[from] trellis_assembler::AssembleError),
}

impl From<toml::de::Error> for SdkError {
    fn from(e: toml::de::Error) -> Self {
        Self::InvalidConfig(e.to_string())
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
