use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DpcError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{owner}: missing key `{key}`")]
    MissingKey { owner: String, key: String },

    #[error("{owner}: output key `{key}` collides with an existing key")]
    NameCollision { owner: String, key: String },

    #[error("Duplicate name `{0}`: component and loss names must be unique")]
    DuplicateName(String),

    #[error("{owner}: key `{key}` expected feature width {expected} but got {actual}")]
    Shape {
        owner: String,
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("{owner}: {message}")]
    Contract { owner: String, message: String },

    #[error("Expression error: {0}")]
    Expression(String),
}

impl DpcError {
    pub fn missing_key(owner: &str, key: &str) -> Self {
        DpcError::MissingKey {
            owner: owner.to_string(),
            key: key.to_string(),
        }
    }

    pub fn collision(owner: &str, key: &str) -> Self {
        DpcError::NameCollision {
            owner: owner.to_string(),
            key: key.to_string(),
        }
    }
}

pub type DpcResult<T> = Result<T, DpcError>;
