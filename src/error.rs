use crate::kind::ConnectorKind;

/// Errors surfaced synchronously by connectors and stores.
///
/// Connect-attempt failures never show up here; the reconnect loop logs and
/// retries them.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Connection `{name}` is inactive ({kind})")]
    Inactive { name: String, kind: ConnectorKind },

    #[error("Connector `{0}` not found")]
    NotFound(String),

    #[error("Connector `{0}` already exists")]
    Duplicate(String),

    #[error("No transport registered for {0}")]
    UnsupportedKind(ConnectorKind),

    #[error("Connector `{name}` has id {id}, edit carries id {new_id}")]
    IdChanged { name: String, id: u64, new_id: u64 },

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl ConnectorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConnectorError::NotFound(_))
    }

    pub fn is_inactive(&self) -> bool {
        matches!(self, ConnectorError::Inactive { .. })
    }
}

pub type Result<T, E = ConnectorError> = std::result::Result<T, E>;
