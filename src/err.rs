use config::ConfigError;
use hex::FromHexError;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("varint overruns its buffer")]
    MalformedVarint,

    #[error("malformed transaction: {0}")]
    MalformedTx(String),

    #[error("unspent output not found: {txid}:{vout}")]
    NotFound { txid: String, vout: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid hex: {0}")]
    Hex(#[from] FromHexError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("scan cancelled")]
    Cancelled,

    #[error("{0}")]
    Custom(String),
}

impl ScanError {
    pub fn new(msg: impl Into<String>) -> Self {
        ScanError::Custom(msg.into())
    }

    /// Decoder-level variants are folded into `Corruption` before they reach
    /// a stream consumer; everything else passes through unchanged.
    pub fn into_stream(self) -> Self {
        match self {
            ScanError::MalformedVarint => ScanError::Corruption("varint overruns its buffer".to_string()),
            ScanError::MalformedTx(msg) => ScanError::Corruption(format!("malformed transaction: {msg}")),
            other => other,
        }
    }
}
