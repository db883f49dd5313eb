use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum OverlayError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("no connection: {0}")]
    NoConnection(String),

    #[error("command {cmd} to {neighbor} (uuid {uuid}) timed out")]
    Timeout {
        cmd: String,
        uuid: u32,
        neighbor: String,
    },

    #[error("file receive error: {0}")]
    FileReceive(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("client already shut down")]
    Shutdown,
}

impl From<std::io::Error> for OverlayError {
    fn from(e: std::io::Error) -> Self {
        OverlayError::Io(e.to_string())
    }
}
