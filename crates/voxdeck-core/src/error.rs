use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoxDeckError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("WebRTC error: {0}")]
    Rtc(String),

    #[error("SDP error: {0}")]
    Sdp(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxDeckError>;
