use renderer::RenderError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("paint thread has stopped")]
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("recorder i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("recorder rejected message: {0}")]
    Rejected(String),
    #[error("paint thread is gone")]
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("player i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// A single message could not be read. Playback skips it.
    #[error("malformed message in recording: {0}")]
    Parse(String),
    #[error("recording has no index loaded")]
    NoIndex,
    #[error("recording contains no messages")]
    EmptyRecording,
    #[error("no index entry for message {0}")]
    NoSuchEntry(i64),
}
