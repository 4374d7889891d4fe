use crate::model::ChannelId;

/// Failures of the persisted key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store value could not be encoded: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of a single schedule fetch.  None of these are surfaced to the
/// user; the cached schedule stays authoritative.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("schedule request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("schedule service returned status {0}")]
    Status(u16),
    #[error("schedule document could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("channel {0} has no livestream available")]
    NoLivestreamAvailable(ChannelId),
    #[error("index {index} out of range for {len} channels")]
    IndexOutOfRange { index: usize, len: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A complete but unusable frame on the client socket.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The length header announces more than `MAX_FRAME_LEN` bytes.  The
    /// stream cannot be resynchronised after this.
    #[error("frame of {0} bytes exceeds the frame size limit")]
    TooLarge(usize),
    /// The body is not a known message.  `len` bytes of body follow the
    /// header and can be skipped.
    #[error("malformed frame: {source}")]
    Malformed {
        len: usize,
        #[source]
        source: serde_json::Error,
    },
}
