//! Error types for the voltstream-core crate.

/// Errors that can occur on the channel transport seam.
///
/// These never escape the manager's public API: channel failures drive
/// reconnection and are reported through logs and the connection-state
/// stream, not as returned errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The endpoint address could not be parsed
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    /// Establishing the connection failed
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The channel is not open
    #[error("channel is not open")]
    NotOpen,

    /// Transmitting a frame failed
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Convenience type alias for Results using ChannelError.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_display() {
        let error = ChannelError::InvalidUrl("not a url".to_string());
        assert_eq!(error.to_string(), "invalid endpoint url: not a url");

        let error = ChannelError::ConnectFailed("connection refused".to_string());
        assert_eq!(error.to_string(), "connection failed: connection refused");

        let error = ChannelError::NotOpen;
        assert_eq!(error.to_string(), "channel is not open");

        let error = ChannelError::SendFailed("broken pipe".to_string());
        assert_eq!(error.to_string(), "send failed: broken pipe");
    }
}
