//! Bot supervisor error types.

use thiserror::Error;

use crate::types::UserId;

/// Errors returned synchronously by the bot supervisor.
#[derive(Debug, Error)]
pub enum BotError {
    /// A bot is already running (or starting) for the user.
    #[error("bot is already running for user {0}")]
    AlreadyRunning(UserId),

    /// No running bot exists for the user.
    #[error("no running bot found for user {0}")]
    NotRunning(UserId),

    /// Exchange credentials are not configured for the user.
    #[error("exchange credentials not found for user {0}")]
    ConfigMissing(UserId),

    /// Price stream connection or channel subscription failed.
    #[error("failed to connect price stream for user {user_id}: {source:#}")]
    ConnectFailed {
        /// User whose bot could not start.
        user_id: UserId,
        /// Underlying connection error.
        source: anyhow::Error,
    },

    /// Backing store could not be read.
    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

impl BotError {
    /// Check if this error reports a state-machine violation rather than a failure.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, BotError::AlreadyRunning(_) | BotError::NotRunning(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_user() {
        assert_eq!(
            BotError::AlreadyRunning(UserId(7)).to_string(),
            "bot is already running for user 7"
        );
        assert_eq!(
            BotError::NotRunning(UserId(3)).to_string(),
            "no running bot found for user 3"
        );
    }

    #[test]
    fn connect_failure_carries_cause() {
        let err = BotError::ConnectFailed {
            user_id: UserId(1),
            source: anyhow::anyhow!("handshake refused"),
        };
        assert!(err.to_string().contains("handshake refused"));
        assert!(!err.is_state_conflict());
        assert!(BotError::NotRunning(UserId(1)).is_state_conflict());
    }
}
