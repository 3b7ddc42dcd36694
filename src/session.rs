use crate::srv_conn::SessionError;
use std::time::Duration;

/// A snapshot of one client's transfer progress.
///
/// Transitions never mutate a snapshot; they hand back a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// The client's address, used to tag log lines and errors.
    pub client_id: String,

    /// The block currently being sent.
    pub block: u16,

    /// Retransmissions left for the current block.
    pub retries: u8,

    /// How long to wait for an acknowledgment before retransmitting.
    pub timeout: Duration,
}

impl SessionState {
    pub fn new(client_id: String, retries: u8, timeout: Duration) -> SessionState {
        SessionState { client_id, block: 1, retries, timeout }
    }

    /// Moves on to the next block. Block numbers wrap around after 65535.
    pub fn advance_block(&self) -> SessionState {
        SessionState {
            block: self.block.wrapping_add(1),
            ..self.clone()
        }
    }

    /// Spends one retransmission on the current block.
    pub fn consume_retry(&self) -> Result<SessionState, SessionError> {
        let retries = self.retries.checked_sub(1).ok_or_else(|| SessionError::RetriesExhausted {
            client: self.client_id.clone(),
            block: self.block,
        })?;

        Ok(SessionState { retries, ..self.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SessionState {
        SessionState::new("127.0.0.1:4000".to_string(), 2, Duration::from_millis(50))
    }

    #[test]
    fn test_new_starts_at_first_block() {
        let s = state();
        assert_eq!(s.block, 1);
        assert_eq!(s.retries, 2);
    }

    #[test]
    fn test_advance_block_keeps_policy() {
        let s = state();
        let next = s.advance_block();
        assert_eq!(next.block, 2);
        assert_eq!(next.retries, s.retries);
        assert_eq!(next.timeout, s.timeout);
        // The original snapshot is untouched.
        assert_eq!(s.block, 1);
    }

    #[test]
    fn test_advance_block_wraps() {
        let s = SessionState { block: u16::MAX, ..state() };
        assert_eq!(s.advance_block().block, 0);
    }

    #[test]
    fn test_consume_retry() {
        let s = state().consume_retry().unwrap();
        assert_eq!(s.retries, 1);
        assert_eq!(s.block, 1);

        let s = s.consume_retry().unwrap();
        assert_eq!(s.retries, 0);

        match s.consume_retry() {
            Err(SessionError::RetriesExhausted { block, .. }) => assert_eq!(block, 1),
            other => panic!("expected retries to run out, got {:?}", other),
        }
    }
}
