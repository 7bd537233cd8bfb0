//! Session management for ZKTeco protocol
//!
//! A session represents a connection to a device and tracks:
//! - Session ID (assigned by device on CONNECT)
//! - Sequence counter (increments per command, reset by CONNECT)
//! - Connection state

use crate::constants::USHRT_MAX;
use crate::error::{Error, Result};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No socket
    Disconnected,

    /// Socket open, CONNECT not yet acknowledged
    Connecting,

    /// CONNECT acknowledged, session id assigned
    Connected,
}

/// Session id, sequence counter and state of one connection
///
/// Transitions take `&mut self`, so only the owner of the value can drive
/// them; a shared reference is a read-only view.
///
/// ```compile_fail
/// use zklink_core::Session;
///
/// fn tamper(view: &Session) {
///     view.establish(0xBEEF).unwrap();
/// }
/// ```
#[derive(Debug)]
pub struct Session {
    /// Session ID assigned by device (0 until CONNECT is acknowledged)
    session_id: u16,

    /// Sequence counter
    sequence: u16,

    /// Current session state
    state: SessionState,
}

impl Session {
    /// Create a new disconnected session
    pub fn new() -> Self {
        Self {
            session_id: 0,
            sequence: 0,
            state: SessionState::Disconnected,
        }
    }

    /// Session ID, once the device assigned one
    pub fn session_id(&self) -> Option<u16> {
        match self.state {
            SessionState::Connected => Some(self.session_id),
            _ => None,
        }
    }

    /// Session ID to put on the wire (0 before assignment)
    pub fn wire_session_id(&self) -> u16 {
        self.session_id
    }

    /// Current sequence number
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if the device acknowledged CONNECT
    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected)
    }

    /// Socket opened: `Disconnected -> Connecting`
    pub fn open(&mut self) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(Error::InvalidSessionState(format!(
                "Cannot open from state: {:?}",
                self.state
            )));
        }

        self.session_id = 0;
        self.sequence = 0;
        self.state = SessionState::Connecting;

        Ok(())
    }

    /// CONNECT is about to be sent: session id and sequence go back to zero
    ///
    /// Allowed while connecting or connected (re-CONNECT on a live socket).
    pub fn reset_for_connect(&mut self) -> Result<()> {
        if self.state == SessionState::Disconnected {
            return Err(Error::SessionNotInitialized);
        }

        self.session_id = 0;
        self.sequence = 0;
        self.state = SessionState::Connecting;

        Ok(())
    }

    /// CONNECT acknowledged with `session_id`: `Connecting -> Connected`
    pub fn establish(&mut self, session_id: u16) -> Result<()> {
        if self.state != SessionState::Connecting {
            return Err(Error::InvalidSessionState(format!(
                "Cannot establish from state: {:?}",
                self.state
            )));
        }

        self.session_id = session_id;
        self.state = SessionState::Connected;

        Ok(())
    }

    /// Close session
    pub fn close(&mut self) {
        self.session_id = 0;
        self.sequence = 0;
        self.state = SessionState::Disconnected;
    }

    /// Advance and return the sequence number for the next command
    ///
    /// Wraps modulo 65535, so the sequence never reaches 0xFFFF.
    pub fn next_sequence(&mut self) -> u16 {
        self.sequence = ((self.sequence as u32 + 1) % USHRT_MAX) as u16;
        self.sequence
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new() {
        let session = Session::new();
        assert_eq!(session.session_id(), None);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_connected());
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = Session::new();
        session.open().unwrap();
        assert_eq!(session.state(), SessionState::Connecting);

        session.reset_for_connect().unwrap();
        session.establish(0x1234).unwrap();

        assert_eq!(session.session_id(), Some(0x1234));
        assert_eq!(session.wire_session_id(), 0x1234);
        assert!(session.is_connected());

        session.close();
        assert_eq!(session.session_id(), None);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_sequence_increments_and_connect_resets() {
        let mut session = Session::new();
        session.open().unwrap();
        session.reset_for_connect().unwrap();
        session.establish(7).unwrap();

        assert_eq!(session.next_sequence(), 1);
        assert_eq!(session.next_sequence(), 2);
        assert_eq!(session.sequence(), 2);

        // Re-CONNECT on a live socket
        session.reset_for_connect().unwrap();
        assert_eq!(session.sequence(), 0);
        assert_eq!(session.wire_session_id(), 0);
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn test_sequence_wrap() {
        let mut session = Session::new();
        session.open().unwrap();

        for _ in 0..65533 {
            session.next_sequence();
        }
        assert_eq!(session.next_sequence(), 65534);
        assert_eq!(session.next_sequence(), 0);
        assert_eq!(session.next_sequence(), 1);
    }

    #[test]
    fn test_invalid_state_transitions() {
        let mut session = Session::new();

        // CONNECT needs an open socket
        assert!(matches!(
            session.reset_for_connect(),
            Err(Error::SessionNotInitialized)
        ));
        assert!(session.establish(1).is_err());

        // Cannot open twice
        session.open().unwrap();
        assert!(session.open().is_err());
    }
}
