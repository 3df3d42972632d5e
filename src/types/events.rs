//! Login lifecycle events.
//!
//! These are handed to caller-supplied callbacks while the client authenticates.

use std::fmt;

/// Scan status attached to a [`QrEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCode {
    /// A new QR code was issued and awaits a scan.
    Issued,
    /// The code was scanned; waiting for confirmation on the phone.
    Waiting,
    /// Confirmation received.
    Confirmed,
    /// The code expired and will be replaced.
    Expired,
}

impl ScanCode {
    /// Map a raw scan-status code. Unknown codes yield `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(ScanCode::Issued),
            "201" => Some(ScanCode::Waiting),
            "200" => Some(ScanCode::Confirmed),
            "408" => Some(ScanCode::Expired),
            _ => None,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            ScanCode::Issued => "0",
            ScanCode::Waiting => "201",
            ScanCode::Confirmed => "200",
            ScanCode::Expired => "408",
        }
    }
}

/// QR code event emitted once per issued correlation id and on status changes.
#[derive(Debug, Clone)]
pub struct QrEvent {
    /// Correlation id embedded in the QR payload.
    pub uuid: String,
    pub status: ScanCode,
    /// URL the phone must open; this is what the QR code encodes.
    pub login_url: String,
    /// SVG rendering of `login_url`.
    pub image: Vec<u8>,
}

/// Observable position of the login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginState {
    #[default]
    Unauthenticated,
    QrIssued,
    WaitingConfirm,
    Authenticated,
    Failed,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoginState::Unauthenticated => "unauthenticated",
            LoginState::QrIssued => "qr issued",
            LoginState::WaitingConfirm => "waiting for confirmation",
            LoginState::Authenticated => "authenticated",
            LoginState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_code_mapping() {
        for code in ["0", "200", "201", "408"] {
            assert_eq!(ScanCode::from_code(code).unwrap().as_code(), code);
        }
        assert_eq!(ScanCode::from_code("400"), None);
    }

    #[test]
    fn test_login_state_default() {
        assert_eq!(LoginState::default(), LoginState::Unauthenticated);
        assert_eq!(LoginState::WaitingConfirm.to_string(), "waiting for confirmation");
    }
}
