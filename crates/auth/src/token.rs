//! Credential tokens as presented at the till.

use core::str::Utf8Error;

use serde::{Deserialize, Serialize};

/// A bearer token value, already trimmed and known to be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialToken(String);

impl CredentialToken {
    /// Trim surrounding whitespace; `None` if nothing is left.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Decode a raw datagram payload (UTF-8 text).
    ///
    /// `Ok(None)` means "no credential present".
    pub fn from_datagram(payload: &[u8]) -> Result<Option<Self>, Utf8Error> {
        let text = core::str::from_utf8(payload)?;
        Ok(Self::new(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CredentialToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let padded = CredentialToken::from_datagram(b"  ABC123  \n").unwrap().unwrap();
        assert_eq!(padded, CredentialToken::new("ABC123").unwrap());
    }

    #[test]
    fn blank_payload_is_no_credential() {
        assert!(CredentialToken::from_datagram(b" \r\n\t").unwrap().is_none());
        assert!(CredentialToken::from_datagram(b"").unwrap().is_none());
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        assert!(CredentialToken::from_datagram(&[0xff, 0xfe, 0x41]).is_err());
    }
}
