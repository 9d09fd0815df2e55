//! Record kind discriminator.

use crate::TypeError;
use serde::{Deserialize, Serialize};

/// Record kind, carried on the wire as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
#[repr(u32)]
pub enum Kind {
    /// Public profile metadata (display name, picture)
    Profile = 0,
    /// Public plain-text note
    Text = 1,
    /// Pairwise-encrypted direct message or attachment chunk
    DirectMessage = 4,
    /// Group protocol record (creation, invitation or message)
    GroupMessage = 44,
    /// Application data encrypted to the author's own key
    EncryptedAppData = 78,
}

impl Kind {
    /// Wire integer for this kind.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Kind {
    type Error = TypeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Kind::Profile),
            1 => Ok(Kind::Text),
            4 => Ok(Kind::DirectMessage),
            44 => Ok(Kind::GroupMessage),
            78 => Ok(Kind::EncryptedAppData),
            _ => Err(TypeError::UnsupportedKind(value)),
        }
    }
}

impl From<Kind> for u32 {
    fn from(kind: Kind) -> Self {
        kind.as_u32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_wire() {
        assert_eq!(Kind::try_from(4).unwrap(), Kind::DirectMessage);
        assert_eq!(Kind::try_from(44).unwrap(), Kind::GroupMessage);
        assert!(matches!(
            Kind::try_from(7),
            Err(TypeError::UnsupportedKind(7))
        ));
    }

    #[test]
    fn kind_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Kind::EncryptedAppData).unwrap(), "78");
        let kind: Kind = serde_json::from_str("0").unwrap();
        assert_eq!(kind, Kind::Profile);
    }
}
