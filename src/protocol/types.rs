//! Shared wire protocol types.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// PostgreSQL object identifier.
pub type Oid = u32;

/// Format code for parameter and column values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum FormatCode {
    /// Text representation
    #[default]
    Text = 0,
    /// Type-specific binary representation
    Binary = 1,
}

impl FormatCode {
    pub fn from_i16(value: i16) -> Self {
        if value == 1 {
            FormatCode::Binary
        } else {
            FormatCode::Text
        }
    }
}

impl From<i16> for FormatCode {
    fn from(value: i16) -> Self {
        Self::from_i16(value)
    }
}

/// Transaction status, as carried by ReadyForQuery plus two client-side
/// states the server never reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Not in a transaction block
    #[default]
    Idle,
    /// Inside a transaction block
    InTransaction,
    /// Inside a failed transaction block; commands are rejected until rollback
    Failed,
    /// A command is in flight and the server has not reported yet
    Active,
    /// The connection is not in a usable state
    Unknown,
}

impl TransactionStatus {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// In a transaction block, active or failed.
    pub fn in_transaction(self) -> bool {
        matches!(
            self,
            TransactionStatus::InTransaction | TransactionStatus::Failed
        )
    }

    pub fn is_failed(self) -> bool {
        matches!(self, TransactionStatus::Failed)
    }
}

macro_rules! be_int {
    ($(#[$doc:meta] $name:ident: $native:ty, $bytes:literal;)*) => {
        $(
            #[$doc]
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, Default,
                FromBytes, IntoBytes, KnownLayout, Immutable,
            )]
            #[repr(C)]
            pub struct $name([u8; $bytes]);

            impl $name {
                pub const fn new(value: $native) -> Self {
                    Self(value.to_be_bytes())
                }

                pub const fn get(self) -> $native {
                    <$native>::from_be_bytes(self.0)
                }
            }

            impl From<$native> for $name {
                fn from(value: $native) -> Self {
                    Self::new(value)
                }
            }

            impl From<$name> for $native {
                fn from(value: $name) -> Self {
                    value.get()
                }
            }
        )*
    };
}

be_int! {
    /// Big-endian i16 for zerocopy reads.
    I16BE: i16, 2;
    /// Big-endian u16 for zerocopy reads.
    U16BE: u16, 2;
    /// Big-endian i32 for zerocopy reads.
    I32BE: i32, 4;
    /// Big-endian u32 for zerocopy reads.
    U32BE: u32, 4;
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromBytes;

    #[test]
    fn be_roundtrip() {
        assert_eq!(I32BE::new(-1).get(), -1);
        assert_eq!(U32BE::new(196608).get(), 196608);
        let raw = [0x00, 0x03, 0x00, 0x00];
        assert_eq!(U32BE::ref_from_bytes(&raw).unwrap().get(), 196608);
    }

    #[test]
    fn transaction_status_bytes() {
        assert_eq!(TransactionStatus::from_byte(b'I'), Some(TransactionStatus::Idle));
        assert_eq!(TransactionStatus::from_byte(b'T'), Some(TransactionStatus::InTransaction));
        assert_eq!(TransactionStatus::from_byte(b'E'), Some(TransactionStatus::Failed));
        assert_eq!(TransactionStatus::from_byte(b'X'), None);
        assert!(TransactionStatus::Failed.in_transaction());
        assert!(!TransactionStatus::Idle.in_transaction());
        assert!(!TransactionStatus::Active.in_transaction());
        assert!(!TransactionStatus::Unknown.in_transaction());
    }

    #[test]
    fn format_code_unknown_defaults_to_text() {
        assert_eq!(FormatCode::from_i16(0), FormatCode::Text);
        assert_eq!(FormatCode::from_i16(1), FormatCode::Binary);
        assert_eq!(FormatCode::from_i16(7), FormatCode::Text);
    }
}
