use hex::FromHexError;
use serde_json::Value;
use std::convert::TryFrom;

/// Helper type that allows simple serialization and deserialization of byte
/// vectors that are represented as hex strings in JSON.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for HexBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Some firmwares emit odd-length hex sequences; pad on the left.
fn hex_decode(s: &str) -> Result<Vec<u8>, FromHexError> {
    if s.len() % 2 != 0 {
        hex::decode(format!("0{s}"))
    } else {
        hex::decode(s)
    }
}

impl TryFrom<&str> for HexBytes {
    type Error = FromHexError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(HexBytes(hex_decode(value)?))
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(value: Vec<u8>) -> Self {
        HexBytes(value)
    }
}

impl From<HexBytes> for String {
    fn from(bytes: HexBytes) -> String {
        hex::encode(bytes.0)
    }
}

impl From<HexBytes> for Value {
    fn from(bytes: HexBytes) -> Self {
        Into::<String>::into(bytes).into()
    }
}

/// A u32 carried on the wire as an 8-character big-endian hex string, the
/// encoding used by the version-rolling extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HexU32Be(pub u32);

impl HexU32Be {
    /// True when every set bit of `candidate` is also set in this mask.
    pub fn check_mask(&self, candidate: &HexU32Be) -> bool {
        (!self.0) & candidate.0 == 0
    }

    pub fn and(&self, other: &HexU32Be) -> HexU32Be {
        HexU32Be(self.0 & other.0)
    }
}

impl TryFrom<&str> for HexU32Be {
    type Error = FromHexError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let bytes = hex_decode(value)?;
        let bytes: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| FromHexError::InvalidStringLength)?;
        Ok(HexU32Be(u32::from_be_bytes(bytes)))
    }
}

impl From<HexU32Be> for String {
    fn from(value: HexU32Be) -> String {
        format!("{:08x}", value.0)
    }
}

impl From<HexU32Be> for Value {
    fn from(value: HexU32Be) -> Self {
        Into::<String>::into(value).into()
    }
}
