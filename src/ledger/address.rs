use crate::constants::{SS58_CHECKSUM_PREFIX, SS58_MAX_PREFIX};
use blake2::{Blake2b512, Digest};
use thiserror::Error;

const ETHEREUM_KEY_LEN: usize = 20;
const SUBSTRATE_KEY_LEN: usize = 32;
const SS58_CHECKSUM_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("empty account identifier")]
    Empty,
    #[error("invalid account length: expected 20 or 32 bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid hex account identifier {0:?}")]
    InvalidHex(String),
    #[error("account byte sequence contains a non-byte value")]
    InvalidByte,
    #[error("unsupported account representation: {0}")]
    Unsupported(String),
    #[error("ss58 prefix {0} is out of range")]
    InvalidPrefix(u16),
}

/// An account identifier as it shows up in event payloads or chain storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawAccount<'a> {
    Bytes(&'a [u8]),
    Encoded(&'a str),
}

/// Maps raw public keys to the canonical string key used as primary key
/// everywhere in the store.
///
/// - 20-byte keys become lowercase `0x` hex
/// - 32-byte keys become SS58 with the configured network prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressEncoder {
    ss58_prefix: u16,
}

impl AddressEncoder {
    pub fn new(ss58_prefix: u16) -> Result<Self, AddressError> {
        if ss58_prefix > SS58_MAX_PREFIX {
            return Err(AddressError::InvalidPrefix(ss58_prefix));
        }
        Ok(Self { ss58_prefix })
    }

    pub fn normalize(&self, account: RawAccount) -> Result<String, AddressError> {
        match account {
            RawAccount::Bytes(bytes) => self.encode_bytes(bytes),
            RawAccount::Encoded(encoded) => self.encode_str(encoded),
        }
    }

    pub fn encode_bytes(&self, bytes: &[u8]) -> Result<String, AddressError> {
        match bytes.len() {
            0 => Err(AddressError::Empty),
            ETHEREUM_KEY_LEN => Ok(format!("0x{}", hex::encode(bytes))),
            SUBSTRATE_KEY_LEN => Ok(self.ss58_encode(bytes)),
            len => Err(AddressError::InvalidLength(len)),
        }
    }

    /// Hex strings are decoded and re-encoded by length; anything else is
    /// taken to be already encoded
    pub fn encode_str(&self, encoded: &str) -> Result<String, AddressError> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(AddressError::Empty);
        }

        match encoded
            .strip_prefix("0x")
            .or_else(|| encoded.strip_prefix("0X"))
        {
            Some(hex_str) => {
                let bytes = hex::decode(hex_str)
                    .map_err(|_| AddressError::InvalidHex(encoded.to_string()))?;
                self.encode_bytes(&bytes)
            }
            None => Ok(encoded.to_string()),
        }
    }

    fn ss58_encode(&self, public_key: &[u8]) -> String {
        let mut payload = ss58_prefix_bytes(self.ss58_prefix);
        payload.extend_from_slice(public_key);

        let mut hasher = Blake2b512::new();
        hasher.update(SS58_CHECKSUM_PREFIX);
        hasher.update(&payload);
        let checksum = hasher.finalize();

        payload.extend_from_slice(&checksum[..SS58_CHECKSUM_LEN]);
        bs58::encode(payload).into_string()
    }
}

/// Simple prefixes (< 64) take one byte, the rest use the two-byte form
fn ss58_prefix_bytes(prefix: u16) -> Vec<u8> {
    if prefix < 64 {
        vec![prefix as u8]
    } else {
        let first = (((prefix & 0b0000_0000_1111_1100) >> 2) as u8) | 0b0100_0000;
        let second = ((prefix >> 8) as u8) | (((prefix & 0b0000_0000_0000_0011) as u8) << 6);
        vec![first, second]
    }
}
