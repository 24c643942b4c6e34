//! Packed (non-padded) Ethereum-style ABI encoding.
//!
//! Unlike standard ABI encoding, packed encoding never pads values to
//! 32-byte words: addresses are 20 bytes, `uintN` is exactly `N/8` bytes
//! big-endian, `bytes32` is 32 raw bytes, and dynamic `bytes` are emitted
//! raw with no length prefix. This mirrors `abi.encodePacked` and is the
//! encoding `channel_id`/`state_hash` are derived from.

use crate::{Address, FixedPart, Outcome, State, ValidationError, VariablePart};

/// A growable packed-encoding buffer.
#[derive(Default)]
pub struct PackedEncoder {
    buf: Vec<u8>,
}

impl PackedEncoder {
    /// Start a new empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a 20-byte address.
    pub fn address(&mut self, addr: &Address) -> &mut Self {
        self.buf.extend_from_slice(&addr.0);
        self
    }

    /// Append a big-endian `u32`.
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Append a big-endian `u64`.
    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Append 32 raw bytes (a `bytes32`).
    pub fn bytes32(&mut self, v: &[u8; 32]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Append raw dynamic bytes with no length prefix.
    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Append a decimal-string amount as a big-endian 32-byte `uint256`.
    ///
    /// Fails rather than panics if `amount` is not a valid non-negative
    /// base-10 integer that fits in 256 bits.
    pub fn try_uint256_decimal(&mut self, amount: &str) -> Result<&mut Self, ValidationError> {
        let value = parse_uint256_decimal(amount)?;
        self.buf.extend_from_slice(&value.to_be_bytes());
        Ok(self)
    }

    /// Consume the encoder, returning the packed byte string.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// `encode_packed(participants || nonce(u64) || app_definition(address) ||
/// challenge_duration(u32))`.
pub fn encode_fixed_part(fixed_part: &FixedPart) -> Vec<u8> {
    let mut enc = PackedEncoder::new();
    for participant in &fixed_part.participants {
        enc.address(participant);
    }
    enc.u64(fixed_part.channel_nonce);
    enc.address(&fixed_part.app_definition);
    enc.u32(fixed_part.challenge_duration);
    enc.finish()
}

fn encode_outcome(enc: &mut PackedEncoder, outcome: &Outcome) -> Result<(), ValidationError> {
    for asset_outcome in &outcome.0 {
        enc.address(&asset_outcome.asset);
        for allocation in &asset_outcome.allocations {
            enc.bytes32(allocation.destination.as_bytes());
            enc.try_uint256_decimal(&allocation.amount)?;
            enc.u32(allocation.kind as u32);
            enc.bytes(&allocation.metadata);
        }
    }
    Ok(())
}

fn encode_variable_part(
    enc: &mut PackedEncoder,
    variable_part: &VariablePart,
) -> Result<(), ValidationError> {
    enc.bytes(&variable_part.app_data);
    encode_outcome(enc, &variable_part.outcome)?;
    enc.u64(variable_part.turn_num);
    enc.u32(variable_part.is_final as u32);
    Ok(())
}

/// `encode_packed(fixed_part || variable_part)`, the preimage of
/// `State::state_hash`.
///
/// Fails if any allocation amount is not a valid u256 decimal string.
pub fn encode_state(state: &State) -> Result<Vec<u8>, ValidationError> {
    let mut enc = PackedEncoder::new();
    enc.bytes(&encode_fixed_part(&state.fixed_part));
    encode_variable_part(&mut enc, &state.variable_part)?;
    Ok(enc.finish())
}

/// Parse a decimal-string amount as a u256, surfacing a `ValidationError`
/// rather than panicking.
pub fn parse_uint256_decimal(amount: &str) -> Result<u256_decimal::U256, ValidationError> {
    amount
        .parse()
        .map_err(|err: u256_decimal::ParseU256Error| ValidationError::MalformedState(err.to_string()))
}

/// A minimal fixed-width unsigned 256-bit integer, just enough to parse a
/// decimal string and emit 32 big-endian bytes. Not a general-purpose
/// bignum type: arithmetic beyond parsing/encoding is out of scope here,
/// amounts are opaque decimal strings everywhere else in this crate.
pub mod u256_decimal {
    use std::fmt;
    use std::str::FromStr;

    /// A 256-bit unsigned integer stored as 32 big-endian bytes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct U256([u8; 32]);

    impl U256 {
        /// Big-endian byte representation.
        pub fn to_be_bytes(self) -> [u8; 32] {
            self.0
        }
    }

    /// Error returned when a decimal string is not a valid u256.
    #[derive(Debug, thiserror::Error)]
    #[error("invalid u256 decimal string: {0}")]
    pub struct ParseU256Error(String);

    impl FromStr for U256 {
        type Err = ParseU256Error;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseU256Error(s.to_string()));
            }
            let mut bytes = [0u8; 32];
            for ch in s.bytes() {
                let digit = (ch - b'0') as u32;
                let mut carry = digit;
                for byte in bytes.iter_mut().rev() {
                    let product = *byte as u32 * 10 + carry;
                    *byte = (product & 0xff) as u8;
                    carry = product >> 8;
                }
                if carry != 0 {
                    return Err(ParseU256Error(s.to_string()));
                }
            }
            Ok(U256(bytes))
        }
    }

    impl fmt::Display for U256 {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            // Render back to decimal for error messages / debugging only.
            let mut digits = vec![0u8];
            for byte in self.0 {
                let mut carry = byte as u32;
                for d in digits.iter_mut() {
                    let v = *d as u32 * 256 + carry;
                    *d = (v % 10) as u8;
                    carry = v / 10;
                }
                while carry > 0 {
                    digits.push((carry % 10) as u8);
                    carry /= 10;
                }
            }
            while digits.len() > 1 && *digits.last().unwrap() == 0 {
                digits.pop();
            }
            for d in digits.iter().rev() {
                write!(f, "{d}")?;
            }
            Ok(())
        }
    }
}
