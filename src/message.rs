//! Protocol Message Types
//!
//! This module defines the cross-chain message emitted by the on-ramp contract, its packed
//! wire encoding, and the attestation payload the verifier writes to the attestation store.
//!
//! ## Wire Encoding
//!
//! ```text
//! message_id(32) | source(8) | dest(8) | sequence(8) | sender | receiver | data |
//! fee_token | fee_amount(16) | token_count(4) | {token | amount(16)}* | extra_args
//! ```
//!
//! Integers are big-endian. Variable-length fields carry a 4-byte big-endian length prefix.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// HASHING
// ============================================================================

/// Computes the keccak256 digest of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

// ============================================================================
// DECODE ERRORS
// ============================================================================

/// Failure to decode a message or attestation payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    #[error("invalid attestation payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("message hash mismatch: payload says {expected}, encoded data hashes to {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("message id mismatch: stored under {expected}, payload carries {actual}")]
    MessageIdMismatch { expected: MessageId, actual: MessageId },
    #[error("invalid message id: {0}")]
    InvalidMessageId(String),
}

// ============================================================================
// MESSAGE ID
// ============================================================================

/// 32-byte protocol message identifier.
///
/// Rendered as `0x` followed by 64 lowercase hex characters. This rendering is also the
/// attestation store key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MessageId(pub [u8; 32]);

impl MessageId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Attestation store key for this message.
    pub fn store_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self)
    }
}

impl FromStr for MessageId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        if stripped.len() != 64 {
            return Err(DecodeError::InvalidMessageId(format!(
                "expected 64 hex characters, got {}",
                stripped.len()
            )));
        }
        let bytes = hex::decode(stripped).map_err(|e| DecodeError::InvalidMessageId(e.to_string()))?;
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Ok(Self(id))
    }
}

impl Serialize for MessageId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde helpers rendering byte fields as `0x`-prefixed hex strings.
mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }

    pub mod array32 {
        use serde::{Deserializer, Serializer};

        pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
            super::serialize(bytes, serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
            let bytes = super::deserialize(deserializer)?;
            bytes
                .try_into()
                .map_err(|b: Vec<u8>| serde::de::Error::custom(format!("expected 32 bytes, got {}", b.len())))
        }
    }
}

// ============================================================================
// PROTOCOL MESSAGE
// ============================================================================

/// Token transferred alongside a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    /// Token address on the source chain
    #[serde(with = "hex_serde")]
    pub token: Vec<u8>,
    /// Amount in the token's smallest unit
    pub amount: u128,
}

/// Cross-chain message emitted by the source chain's on-ramp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Unique message identifier (primary key)
    pub message_id: MessageId,
    /// Selector of the chain the message was emitted on
    pub source_chain_selector: u64,
    /// Selector of the chain the message is destined for
    pub dest_chain_selector: u64,
    /// Monotonic sequence number per source→dest lane
    pub sequence_number: u64,
    /// Sending contract or account on the source chain
    #[serde(with = "hex_serde")]
    pub sender: Vec<u8>,
    /// Receiving contract on the destination chain
    #[serde(with = "hex_serde")]
    pub receiver: Vec<u8>,
    /// Opaque application payload
    #[serde(with = "hex_serde")]
    pub data: Vec<u8>,
    /// Token the fee was paid in
    #[serde(with = "hex_serde")]
    pub fee_token: Vec<u8>,
    /// Fee amount paid
    pub fee_token_amount: u128,
    /// Tokens bridged with the message
    pub token_amounts: Vec<TokenAmount>,
    /// Verifier-specific extra arguments
    #[serde(with = "hex_serde")]
    pub extra_args: Vec<u8>,
}

impl ProtocolMessage {
    /// Encodes the message in the packed wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.body_len_hint());
        out.extend_from_slice(self.message_id.as_bytes());
        self.encode_body(&mut out);
        out
    }

    /// Decodes a message from the packed wire layout.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);

        let message_id = MessageId(reader.array32()?);
        let source_chain_selector = reader.u64()?;
        let dest_chain_selector = reader.u64()?;
        let sequence_number = reader.u64()?;
        let sender = reader.var_bytes()?;
        let receiver = reader.var_bytes()?;
        let data = reader.var_bytes()?;
        let fee_token = reader.var_bytes()?;
        let fee_token_amount = reader.u128()?;

        let token_count = reader.u32()? as usize;
        let mut token_amounts = Vec::with_capacity(token_count.min(64));
        for _ in 0..token_count {
            let token = reader.var_bytes()?;
            let amount = reader.u128()?;
            token_amounts.push(TokenAmount { token, amount });
        }

        let extra_args = reader.var_bytes()?;
        reader.finish()?;

        Ok(Self {
            message_id,
            source_chain_selector,
            dest_chain_selector,
            sequence_number,
            sender,
            receiver,
            data,
            fee_token,
            fee_token_amount,
            token_amounts,
            extra_args,
        })
    }

    /// keccak256 over the full encoding. This is what the verifier signs.
    pub fn hash(&self) -> [u8; 32] {
        keccak256(&self.encode())
    }

    /// Derives a message ID from every field except the ID itself.
    ///
    /// The on-ramp assigns IDs this way; the simulated chain and tests use it too.
    pub fn compute_message_id(&self) -> MessageId {
        let mut body = Vec::with_capacity(self.body_len_hint());
        self.encode_body(&mut body);
        MessageId(keccak256(&body))
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.source_chain_selector.to_be_bytes());
        out.extend_from_slice(&self.dest_chain_selector.to_be_bytes());
        out.extend_from_slice(&self.sequence_number.to_be_bytes());
        put_var_bytes(out, &self.sender);
        put_var_bytes(out, &self.receiver);
        put_var_bytes(out, &self.data);
        put_var_bytes(out, &self.fee_token);
        out.extend_from_slice(&self.fee_token_amount.to_be_bytes());
        out.extend_from_slice(&(self.token_amounts.len() as u32).to_be_bytes());
        for token_amount in &self.token_amounts {
            put_var_bytes(out, &token_amount.token);
            out.extend_from_slice(&token_amount.amount.to_be_bytes());
        }
        put_var_bytes(out, &self.extra_args);
    }

    fn body_len_hint(&self) -> usize {
        24 + 16
            + 4 * 5
            + self.sender.len()
            + self.receiver.len()
            + self.data.len()
            + self.fee_token.len()
            + self.extra_args.len()
            + 4
            + self.token_amounts.iter().map(|t| 20 + t.token.len()).sum::<usize>()
    }
}

/// Ordered (source selector, destination selector) pair served by one relay instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lane {
    pub source_chain_selector: u64,
    pub dest_chain_selector: u64,
}

impl Lane {
    /// Whether `message` travels on this lane.
    pub fn carries(&self, message: &ProtocolMessage) -> bool {
        message.source_chain_selector == self.source_chain_selector
            && message.dest_chain_selector == self.dest_chain_selector
    }
}

fn put_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Cursor over a packed encoding.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.buf.len() - self.pos;
        if n > remaining {
            return Err(DecodeError::UnexpectedEnd { needed: n, remaining });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array32(&mut self) -> Result<[u8; 32], DecodeError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.take(32)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let mut out = [0u8; 4];
        out.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(out))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(out))
    }

    fn u128(&mut self) -> Result<u128, DecodeError> {
        let mut out = [0u8; 16];
        out.copy_from_slice(self.take(16)?);
        Ok(u128::from_be_bytes(out))
    }

    fn var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn finish(self) -> Result<(), DecodeError> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            trailing => Err(DecodeError::TrailingBytes(trailing)),
        }
    }
}

// ============================================================================
// ATTESTATION PAYLOAD
// ============================================================================

/// Attestation written by the verifier under the message ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationPayload {
    /// keccak256 of `encoded_message_data`
    #[serde(with = "hex_serde::array32")]
    pub message_hash: [u8; 32],
    /// Verifier signature over `message_hash`
    #[serde(with = "hex_serde")]
    pub signature: Vec<u8>,
    /// Packed message encoding
    #[serde(with = "hex_serde")]
    pub encoded_message_data: Vec<u8>,
}

/// On-chain call decoded from an attestation, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionCall {
    /// The attested message
    pub message: ProtocolMessage,
    /// Packed encoding passed to the off-ramp
    pub encoded_message: Vec<u8>,
    /// Verifier signature passed to the off-ramp
    pub signature: Vec<u8>,
}

impl AttestationPayload {
    /// Builds the payload for `message` with a signature over its hash.
    pub fn new(message: &ProtocolMessage, signature: Vec<u8>) -> Self {
        let encoded_message_data = message.encode();
        Self {
            message_hash: keccak256(&encoded_message_data),
            signature,
            encoded_message_data,
        }
    }

    /// Serializes the payload to the opaque blob stored in the attestation store.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing plain strings and integers into a Vec cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decodes the payload into an on-chain call, checking it belongs to `expected_id`.
    pub fn decode_call(&self, expected_id: &MessageId) -> Result<ExecutionCall, DecodeError> {
        let actual_hash = keccak256(&self.encoded_message_data);
        if actual_hash != self.message_hash {
            return Err(DecodeError::HashMismatch {
                expected: format!("0x{}", hex::encode(self.message_hash)),
                actual: format!("0x{}", hex::encode(actual_hash)),
            });
        }

        let message = ProtocolMessage::decode(&self.encoded_message_data)?;
        if message.message_id != *expected_id {
            return Err(DecodeError::MessageIdMismatch {
                expected: *expected_id,
                actual: message.message_id,
            });
        }

        Ok(ExecutionCall {
            message,
            encoded_message: self.encoded_message_data.clone(),
            signature: self.signature.clone(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
