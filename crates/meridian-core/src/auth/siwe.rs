//! Sign-In-With-Ethereum (EIP-4361) messages and EIP-191 personal-sign signatures.

use chrono::{DateTime, SecondsFormat, Utc};
use k256::ecdsa::SigningKey;
use rand::{distributions::Alphanumeric, Rng};
use sha3::{Digest, Keccak256};
use std::fmt;

use super::SessionError;

const NONCE_LENGTH: usize = 16;

/// An EIP-4361 sign-in request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiweMessage {
    pub domain: String,
    /// EIP-55 checksummed address.
    pub address: String,
    pub statement: Option<String>,
    pub uri: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    /// Lifetime of the sign-in request itself, not of the credential it yields.
    pub expiration_time: Option<DateTime<Utc>>,
}

impl SiweMessage {
    /// Message with a fresh random nonce.
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        address: impl Into<String>,
        uri: impl Into<String>,
        chain_id: u64,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            domain: domain.into(),
            address: address.into(),
            statement: None,
            uri: uri.into(),
            chain_id,
            nonce: generate_nonce(),
            issued_at,
            expiration_time: None,
        }
    }

    #[must_use]
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        let statement = statement.into();
        self.statement = (!statement.is_empty()).then_some(statement);
        self
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration_time: DateTime<Utc>) -> Self {
        self.expiration_time = Some(expiration_time);
        self
    }
}

impl fmt::Display for SiweMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} wants you to sign in with your Ethereum account:", self.domain)?;
        writeln!(f, "{}", self.address)?;
        writeln!(f)?;
        if let Some(statement) = &self.statement {
            writeln!(f, "{statement}")?;
        }
        writeln!(f)?;
        writeln!(f, "URI: {}", self.uri)?;
        writeln!(f, "Version: 1")?;
        writeln!(f, "Chain ID: {}", self.chain_id)?;
        writeln!(f, "Nonce: {}", self.nonce)?;
        write!(f, "Issued At: {}", self.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true))?;
        if let Some(expiration) = &self.expiration_time {
            write!(
                f,
                "\nExpiration Time: {}",
                expiration.to_rfc3339_opts(SecondsFormat::Secs, true)
            )?;
        }
        Ok(())
    }
}

/// Random alphanumeric nonce.
#[must_use]
pub fn generate_nonce() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(NONCE_LENGTH).map(char::from).collect()
}

/// secp256k1 key used to sign session requests. Decoded once and reused.
pub struct SessionSigner {
    key: SigningKey,
    address: String,
}

impl SessionSigner {
    /// Decodes a hex private key, with or without `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidKey`] for malformed hex or an out-of-range scalar.
    pub fn from_hex(private_key: &str) -> Result<Self, SessionError> {
        let trimmed = private_key.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(trimmed).map_err(|_| SessionError::InvalidKey)?;
        let key = SigningKey::from_slice(&bytes).map_err(|_| SessionError::InvalidKey)?;
        let address = checksum_address(&public_key_address(&key));
        Ok(Self { key, address })
    }

    /// EIP-55 address of the key.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Signs `message` with the EIP-191 personal-sign prefix.
    ///
    /// Returns `0x`-prefixed hex of `r || s || v` with `v` in `{27, 28}`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidKey`] if the signing primitive fails.
    pub fn sign_message(&self, message: &str) -> Result<String, SessionError> {
        let digest = personal_message_hash(message);
        let (signature, recovery_id) =
            self.key.sign_prehash_recoverable(&digest).map_err(|_| SessionError::InvalidKey)?;

        let mut bytes = Vec::with_capacity(65);
        bytes.extend_from_slice(&signature.to_bytes());
        bytes.push(recovery_id.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

impl fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSigner").field("address", &self.address).finish_non_exhaustive()
    }
}

/// Keccak-256 of `"\x19Ethereum Signed Message:\n" + len(message) + message`.
#[must_use]
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

fn public_key_address(key: &SigningKey) -> [u8; 20] {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// EIP-55 mixed-case encoding of a 20-byte address.
#[must_use]
pub fn checksum_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let hash = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 { hash[i / 2] >> 4 } else { hash[i / 2] & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
