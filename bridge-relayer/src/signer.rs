//! Loading and using the validator's secp256k1 signing key.

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use hex::FromHex;
use k256::ecdsa::SigningKey;
use snafu::{ResultExt, Snafu};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Errors raised while loading or using the signing key.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Error when reading the key file.
    #[snafu(display("Failed to read signing key from file '{}': {}", path, source))]
    KeyFileRead {
        /// The path of the key file that could not be read.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Error when the key file is not valid hex.
    #[snafu(display("Failed to parse signing key as hex: {}", source))]
    KeyParse {
        /// The underlying hex parsing error.
        source: hex::FromHexError,
    },

    /// Error when the parsed key length is invalid.
    ///
    /// secp256k1 private keys must be exactly 32 bytes long.
    #[snafu(display("Invalid key length: expected 32 bytes, got {}", length))]
    InvalidKeyLength {
        /// The actual length of the provided key.
        length: usize,
    },

    /// The 32 bytes are not a valid secp256k1 scalar.
    #[snafu(display("Invalid secp256k1 private key: {source}"))]
    InvalidKey {
        /// The underlying curve error.
        source: k256::ecdsa::Error,
    },

    /// Signing a digest failed.
    #[snafu(display("Failed to sign digest: {source}"))]
    Signing {
        /// The underlying signer error.
        source: alloy::signers::Error,
    },
}

/// Result alias for signer operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The validator's key, usable for consensus-chain signatures and as an Ethereum wallet.
#[derive(Clone, Debug)]
pub struct BridgeSigner {
    signer: PrivateKeySigner,
    public_key: Vec<u8>,
}

impl BridgeSigner {
    /// Wraps raw key bytes.
    pub fn from_bytes(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != 32 {
            return Err(Error::InvalidKeyLength {
                length: key_bytes.len(),
            });
        }
        let signing_key = SigningKey::from_slice(key_bytes).context(InvalidKeySnafu)?;
        let public_key = signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();

        Ok(Self {
            signer: PrivateKeySigner::from_signing_key(signing_key),
            public_key,
        })
    }

    /// The signer's address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Uncompressed SEC1 public key, `0x04` prefixed.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// The key as an alloy signer, for building wallets.
    pub fn wallet_signer(&self) -> PrivateKeySigner {
        self.signer.clone()
    }

    /// Signs a 32-byte digest, returning `r ‖ s ‖ v` with `v` in `{0, 1}`.
    pub fn sign_digest(&self, digest: &B256) -> Result<[u8; 65]> {
        let signature = self.signer.sign_hash_sync(digest).context(SigningSnafu)?;
        let mut bytes = signature.as_bytes();
        if bytes[64] >= 27 {
            bytes[64] -= 27;
        }
        Ok(bytes)
    }
}

/// Loads a hex encoded secp256k1 key from a file.
pub async fn load_signing_key(path: &str) -> Result<BridgeSigner> {
    let mut file = File::open(path).await.context(KeyFileReadSnafu {
        path: path.to_string(),
    })?;
    let mut hex_string = String::new();
    file.read_to_string(&mut hex_string)
        .await
        .context(KeyFileReadSnafu {
            path: path.to_string(),
        })?;

    let trimmed = hex_string.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let key_bytes = Vec::from_hex(trimmed).context(KeyParseSnafu)?;
    BridgeSigner::from_bytes(&key_bytes)
}
