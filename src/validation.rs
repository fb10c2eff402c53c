use bs58;
use thiserror::Error;

/// Decoded length of a base58check address: version byte, hash160, checksum
const ADDRESS_BYTES: usize = 25;
const ADDRESS_PREFIX: char = 'E';
pub const MAX_TRACE_DEPTH: u32 = 20;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    #[error("Invalid hash: {0}. Must be 64 hex characters")]
    InvalidHash(String),

    #[error("Invalid page: {0}. Pages start at 1")]
    InvalidPage(u32),

    #[error("Invalid trace depth: {0}. Must be between 1 and {MAX_TRACE_DEPTH}")]
    InvalidDepth(u32),
}

pub fn validate_address(address: &str) -> Result<(), ValidationError> {
    // Check if address is empty
    if address.trim().is_empty() {
        return Err(ValidationError::MissingParameter("address".to_string()));
    }

    if !address.starts_with(ADDRESS_PREFIX) {
        return Err(ValidationError::InvalidAddress(address.to_string()));
    }

    // Decode base58 string
    let decoded = match bs58::decode(address).into_vec() {
        Ok(bytes) => bytes,
        Err(_) => return Err(ValidationError::InvalidAddress(address.to_string())),
    };

    if decoded.len() != ADDRESS_BYTES {
        return Err(ValidationError::InvalidAddress(address.to_string()));
    }

    Ok(())
}

/// Block hashes and txids
pub fn validate_hash(hash: &str) -> Result<(), ValidationError> {
    if hash.trim().is_empty() {
        return Err(ValidationError::MissingParameter("hash".to_string()));
    }

    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidHash(hash.to_string()));
    }

    Ok(())
}

pub fn validate_page(page: u32) -> Result<(), ValidationError> {
    if page == 0 {
        return Err(ValidationError::InvalidPage(page));
    }
    Ok(())
}

pub fn validate_depth(depth: u32) -> Result<(), ValidationError> {
    if !(1..=MAX_TRACE_DEPTH).contains(&depth) {
        return Err(ValidationError::InvalidDepth(depth));
    }
    Ok(())
}
