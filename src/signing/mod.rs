//! Wallet signing for CLOB requests.
//!
//! Signers are built once per private key and cached; order and auth
//! signatures both go through the cache.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use once_cell::sync::Lazy;
use polymarket_client_sdk::clob::types::SignatureType;
use tracing::debug;

use crate::error::TradingError;
use crate::metrics;

/// Signers keyed by a hash of the private key.
static SIGNER_CACHE: Lazy<RwLock<HashMap<u64, PrivateKeySigner>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn key_hash(private_key: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    private_key.hash(&mut hasher);
    hasher.finish()
}

/// Map the configured signature type onto the SDK enum.
///
/// 0 is a plain wallet, 1 a Magic.link proxy, 2 a Gnosis Safe. Unknown
/// values fall back to a plain wallet.
pub fn signature_type_from_u8(sig_type: u8) -> SignatureType {
    match sig_type {
        1 => SignatureType::Proxy,
        2 => SignatureType::GnosisSafe,
        _ => SignatureType::Eoa,
    }
}

/// Wire code for the configured signature type.
pub fn signature_type_code(sig_type: u8) -> u8 {
    match signature_type_from_u8(sig_type) {
        SignatureType::Proxy => 1,
        SignatureType::GnosisSafe => 2,
        _ => 0,
    }
}

/// Build a signer from a hex private key, with or without `0x`.
pub fn create_signer(private_key: &str) -> Result<PrivateKeySigner, TradingError> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = hex::decode(key)
        .map_err(|e| TradingError::SigningError(format!("Invalid private key hex: {}", e)))?;

    let key_bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        TradingError::SigningError(format!("Private key must be 32 bytes, got {}", bytes.len()))
    })?;

    PrivateKeySigner::from_bytes(&key_bytes.into())
        .map_err(|e| TradingError::SigningError(format!("Failed to create signer: {}", e)))
}

/// Cached signer for `private_key`.
pub fn get_or_create_signer(private_key: &str) -> Result<PrivateKeySigner, TradingError> {
    let hash = key_hash(private_key);

    {
        let cache = SIGNER_CACHE.read().map_err(|e| {
            TradingError::SigningError(format!("Failed to acquire cache read lock: {}", e))
        })?;
        if let Some(signer) = cache.get(&hash) {
            return Ok(signer.clone());
        }
    }

    let signer = create_signer(private_key)?;

    let mut cache = SIGNER_CACHE.write().map_err(|e| {
        TradingError::SigningError(format!("Failed to acquire cache write lock: {}", e))
    })?;
    let signer = cache.entry(hash).or_insert(signer).clone();
    debug!("Signer cached");
    Ok(signer)
}

/// Checksummed wallet address for a private key.
pub fn address_from_private_key(private_key: &str) -> Result<String, TradingError> {
    let signer = get_or_create_signer(private_key)?;
    Ok(format!("{:?}", signer.address()))
}

/// Sign a message with the cached signer.
pub async fn sign_message(private_key: &str, message: &[u8]) -> Result<Vec<u8>, TradingError> {
    let started = Instant::now();
    let signer = get_or_create_signer(private_key)?;
    let signature = signer
        .sign_message(message)
        .await
        .map_err(|e| TradingError::SigningError(format!("Failed to sign message: {}", e)))?;
    metrics::record_signing_latency(started);
    Ok(signature.as_bytes().to_vec())
}

/// CLOB authentication headers: a signed timestamp proving wallet ownership.
pub async fn generate_auth_headers(
    private_key: &str,
    signature_type: u8,
) -> Result<Vec<(String, String)>, TradingError> {
    let signer = get_or_create_signer(private_key)?;
    let address = format!("{:?}", signer.address());
    let timestamp = chrono::Utc::now().timestamp_millis().to_string();

    let message = format!("polymarket:{}", timestamp);
    let signature = sign_message(private_key, message.as_bytes()).await?;

    debug!(address = %address, signature_type, "Generated auth headers");

    Ok(vec![
        ("POLY_ADDRESS".to_string(), address),
        ("POLY_SIGNATURE".to_string(), format!("0x{}", hex::encode(signature))),
        ("POLY_TIMESTAMP".to_string(), timestamp),
        ("POLY_NONCE".to_string(), "0".to_string()),
    ])
}
