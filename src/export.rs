//! Password-protected export of token configs.
//!
//! An export is an [`EncryptedBlob`] whose plaintext is the JSON array of
//! configs. Configs that were already encrypted stay sealed inside it, so an
//! import needs the export password and, later, each config's own password.

use crate::credentials::{decrypt, encrypt, EncryptedBlob, TokenConfig};
use crate::error::{Result, TokenError};
use tracing::info;
use zeroize::Zeroizing;

/// Seals `configs` under `password`.
pub fn export_configs(configs: &[TokenConfig], password: &str) -> Result<EncryptedBlob> {
    let json = Zeroizing::new(serde_json::to_string(configs)?);
    let blob = encrypt(&json, password)?;
    info!(config_count = configs.len(), "Configs exported");
    Ok(blob)
}

/// Opens an export.
///
/// A wrong password is [`TokenError::Decryption`]; a payload that decrypts
/// but is not a config array is [`TokenError::InvalidExport`].
pub fn import_configs(blob: &EncryptedBlob, password: &str) -> Result<Vec<TokenConfig>> {
    let json = decrypt(blob, password)?;
    let configs: Vec<TokenConfig> =
        serde_json::from_str(&json).map_err(|e| TokenError::InvalidExport(e.to_string()))?;

    for config in &configs {
        config
            .validate()
            .map_err(|e| TokenError::InvalidExport(format!("config {}: {}", config.id, e)))?;
    }

    info!(config_count = configs.len(), "Configs imported");
    Ok(configs)
}
