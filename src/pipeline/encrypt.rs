//! Password protection with the PDF standard security handler.
//!
//! Artifacts use AES-256 (V5, revision 6). Opening requires the user
//! password; the owner password unlocks everything else. Readers are
//! granted printing only.

use crate::error::DistributorError;
use lopdf::encryption::crypt_filters::{Aes256CryptFilter, CryptFilter};
use lopdf::{Document, EncryptionState, EncryptionVersion, Permissions};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const CRYPT_FILTER: &[u8] = b"StdCF";

/// Encrypt `pdf` so it opens only with `user_password`.
///
/// An empty `owner_password` falls back to the user password.
pub fn encrypt(pdf: &[u8], user_password: &str, owner_password: &str) -> Result<Vec<u8>, DistributorError> {
    if user_password.is_empty() {
        return Err(DistributorError::Encryption("password must not be empty".into()));
    }
    let owner_password = if owner_password.is_empty() {
        user_password
    } else {
        owner_password
    };

    let mut doc = Document::load_mem(pdf)
        .map_err(|e| DistributorError::Encryption(format!("cannot parse document: {e}")))?;
    if doc.is_encrypted() {
        return Err(DistributorError::Encryption("document is already encrypted".into()));
    }

    let crypt_filter: Arc<dyn CryptFilter> = Arc::new(Aes256CryptFilter);
    let mut file_key = [0u8; 32];
    rand::rng().fill(&mut file_key);

    let version = EncryptionVersion::V5 {
        encrypt_metadata: true,
        crypt_filters: BTreeMap::from([(CRYPT_FILTER.to_vec(), crypt_filter)]),
        file_encryption_key: &file_key,
        stream_filter: CRYPT_FILTER.to_vec(),
        string_filter: CRYPT_FILTER.to_vec(),
        owner_password,
        user_password,
        permissions: Permissions::PRINTABLE,
    };
    let state = EncryptionState::try_from(version)
        .map_err(|e| DistributorError::Encryption(format!("cannot derive encryption keys: {e}")))?;
    doc.encrypt(&state)
        .map_err(|e| DistributorError::Encryption(e.to_string()))?;

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| DistributorError::Encryption(format!("cannot serialize encrypted PDF: {e}")))?;
    debug!("Encrypted {} → {} bytes (AES-256)", pdf.len(), out.len());
    Ok(out)
}
