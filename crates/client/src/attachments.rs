//! Attachment encryption, chunking, and local cache bookkeeping (§4.3, C4).
//!
//! Crypto (AES-256-GCM encrypt/decrypt) is delegated to
//! `tessera_crypto::file_encryption`; this module owns the envelope shape,
//! the chunking arithmetic, the constant-time integrity check on download,
//! and the cache-on-upload invariant.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use tessera_crypto::file_encryption::{self, EncryptedBlob, FileKey};
use tessera_shared::ids::AttachmentId;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::local_store::LocalStore;
use crate::rest::RestClient;

/// The envelope that rides inside an encrypted `ClientMessage`, carrying
/// everything the recipient needs to fetch and decrypt the content (§3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AttachmentEnvelope {
    pub attachment_id: AttachmentId,
    pub content_key: [u8; 32],
    pub nonce: [u8; 12],
    pub content_hash: [u8; 32],
    pub content_type: String,
    pub size_bytes: u64,
    pub chunk_count: Option<u32>,
}

/// Upload a plaintext payload: encrypt, chunk if needed, push to the blob
/// store, and cache the plaintext locally under the returned attachment id
/// (cache-on-upload invariant, §4.3 step 6).
pub async fn upload_attachment(
    config: &ClientConfig,
    store: &LocalStore<'_>,
    rest: &RestClient,
    plaintext: &[u8],
    content_type: &str,
    now: i64,
) -> ClientResult<AttachmentEnvelope> {
    let content_hash: [u8; 32] = Sha256::digest(plaintext).into();
    let (blob, key): (EncryptedBlob, FileKey) = file_encryption::encrypt_file(plaintext, None)?;

    let (attachment_id, chunk_count) = if blob.data.len() <= config.attachment_chunk_threshold_bytes {
        let id = rest.upload_attachment(&blob.data, content_type).await?;
        (id, None)
    } else {
        let id = AttachmentId::new();
        let chunks: Vec<&[u8]> = blob
            .data
            .chunks(config.attachment_chunk_threshold_bytes)
            .collect();
        let total_chunks = chunks.len() as u32;
        for (index, chunk) in chunks.iter().enumerate() {
            rest.upload_attachment_chunk(id, index as u32, total_chunks, chunk)
                .await?;
        }
        (id, Some(total_chunks))
    };

    store.cache_attachment(attachment_id, content_type, plaintext, now)?;

    Ok(AttachmentEnvelope {
        attachment_id,
        content_key: key.to_bytes(),
        nonce: blob.data[..12].try_into().unwrap_or([0u8; 12]),
        content_hash,
        content_type: content_type.to_string(),
        size_bytes: plaintext.len() as u64,
        chunk_count,
    })
}

/// Fetch and decrypt an attachment given its envelope, verifying content
/// integrity in constant time before caching the plaintext (§4.3).
pub async fn download_attachment(
    store: &LocalStore<'_>,
    rest: &RestClient,
    envelope: &AttachmentEnvelope,
    now: i64,
) -> ClientResult<Vec<u8>> {
    if let Some(cached) = store.get_cached_attachment(envelope.attachment_id)? {
        return Ok(cached);
    }

    let ciphertext = rest.download_attachment(envelope.attachment_id).await?;
    let key = FileKey::from_bytes(envelope.content_key);
    let blob = EncryptedBlob { data: ciphertext };
    let plaintext = file_encryption::decrypt_file(&key, &blob, None)?;

    verify_integrity(&plaintext, &envelope.content_hash, envelope.attachment_id)?;

    store.cache_attachment(envelope.attachment_id, &envelope.content_type, &plaintext, now)?;
    Ok(plaintext)
}

/// Constant-time SHA-256 comparison: execution time must not depend on the
/// position of the first differing byte (§4.3, §8 testable property).
fn verify_integrity(
    plaintext: &[u8],
    expected_hash: &[u8; 32],
    attachment_id: AttachmentId,
) -> ClientResult<()> {
    let actual_hash: [u8; 32] = Sha256::digest(plaintext).into();
    if actual_hash.ct_eq(expected_hash).into() {
        Ok(())
    } else {
        Err(ClientError::Integrity {
            attachment_id: attachment_id.to_string(),
        })
    }
}
