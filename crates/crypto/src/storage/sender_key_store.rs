//! SenderKeyStore no-op implementation for CryptoStore.
//!
//! Group messaging (Sender Keys) is out of scope for V1, but libsignal
//! requires this trait to be present for some operations.

use async_trait::async_trait;
use libsignal_protocol::{ProtocolAddress, SenderKeyRecord, SenderKeyStore, SignalProtocolError};
use uuid::Uuid;

use crate::storage::CryptoStore;

#[async_trait(?Send)]
impl SenderKeyStore for CryptoStore<'_> {
    async fn store_sender_key(
        &mut self,
        _sender: &ProtocolAddress,
        _distribution_id: Uuid,
        _record: &SenderKeyRecord,
    ) -> Result<(), SignalProtocolError> {
        Ok(())
    }

    async fn load_sender_key(
        &mut self,
        _sender: &ProtocolAddress,
        _distribution_id: Uuid,
    ) -> Result<Option<SenderKeyRecord>, SignalProtocolError> {
        Ok(None)
    }
}
