//! Async REST client for the auxiliary HTTP surface (§6): registration,
//! login, pre-key bundle fetch/upload, and attachment upload/download.
//! Core messaging itself rides the gateway (`gateway.rs`); this module
//! only covers the request shapes §6 documents over plain HTTP.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use tessera_crypto::prekeys::{SerializedPreKey, SerializedPreKeyBundle};
use tessera_shared::ids::{AttachmentId, UserId};
use tessera_shared::wire::EncryptedMessage;

use crate::error::{ClientError, ClientResult};

const DEFAULT_BASE: &str = "http://localhost:3000/api/v1";

#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    #[serde(flatten)]
    pub bundle: &'a SerializedPreKeyBundle,
    pub one_time_pre_keys: &'a [SerializedPreKey],
}

#[derive(Debug, serde::Deserialize)]
pub struct RegisterResponse {
    pub user_id: UserId,
}

#[derive(Debug, serde::Deserialize)]
pub struct LoginResponse {
    pub user_id: UserId,
    pub token: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct UploadAttachmentResponse {
    pub attachment_id: AttachmentId,
}

impl RestClient {
    /// Build a client with no bearer token attached yet (pre-login).
    pub fn new(base_url: Option<&str>) -> ClientResult<Self> {
        let client = Client::builder()
            .default_headers({
                let mut h = reqwest::header::HeaderMap::new();
                h.insert(
                    reqwest::header::CONTENT_TYPE,
                    reqwest::header::HeaderValue::from_static("application/json"),
                );
                h
            })
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or(DEFAULT_BASE).trim_end_matches('/').to_owned(),
        })
    }

    /// Build a client carrying a bearer token for authenticated calls.
    pub fn with_token(token: &str, base_url: Option<&str>) -> ClientResult<Self> {
        let client = Client::builder()
            .default_headers({
                let mut h = reqwest::header::HeaderMap::new();
                h.insert(
                    reqwest::header::AUTHORIZATION,
                    reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                        .map_err(|e| ClientError::Config(e.to_string()))?,
                );
                h.insert(
                    reqwest::header::CONTENT_TYPE,
                    reqwest::header::HeaderValue::from_static("application/json"),
                );
                h
            })
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or(DEFAULT_BASE).trim_end_matches('/').to_owned(),
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ClientResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::ServerError {
                status: status.as_u16(),
                body,
            });
        }
        if status == StatusCode::NO_CONTENT {
            return serde_json::from_value(Value::Null).map_err(ClientError::from);
        }
        Ok(resp.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.request(Method::GET, path, None).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> ClientResult<T> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn register(&self, req: &RegisterRequest<'_>) -> ClientResult<RegisterResponse> {
        let body = serde_json::to_value(req)?;
        self.post("/users", &body).await
    }

    pub async fn login(&self, username: &str, password: &str) -> ClientResult<LoginResponse> {
        let body = serde_json::json!({ "username": username, "password": password });
        self.post("/sessions", &body).await
    }

    /// Fetch the pre-key bundle for a device address (`"{user_id}.{device_sub_id}"`,
    /// §4.7) — each sub-device publishes and is addressed by its own bundle.
    pub async fn fetch_pre_key_bundle(&self, device_address: &str) -> ClientResult<SerializedPreKeyBundle> {
        self.get(&format!("/keys/{device_address}")).await
    }

    pub async fn upload_pre_keys(&self, keys: &[SerializedPreKey]) -> ClientResult<()> {
        let body = serde_json::to_value(keys)?;
        let _: Value = self.post("/keys", &body).await?;
        Ok(())
    }

    pub async fn send_message(
        &self,
        recipient_id: UserId,
        message: &EncryptedMessage,
    ) -> ClientResult<()> {
        let body = serde_json::to_value(message)?;
        let _: Value = self.post(&format!("/messages/{recipient_id}"), &body).await?;
        Ok(())
    }

    /// Single-part attachment upload (ciphertext at or below the chunk threshold).
    pub async fn upload_attachment(
        &self,
        ciphertext: &[u8],
        content_type: &str,
    ) -> ClientResult<AttachmentId> {
        let body = serde_json::json!({
            "content_type": content_type,
            "data": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, ciphertext),
        });
        let resp: UploadAttachmentResponse = self.post("/attachments", &body).await?;
        Ok(resp.attachment_id)
    }

    /// Upload one chunk of a split attachment.
    pub async fn upload_attachment_chunk(
        &self,
        attachment_id: AttachmentId,
        chunk_index: u32,
        total_chunks: u32,
        chunk: &[u8],
    ) -> ClientResult<()> {
        let body = serde_json::json!({
            "attachment_id": attachment_id,
            "chunk_index": chunk_index,
            "total_chunks": total_chunks,
            "data": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, chunk),
        });
        let _: Value = self.post("/attachments/chunks", &body).await?;
        Ok(())
    }

    pub async fn download_attachment(&self, attachment_id: AttachmentId) -> ClientResult<Vec<u8>> {
        #[derive(serde::Deserialize)]
        struct DownloadResponse {
            #[serde(with = "tessera_shared::wire::base64_serde")]
            data: Vec<u8>,
        }
        let resp: DownloadResponse = self.get(&format!("/attachments/{attachment_id}")).await?;
        Ok(resp.data)
    }
}
