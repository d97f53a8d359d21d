//! Request parameter extraction
//!
//! Every cache endpoint accepts its fields as JSON, urlencoded form, or
//! multipart form data. A request without a recognized body yields an empty
//! parameter set, so the handler reports which field is missing.

use crate::error::{Result, ServerError};
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header;
use axum::Form;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct CacheParams {
    pub namespace: Option<String>,
    pub key: Option<String>,
    pub value: Option<Vec<u8>>,
    pub expire: Option<String>,
}

impl CacheParams {
    fn insert(&mut self, name: &str, data: Vec<u8>) {
        match name {
            "namespace" => self.namespace = Some(String::from_utf8_lossy(&data).into_owned()),
            "key" => self.key = Some(String::from_utf8_lossy(&data).into_owned()),
            "expire" => self.expire = Some(String::from_utf8_lossy(&data).into_owned()),
            "value" => self.value = Some(data),
            _ => {}
        }
    }

    pub fn require_key(&self) -> Result<&str> {
        match self.key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ServerError::BadRequest("Missing 'key'".to_string())),
        }
    }

    pub fn require_value(&self) -> Result<&[u8]> {
        self.value
            .as_deref()
            .ok_or_else(|| ServerError::BadRequest("Missing 'value'".to_string()))
    }

    /// Namespace as sent, treating an empty string as absent
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// TTL in seconds. Absent, empty, and zero all mean "never expires".
    ///
    /// Only the leading run of digits counts, so `1.5` and `60s` read as 1
    /// and 60. Negative or non-numeric values are rejected.
    pub fn expire_secs(&self) -> Result<Option<u64>> {
        let Some(raw) = self.expire.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }

        let unsigned = raw.strip_prefix('+').unwrap_or(raw);
        let digits_end = unsigned
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(unsigned.len());

        match unsigned[..digits_end].parse::<u64>() {
            Ok(0) => Ok(None),
            Ok(secs) => Ok(Some(secs)),
            Err(_) => Err(ServerError::BadRequest(format!(
                "Invalid 'expire': {:?}",
                raw
            ))),
        }
    }

    fn from_json(body: &[u8]) -> Result<Self> {
        let fields: serde_json::Map<String, Value> = serde_json::from_slice(body)
            .map_err(|_| ServerError::BadRequest("Invalid JSON payload".to_string()))?;

        let mut params = Self::default();
        for (name, value) in fields {
            let data = match value {
                Value::Null => continue,
                Value::String(s) => s.into_bytes(),
                other => other.to_string().into_bytes(),
            };
            params.insert(&name, data);
        }
        Ok(params)
    }
}

impl<S> FromRequest<S> for CacheParams
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ServerError::BadRequest(e.body_text()))?;

            let mut params = Self::default();
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| ServerError::BadRequest(format!("Invalid multipart body: {}", e)))?
            {
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                let data = field.bytes().await.map_err(|e| {
                    ServerError::BadRequest(format!("Invalid multipart body: {}", e))
                })?;
                params.insert(&name, data.to_vec());
            }
            return Ok(params);
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| ServerError::BadRequest(e.body_text()))?;

            let mut params = Self::default();
            for (name, value) in fields {
                params.insert(&name, value.into_bytes());
            }
            return Ok(params);
        }

        if content_type.starts_with("application/json") {
            let body = Bytes::from_request(req, state)
                .await
                .map_err(|e| ServerError::BadRequest(e.body_text()))?;
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(Self::default());
            }
            return Self::from_json(&body);
        }

        Ok(Self::default())
    }
}
