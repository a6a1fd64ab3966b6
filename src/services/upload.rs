//! upload.rs
//!
//! Загрузка фото чека на внешний хостинг изображений.
//!
//! Ключевые компоненты:
//! 1.  **Receipt**: сам файл и его локальная проверка (размер, MIME). Проверка
//!     выполняется до любого сетевого вызова.
//! 2.  **CircuitBreaker**: "автоматический выключатель" перед хостингом, чтобы не
//!     долбить неработающий сервис. Повторов он не делает - только быстрый отказ.
//! 3.  **HttpReceiptUploader**: unsigned upload (multipart + preset), в ответ URL.
//!
//! Ядро хранит только полученный URL и никогда не смотрит в само изображение.

use futures::future::{self, BoxFuture, FutureExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::error::{TransportError, ValidationError};

/// Максимальный размер чека: 5 MiB.
pub const MAX_RECEIPT_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Receipt {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.bytes.is_empty() {
            return Err(ValidationError::MissingReceipt);
        }
        if self.bytes.len() > MAX_RECEIPT_BYTES {
            return Err(ValidationError::ReceiptTooLarge {
                size: self.bytes.len(),
                limit: MAX_RECEIPT_BYTES,
            });
        }
        if !self.content_type.starts_with("image/") {
            return Err(ValidationError::UnsupportedReceiptType(self.content_type.clone()));
        }
        Ok(())
    }
}

/// "Положи файл - получи URL".
pub trait ReceiptUploader: Send + Sync {
    fn upload<'a>(&'a self, receipt: &'a Receipt) -> BoxFuture<'a, Result<String, TransportError>>;
}

/// Состояния выключателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Запросы разрешены
    Closed,
    /// Запросы блокируются до истечения таймаута
    Open,
    /// Пропускаем пробный запрос
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    /// Секунды от `started` до последнего сбоя
    last_failure_secs: AtomicU64,
    started: Instant,
    failure_threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure_secs: AtomicU64::new(0),
            started: Instant::now(),
            failure_threshold: failure_threshold.max(1),
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    pub fn can_execute(&self) -> bool {
        let current = self.state();
        match current {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let now = self.started.elapsed().as_secs();
                let last_failure = self.last_failure_secs.load(Ordering::Relaxed);
                if now.saturating_sub(last_failure) >= self.timeout.as_secs() {
                    *self.state.write().unwrap_or_else(|p| p.into_inner()) = CircuitState::HalfOpen;
                    info!("Upload circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        if *state == CircuitState::HalfOpen {
            info!("Upload circuit breaker recovered - transitioning to Closed state");
        }
        *state = CircuitState::Closed;
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_secs
            .store(self.started.elapsed().as_secs(), Ordering::Relaxed);

        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        match *state {
            CircuitState::Closed if failures >= self.failure_threshold => {
                *state = CircuitState::Open;
                error!(
                    "Upload circuit breaker OPENED - {} failures reached threshold {}",
                    failures, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                warn!("Upload circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
}

/// Клиент хостинга изображений.
pub struct HttpReceiptUploader {
    http_client: reqwest::Client,
    target: String,
    preset: String,
    circuit_breaker: CircuitBreaker,
}

impl HttpReceiptUploader {
    pub fn from_config(config: &UploadConfig, failure_threshold: u32, timeout_seconds: u64) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()?,
            target: config.target.clone(),
            preset: config.preset.clone(),
            circuit_breaker: CircuitBreaker::new(failure_threshold, timeout_seconds),
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    async fn send(&self, receipt: &Receipt) -> Result<String, TransportError> {
        let failed = |e: reqwest::Error| TransportError::UploadFailed(e.to_string());

        let part = reqwest::multipart::Part::bytes(receipt.bytes.clone())
            .file_name(receipt.file_name.clone())
            .mime_str(&receipt.content_type)
            .map_err(failed)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("upload_preset", self.preset.clone());

        let response = self
            .http_client
            .post(&self.target)
            .multipart(form)
            .send()
            .await
            .map_err(failed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::UploadFailed(format!("upload host returned {}", status)));
        }

        let body: UploadResponse = response.json().await.map_err(failed)?;
        body.secure_url
            .or(body.url)
            .ok_or_else(|| TransportError::UploadFailed("upload host returned no URL".into()))
    }
}

impl ReceiptUploader for HttpReceiptUploader {
    fn upload<'a>(&'a self, receipt: &'a Receipt) -> BoxFuture<'a, Result<String, TransportError>> {
        async move {
            if !self.circuit_breaker.can_execute() {
                warn!("Circuit breaker is OPEN - blocking receipt upload");
                return Err(TransportError::CircuitOpen);
            }

            info!("Uploading receipt {} ({} bytes)", receipt.file_name, receipt.bytes.len());
            match self.send(receipt).await {
                Ok(url) => {
                    self.circuit_breaker.record_success();
                    Ok(url)
                }
                Err(e) => {
                    error!("Receipt upload failed: {}", e);
                    self.circuit_breaker.record_failure();
                    Err(e)
                }
            }
        }
        .boxed()
    }
}

/// Хранит чеки в памяти; для `memory://` и тестов.
#[derive(Default)]
pub struct MemoryReceiptUploader {
    blobs: Mutex<HashMap<String, Receipt>>,
}

impl MemoryReceiptUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploaded(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or_default()
    }
}

impl ReceiptUploader for MemoryReceiptUploader {
    fn upload<'a>(&'a self, receipt: &'a Receipt) -> BoxFuture<'a, Result<String, TransportError>> {
        let url = format!("memory://receipts/{}", Uuid::new_v4());
        let result = match self.blobs.lock() {
            Ok(mut blobs) => {
                blobs.insert(url.clone(), receipt.clone());
                Ok(url)
            }
            Err(_) => Err(TransportError::UploadFailed("receipt storage is poisoned".into())),
        };
        future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn receipt(len: usize, content_type: &str) -> Receipt {
        Receipt {
            file_name: "gcash.png".into(),
            content_type: content_type.into(),
            bytes: vec![0u8; len],
        }
    }

    fn uploader(target: String, threshold: u32) -> HttpReceiptUploader {
        let config = UploadConfig {
            target,
            preset: "receipts".into(),
            timeout_seconds: 5,
        };
        HttpReceiptUploader::from_config(&config, threshold, 60).unwrap()
    }

    #[test]
    fn receipt_limits() {
        assert!(receipt(1024, "image/png").validate().is_ok());
        assert!(receipt(MAX_RECEIPT_BYTES, "image/jpeg").validate().is_ok());
        assert_eq!(
            receipt(MAX_RECEIPT_BYTES + 1, "image/png").validate(),
            Err(ValidationError::ReceiptTooLarge {
                size: MAX_RECEIPT_BYTES + 1,
                limit: MAX_RECEIPT_BYTES
            })
        );
        assert!(matches!(
            receipt(10, "application/pdf").validate(),
            Err(ValidationError::UnsupportedReceiptType(_))
        ));
        assert_eq!(receipt(0, "image/png").validate(), Err(ValidationError::MissingReceipt));
    }

    #[test]
    fn breaker_opens_after_threshold_and_recovers() {
        let breaker = CircuitBreaker::new(2, 0);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Таймаут 0: сразу пробный запрос
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn uploads_and_returns_secure_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/image/upload"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"secure_url": "https://cdn.test/r.png"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let uploader = uploader(format!("{}/image/upload", server.uri()), 3);
        let url = uploader.upload(&receipt(16, "image/png")).await.unwrap();
        assert_eq!(url, "https://cdn.test/r.png");
    }

    #[tokio::test]
    async fn failing_host_opens_the_circuit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let uploader = uploader(format!("{}/image/upload", server.uri()), 2);
        let r = receipt(16, "image/png");
        for _ in 0..2 {
            assert!(matches!(uploader.upload(&r).await, Err(TransportError::UploadFailed(_))));
        }
        assert_eq!(uploader.upload(&r).await, Err(TransportError::CircuitOpen));
        assert_eq!(uploader.circuit_state(), CircuitState::Open);
    }
}
