use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::models::PayerRules;
use crate::services::reservation::CommitSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub store: StoreConfig,
    pub database: Option<DatabaseConfig>,
    pub upload: UploadConfig,
    pub booking: BookingConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

// Где живёт общая сетка мест: redis://... или memory://
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub endpoint: String,
    pub grid_key: String,
    pub bookings_collection: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl StoreConfig {
    pub fn backend(&self) -> Result<StoreBackend, ConfigError> {
        if self.endpoint.starts_with("redis://") || self.endpoint.starts_with("rediss://") {
            Ok(StoreBackend::Redis)
        } else if self.endpoint.starts_with("memory://") {
            Ok(StoreBackend::Memory)
        } else {
            Err(ConfigError::Invalid {
                name: "STORE_ENDPOINT",
                value: self.endpoint.clone(),
            })
        }
    }
}

// Журнал бронирований в Postgres (если не задан - в памяти)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Куда загружаются фото чеков (memory:// - держим в процессе)
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub target: String,
    pub preset: String,
    pub timeout_seconds: u64,
}

impl UploadConfig {
    pub fn is_memory(&self) -> bool {
        self.target.starts_with("memory://")
    }
}

// Правила бронирования
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub max_seats: usize,
    pub seat_price: u32,
    pub hold_timeout_seconds: u64,
    pub commit_max_attempts: u32,
    pub student_number_prefix: String,
    pub student_number_length: usize,
    pub email_domain: Option<String>,
}

impl BookingConfig {
    pub fn commit_settings(&self) -> CommitSettings {
        CommitSettings {
            max_seats: self.max_seats,
            seat_price: self.seat_price,
            max_attempts: self.commit_max_attempts.max(1),
        }
    }

    pub fn payer_rules(&self) -> PayerRules {
        PayerRules {
            student_number_prefix: self.student_number_prefix.clone(),
            student_number_length: self.student_number_length,
            email_domain: self.email_domain.clone(),
        }
    }
}

// Настройки Circuit Breaker для загрузки чеков
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = StoreConfig {
            endpoint: var_or("STORE_ENDPOINT", "memory://"),
            grid_key: var_or("SEAT_GRID_KEY", "seats"),
            bookings_collection: var_or("BOOKINGS_COLLECTION", "bookings"),
        };
        store.backend()?;

        let database = match optional("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                pool_size: parse_or("DB_POOL_SIZE", 10)?,
            }),
            None => None,
        };

        let max_seats: usize = parse_or("MAX_SEATS", 5)?;
        if max_seats == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_SEATS",
                value: "0".into(),
            });
        }

        Ok(Config {
            app: AppConfig {
                host: var_or("HOST", "0.0.0.0"),
                port: parse_or("PORT", 8000)?,
                environment: var_or("ENVIRONMENT", "development"),
                rust_log: var_or("RUST_LOG", "seat_booking=debug,tower_http=debug"),
            },
            store,
            database,
            upload: UploadConfig {
                target: var_or("UPLOAD_TARGET", "memory://"),
                preset: var_or("UPLOAD_PRESET", "receipts"),
                timeout_seconds: parse_or("UPLOAD_TIMEOUT_SECONDS", 30)?,
            },
            booking: BookingConfig {
                max_seats,
                seat_price: parse_or("SEAT_PRICE", 50)?,
                hold_timeout_seconds: parse_or("HOLD_TIMEOUT_SECONDS", 600)?,
                commit_max_attempts: parse_or("COMMIT_MAX_ATTEMPTS", 3)?,
                student_number_prefix: var_or("STUDENT_NUMBER_PREFIX", "022"),
                student_number_length: parse_or("STUDENT_NUMBER_LENGTH", 11)?,
                email_domain: optional("EMAIL_DOMAIN"),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parse_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
                timeout_seconds: parse_or("CIRCUIT_BREAKER_TIMEOUT_SECONDS", 60)?,
            },
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_string())
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(endpoint: &str) -> StoreConfig {
        StoreConfig {
            endpoint: endpoint.into(),
            grid_key: "seats".into(),
            bookings_collection: "bookings".into(),
        }
    }

    #[test]
    fn store_backend_follows_endpoint_scheme() {
        assert_eq!(store("redis://localhost:6379").backend().unwrap(), StoreBackend::Redis);
        assert_eq!(store("memory://").backend().unwrap(), StoreBackend::Memory);
        assert!(store("https://example.firebaseio.com").backend().is_err());
    }

    #[test]
    fn booking_config_feeds_services() {
        let booking = BookingConfig {
            max_seats: 15,
            seat_price: 75,
            hold_timeout_seconds: 600,
            commit_max_attempts: 4,
            student_number_prefix: "022".into(),
            student_number_length: 11,
            email_domain: Some("school.edu.ph".into()),
        };
        assert_eq!(
            booking.commit_settings(),
            CommitSettings { max_seats: 15, seat_price: 75, max_attempts: 4 }
        );
        assert_eq!(booking.payer_rules().email_domain.as_deref(), Some("school.edu.ph"));
    }
}
