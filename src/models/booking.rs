use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use super::SeatLabel;
use crate::error::ValidationError;

/// Ключ записи бронирования, генерируется хранилищем.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Чек загружен, оплата ещё не проверена
    Pending,
    /// Оплата подтверждена вне системы
    Booked,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Booked => "booked",
        }
    }
}

/// Данные плательщика в том виде, как их ввели в форму.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Validate)]
pub struct PayerDetails {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    pub student_number: String,
    #[validate(email)]
    pub email: Option<String>,
}

/// Правила для номера студента и институциональной почты.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayerRules {
    pub student_number_prefix: String,
    pub student_number_length: usize,
    pub email_domain: Option<String>,
}

impl Default for PayerRules {
    fn default() -> Self {
        Self {
            student_number_prefix: "022".to_string(),
            student_number_length: 11,
            email_domain: None,
        }
    }
}

impl PayerDetails {
    /// Нормализует ввод (обрезает пробелы, пустые строки -> None) и проверяет поля.
    pub fn normalized(self, rules: &PayerRules) -> Result<Self, ValidationError> {
        let trim = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };
        let payer = Self {
            name: trim(self.name),
            student_number: self.student_number.trim().to_string(),
            email: trim(self.email),
        };

        payer
            .validate()
            .map_err(|e| ValidationError::InvalidPayer(e.to_string()))?;

        let number = &payer.student_number;
        if number.len() != rules.student_number_length
            || !number.starts_with(&rules.student_number_prefix)
            || !number.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ValidationError::InvalidPayer(format!(
                "student number must be {} digits starting with {}",
                rules.student_number_length, rules.student_number_prefix
            )));
        }

        if let Some(domain) = &rules.email_domain {
            let matches = payer.email.as_deref().is_some_and(|email| {
                email
                    .rsplit_once('@')
                    .is_some_and(|(_, host)| host.eq_ignore_ascii_case(domain))
            });
            if !matches {
                return Err(ValidationError::InvalidPayer(format!(
                    "email must be an @{} address",
                    domain
                )));
            }
        }

        Ok(payer)
    }
}

/// Неизменяемая после записи заявка на бронирование.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub seats: Vec<SeatLabel>,
    pub payer: PayerDetails,
    pub receipt_url: String,
    pub total_price: u32,
    pub created_at: DateTime<Utc>,
    pub status: BookingStatus,
}
