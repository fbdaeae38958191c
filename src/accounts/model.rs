//! Registered users and the sign-up / sign-in payloads.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const EMAIL_MAX_LENGTH: usize = 254;
pub const PASSWORD_MIN_LENGTH: usize = 8;
pub const PASSWORD_MAX_LENGTH: usize = 128;
pub const NAME_MAX_LENGTH: usize = 100;

/// A registered account. The password hash never leaves the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Trimmed, lowercased email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email(String);

impl Email {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let email = raw.trim().to_lowercase();
        if email.is_empty() {
            return Err(ValidationError::new("email", "Email is required"));
        }
        if email.chars().count() > EMAIL_MAX_LENGTH {
            return Err(ValidationError::new(
                "email",
                format!("Email must be at most {EMAIL_MAX_LENGTH} characters"),
            ));
        }
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !email.chars().any(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            return Err(ValidationError::new("email", "Email address is not valid"));
        }
        Ok(Self(email))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn validate_password(password: &SecretString) -> Result<(), ValidationError> {
    let len = password.expose_secret().chars().count();
    if len < PASSWORD_MIN_LENGTH {
        return Err(ValidationError::new(
            "password",
            format!("Password must be at least {PASSWORD_MIN_LENGTH} characters"),
        ));
    }
    if len > PASSWORD_MAX_LENGTH {
        return Err(ValidationError::new(
            "password",
            format!("Password must be at most {PASSWORD_MAX_LENGTH} characters"),
        ));
    }
    Ok(())
}

/// Blank names are stored as absent.
pub fn validate_name(name: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if name.chars().count() > NAME_MAX_LENGTH {
        return Err(ValidationError::new(
            "name",
            format!("Name must be at most {NAME_MAX_LENGTH} characters"),
        ));
    }
    Ok(Some(name.to_string()))
}

/// Validated registration data, minus the password.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub email: Email,
    pub name: Option<String>,
}

/// JSON body for `POST /api/v1/auth/signup`.
#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: SecretString,
    #[serde(default)]
    pub name: Option<String>,
}

impl SignUpRequest {
    /// Validate every field, returning the user to create and the password.
    pub fn into_parts(self) -> Result<(NewUser, SecretString), ValidationError> {
        let email = Email::parse(&self.email)?;
        validate_password(&self.password)?;
        let name = validate_name(self.name.as_deref())?;
        Ok((NewUser { email, name }, self.password))
    }
}

/// JSON body for `POST /api/v1/auth/signin`.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: SecretString,
}

/// Token half of an auth response.
#[derive(Debug, Clone, Serialize)]
pub struct SessionToken {
    pub token: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

/// Returned by sign-up and sign-in.
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub session: SessionToken,
}
