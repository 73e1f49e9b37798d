use derive_more::derive::{Display, Error};

use crate::{
    adapter::kraken::{KrakenClient, KrakenError},
    sensor::SensorDevice,
};

#[derive(Debug, Display, Error)]
pub enum SetupError {
    #[display("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[display("Invalid credentials: {source}")]
    InvalidAuth { source: KrakenError },

    #[display("Cannot connect to Octopus Energy: {source}")]
    CannotConnect { source: KrakenError },

    #[display("Unexpected error during setup: {source}")]
    Unknown { source: KrakenError },
}

impl SetupError {
    pub fn error_key(&self) -> &'static str {
        match self {
            SetupError::InvalidConfig { .. } => "invalid_config",
            SetupError::InvalidAuth { .. } => "invalid_auth",
            SetupError::CannotConnect { .. } => "cannot_connect",
            SetupError::Unknown { .. } => "unknown",
        }
    }
}

impl From<KrakenError> for SetupError {
    fn from(source: KrakenError) -> Self {
        if source.is_auth() {
            SetupError::InvalidAuth { source }
        } else if source.is_connection() {
            SetupError::CannotConnect { source }
        } else {
            SetupError::Unknown { source }
        }
    }
}

pub fn validate_credentials(email: &str, password: &str) -> Result<(), SetupError> {
    let invalid = |message: &str| SetupError::InvalidConfig {
        message: message.to_owned(),
    };

    if email.trim().is_empty() {
        return Err(invalid("email must not be empty"));
    }

    if password.is_empty() {
        return Err(invalid("password must not be empty"));
    }

    Ok(())
}

/// Logs in once and resolves the account the sensors belong to.
pub async fn setup_account(client: &mut KrakenClient) -> Result<SensorDevice, SetupError> {
    client.authenticate().await?;
    let account_number = client.account_number().await?;

    let device = SensorDevice::new(account_number);
    tracing::info!("Set up {}", device.name());

    Ok(device)
}
