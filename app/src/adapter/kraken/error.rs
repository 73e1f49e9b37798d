use derive_more::derive::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum KrakenError {
    #[display("Authentication failed: {message}")]
    Auth { message: String },

    #[display("Connection error: {source}")]
    Connection { source: reqwest_middleware::Error },

    #[display("{message}")]
    Api { message: String },

    //Errors reported in the body of a GraphQL response
    #[display("{message}")]
    GraphQl { message: String },
}

impl KrakenError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub fn is_token_expired(&self) -> bool {
        match self {
            Self::GraphQl { message } => message.to_lowercase().contains("expired"),
            _ => false,
        }
    }
}
