use reqwest::{StatusCode, header};
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::{consumption::RawReading, core::time::DateTime};

use super::{
    KrakenError,
    graphql::{self, GraphQlRequest, GraphQlResponse, ObtainTokenData, ReadingsData, RefreshTokenData, TokenPayload, ViewerData},
};

const DEFAULT_LOOKBACK_HOURS: i64 = 48;

#[derive(Clone)]
pub struct Credentials {
    email: String,
    password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Clone)]
struct Session {
    token: String,
    refresh_token: Option<String>,
}

/// Client of the Kraken GraphQL API serving Octopus Energy Japan accounts.
///
/// Holds the JWT session and the resolved account number. A request failing
/// with an expired token is retried once after logging in again.
pub struct KrakenClient {
    client: ClientWithMiddleware,
    url: String,
    credentials: Credentials,
    session: Option<Session>,
    account_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    Anonymous,
    Token,
}

impl KrakenClient {
    pub fn new(client: ClientWithMiddleware, url: &str, credentials: Credentials) -> Self {
        Self {
            client,
            url: url.to_owned(),
            credentials,
            session: None,
            account_number: None,
        }
    }

    pub fn with_account_number(mut self, account_number: impl Into<String>) -> Self {
        self.account_number = Some(account_number.into());
        self
    }

    #[cfg(test)]
    fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    #[tracing::instrument(skip(self), fields(email = %self.credentials.email()))]
    pub async fn authenticate(&mut self) -> Result<(), KrakenError> {
        let variables = json!({
            "input": {
                "email": self.credentials.email,
                "password": self.credentials.password,
            }
        });

        let data: ObtainTokenData = match self.send(graphql::OBTAIN_TOKEN, Some(&variables), Auth::Anonymous).await {
            Ok(data) => data,
            Err(e @ KrakenError::Connection { .. }) => return Err(e),
            Err(e) => {
                tracing::error!("Authentication failed: {}", e);
                return Err(KrakenError::auth(e.to_string()));
            }
        };

        self.session = Some(new_session(data.obtain_kraken_token)?);
        tracing::debug!("Successfully authenticated");

        Ok(())
    }

    pub async fn account_number(&mut self) -> Result<String, KrakenError> {
        if let Some(number) = &self.account_number {
            return Ok(number.clone());
        }

        self.ensure_authenticated().await?;

        let data: ViewerData = self.execute(graphql::ACCOUNT_VIEWER, None).await?;
        let number = data
            .viewer
            .and_then(|v| v.accounts.into_iter().next())
            .map(|a| a.number)
            .ok_or_else(|| KrakenError::api("No accounts found"))?;

        tracing::debug!("Account number: {}", number);
        self.account_number = Some(number.clone());

        Ok(number)
    }

    /// Half-hourly readings of all electricity supply points of the account.
    /// Defaults to the 48 hours before `to`, and `to` defaults to now.
    #[tracing::instrument(skip(self))]
    pub async fn half_hourly_readings(
        &mut self,
        from: Option<DateTime>,
        to: Option<DateTime>,
    ) -> Result<Vec<RawReading>, KrakenError> {
        self.ensure_authenticated().await?;
        let account_number = self.account_number().await?;

        let to = to.unwrap_or_else(DateTime::now);
        let from = from.unwrap_or_else(|| to.hours_before(DEFAULT_LOOKBACK_HOURS));

        let variables = json!({
            "accountNumber": account_number,
            "fromDatetime": from.to_iso_string(),
            "toDatetime": to.to_iso_string(),
        });

        let data: ReadingsData = self.execute(graphql::HALF_HOURLY_READINGS, Some(&variables)).await?;
        let account = data
            .account
            .ok_or_else(|| KrakenError::api(format!("Account {} not found", account_number)))?;

        let readings = account.into_readings();
        tracing::debug!("Retrieved {} readings", readings.len());

        Ok(readings)
    }

    async fn ensure_authenticated(&mut self) -> Result<(), KrakenError> {
        if self.session.is_none() {
            self.authenticate().await?;
        }

        Ok(())
    }

    async fn execute<T: DeserializeOwned>(
        &mut self,
        query: &str,
        variables: Option<&serde_json::Value>,
    ) -> Result<T, KrakenError> {
        match self.send(query, variables, Auth::Token).await {
            Err(e) if e.is_token_expired() => {
                tracing::debug!("JWT token expired, attempting to re-authenticate");

                if let Err(auth_err) = self.reauthenticate().await {
                    tracing::error!("Re-authentication failed: {}", auth_err);
                    return Err(e);
                }

                self.send(query, variables, Auth::Token).await
            }
            res => res,
        }
    }

    async fn reauthenticate(&mut self) -> Result<(), KrakenError> {
        let refresh_token = self.session.take().and_then(|s| s.refresh_token);

        if let Some(refresh_token) = refresh_token {
            let variables = json!({ "refreshToken": refresh_token });

            match self
                .send::<RefreshTokenData>(graphql::REFRESH_TOKEN, Some(&variables), Auth::Anonymous)
                .await
                .and_then(|data| new_session(data.refresh_kraken_token))
            {
                Ok(session) => {
                    tracing::debug!("Refreshed JWT token");
                    self.session = Some(session);
                    return Ok(());
                }
                Err(e) => tracing::warn!("Refreshing JWT token failed, logging in again: {}", e),
            }
        }

        self.authenticate().await
    }

    #[tracing::instrument(skip_all, fields(otel.name = "Kraken GraphQL request"))]
    async fn send<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Option<&serde_json::Value>,
        auth: Auth,
    ) -> Result<T, KrakenError> {
        let mut request = self.client.post(&self.url).json(&GraphQlRequest { query, variables });

        if let (Auth::Token, Some(session)) = (auth, &self.session) {
            request = request.header(header::AUTHORIZATION, format!("JWT {}", session.token));
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!("Connection error: {}", e);
            KrakenError::Connection { source: e }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("API request failed: {} - {}", status, text);
            return Err(KrakenError::api(format!("API request failed: {}", status.as_u16())));
        }

        let body = response
            .json::<GraphQlResponse<T>>()
            .await
            .map_err(|e| KrakenError::api(format!("Malformed response: {}", e)))?;

        body.into_result().inspect_err(|e| {
            if !e.is_token_expired() {
                tracing::error!("GraphQL error: {}", e);
            }
        })
    }
}

fn new_session(payload: Option<TokenPayload>) -> Result<Session, KrakenError> {
    match payload {
        Some(TokenPayload {
            token: Some(token),
            refresh_token,
        }) if !token.is_empty() => Ok(Session { token, refresh_token }),
        _ => Err(KrakenError::auth("Failed to obtain token")),
    }
}
