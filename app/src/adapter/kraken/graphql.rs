use serde::{Deserialize, Serialize};

use crate::consumption::RawReading;

use super::KrakenError;

pub const OBTAIN_TOKEN: &str = r#"
mutation obtainKrakenToken($input: ObtainJSONWebTokenInput!) {
  obtainKrakenToken(input: $input) {
    token
    refreshToken
    refreshExpiresIn
    payload
  }
}
"#;

pub const REFRESH_TOKEN: &str = r#"
mutation refreshKrakenToken($refreshToken: String!) {
  refreshKrakenToken(refreshToken: $refreshToken) {
    token
    refreshToken
    refreshExpiresIn
  }
}
"#;

pub const ACCOUNT_VIEWER: &str = r#"
query accountViewer {
  viewer {
    accounts {
      number
    }
  }
}
"#;

pub const HALF_HOURLY_READINGS: &str = r#"
query halfHourlyReadings($accountNumber: String!, $fromDatetime: DateTime, $toDatetime: DateTime) {
  account(accountNumber: $accountNumber) {
    properties {
      electricitySupplyPoints {
        halfHourlyReadings(fromDatetime: $fromDatetime, toDatetime: $toDatetime) {
          startAt
          endAt
          value
        }
      }
    }
  }
}
"#;

#[derive(Debug, Serialize)]
pub struct GraphQlRequest<'a> {
    pub query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<&'a serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: Option<String>,
}

impl<T> GraphQlResponse<T> {
    pub fn into_result(self) -> Result<T, KrakenError> {
        if let Some(error) = self.errors.into_iter().next() {
            let message = error.message.unwrap_or_else(|| "Unknown error".to_owned());
            return Err(KrakenError::GraphQl { message });
        }

        self.data.ok_or_else(|| KrakenError::api("Empty response"))
    }
}

//
// AUTHENTICATION
//
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObtainTokenData {
    pub obtain_kraken_token: Option<TokenPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenData {
    pub refresh_kraken_token: Option<TokenPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
}

//
// ACCOUNT
//
#[derive(Debug, Deserialize)]
pub struct ViewerData {
    pub viewer: Option<Viewer>,
}

#[derive(Debug, Deserialize)]
pub struct Viewer {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub number: String,
}

//
// READINGS
//
#[derive(Debug, Deserialize)]
pub struct ReadingsData {
    pub account: Option<AccountReadings>,
}

#[derive(Debug, Deserialize)]
pub struct AccountReadings {
    #[serde(default)]
    pub properties: Option<Vec<Property>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    #[serde(default)]
    pub electricity_supply_points: Option<Vec<SupplyPoint>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyPoint {
    #[serde(default)]
    pub half_hourly_readings: Option<Vec<RawReading>>,
}

impl AccountReadings {
    pub fn into_readings(self) -> Vec<RawReading> {
        self.properties
            .unwrap_or_default()
            .into_iter()
            .flat_map(|p| p.electricity_supply_points.unwrap_or_default())
            .flat_map(|sp| sp.half_hourly_readings.unwrap_or_default())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn request_omits_missing_variables() {
        let request = GraphQlRequest {
            query: ACCOUNT_VIEWER,
            variables: None,
        };

        assert_json_eq!(request, json!({ "query": ACCOUNT_VIEWER }));
    }

    #[test]
    fn first_error_message_wins() {
        let response: GraphQlResponse<ViewerData> = serde_json::from_value(json!({
            "data": null,
            "errors": [{ "message": "Signature of the JWT has expired." }, { "message": "other" }]
        }))
        .unwrap();

        let err = response.into_result().unwrap_err();
        assert_eq!(err.to_string(), "Signature of the JWT has expired.");
    }

    #[test]
    fn error_without_message_is_unknown() {
        let response: GraphQlResponse<ViewerData> = serde_json::from_value(json!({ "errors": [{}] })).unwrap();

        assert_eq!(response.into_result().unwrap_err().to_string(), "Unknown error");
    }

    #[test]
    fn missing_data_is_an_error() {
        let response: GraphQlResponse<ViewerData> = serde_json::from_value(json!({})).unwrap();

        assert_eq!(response.into_result().unwrap_err().to_string(), "Empty response");
    }

    #[test]
    fn readings_are_flattened_across_properties_and_supply_points() {
        let account: AccountReadings = serde_json::from_value(json!({
            "properties": [
                {
                    "electricitySupplyPoints": [
                        { "halfHourlyReadings": [
                            { "startAt": "2024-05-01T00:00:00+09:00", "endAt": "2024-05-01T00:30:00+09:00", "value": "0.1" }
                        ]},
                        { "halfHourlyReadings": null }
                    ]
                },
                { "electricitySupplyPoints": [
                    { "halfHourlyReadings": [
                        { "startAt": "2024-05-01T00:30:00+09:00", "endAt": "2024-05-01T01:00:00+09:00", "value": 0.2 }
                    ]}
                ]},
                {}
            ]
        }))
        .unwrap();

        assert_eq!(account.into_readings().len(), 2);
    }
}
