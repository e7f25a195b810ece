use serde::{Deserialize, Serialize};
use tidemark_common::record::SourceRecord;

/// OAuth token endpoint response (client-credentials flow).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub instance_url: Option<String>,
}

/// One page of a REST `query` / `queryAll` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    pub total_size: u64,
    pub done: bool,
    pub next_records_url: Option<String>,
    #[serde(default)]
    pub records: Vec<SourceRecord>,
}

/// Error entry of a failed REST call. Salesforce returns a JSON array of these.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub message: String,
    pub error_code: String,
}

impl ApiError {
    /// Decode an error body; empty when it is not the usual error array.
    pub fn parse_body(body: &str) -> Vec<ApiError> {
        serde_json::from_str(body).unwrap_or_default()
    }

    /// `CODE: message` pairs, or the raw body when nothing decoded.
    pub fn summarize(errors: &[ApiError], raw: &str) -> String {
        if errors.is_empty() {
            return raw.to_string();
        }
        errors
            .iter()
            .map(|e| format!("{}: {}", e.error_code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_first_page_with_continuation() {
        let json = r#"{
            "totalSize": 4200,
            "done": false,
            "nextRecordsUrl": "/services/data/v59.0/query/01gD0000002HU6KIAW-2000",
            "records": [
                {"attributes": {"type": "Account"}, "Id": "001", "IsDeleted": false}
            ]
        }"#;
        let page: QueryPage = serde_json::from_str(json).expect("should deserialize");
        assert_eq!(page.total_size, 4200);
        assert!(!page.done);
        assert_eq!(
            page.next_records_url.as_deref(),
            Some("/services/data/v59.0/query/01gD0000002HU6KIAW-2000")
        );
        assert_eq!(page.records.len(), 1);
    }

    #[test]
    fn deserialize_last_page_without_records() {
        let json = r#"{"totalSize": 0, "done": true}"#;
        let page: QueryPage = serde_json::from_str(json).expect("should deserialize");
        assert!(page.done);
        assert!(page.next_records_url.is_none());
        assert!(page.records.is_empty());
    }

    #[test]
    fn deserialize_token_without_instance_url() {
        let json = r#"{"access_token": "00Dxx!abc", "token_type": "Bearer"}"#;
        let token: TokenResponse = serde_json::from_str(json).expect("should deserialize");
        assert_eq!(token.access_token, "00Dxx!abc");
        assert!(token.instance_url.is_none());
    }

    #[test]
    fn api_error_body_is_summarized() {
        let body = r#"[{"message": "No such column 'Nmae' on entity 'Account'", "errorCode": "INVALID_FIELD"}]"#;
        let errors = ApiError::parse_body(body);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            ApiError::summarize(&errors, body),
            "INVALID_FIELD: No such column 'Nmae' on entity 'Account'"
        );
    }

    #[test]
    fn non_json_error_body_is_kept_raw() {
        let errors = ApiError::parse_body("Service Unavailable");
        assert!(errors.is_empty());
        assert_eq!(ApiError::summarize(&errors, "Service Unavailable"), "Service Unavailable");
    }
}
