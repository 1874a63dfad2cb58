//! SigV4-signed JSON-RPC transport
//!
//! The admin-plane services (SSO Admin, Identity Store, Organizations) all
//! speak the `application/x-amz-json-1.1` protocol: a POST to the service
//! endpoint with an `X-Amz-Target` header naming the operation.

use serde_json::Value;

use crate::aws::parse_service_error;
use crate::aws::signer::{sign_request, AwsCredentials};
use crate::errors::{Result, SsopulseError};

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// A JSON-RPC client bound to one service.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    credentials: AwsCredentials,
    region: String,
    /// SigV4 service name, e.g. `sso`
    service: String,
    /// Operation prefix, e.g. `SWBExternalService`
    target_prefix: String,
    endpoint: Option<String>,
}

impl RpcClient {
    pub fn new(
        credentials: AwsCredentials,
        region: &str,
        service: &str,
        target_prefix: &str,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            region: region.to_string(),
            service: service.to_string(),
            target_prefix: target_prefix.to_string(),
            endpoint: None,
        }
    }

    /// Override the endpoint, for tests
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    fn url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/", endpoint),
            None => format!("https://{}.{}.amazonaws.com/", self.service, self.region),
        }
    }

    /// Invoke one operation with the given payload.
    pub async fn call(&self, action: &str, payload: &Value) -> Result<Value> {
        let url = self.url();
        let body = serde_json::to_vec(payload)?;
        let target = format!("{}.{}", self.target_prefix, action);

        let base_headers = vec![
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("x-amz-target".to_string(), target.clone()),
        ];

        let signed_headers = sign_request(
            &self.credentials,
            &self.region,
            &self.service,
            "POST",
            &url,
            &base_headers,
            &body,
        )?;

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", target)
            .body(body);
        for (name, value) in signed_headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(parse_service_error(status.as_u16(), &text));
        }

        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(SsopulseError::from)
    }

    /// Invoke a paginated operation, collecting one result field across pages.
    ///
    /// `NextToken` is threaded through the payload until the service stops
    /// returning one; each page's `result_field` array is concatenated.
    pub async fn call_paginated(
        &self,
        action: &str,
        payload: &Value,
        result_field: &str,
    ) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut page_payload = payload.clone();
            if let Some(token) = &next_token {
                page_payload["NextToken"] = Value::String(token.clone());
            }
            let response = self.call(action, &page_payload).await?;
            if let Some(page_items) = response.get(result_field).and_then(Value::as_array) {
                items.extend(page_items.iter().cloned());
            }
            match response.get("NextToken").and_then(Value::as_str) {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(items)
    }
}
