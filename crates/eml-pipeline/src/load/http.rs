//! Shared HTTP plumbing for the SPARQL and Elasticsearch destinations

use reqwest::{RequestBuilder, StatusCode};
use std::time::Duration;

use crate::error::{DeliveryError, LoadError};

/// Statuses that say nothing about the payload itself
const TRANSPORT_STATUSES: [u16; 8] = [401, 403, 407, 408, 429, 502, 503, 504];

/// Longest response body quoted in an error message
const MAX_ERROR_BODY: usize = 512;

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client, LoadError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> Result<(), DeliveryError> {
    if !status.is_client_error() && !status.is_server_error() {
        return Ok(());
    }

    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body));
    if TRANSPORT_STATUSES.contains(&status.as_u16()) {
        Err(DeliveryError::Transport(message))
    } else {
        Err(DeliveryError::Rejected(message))
    }
}

/// Send `request`, returning the response body of a successful call
pub(crate) async fn send(request: RequestBuilder) -> Result<String, DeliveryError> {
    let response = request
        .send()
        .await
        .map_err(|e| DeliveryError::Transport(e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| DeliveryError::Transport(e.to_string()))?;

    classify_status(status, &body)?;
    Ok(body)
}

fn truncate(body: &str) -> &str {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        for code in [200, 201, 204, 302] {
            assert!(classify_status(StatusCode::from_u16(code).unwrap(), "").is_ok());
        }
        for code in TRANSPORT_STATUSES {
            let err = classify_status(StatusCode::from_u16(code).unwrap(), "").unwrap_err();
            assert!(err.is_transport(), "{code} should be a transport failure");
        }
        for code in [400, 404, 409, 413, 500] {
            let err = classify_status(StatusCode::from_u16(code).unwrap(), "nope").unwrap_err();
            assert_eq!(err, DeliveryError::Rejected(format!("HTTP {code}: nope")));
        }
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "é".repeat(MAX_ERROR_BODY);
        assert!(truncate(&body).len() <= MAX_ERROR_BODY);
    }
}
