//! Bearer-token user extraction for the HTTP surface.
//!
//! The frontend sends `Authorization: Bearer <user-token>`; the token is
//! the opaque user identifier that scopes every connection operation.

use axum::http::HeaderMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("missing Authorization header")]
    Missing,
    #[error("malformed Authorization header")]
    InvalidFormat,
    #[error("empty bearer token")]
    Empty,
}

/// Extract the bearer token from the Authorization header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(TokenError::InvalidFormat);
    }

    if !parts[0].eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = parts[1].trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_valid_bearer_token() {
        let headers = headers_with("Bearer user-abc-123");
        assert_eq!(
            extract_bearer_token(&headers),
            Ok("user-abc-123".to_string())
        );
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let headers = headers_with("bearer user-abc");
        assert_eq!(extract_bearer_token(&headers), Ok("user-abc".to_string()));
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(
            extract_bearer_token(&HeaderMap::new()),
            Err(TokenError::Missing)
        );
    }

    #[test]
    fn test_wrong_scheme() {
        let headers = headers_with("Basic dXNlcjpwYXNz");
        assert_eq!(
            extract_bearer_token(&headers),
            Err(TokenError::InvalidFormat)
        );
    }

    #[test]
    fn test_empty_token() {
        let headers = headers_with("Bearer  ");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::Empty));
    }
}
