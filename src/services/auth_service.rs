use axum::http;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// The user a request or connection was authenticated as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    MissingToken(String),
    #[error("JWT validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("JWT token does not carry a numeric 'sub' claim")]
    MissingSubject,
}

// Get the auth token from a request
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, AuthError> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::MissingToken("Invalid Authorization header".to_string()))?;
        return Ok(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string());
    }

    // 2. Try to get token from cookies
    if let Some(cookie_header) = req.headers().get(http::header::COOKIE) {
        let cookie_str = cookie_header
            .to_str()
            .map_err(|_| AuthError::MissingToken("Invalid Cookie header".to_string()))?;
        for cookie in cookie::Cookie::split_parse(cookie_str).flatten() {
            if cookie.name() == "auth_token" {
                return Ok(cookie.value().to_string());
            }
        }
    }

    // 3. Browsers cannot set headers on a WebSocket upgrade, accept a query parameter
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix("token=") {
                if !token.is_empty() {
                    return Ok(token.to_string());
                }
            }
        }
    }

    Err(AuthError::MissingToken("Missing Authorization header, auth_token cookie or token parameter".to_string()))
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Value>(token, &decoding_key, &validation)
}

/// Validate the token and resolve the user from its `sub` claim
pub fn authenticate(token: &str, secret: &str) -> Result<AuthUser, AuthError> {
    let token_data = validate_jwt(token, secret)?;
    let user_id = match token_data.claims.get("sub") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .ok_or(AuthError::MissingSubject)?;

    debug!("JWT token validated for user {}", user_id);
    Ok(AuthUser { user_id })
}

#[cfg(test)]
pub mod testing {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    /// HS256 token for `sub`, valid for an hour
    pub fn token_for(sub: serde_json::Value, secret: &str) -> String {
        let exp = chrono::Utc::now().timestamp() + 3600;
        encode(
            &Header::default(),
            &json!({ "sub": sub, "exp": exp }),
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::token_for;
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    const SECRET: &str = "test-secret";

    #[test]
    fn token_is_read_from_header_cookie_or_query() {
        let req = http::Request::builder()
            .header(http::header::AUTHORIZATION, "Bearer abc")
            .body(())
            .unwrap();
        assert_eq!(get_auth_token(&req).unwrap(), "abc");

        let req = http::Request::builder()
            .header(http::header::COOKIE, "theme=dark; auth_token=def")
            .body(())
            .unwrap();
        assert_eq!(get_auth_token(&req).unwrap(), "def");

        let req = http::Request::builder().uri("/api/v1/ws?token=ghi").body(()).unwrap();
        assert_eq!(get_auth_token(&req).unwrap(), "ghi");

        let req = http::Request::builder().uri("/api/v1/ws").body(()).unwrap();
        assert_matches!(get_auth_token(&req), Err(AuthError::MissingToken(_)));
    }

    #[test]
    fn subject_may_be_a_number_or_a_numeric_string() {
        assert_eq!(authenticate(&token_for(json!(7), SECRET), SECRET).unwrap(), AuthUser { user_id: 7 });
        assert_eq!(authenticate(&token_for(json!("8"), SECRET), SECRET).unwrap(), AuthUser { user_id: 8 });
        assert_matches!(authenticate(&token_for(json!("ada"), SECRET), SECRET), Err(AuthError::MissingSubject));
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let token = token_for(json!(7), "other-secret");
        assert_matches!(authenticate(&token, SECRET), Err(AuthError::InvalidToken(_)));
    }
}
