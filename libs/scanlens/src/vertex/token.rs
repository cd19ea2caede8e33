use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::credentials::ServiceAccountKey;
use crate::error::ScanError;

const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires.
const EXPIRY_SLACK_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Bearer token plus the instant it stops being usable.
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_fresh(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_SLACK_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Exchange the service-account key for an access token via the
/// JWT-bearer grant: sign an assertion with the account's RSA key, post
/// it to the token endpoint.
pub async fn fetch_access_token(
    http: &reqwest::Client,
    key: &ServiceAccountKey,
) -> Result<AccessToken, ScanError> {
    let now = Utc::now();
    let assertion = signed_assertion(key, now)?;

    let params = [
        ("grant_type", JWT_BEARER_GRANT),
        ("assertion", assertion.as_str()),
    ];

    let resp = http
        .post(&key.token_uri)
        .form(&params)
        .send()
        .await
        .map_err(|e| ScanError::Upstream(format!("token exchange request failed: {}", e)))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ScanError::Upstream(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    let token: TokenResponse = resp
        .json()
        .await
        .map_err(|e| ScanError::Upstream(format!("failed to parse token response: {}", e)))?;

    Ok(AccessToken {
        token: token.access_token,
        expires_at: now + Duration::seconds(token.expires_in),
    })
}

fn signed_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String, ScanError> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(key.private_key_id.clone());

    let iat = now.timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: OAUTH_SCOPE,
        aud: &key.token_uri,
        iat,
        exp: iat + TOKEN_LIFETIME_SECS,
    };

    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| ScanError::Configuration(format!("private key is not valid RSA PEM: {}", e)))?;

    encode(&header, &claims, &signing_key)
        .map_err(|e| ScanError::Configuration(format!("failed to sign token assertion: {}", e)))
}
