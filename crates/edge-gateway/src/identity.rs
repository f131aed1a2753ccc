//! Caller identity and the credential shapes that produce it.
//!
//! Two calling conventions coexist: signed bearer tokens (v2) and a raw
//! user-id header (v1). Both resolve to the same [`Identity`], so everything
//! downstream of authentication is independent of the credential shape.

use axum::extract::FromRequestParts;
use http::request::Parts;
use http::{header, Extensions, HeaderMap, HeaderValue};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{AuthAlgorithm, AuthConfig};
use crate::error::GatewayError;

/// Header carrying the unsigned user id on legacy routes.
pub const LEGACY_USER_HEADER: &str = "x-legacy-user-id";

/// Role granted to tokens issued by the login endpoint.
pub const DEFAULT_ROLE: &str = "customer";

/// Role assigned to every legacy-header caller.
pub const DEFAULT_LEGACY_ROLE: &str = "customer";

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: String,
}

impl Identity {
    /// Reads the identity attached to a request by the authentication stage.
    ///
    /// This is the only accessor; it does not care which credential shape
    /// produced the identity.
    pub fn from_extensions(extensions: &Extensions) -> Option<&Self> {
        extensions.get::<Self>()
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_extensions(&parts.extensions)
            .cloned()
            .ok_or(GatewayError::Unauthenticated)
    }
}

/// Credentials presented by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// Raw user id from [`LEGACY_USER_HEADER`]. Carries no integrity check.
    LegacyHeader(String),
}

/// Which credential shape a route accepts. Bound per route, never negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Bearer,
    Legacy,
}

impl AuthScheme {
    /// Extracts this scheme's credentials from the request headers.
    pub fn credentials(self, headers: &HeaderMap) -> Result<Credentials, GatewayError> {
        match self {
            Self::Bearer => bearer_token(headers).map(Credentials::Bearer),
            Self::Legacy => headers
                .get(LEGACY_USER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| Credentials::LegacyHeader(v.to_owned()))
                .ok_or(GatewayError::Unauthenticated),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bearer => "bearer",
            Self::Legacy => "legacy",
        }
    }
}

/// The header must be exactly two parts: the `Bearer` scheme and a token.
fn bearer_token(headers: &HeaderMap) -> Result<String, GatewayError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(GatewayError::Unauthenticated)?;

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Ok(token.to_owned()),
        _ => Err(GatewayError::Unauthenticated),
    }
}

/// Claims carried by gateway bearer tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: String,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Signs and verifies bearer tokens with the shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
    audience: Option<String>,
    ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(config: &AuthConfig) -> Self {
        let algorithm = match config.algorithm {
            AuthAlgorithm::HS256 => Algorithm::HS256,
            AuthAlgorithm::HS384 => Algorithm::HS384,
            AuthAlgorithm::HS512 => Algorithm::HS512,
        };

        let mut validation = Validation::new(algorithm);

        // Configure issuer validation if specified (None = no validation)
        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }

        Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            ttl: config.token_ttl,
        }
    }

    /// Issues a token valid for the configured TTL.
    pub fn issue(
        &self,
        user_id: &str,
        email: Option<&str>,
        role: &str,
    ) -> Result<String, GatewayError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| GatewayError::Token(e.to_string()))?
            .as_secs();

        let claims = Claims {
            user_id: user_id.to_owned(),
            email: email.map(str::to_owned),
            role: role.to_owned(),
            exp: now + self.ttl.as_secs(),
            iat: Some(now),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| GatewayError::Token(e.to_string()))
    }

    /// Verifies signature, expiry and configured issuer/audience.
    pub fn verify(&self, token: &str) -> Result<Claims, GatewayError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Bearer token rejected");
                GatewayError::Unauthenticated
            })
    }
}

/// Turns credentials into an [`Identity`].
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    codec: TokenCodec,
}

impl IdentityResolver {
    pub const fn new(codec: TokenCodec) -> Self {
        Self { codec }
    }

    pub const fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn resolve(&self, credentials: &Credentials) -> Result<Identity, GatewayError> {
        match credentials {
            Credentials::Bearer(token) => {
                let claims = self.codec.verify(token)?;
                if claims.user_id.is_empty() {
                    return Err(GatewayError::Unauthenticated);
                }
                // The id is forwarded as a header, so it must be representable as one.
                if HeaderValue::from_str(&claims.user_id).is_err() {
                    tracing::debug!("Bearer token user id is not a valid header value");
                    return Err(GatewayError::Unauthenticated);
                }
                Ok(Identity {
                    user_id: claims.user_id,
                    role: claims.role,
                })
            }
            Credentials::LegacyHeader(user_id) => Ok(Identity {
                user_id: user_id.clone(),
                role: DEFAULT_LEGACY_ROLE.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn auth_config(secret: &str) -> AuthConfig {
        AuthConfig {
            secret: secret.to_owned(),
            algorithm: AuthAlgorithm::HS256,
            issuer: None,
            audience: None,
            token_ttl: Duration::from_secs(3600),
            enable_login: false,
        }
    }

    fn resolver(secret: &str) -> IdentityResolver {
        IdentityResolver::new(TokenCodec::new(&auth_config(secret)))
    }

    fn headers(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn issued_token_round_trips_claims() {
        let codec = TokenCodec::new(&auth_config("test-secret"));
        let token = codec
            .issue("user123", Some("test@example.com"), "customer")
            .unwrap();

        let claims = codec.verify(&token).unwrap();
        assert_eq!(claims.user_id, "user123");
        assert_eq!(claims.email.as_deref(), Some("test@example.com"));
        assert_eq!(claims.role, "customer");
        assert!(claims.exp > claims.iat.unwrap());
    }

    #[test]
    fn resolving_same_token_twice_is_identical() {
        let resolver = resolver("test-secret");
        let token = resolver.codec().issue("u1", None, "customer").unwrap();
        let credentials = Credentials::Bearer(token);

        let first = resolver.resolve(&credentials).unwrap();
        let second = resolver.resolve(&credentials).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first,
            Identity {
                user_id: "u1".into(),
                role: "customer".into()
            }
        );
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let token = resolver("secret1")
            .codec()
            .issue("user123", None, "admin")
            .unwrap();

        let err = resolver("secret2")
            .resolve(&Credentials::Bearer(token))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));
    }

    #[rstest]
    #[case("line\nbreak")]
    #[case("nul\0byte")]
    fn rejects_user_id_unfit_for_forwarding(#[case] user_id: &str) {
        let resolver = resolver("test-secret");
        let token = resolver.codec().issue(user_id, None, "customer").unwrap();

        let err = resolver.resolve(&Credentials::Bearer(token)).unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));
    }

    #[test]
    fn rejects_garbage_token() {
        let err = resolver("s")
            .resolve(&Credentials::Bearer("invalid-token".into()))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));
    }

    #[test]
    fn rejects_expired_token() {
        let config = auth_config("s");
        let claims = Claims {
            user_id: "u1".into(),
            email: None,
            role: "customer".into(),
            exp: 1_000,
            iat: Some(0),
            iss: None,
            aud: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .unwrap();

        let err = resolver("s")
            .resolve(&Credentials::Bearer(token))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));
    }

    #[test]
    fn validates_issuer() {
        let mut issuing = auth_config("s");
        issuing.issuer = Some("wrong-issuer".into());
        let token = TokenCodec::new(&issuing)
            .issue("u1", None, "customer")
            .unwrap();

        let mut verifying = auth_config("s");
        verifying.issuer = Some("expected-issuer".into());
        assert!(TokenCodec::new(&verifying).verify(&token).is_err());
    }

    #[test]
    fn legacy_header_gets_default_role() {
        let identity = resolver("s")
            .resolve(&Credentials::LegacyHeader("legacyUser1".into()))
            .unwrap();
        assert_eq!(
            identity,
            Identity {
                user_id: "legacyUser1".into(),
                role: "customer".into()
            }
        );
    }

    #[test]
    fn bearer_scheme_extracts_token() {
        let headers = headers(header::AUTHORIZATION, "Bearer abc.def.ghi");
        assert_eq!(
            AuthScheme::Bearer.credentials(&headers).unwrap(),
            Credentials::Bearer("abc.def.ghi".into())
        );
    }

    #[rstest]
    #[case("abc.def.ghi")]
    #[case("Bearer")]
    #[case("Basic dXNlcjpwYXNz")]
    #[case("bearer abc.def.ghi")]
    #[case("Bearer abc def")]
    fn bearer_scheme_rejects_malformed_header(#[case] value: &str) {
        let headers = headers(header::AUTHORIZATION, value);
        assert!(matches!(
            AuthScheme::Bearer.credentials(&headers),
            Err(GatewayError::Unauthenticated)
        ));
    }

    #[test]
    fn bearer_scheme_requires_header() {
        assert!(AuthScheme::Bearer.credentials(&HeaderMap::new()).is_err());
    }

    #[test]
    fn legacy_scheme_reads_header() {
        let headers = headers(
            header::HeaderName::from_static(LEGACY_USER_HEADER),
            "legacyUser1",
        );
        assert_eq!(
            AuthScheme::Legacy.credentials(&headers).unwrap(),
            Credentials::LegacyHeader("legacyUser1".into())
        );
    }

    #[test]
    fn legacy_scheme_rejects_blank_header() {
        let headers = headers(header::HeaderName::from_static(LEGACY_USER_HEADER), "  ");
        assert!(AuthScheme::Legacy.credentials(&headers).is_err());
    }

    #[test]
    fn accessor_reads_extensions() {
        let mut extensions = Extensions::new();
        assert!(Identity::from_extensions(&extensions).is_none());

        extensions.insert(Identity {
            user_id: "u1".into(),
            role: "admin".into(),
        });
        assert_eq!(Identity::from_extensions(&extensions).unwrap().role, "admin");
    }
}
