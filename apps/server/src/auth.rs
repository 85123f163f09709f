use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::error::ApiError;
use crate::models::User;
use crate::state::AppState;
use crate::validation::{
    display_name_or_default, normalize_email, validate_display_name, validate_photo_url,
};

/// Claims carried by identity-provider tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Verifies bearer tokens issued by the external identity provider.
pub struct IdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl IdentityVerifier {
    pub fn new(config: &IdentityConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // A configured issuer or audience must be present in the token, not
        // just match when it happens to be there.
        let mut required = vec!["exp"];
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer.as_str()]);
            required.push("iss");
        }
        match &config.audience {
            Some(audience) => {
                validation.set_audience(&[audience.as_str()]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(required.as_slice());
        Self {
            key: DecodingKey::from_secret(&config.secret),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, ApiError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::debug!(component = "auth", error = %err, "rejected bearer token");
                ApiError::InvalidToken
            })?;
        AuthUser::from_claims(claims)
    }
}

/// Authenticated user extractor for Axum
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

impl AuthUser {
    fn from_claims(claims: Claims) -> Result<Self, ApiError> {
        let id = Uuid::parse_str(&claims.sub).map_err(|_| ApiError::InvalidToken)?;
        let email = normalize_email(&claims.email);
        if email.is_empty() {
            return Err(ApiError::InvalidToken);
        }

        let display_name = display_name_or_default(claims.name.as_deref());
        let display_name = if validate_display_name(&display_name).is_ok() {
            display_name
        } else {
            display_name.chars().take(100).collect()
        };
        let photo_url = claims
            .picture
            .filter(|url| validate_photo_url(url).is_ok());

        Ok(Self {
            id,
            email,
            display_name,
            photo_url,
        })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| ApiError::InvalidToken)?;

        state.identity.verify(bearer.token())
    }
}

/// Creates the profile on first sign-in, otherwise refreshes `last_login_at`.
pub async fn sign_in(pool: &PgPool, user: &AuthUser) -> Result<User, ApiError> {
    let profile = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, display_name, photo_url, created_at, last_login_at)
        VALUES ($1, $2, $3, $4, NOW(), NOW())
        ON CONFLICT (id) DO UPDATE SET last_login_at = NOW()
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(&user.email)
    .bind(&user.display_name)
    .bind(&user.photo_url)
    .fetch_one(pool)
    .await?;

    tracing::info!(component = "auth", user_id = %profile.id, "user signed in");
    Ok(profile)
}

pub async fn get_me(pool: &PgPool, user_id: Uuid) -> Result<User, ApiError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("Profile"))
}

/// Display name and photo copied onto posts, comments and requests. Creates
/// the profile from the token claims when the user has never signed in, since
/// every authored row references `users`.
pub async fn ensure_profile(
    pool: &PgPool,
    user: &AuthUser,
) -> Result<(String, Option<String>), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO users (id, email, display_name, photo_url, created_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(user.id)
    .bind(&user.email)
    .bind(&user.display_name)
    .bind(&user.photo_url)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT display_name, photo_url FROM users WHERE id = $1",
    )
    .bind(user.id)
    .fetch_one(pool)
    .await
}

/// Signs claims with the shared secret, the way the identity provider does.
#[cfg(test)]
pub fn issue_token(secret: &[u8], claims: &Claims) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    encode(&Header::default(), claims, &EncodingKey::from_secret(secret)).expect("sign token")
}

#[cfg(test)]
pub fn test_claims(id: Uuid, email: &str) -> Claims {
    let now = chrono::Utc::now().timestamp();
    Claims {
        sub: id.to_string(),
        email: email.to_string(),
        name: Some("Test User".to_string()),
        picture: None,
        exp: now + 3600,
        iat: now,
        iss: None,
        aud: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(issuer: Option<&str>, audience: Option<&str>) -> IdentityConfig {
        IdentityConfig {
            secret: b"test-secret".to_vec(),
            issuer: issuer.map(str::to_string),
            audience: audience.map(str::to_string),
        }
    }

    #[test]
    fn verifies_tokens_and_normalizes_claims() {
        let verifier = IdentityVerifier::new(&identity(None, None));
        let id = Uuid::new_v4();
        let mut claims = test_claims(id, "Ann@Example.com");
        claims.name = Some("   ".to_string());
        claims.picture = Some("javascript:alert(1)".to_string());

        let user = verifier
            .verify(&issue_token(b"test-secret", &claims))
            .expect("valid token");

        assert_eq!(user.id, id);
        assert_eq!(user.email, "ann@example.com");
        assert_eq!(user.display_name, "Anonymous");
        assert!(user.photo_url.is_none());
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let verifier = IdentityVerifier::new(&identity(None, None));
        let claims = test_claims(Uuid::new_v4(), "ann@example.com");
        assert!(matches!(
            verifier.verify(&issue_token(b"other-secret", &claims)),
            Err(ApiError::InvalidToken)
        ));

        let mut expired = claims.clone();
        expired.exp = chrono::Utc::now().timestamp() - 3600;
        assert!(verifier
            .verify(&issue_token(b"test-secret", &expired))
            .is_err());
    }

    #[test]
    fn rejects_non_uuid_subject() {
        let verifier = IdentityVerifier::new(&identity(None, None));
        let mut claims = test_claims(Uuid::new_v4(), "ann@example.com");
        claims.sub = "firebase-uid".to_string();
        assert!(verifier
            .verify(&issue_token(b"test-secret", &claims))
            .is_err());
    }

    #[test]
    fn enforces_configured_issuer() {
        let verifier = IdentityVerifier::new(&identity(Some("https://id.example"), None));
        let mut claims = test_claims(Uuid::new_v4(), "ann@example.com");
        assert!(verifier
            .verify(&issue_token(b"test-secret", &claims))
            .is_err());

        claims.iss = Some("https://other.example".to_string());
        assert!(verifier
            .verify(&issue_token(b"test-secret", &claims))
            .is_err());

        claims.iss = Some("https://id.example".to_string());
        assert!(verifier
            .verify(&issue_token(b"test-secret", &claims))
            .is_ok());
    }

    #[test]
    fn enforces_configured_audience() {
        let verifier = IdentityVerifier::new(&identity(None, Some("scrapbook")));
        let mut claims = test_claims(Uuid::new_v4(), "ann@example.com");
        assert!(verifier
            .verify(&issue_token(b"test-secret", &claims))
            .is_err());

        claims.aud = Some("someone-else".to_string());
        assert!(verifier
            .verify(&issue_token(b"test-secret", &claims))
            .is_err());

        claims.aud = Some("scrapbook".to_string());
        assert!(verifier
            .verify(&issue_token(b"test-secret", &claims))
            .is_ok());
    }

    #[test]
    fn ignores_issuer_and_audience_when_not_configured() {
        let verifier = IdentityVerifier::new(&identity(None, None));
        let mut claims = test_claims(Uuid::new_v4(), "ann@example.com");
        claims.iss = Some("https://any.example".to_string());
        claims.aud = Some("anything".to_string());
        assert!(verifier
            .verify(&issue_token(b"test-secret", &claims))
            .is_ok());
    }
}
