use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, TokenData, Validation};
use rocket::{
    http::{Cookie, Status},
    request::{FromRequest, Outcome},
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::mongodb::Id;

use super::user::{Rights, User};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// An authentication token representing a specific account with specific rights.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthToken<U> {
    id: Id,
    #[serde(rename = "rgt")]
    rights: Rights,
    #[serde(skip)]
    phantom: PhantomData<U>,
}

impl<U> AuthToken<U> {
    /// The account this token was issued for.
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn rights(&self) -> Rights {
        self.rights
    }

    /// Does this token permit the given rights?
    pub fn permits(&self, target: Rights) -> bool {
        self.rights == target
    }
}

impl<U> AuthToken<U>
where
    U: User,
{
    /// Verify and decode a token from a cookie.
    pub fn from_cookie(cookie: &Cookie<'_>, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims<U>>| claims.claims.token)?;
        Ok(token)
    }
}

/// Cookie claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims<U> {
    #[serde(flatten, bound = "")]
    token: AuthToken<U>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

/// Tokens are issued by the identity service. Tests mint their own, signed
/// with the same secret.
#[cfg(test)]
impl<U> AuthToken<U>
where
    U: User,
{
    /// Create a new [`AuthToken`] for the given account, with the rights of `U`.
    pub fn new(id: Id) -> Self {
        Self {
            id,
            rights: U::RIGHTS,
            phantom: PhantomData,
        }
    }

    /// Sign this token into a cookie valid for an hour.
    pub fn into_cookie(self, config: &Config) -> Result<Cookie<'static>, Error> {
        use jsonwebtoken::{EncodingKey, Header};
        use rocket::{http::SameSite, time::Duration};

        const TTL_SECONDS: i64 = 3600;
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + chrono::Duration::seconds(TTL_SECONDS),
        };

        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )?;

        Ok(Cookie::build(AUTH_TOKEN_COOKIE, token)
            .max_age(Duration::seconds(TTL_SECONDS))
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish())
    }
}

#[rocket::async_trait]
impl<'r, U> FromRequest<'r> for AuthToken<U>
where
    U: User + Send,
{
    type Error = Error;

    /// Get an [`AuthToken`] from the cookie and verify that it has the correct
    /// rights for this user type.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match req.guard::<&State<Config>>().await {
            Outcome::Success(config) => config,
            _ => {
                let err = Error::Status(
                    Status::InternalServerError,
                    "Application config is not managed".to_string(),
                );
                return Outcome::Failure((err.status(), err));
            }
        };

        let cookie = match req.cookies().get(AUTH_TOKEN_COOKIE) {
            Some(cookie) => cookie,
            None => {
                let err = Error::Status(Status::Unauthorized, "Not signed in".to_string());
                return Outcome::Failure((err.status(), err));
            }
        };

        let token = match Self::from_cookie(cookie, config) {
            Ok(token) => token,
            Err(err) => return Outcome::Failure((err.status(), err)),
        };

        // Check it represents the correct rights.
        if !token.permits(U::RIGHTS) {
            let err = Error::Status(
                Status::Forbidden,
                format!("Requires {} rights, token has {}", U::RIGHTS, token.rights),
            );
            return Outcome::Failure((err.status(), err));
        }

        Outcome::Success(token)
    }
}
