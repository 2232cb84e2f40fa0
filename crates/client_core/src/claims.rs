use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{de::DeserializeOwned, Deserialize};

/// Claims of the credentials token issued by the realtime auth channel.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountClaims {
    pub sub: String,
}

/// Claims of the short-lived permissions token.
#[derive(Debug, Clone, Deserialize)]
pub struct PermsClaims {
    #[serde(default)]
    pub postgrest_role: Option<String>,
}

pub const ADMIN_ROLE: &str = "ret_admin";

impl PermsClaims {
    pub fn is_admin(&self) -> bool {
        self.postgrest_role.as_deref() == Some(ADMIN_ROLE)
    }
}

/// Reads a JWT payload without checking its signature or expiry.
pub fn decode_unverified<T: DeserializeOwned>(
    token: &str,
) -> Result<T, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<T>(token, &DecodingKey::from_secret(&[]), &validation).map(|data| data.claims)
}
