//! JOSE header and JWT claims types (design doc §4.2).

use serde::{Deserialize, Deserializer};

/// Supported JWS signature algorithms. Only RSA algorithms are accepted;
/// `none` and HMAC (`HSxxx`) are rejected during header parsing, matching
/// the design doc's "unsigned tokens and HMAC tokens are rejected"
/// invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Rs256,
    Rs384,
    Rs512,
}

impl Algorithm {
    pub(crate) fn to_jsonwebtoken(self) -> jsonwebtoken::Algorithm {
        match self {
            Algorithm::Rs256 => jsonwebtoken::Algorithm::RS256,
            Algorithm::Rs384 => jsonwebtoken::Algorithm::RS384,
            Algorithm::Rs512 => jsonwebtoken::Algorithm::RS512,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Algorithm::Rs256 => "RS256",
            Algorithm::Rs384 => "RS384",
            Algorithm::Rs512 => "RS512",
        }
    }
}

impl<'de> Deserialize<'de> for Algorithm {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "RS256" => Ok(Algorithm::Rs256),
            "RS384" => Ok(Algorithm::Rs384),
            "RS512" => Ok(Algorithm::Rs512),
            other => Err(serde::de::Error::custom(format!(
                "unsupported JWS algorithm {other}; only RS256/RS384/RS512 are accepted"
            ))),
        }
    }
}

/// The JOSE header segment of a JWT.
#[derive(Debug, Clone, Deserialize)]
pub struct JoseHeader {
    pub alg: Algorithm,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub typ: Option<String>,
}

/// JWT claims per RFC 7519. Every field is optional; the design doc's
/// stated defaults (`iat`/`nbf` = -infinity, `exp` = +infinity) fall out
/// naturally from treating an absent field as "no constraint" in
/// [`super::verifier::Verifier::check_claims`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub exp: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_rsa_algorithms() {
        let err = serde_json::from_str::<JoseHeader>(r#"{"alg":"HS256","kid":"k"}"#).unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn accepts_rs256_header() {
        let header: JoseHeader = serde_json::from_str(r#"{"alg":"RS256","kid":"abc"}"#).unwrap();
        assert_eq!(header.alg, Algorithm::Rs256);
        assert_eq!(header.kid.as_deref(), Some("abc"));
    }
}
