//! Compact RS256 tokens whose header names the signing key.

use std::collections::HashSet;

use jsonwebtoken as jwt;
use jwt::errors::ErrorKind;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use kstore_slo::{
    errors::{self, WithBacktrace},
    Result,
};

/// The only algorithm tokens are signed or accepted with.
pub const ALGORITHM: jwt::Algorithm = jwt::Algorithm::RS256;

/// Claims the store sets on every token; payloads may not carry them.
const RESERVED_CLAIMS: [&str; 2] = ["iat", "exp"];

/// Caller payload flattened next to the issued-at and expiry claims
/// (unix seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims<P> {
    pub iat: i64,
    pub exp: i64,
    #[serde(flatten)]
    pub payload: P,
}

/// Serialises a caller payload into the object that gets flattened beside
/// the registered claims.
pub fn payload<P: Serialize>(input: &P) -> Result<Map<String, Value>> {
    let value = serde_json::to_value(input)
        .map_err(|err| errors::invalid_payload(&err))?;
    let Value::Object(map) = value else {
        return Err(errors::invalid_payload("payload must be a JSON object"));
    };
    if let Some(claim) =
        RESERVED_CLAIMS.iter().find(|claim| map.contains_key(**claim))
    {
        return Err(errors::invalid_payload(&format!(
            "payload must not carry `{}`",
            claim
        )));
    }
    Ok(map)
}

/// Reads the `kid` from the header without checking the signature.
pub fn kid(token: &str) -> Result<String> {
    let header =
        jwt::decode_header(token).map_err(|err| errors::malformed_token(&err))?;
    header
        .kid
        .filter(|kid| !kid.is_empty())
        .ok_or_else(|| errors::malformed_token("token header carries no kid"))
}

pub fn encode<P: Serialize>(
    kid: &str,
    private_key: &str,
    claims: &Claims<P>,
) -> Result<String> {
    let mut header = jwt::Header::new(ALGORITHM);
    header.kid = Some(kid.to_owned());

    let key = jwt::EncodingKey::from_rsa_pem(private_key.as_bytes())
        .map_err(errors::any)?;
    jwt::encode(&header, claims, &key).map_err(errors::any)
}

/// Checks the signature against `public_key` and decodes the claims. Expiry
/// is left to the caller so it can be judged against the key store's clock.
pub fn decode<P: DeserializeOwned>(
    token: &str,
    public_key: &str,
) -> Result<Claims<P>> {
    let key = jwt::DecodingKey::from_rsa_pem(public_key.as_bytes())
        .map_err(errors::any)?;

    let mut validation = jwt::Validation::new(ALGORITHM);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::from(["exp".to_owned()]);

    jwt::decode::<Claims<P>>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(classify)
}

fn classify(err: jwt::errors::Error) -> WithBacktrace {
    match err.kind() {
        // the signature is checked before the claims segment is decoded, so
        // a base64 failure here comes from the signature itself
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::Base64(_) => errors::invalid_signature(),
        ErrorKind::ExpiredSignature => errors::token_expired(),
        _ => errors::malformed_token(&err),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde_json::json;

    use super::*;
    use crate::services::key::{KeyGenerator, KeyPair, RsaKeyGenerator};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: String,
        name: String,
        email: String,
    }

    fn pair() -> &'static KeyPair {
        static PAIR: OnceLock<KeyPair> = OnceLock::new();
        PAIR.get_or_init(|| RsaKeyGenerator::default().generate().unwrap())
    }

    fn claims() -> Claims<User> {
        Claims {
            iat: 1_700_000_000,
            exp: 1_700_000_900,
            payload: User {
                id: "42".to_owned(),
                name: "Ada".to_owned(),
                email: "ada@example.com".to_owned(),
            },
        }
    }

    #[test]
    fn header_carries_kid_and_algorithm() {
        let token = encode("kid-1", &pair().private_key, &claims()).unwrap();
        let header = jwt::decode_header(&token).unwrap();
        assert_eq!(header.alg, jwt::Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("kid-1"));
        assert_eq!(kid(&token).unwrap(), "kid-1");
    }

    #[test]
    fn payload_is_flattened_beside_registered_claims() {
        let token = encode("kid-1", &pair().private_key, &claims()).unwrap();
        let body = token.split('.').nth(1).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(body).unwrap())
                .unwrap();
        assert_eq!(
            value,
            json!({
                "iat": 1_700_000_000,
                "exp": 1_700_000_900,
                "id": "42",
                "name": "Ada",
                "email": "ada@example.com",
            })
        );
    }

    #[test]
    fn decode_ignores_expiry() {
        // long expired in wall-clock terms
        let token = encode("kid-1", &pair().private_key, &claims()).unwrap();
        let decoded: Claims<User> = decode(&token, &pair().public_key).unwrap();
        assert_eq!(decoded, claims());
    }

    #[test]
    fn kid_rejects_garbage() {
        assert_eq!(
            kid("not-a-token").unwrap_err(),
            errors::malformed_token("")
        );
        assert_eq!(kid("").unwrap_err(), errors::malformed_token(""));
    }

    #[test]
    fn kid_requires_kid_header() {
        let key = jwt::EncodingKey::from_rsa_pem(pair().private_key.as_bytes())
            .unwrap();
        let token =
            jwt::encode(&jwt::Header::new(ALGORITHM), &claims(), &key).unwrap();
        assert_eq!(kid(&token).unwrap_err(), errors::malformed_token(""));
    }

    #[test]
    fn foreign_algorithm_is_rejected() {
        let mut header = jwt::Header::new(jwt::Algorithm::HS256);
        header.kid = Some("kid-1".to_owned());
        let token = jwt::encode(
            &header,
            &claims(),
            &jwt::EncodingKey::from_secret(b"shared secret"),
        )
        .unwrap();
        assert_eq!(
            decode::<User>(&token, &pair().public_key).unwrap_err(),
            errors::invalid_signature()
        );
    }

    #[test]
    fn payload_keeps_caller_fields() {
        let map = payload(&claims().payload).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["email"], "ada@example.com");
    }

    #[test]
    fn payload_rejects_reserved_claims() {
        #[derive(Serialize)]
        struct Session {
            id: String,
            exp: i64,
        }
        let err = payload(&Session {
            id: "u1".to_owned(),
            exp: 4_000_000_000,
        })
        .unwrap_err();
        assert_eq!(err, errors::invalid_payload(""));
        assert!(payload(&json!({ "iat": 1 })).is_err());
    }

    #[test]
    fn payload_must_be_an_object() {
        assert_eq!(payload(&"u1").unwrap_err(), errors::invalid_payload(""));
        assert_eq!(
            payload(&vec![1, 2]).unwrap_err(),
            errors::invalid_payload("")
        );
    }

    #[test]
    fn missing_expiry_is_malformed() {
        let mut header = jwt::Header::new(ALGORITHM);
        header.kid = Some("kid-1".to_owned());
        let key = jwt::EncodingKey::from_rsa_pem(pair().private_key.as_bytes())
            .unwrap();
        let token = jwt::encode(&header, &json!({ "id": "42" }), &key).unwrap();
        assert_eq!(
            decode::<User>(&token, &pair().public_key).unwrap_err(),
            errors::malformed_token("")
        );
    }
}
