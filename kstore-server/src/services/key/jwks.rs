use jsonwebkey as jwk;
use rsa::{pkcs8::DecodePublicKey, traits::PublicKeyParts, RsaPublicKey};
use serde::Serialize;

use kstore_slo::{errors, Result};
use kstore_storage::PublicKey;

#[derive(Debug, Serialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<jwk::JsonWebKey>,
}

impl JsonWebKeySet {
    pub fn from_public_keys(keys: &[PublicKey]) -> Result<Self> {
        Ok(Self {
            keys: keys.iter().map(to_jwk).collect::<Result<Vec<_>>>()?,
        })
    }
}

pub fn to_jwk(key: &PublicKey) -> Result<jwk::JsonWebKey> {
    let public_key =
        RsaPublicKey::from_public_key_pem(&key.public_key).map_err(errors::any)?;

    let mut value = jwk::JsonWebKey::new(jwk::Key::RSA {
        public: jwk::RsaPublic {
            e: jwk::PublicExponent,
            n: public_key.n().to_bytes_be().into(),
        },
        private: None,
    });
    value
        .set_algorithm(jwk::Algorithm::RS256)
        .map_err(errors::any)?;
    value.key_use = Some(jwk::KeyUse::Signing);
    value.key_id = Some(key.kid.clone());
    Ok(value)
}
