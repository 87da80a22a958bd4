//! Client side of SCRAM-SHA-256 (RFC 5802 / RFC 7677)

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use polystore_common::{BackendError, Result};

use super::SERVICE;

type HmacSha256 = Hmac<Sha256>;

/// SASL mechanism name
pub const MECHANISM: &str = "SCRAM-SHA-256";

fn auth_error(message: impl Into<String>) -> BackendError {
    BackendError::protocol(SERVICE, format!("SCRAM: {}", message.into()))
}

/// One SCRAM conversation
pub struct ScramClient {
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        let nonce: [u8; 24] = rand::thread_rng().gen();
        Self::with_nonce(username, password, &BASE64.encode(nonce))
    }

    /// Conversation with a fixed client nonce
    pub fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        let username = username.replace('=', "=3D").replace(',', "=2C");
        Self {
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            client_first_bare: format!("n={username},r={nonce}"),
            server_signature: None,
        }
    }

    /// client-first-message
    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Answer the server-first-message with the client-final-message
    pub fn client_final(&mut self, server_first: &str) -> Result<String> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(value)
                        .map_err(|_| auth_error("invalid salt encoding"))?,
                );
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| auth_error("invalid iteration count"))?,
                );
            }
        }
        let (Some(nonce), Some(salt), Some(iterations)) = (nonce, salt, iterations) else {
            return Err(auth_error("incomplete server-first-message").into());
        };
        if !nonce.starts_with(&self.client_nonce) {
            return Err(auth_error("server nonce does not extend the client nonce").into());
        }

        let salted_password = hi(self.password.as_bytes(), &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);
        let server_key = hmac_sha256(&salted_password, b"Server Key");

        // "biws" is base64("n,,"): no channel binding.
        let without_proof = format!("c=biws,r={nonce}");
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare);

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        self.server_signature = Some(hmac_sha256(&server_key, auth_message.as_bytes()));

        Ok(format!("{without_proof},p={}", BASE64.encode(proof)))
    }

    /// Check the server-final-message signature
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(auth_error(format!("server rejected authentication: {error}")).into());
        }
        let expected = self
            .server_signature
            .as_ref()
            .ok_or_else(|| auth_error("server-final-message before client-final-message"))?;
        let signature = server_final
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or_else(|| auth_error("missing server signature"))?;
        let signature = BASE64
            .decode(signature)
            .map_err(|_| auth_error("invalid server signature encoding"))?;
        if &signature != expected {
            return Err(auth_error("server signature mismatch").into());
        }
        Ok(())
    }
}

/// PBKDF2-SHA256 (Hi function in SCRAM)
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut result = vec![0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut result);
    result
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7677 section 3 example exchange.
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

    #[test]
    fn test_rfc7677_exchange() {
        let mut client = ScramClient::with_nonce("user", "pencil", "rOprNGfwEbeRWgbNEkqO");
        assert_eq!(client.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let client_final = client.client_final(SERVER_FIRST).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        client
            .verify_server_final("v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn test_rejects_bad_server_signature() {
        let mut client = ScramClient::with_nonce("user", "pencil", "rOprNGfwEbeRWgbNEkqO");
        client.client_final(SERVER_FIRST).unwrap();
        assert!(client.verify_server_final("v=AAAA").is_err());
        assert!(client.verify_server_final("e=invalid-proof").is_err());
    }

    #[test]
    fn test_rejects_foreign_nonce() {
        let mut client = ScramClient::with_nonce("user", "pencil", "abc");
        assert!(client.client_final("r=xyz123,s=AAAA,i=4096").is_err());
    }

    #[test]
    fn test_username_escaping() {
        let client = ScramClient::with_nonce("a=b,c", "p", "n");
        assert_eq!(client.client_first(), "n,,n=a=3Db=2Cc,r=n");
    }
}
