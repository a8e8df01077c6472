//! Authentication during connection startup.
//!
//! Answers the backend's Authentication requests: cleartext, MD5, and the
//! SCRAM-SHA-256 SASL exchange. Kerberos, SCM credentials, GSSAPI and SSPI
//! are reported as unsupported.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::distr::Alphanumeric;
use rand::Rng;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::protocol::backend::AuthRequest;
use crate::protocol::frontend;

type HmacSha256 = Hmac<Sha256>;

/// Compute the response to an MD5 password challenge:
/// `"md5" + hex(md5(md5(password + user) + salt))`.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(user.as_bytes());
    let inner = hex(&hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{}", hex(&hasher.finalize()))
}

fn hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Client side of one SCRAM-SHA-256 exchange (RFC 7677, no channel binding).
pub struct ScramClient {
    password: String,
    client_nonce: String,
    client_first_bare: String,
    /// Set after the server-first message is processed.
    auth_message: Option<String>,
    server_key: Option<[u8; 32]>,
}

impl ScramClient {
    pub fn new(password: &str) -> Self {
        let client_nonce: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self::with_nonce(password, client_nonce)
    }

    fn with_nonce(password: &str, client_nonce: String) -> Self {
        let client_first_bare = format!("n=,r={client_nonce}");
        Self {
            password: password.to_string(),
            client_nonce,
            client_first_bare,
            auth_message: None,
            server_key: None,
        }
    }

    /// The client-first message, sent inside SASLInitialResponse.
    pub fn client_first(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare).into_bytes()
    }

    /// Process the server-first message and produce the client-final
    /// message with the proof.
    pub fn client_final(&mut self, server_first: &[u8]) -> Result<Vec<u8>> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| Error::Auth("SCRAM server-first message is not UTF-8".into()))?;
        let full_nonce = scram_attr(server_first, 'r')?;
        if !full_nonce.starts_with(&self.client_nonce) {
            return Err(Error::Auth("SCRAM server nonce does not extend ours".into()));
        }
        let salt = BASE64
            .decode(scram_attr(server_first, 's')?)
            .map_err(|_| Error::Auth("SCRAM salt is not valid base64".into()))?;
        let iterations: u32 = scram_attr(server_first, 'i')?
            .parse()
            .map_err(|_| Error::Auth("SCRAM iteration count is not a number".into()))?;
        if iterations == 0 {
            return Err(Error::Auth("SCRAM iteration count is zero".into()));
        }

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.password.as_bytes(), &salt, iterations, &mut salted);

        let client_key = hmac_sha256(&salted, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();
        self.server_key = Some(hmac_sha256(&salted, b"Server Key"));

        // "biws" is base64("n,,"), the gs2 header echoed in the final message.
        let without_proof = format!("c=biws,r={full_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, without_proof
        );
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        self.auth_message = Some(auth_message);

        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature) {
            *p ^= s;
        }
        Ok(format!("{without_proof},p={}", BASE64.encode(proof)).into_bytes())
    }

    /// Check the server signature in the server-final message.
    pub fn verify_server_final(&self, server_final: &[u8]) -> Result<()> {
        let server_final = std::str::from_utf8(server_final)
            .map_err(|_| Error::Auth("SCRAM server-final message is not UTF-8".into()))?;
        if let Ok(reason) = scram_attr(server_final, 'e') {
            return Err(Error::Auth(format!("SCRAM exchange failed: {reason}")));
        }
        let (auth_message, server_key) = match (&self.auth_message, &self.server_key) {
            (Some(m), Some(k)) => (m, k),
            _ => return Err(Error::Auth("SCRAM server-final arrived out of order".into())),
        };
        let expected = hmac_sha256(server_key, auth_message.as_bytes());
        let received = BASE64
            .decode(scram_attr(server_final, 'v')?)
            .map_err(|_| Error::Auth("SCRAM server signature is not valid base64".into()))?;
        if received != expected {
            return Err(Error::Auth("SCRAM server signature mismatch".into()));
        }
        Ok(())
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    // HMAC accepts keys of any length, new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac key");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn scram_attr<'a>(message: &'a str, key: char) -> Result<&'a str> {
    message
        .split(',')
        .find_map(|part| {
            let mut chars = part.chars();
            (chars.next() == Some(key) && chars.next() == Some('=')).then(|| &part[2..])
        })
        .ok_or_else(|| Error::Auth(format!("SCRAM message is missing attribute '{key}'")))
}

/// Holds SASL state across the multi-message exchange.
#[derive(Default)]
pub struct AuthState {
    scram: Option<ScramClient>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the reply to one authentication request to `out`.
    ///
    /// `AuthRequest::Ok` needs no reply and writes nothing.
    pub fn respond(
        &mut self,
        request: &AuthRequest,
        user: &str,
        password: Option<&str>,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let need_password = || {
            password.ok_or_else(|| {
                Error::Auth("server requested a password but none was configured".into())
            })
        };
        match request {
            AuthRequest::Ok => Ok(()),
            AuthRequest::CleartextPassword => {
                frontend::write_password(out, need_password()?);
                Ok(())
            }
            AuthRequest::Md5Password { salt } => {
                frontend::write_password(out, &md5_password(user, need_password()?, *salt));
                Ok(())
            }
            AuthRequest::Sasl { mechanisms } => {
                if !mechanisms.iter().any(|m| m == "SCRAM-SHA-256") {
                    return Err(Error::Unsupported(format!(
                        "no common SASL mechanism, server offers {mechanisms:?}"
                    )));
                }
                let scram = ScramClient::new(need_password()?);
                frontend::write_sasl_initial_response(out, "SCRAM-SHA-256", &scram.client_first());
                self.scram = Some(scram);
                Ok(())
            }
            AuthRequest::SaslContinue { data } => {
                let scram = self.scram.as_mut().ok_or_else(|| {
                    Error::Auth("SASL continuation without an exchange in progress".into())
                })?;
                let reply = scram.client_final(data)?;
                frontend::write_sasl_response(out, &reply);
                Ok(())
            }
            AuthRequest::SaslFinal { data } => {
                let scram = self.scram.as_ref().ok_or_else(|| {
                    Error::Auth("SASL final message without an exchange in progress".into())
                })?;
                scram.verify_server_final(data)
            }
            AuthRequest::Unsupported { code } => Err(Error::Unsupported(format!(
                "authentication method {code} is not supported"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_response() {
        assert_eq!(
            md5_password("alice", "wolfram", [0x0a, 0x0b, 0x0c, 0x0d]),
            "md59c38e5047dbd5980739e30aad468703c"
        );
        assert_eq!(
            md5_password("postgres", "password", [1, 2, 3, 4]),
            "md598511ceaec347a656f032c7f2a16ef17"
        );
    }

    #[test]
    fn scram_exchange() {
        // RFC 7677 section 3 exchange, recomputed for the empty SASL
        // username PostgreSQL expects.
        let mut scram = ScramClient::with_nonce("pencil", "rOprNGfwEbeRWgbNEkqO".into());
        assert_eq!(scram.client_first(), b"n,,n=,r=rOprNGfwEbeRWgbNEkqO");

        let server_first = b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let client_final = scram.client_final(server_first).unwrap();
        assert_eq!(
            client_final,
            b"c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
p=qvT2SWdEH5Q06albL+hjSYuUhCG7VndFyzIb7CK4n9k="
                .to_vec()
        );

        scram
            .verify_server_final(b"v=3HO6Qt1M4MKJrmlKaoOqLAI0/0TV0HZe7J9H3MBtSOg=")
            .unwrap();
        assert!(scram.verify_server_final(b"v=AAAA").is_err());
    }

    #[test]
    fn scram_rejects_foreign_nonce() {
        let mut scram = ScramClient::with_nonce("pw", "abc".into());
        assert!(scram
            .client_final(b"r=xyz123,s=QSXCR+Q6sek8bf92,i=4096")
            .is_err());
    }

    #[test]
    fn scram_error_attribute() {
        let scram = ScramClient::with_nonce("pw", "abc".into());
        let err = scram
            .verify_server_final(b"e=invalid-proof")
            .unwrap_err();
        assert!(err.to_string().contains("invalid-proof"));
    }

    #[test]
    fn respond_requires_password() {
        let mut auth = AuthState::new();
        let mut out = Vec::new();
        let err = auth
            .respond(&AuthRequest::CleartextPassword, "bob", None, &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn respond_unsupported_method() {
        let mut auth = AuthState::new();
        let mut out = Vec::new();
        let err = auth
            .respond(&AuthRequest::Unsupported { code: 2 }, "bob", Some("pw"), &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn respond_ok_writes_nothing() {
        let mut auth = AuthState::new();
        let mut out = Vec::new();
        auth.respond(&AuthRequest::Ok, "bob", None, &mut out).unwrap();
        assert!(out.is_empty());
    }
}
