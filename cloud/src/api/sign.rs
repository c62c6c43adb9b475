//! OSC4 request signing (the provider's SigV4 dialect).

use crate::error::CloudError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac, NewMac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "OSC4-HMAC-SHA256";
const SERVICE: &str = "oapi";
const TERMINATOR: &str = "osc4_request";
const SIGNED_HEADERS: &str = "content-type;host;x-osc-date";

/// Environment variable holding the API access key.
pub const ACCESS_KEY_ENV: &str = "OSC_ACCESS_KEY";
/// Environment variable holding the API secret key.
pub const SECRET_KEY_ENV: &str = "OSC_SECRET_KEY";

/// API credentials.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .finish()
    }
}

impl Credentials {
    /// Reads the credentials from `OSC_ACCESS_KEY` / `OSC_SECRET_KEY`.
    pub fn from_env() -> Result<Self, CloudError> {
        let access_key = std::env::var(ACCESS_KEY_ENV).map_err(|_| CloudError::Internal {
            reason: format!("{} is not set", ACCESS_KEY_ENV),
        })?;
        let secret_key = std::env::var(SECRET_KEY_ENV).map_err(|_| CloudError::Internal {
            reason: format!("{} is not set", SECRET_KEY_ENV),
        })?;
        Ok(Self {
            access_key,
            secret_key,
        })
    }
}

/// Headers to attach to a signed request.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub date: String,
}

/// Signs a `POST` to `path` (e.g. `/api/v1/CreateVolume`) on `host` with the
/// given JSON `body`.
pub fn sign_request(
    credentials: &Credentials,
    region: &str,
    host: &str,
    path: &str,
    body: &[u8],
    when: DateTime<Utc>,
) -> Result<SignedHeaders, CloudError> {
    let date = when.format("%Y%m%dT%H%M%SZ").to_string();
    let day = when.format("%Y%m%d").to_string();

    let canonical_headers = format!(
        "content-type:application/json\nhost:{}\nx-osc-date:{}\n",
        host, date
    );
    let canonical_request = format!(
        "POST\n{}\n\n{}\n{}\n{}",
        path,
        canonical_headers,
        SIGNED_HEADERS,
        sha256_hex(body)
    );

    let scope = format!("{}/{}/{}/{}", day, region, SERVICE, TERMINATOR);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let mut key = hmac(
        format!("OSC4{}", credentials.secret_key).as_bytes(),
        day.as_bytes(),
    )?;
    for part in &[region, SERVICE, TERMINATOR] {
        key = hmac(&key, part.as_bytes())?;
    }
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    Ok(SignedHeaders {
        authorization: format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, credentials.access_key, scope, SIGNED_HEADERS, signature
        ),
        date,
    })
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CloudError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CloudError::Internal {
        reason: "hmac key rejected".to_string(),
    })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
