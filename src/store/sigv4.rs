//! AWS Signature Version 4 request signing.
//!
//! Only what the `DynamoDB` JSON API needs: no query strings, a single
//! canonical path, and headers supplied by the caller.

use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use sha2::{Digest, Sha256};

use super::credentials::AwsCredentials;
use crate::{Error, Result};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Request fields covered by the signature
pub(crate) struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub host: &'a str,
    /// Extra headers to sign, e.g. `content-type` and `x-amz-target`
    pub headers: &'a [(&'a str, &'a str)],
    pub payload: &'a [u8],
}

/// Headers to attach to the outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Signature {
    pub amz_date: String,
    pub authorization: String,
    pub security_token: Option<String>,
}

/// Sign `request` for `service` in `region` at instant `at`.
pub(crate) fn sign(
    request: &CanonicalRequest<'_>,
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    at: DateTime<Utc>,
) -> Result<Signature> {
    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
    let date = at.format("%Y%m%d").to_string();

    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    headers.push(("host".to_string(), request.host.to_string()));
    headers.push(("x-amz-date".to_string(), amz_date.clone()));
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        request.method,
        request.path,
        canonical_headers,
        signed_headers,
        sha256_hex(request.payload)
    );

    let scope = format!("{date}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(&credentials.secret_access_key, &date, region, service)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(Signature {
        amz_date,
        authorization: format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        ),
        security_token: credentials.session_token.clone(),
    })
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| Error::Internal(format!("Invalid signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn credentials(session_token: Option<&str>) -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: SECRET.to_string(),
            session_token: session_token.map(str::to_string),
            expires_at: None,
        }
    }

    #[test]
    fn signing_key_matches_published_example() {
        let key = signing_key(SECRET, "20120215", "us-east-1", "iam").unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn get_vanilla_signature() {
        let at = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();
        let request = CanonicalRequest {
            method: "GET",
            path: "/",
            host: "example.amazonaws.com",
            headers: &[],
            payload: b"",
        };

        let signed = sign(&request, &credentials(None), "us-east-1", "service", at).unwrap();

        assert_eq!(signed.amz_date, "20150830T123600Z");
        assert_eq!(
            signed.authorization,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
        assert!(signed.security_token.is_none());
    }

    #[test]
    fn session_token_is_signed() {
        let at = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();
        let request = CanonicalRequest {
            method: "POST",
            path: "/",
            host: "dynamodb.us-east-1.amazonaws.com",
            headers: &[
                ("Content-Type", "application/x-amz-json-1.0"),
                ("X-Amz-Target", "DynamoDB_20120810.GetItem"),
            ],
            payload: b"{}",
        };

        let signed = sign(&request, &credentials(Some("session")), "us-east-1", "dynamodb", at)
            .unwrap();

        assert!(signed.authorization.contains(
            "SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-amz-target"
        ));
        assert_eq!(signed.security_token.as_deref(), Some("session"));
    }
}
