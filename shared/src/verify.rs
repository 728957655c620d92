//! Alexa request signature verification.
//!
//! Every request Alexa sends is signed with a certificate published under
//! `https://s3.amazonaws.com/echo.api/`. A request is only trusted when the
//! certificate URL is well-formed, the chain validates to a public root, the
//! leaf is issued to `echo-api.amazon.com`, the signature over the raw body
//! checks out and the request timestamp is fresh.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use url::Url;
use webpki::{EndEntityCert, KeyUsage};

use crate::{Error, Result};

/// Host that serves Alexa signing certificates.
pub const CERT_HOST: &str = "s3.amazonaws.com";

/// Path prefix that Alexa signing certificates live under.
pub const CERT_PATH_PREFIX: &str = "/echo.api/";

/// Subject alternative name the signing certificate must carry.
pub const CERT_SUBJECT_NAME: &str = "echo-api.amazon.com";

/// Maximum age of a request, in seconds.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 150;

static CHAIN_ALGS: &[&dyn rustls_pki_types::SignatureVerificationAlgorithm] = &[
    webpki::ring::RSA_PKCS1_2048_8192_SHA256,
    webpki::ring::RSA_PKCS1_2048_8192_SHA384,
    webpki::ring::RSA_PKCS1_2048_8192_SHA512,
    webpki::ring::ECDSA_P256_SHA256,
    webpki::ring::ECDSA_P384_SHA384,
];

/// Checks that a request was sent by Alexa.
#[async_trait]
pub trait RequestVerifier: Send + Sync {
    /// Verify `raw_body` against the certificate at `cert_url` and the base64 `signature`.
    async fn verify(&self, cert_url: &str, signature: &str, raw_body: &[u8]) -> Result<()>;
}

/// Run a verifier, logging and normalizing any failure to `Error::Verification`.
pub async fn verify_request(
    verifier: &dyn RequestVerifier,
    cert_url: &str,
    signature: &str,
    raw_body: &[u8],
) -> Result<()> {
    match verifier.verify(cert_url, signature, raw_body).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Alexa verification failed: {}", e);
            Err(match e {
                Error::Verification(reason) => Error::Verification(reason),
                other => Error::Verification(other.to_string()),
            })
        }
    }
}

/// Production verifier backed by the public Web PKI.
pub struct AlexaVerifier {
    http_client: reqwest::Client,
    chains: RwLock<HashMap<String, Arc<Vec<CertificateDer<'static>>>>>,
}

impl AlexaVerifier {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            chains: RwLock::new(HashMap::new()),
        }
    }

    /// Certificate chain for `url`, downloaded once per process.
    async fn certificate_chain(&self, url: &Url) -> Result<Arc<Vec<CertificateDer<'static>>>> {
        {
            let chains = self.chains.read().await;
            if let Some(chain) = chains.get(url.as_str()) {
                return Ok(Arc::clone(chain));
            }
        }

        let chain = Arc::new(self.download_chain(url).await?);

        {
            let mut chains = self.chains.write().await;
            chains.insert(url.to_string(), Arc::clone(&chain));
        }

        Ok(chain)
    }

    async fn download_chain(&self, url: &Url) -> Result<Vec<CertificateDer<'static>>> {
        debug!("Downloading Alexa certificate chain from {}", url);

        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Verification(format!("Failed to fetch certificate: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Verification(format!(
                "Failed to fetch certificate: HTTP {}",
                response.status()
            )));
        }

        let pem = response
            .bytes()
            .await
            .map_err(|e| Error::Verification(format!("Failed to read certificate: {}", e)))?;

        parse_pem_chain(&pem)
    }
}

#[async_trait]
impl RequestVerifier for AlexaVerifier {
    async fn verify(&self, cert_url: &str, signature: &str, raw_body: &[u8]) -> Result<()> {
        if cert_url.is_empty() {
            return Err(Error::Verification(
                "missing signaturecertchainurl header".to_string(),
            ));
        }
        if signature.is_empty() {
            return Err(Error::Verification("missing signature header".to_string()));
        }

        let url = validate_cert_url(cert_url)?;
        check_timestamp(raw_body, Utc::now())?;

        let chain = self.certificate_chain(&url).await?;
        verify_with_chain(&chain, signature, raw_body, UnixTime::now())
    }
}

/// Accepts every request. Local testing only.
pub struct NoopVerifier;

#[async_trait]
impl RequestVerifier for NoopVerifier {
    async fn verify(&self, _cert_url: &str, _signature: &str, _raw_body: &[u8]) -> Result<()> {
        warn!("Alexa signature verification is disabled");
        Ok(())
    }
}

/// Check that a certificate chain URL points at Alexa's certificate bucket.
pub fn validate_cert_url(cert_url: &str) -> Result<Url> {
    let url = Url::parse(cert_url)
        .map_err(|e| Error::Verification(format!("Invalid certificate URL '{}': {}", cert_url, e)))?;

    // Url lower-cases scheme and host and resolves dot segments in the path.
    if url.scheme() != "https" {
        return Err(Error::Verification(format!(
            "Certificate URL must use https: {}",
            cert_url
        )));
    }
    if url.host_str() != Some(CERT_HOST) {
        return Err(Error::Verification(format!(
            "Certificate URL has invalid host: {}",
            cert_url
        )));
    }
    if !url.path().starts_with(CERT_PATH_PREFIX) {
        return Err(Error::Verification(format!(
            "Certificate URL has invalid path: {}",
            cert_url
        )));
    }
    if url.port().is_some_and(|p| p != 443) {
        return Err(Error::Verification(format!(
            "Certificate URL has invalid port: {}",
            cert_url
        )));
    }

    Ok(url)
}

/// Check that the body's `request.timestamp` is within tolerance of `now`.
pub fn check_timestamp(raw_body: &[u8], now: DateTime<Utc>) -> Result<()> {
    let body: serde_json::Value = serde_json::from_slice(raw_body)
        .map_err(|e| Error::Verification(format!("Request body is not JSON: {}", e)))?;

    let sent_at = match &body["request"]["timestamp"] {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::Verification(format!("Invalid request timestamp: {}", e)))?,
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| Error::Verification("Invalid request timestamp".to_string()))?,
        _ => {
            return Err(Error::Verification(
                "Request timestamp is missing".to_string(),
            ))
        }
    };

    let skew = (now - sent_at).num_seconds().abs();
    if skew > TIMESTAMP_TOLERANCE_SECS {
        return Err(Error::Verification(format!(
            "Request timestamp is {}s away from now",
            skew
        )));
    }

    Ok(())
}

/// Parse every certificate out of a PEM bundle, leaf first.
pub fn parse_pem_chain(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let chain = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Verification(format!("Invalid certificate PEM: {}", e)))?;

    if chain.is_empty() {
        return Err(Error::Verification(
            "Certificate PEM contains no certificates".to_string(),
        ));
    }

    Ok(chain)
}

/// Validate the chain at `now` and check the signature over `raw_body`.
pub fn verify_with_chain(
    chain: &[CertificateDer<'static>],
    signature: &str,
    raw_body: &[u8],
    now: UnixTime,
) -> Result<()> {
    let signature = base64::engine::general_purpose::STANDARD
        .decode(signature.trim())
        .map_err(|e| Error::Verification(format!("Signature is not base64: {}", e)))?;

    let (leaf, intermediates) = chain
        .split_first()
        .ok_or_else(|| Error::Verification("Certificate chain is empty".to_string()))?;

    let cert = EndEntityCert::try_from(leaf)
        .map_err(|e| Error::Verification(format!("Invalid signing certificate: {:?}", e)))?;

    cert.verify_for_usage(
        CHAIN_ALGS,
        webpki_roots::TLS_SERVER_ROOTS,
        intermediates,
        now,
        KeyUsage::server_auth(),
        None,
        None,
    )
    .map_err(|e| Error::Verification(format!("Certificate chain is not trusted: {:?}", e)))?;

    let subject = ServerName::try_from(CERT_SUBJECT_NAME)
        .map_err(|e| Error::Verification(format!("Invalid subject name: {}", e)))?;
    cert.verify_is_valid_for_subject_name(&subject)
        .map_err(|e| {
            Error::Verification(format!(
                "Certificate is not issued to {}: {:?}",
                CERT_SUBJECT_NAME, e
            ))
        })?;

    cert.verify_signature(webpki::ring::RSA_PKCS1_2048_8192_SHA256, raw_body, &signature)
        .map_err(|e| Error::Verification(format!("Signature does not match body: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    struct Rejecting;

    #[async_trait]
    impl RequestVerifier for Rejecting {
        async fn verify(&self, _: &str, _: &str, _: &[u8]) -> Result<()> {
            Err(Error::Config("no trust store".to_string()))
        }
    }

    fn body_at(timestamp: &str) -> Vec<u8> {
        serde_json::json!({
            "session": { "sessionId": "s1" },
            "request": { "type": "LaunchRequest", "timestamp": timestamp }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_valid_cert_urls() {
        for url in [
            "https://s3.amazonaws.com/echo.api/echo-api-cert.pem",
            "https://s3.amazonaws.com:443/echo.api/echo-api-cert.pem",
            "https://s3.amazonaws.com/echo.api/../echo.api/echo-api-cert.pem",
            "HTTPS://s3.amazonaws.com/echo.api/echo-api-cert.pem",
            "https://S3.AMAZONAWS.COM/echo.api/echo-api-cert.pem",
        ] {
            assert!(validate_cert_url(url).is_ok(), "{} should be accepted", url);
        }
    }

    #[test]
    fn test_invalid_cert_urls() {
        for url in [
            "http://s3.amazonaws.com/echo.api/echo-api-cert.pem",
            "https://notamazon.com/echo.api/echo-api-cert.pem",
            "https://s3.amazonaws.com/EcHo.aPi/echo-api-cert.pem",
            "https://s3.amazonaws.com/invalid.path/echo-api-cert.pem",
            "https://s3.amazonaws.com:563/echo.api/echo-api-cert.pem",
            "https://s3.amazonaws.com/echo.api/../invalid.path/echo-api-cert.pem",
            "not a url",
        ] {
            assert!(
                matches!(validate_cert_url(url), Err(Error::Verification(_))),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn test_timestamp_window() {
        let now = DateTime::parse_from_rfc3339("2018-07-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert!(check_timestamp(&body_at("2018-07-10T11:59:00Z"), now).is_ok());
        assert!(check_timestamp(&body_at("2018-07-10T11:57:29Z"), now).is_err());
        assert!(check_timestamp(&body_at("2018-07-10T12:05:00Z"), now).is_err());
        assert!(check_timestamp(&body_at("yesterday"), now).is_err());
    }

    #[test]
    fn test_timestamp_missing() {
        let body = br#"{"session":{"sessionId":"s1"},"request":{"type":"LaunchRequest"}}"#;
        let err = check_timestamp(body, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_parse_pem_rejects_non_certificates() {
        assert!(parse_pem_chain(b"hello").is_err());
        assert!(parse_pem_chain(b"").is_err());
    }

    #[test]
    fn test_empty_chain_rejected() {
        let err = verify_with_chain(&[], "c2lnbmF0dXJl", b"{}", UnixTime::now()).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_bad_signature_encoding_rejected() {
        let err = verify_with_chain(&[], "%%%", b"{}", UnixTime::now()).unwrap_err();
        assert!(err.to_string().contains("base64"));
    }

    #[tokio::test]
    async fn test_missing_headers_rejected() {
        let verifier = AlexaVerifier::new(reqwest::Client::new());
        let body = body_at(&Utc::now().to_rfc3339());

        let err = verifier.verify("", "sig", &body).await.unwrap_err();
        assert!(matches!(err, Error::Verification(_)));

        let err = verifier
            .verify("https://s3.amazonaws.com/echo.api/echo-api-cert.pem", "", &body)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Verification(_)));
    }

    #[tokio::test]
    async fn test_download_rejects_non_pem() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/echo.api/echo-api-cert.pem"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&mock_server)
            .await;

        let verifier = AlexaVerifier::new(reqwest::Client::new());
        let url = Url::parse(&format!("{}/echo.api/echo-api-cert.pem", mock_server.uri())).unwrap();

        let err = verifier.certificate_chain(&url).await.unwrap_err();
        assert!(err.to_string().contains("no certificates"));
    }

    #[tokio::test]
    async fn test_download_http_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let verifier = AlexaVerifier::new(reqwest::Client::new());
        let url = Url::parse(&format!("{}/echo.api/missing.pem", mock_server.uri())).unwrap();

        let err = verifier.certificate_chain(&url).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_verify_request_normalizes_errors() {
        let err = verify_request(&Rejecting, "u", "s", b"{}").await.unwrap_err();
        assert!(matches!(err, Error::Verification(ref reason) if reason.contains("no trust store")));
    }

    #[tokio::test]
    async fn test_noop_verifier_accepts() {
        assert!(verify_request(&NoopVerifier, "", "", b"").await.is_ok());
    }
}
