//! Ephemeral TLS identity for the local listener
//!
//! A fresh RSA key and self-signed server certificate are generated on every
//! start. Nothing is written to disk; the operator trusts the printed
//! certificate out-of-band for as long as the process runs.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, PKCS_RSA_SHA256,
};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::{Duration, OffsetDateTime};
use tracing::info;

/// Size of the generated RSA key
pub const RSA_KEY_BITS: u32 = 2048;

/// DNS names the certificate is valid for
pub const DNS_NAMES: [&str; 2] = ["localhost", "lokalhost.local"];

/// How far before generation the certificate becomes valid, to tolerate clock skew
pub const VALID_BEFORE: Duration = Duration::hours(1);

/// How long after generation the certificate stays valid
pub const VALID_FOR: Duration = Duration::days(1);

/// Self-signed server identity, immutable once generated
pub struct TlsIdentity {
    cert_der: Vec<u8>,
    key_der: Vec<u8>,
    cert_pem: String,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    dns_names: Vec<String>,
}

impl TlsIdentity {
    /// Generate a new identity valid from one hour ago until one day from now
    pub fn generate() -> Result<Self> {
        Self::generate_at(OffsetDateTime::now_utc())
    }

    /// Generate a new identity whose validity window is anchored at `now`
    ///
    /// Sub-second precision is dropped since X.509 times carry whole seconds.
    pub fn generate_at(now: OffsetDateTime) -> Result<Self> {
        let now = now
            .replace_nanosecond(0)
            .context("Failed to truncate generation time")?;

        let rsa = Rsa::generate(RSA_KEY_BITS).context("Failed to generate RSA private key")?;
        let pkey = PKey::from_rsa(rsa).context("Failed to wrap RSA private key")?;
        let key_der = pkey
            .private_key_to_pkcs8()
            .context("Failed to encode private key as PKCS#8")?;
        let key_pair = KeyPair::from_der(&key_der).context("Failed to load RSA key pair")?;

        let dns_names: Vec<String> = DNS_NAMES.iter().map(|s| s.to_string()).collect();

        let mut params = CertificateParams::new(dns_names.clone());
        params.alg = &PKCS_RSA_SHA256;
        params.not_before = now - VALID_BEFORE;
        params.not_after = now + VALID_FOR;

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::OrganizationName, "kapiproxy");
        distinguished_name.push(DnType::CommonName, DNS_NAMES[0]);
        params.distinguished_name = distinguished_name;

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.key_pair = Some(key_pair);

        let not_before = params.not_before;
        let not_after = params.not_after;

        let cert = Certificate::from_params(params).context("Failed to create certificate")?;
        let cert_der = cert
            .serialize_der()
            .context("Failed to serialize certificate to DER")?;
        let cert_pem = cert
            .serialize_pem()
            .context("Failed to serialize certificate to PEM")?;

        info!(
            "Generated self-signed certificate for {} (valid {} to {})",
            dns_names.join(", "),
            not_before,
            not_after
        );

        Ok(Self {
            cert_der,
            key_der,
            cert_pem,
            not_before,
            not_after,
            dns_names,
        })
    }

    /// Certificate in DER form
    pub fn certificate_der(&self) -> &[u8] {
        &self.cert_der
    }

    /// Certificate in PEM form
    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    /// PEM certificate wrapped in base64, the form printed for the operator to trust
    pub fn certificate_pem_base64(&self) -> String {
        STANDARD.encode(self.cert_pem.as_bytes())
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    /// Build the rustls server configuration presenting this identity
    pub fn server_config(&self) -> Result<ServerConfig> {
        let certs = vec![CertificateDer::from(self.cert_der.clone())];
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("Failed to build TLS server config")?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(config)
    }
}
