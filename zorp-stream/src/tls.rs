//! TLS session construction: key/cert loading, CA/CRL handling, and the
//! verification-policy verifier installed on the underlying rustls
//! session.
//!
//! Grounded on the teacher's own rustls glue (`RustlsDriver::init_client`/
//! `init_server`, `make_verifier`, and its family of wrapping
//! `ServerCertVerifier`s), generalized from the teacher's fixed
//! `TlsServerCertVerify` choices to this runtime's four-way
//! {none, optional, required-untrusted, required-trusted} policy.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig, SignatureScheme};
use rustls_pki_types::{CertificateDer, CertificateRevocationListDer, PrivatePkcs8KeyDer, ServerName, UnixTime};

use zorp_errors::{ZorpError, ZorpResult};

/// Mirrors the verification strictness a TLS client applies to the peer's
/// certificate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPolicy {
    None,
    Optional,
    RequiredUntrusted,
    RequiredTrusted,
}

/// Key and certificate material, accepted as either a filesystem path or
/// inline PEM text.
#[derive(Debug, Clone)]
pub enum KeyMaterial {
    Path(PathBuf),
    Pem(String),
}

impl KeyMaterial {
    fn load(&self) -> std::io::Result<Vec<u8>> {
        match self {
            KeyMaterial::Path(p) => fs::read(p),
            KeyMaterial::Pem(s) => Ok(s.clone().into_bytes()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TlsSessionConfig {
    pub cert: Option<KeyMaterial>,
    pub key: Option<KeyMaterial>,
    pub ca_dir: Option<PathBuf>,
    pub crl_dir: Option<PathBuf>,
    pub max_chain_depth: usize,
    pub policy: VerifyPolicy,
    pub session_id: String,
}

impl TlsSessionConfig {
    fn load_cert_chain(&self) -> ZorpResult<Vec<CertificateDer<'static>>> {
        let Some(cert) = &self.cert else { return Ok(Vec::new()) };
        let bytes = cert.load().map_err(ZorpError::Io)?;
        let certs: Vec<_> = rustls_pemfile::certs(&mut bytes.as_slice())
            .collect::<Result<_, _>>()
            .map_err(ZorpError::Io)?;
        Ok(certs)
    }

    fn load_private_key(&self) -> ZorpResult<Option<PrivatePkcs8KeyDer<'static>>> {
        let Some(key) = &self.key else { return Ok(None) };
        let bytes = key.load().map_err(ZorpError::Io)?;
        let mut reader = bytes.as_slice();
        let key = rustls_pemfile::pkcs8_private_keys(&mut reader)
            .next()
            .transpose()
            .map_err(ZorpError::Io)?
            .ok_or_else(|| ZorpError::config("no PKCS8 private key found"))?;
        Ok(Some(key))
    }

    fn load_roots(&self) -> ZorpResult<RootCertStore> {
        let mut roots = RootCertStore::empty();
        let Some(dir) = &self.ca_dir else { return Ok(roots) };
        for entry in fs::read_dir(dir).map_err(ZorpError::Io)? {
            let entry = entry.map_err(ZorpError::Io)?;
            let bytes = fs::read(entry.path()).map_err(ZorpError::Io)?;
            let certs: Vec<_> = rustls_pemfile::certs(&mut bytes.as_slice())
                .collect::<Result<_, _>>()
                .map_err(ZorpError::Io)?;
            roots.add_parsable_certificates(certs);
        }
        Ok(roots)
    }

    fn load_crls(&self) -> ZorpResult<Vec<CertificateRevocationListDer<'static>>> {
        let Some(dir) = &self.crl_dir else { return Ok(Vec::new()) };
        let mut out = Vec::new();
        for entry in fs::read_dir(dir).map_err(ZorpError::Io)? {
            let entry = entry.map_err(ZorpError::Io)?;
            let bytes = fs::read(entry.path()).map_err(ZorpError::Io)?;
            let crls: Vec<_> = rustls_pemfile::crls(&mut bytes.as_slice())
                .collect::<Result<_, _>>()
                .map_err(ZorpError::Io)?;
            out.extend(crls);
        }
        Ok(out)
    }

    fn build_verifier(&self) -> ZorpResult<Arc<dyn ServerCertVerifier>> {
        if self.policy == VerifyPolicy::None {
            return Ok(Arc::new(AcceptAllVerifier));
        }
        let roots = Arc::new(self.load_roots()?);
        let crls = self.load_crls()?;
        let inner = WebPkiServerVerifier::builder(roots)
            .with_crls(crls)
            .build()
            .map_err(|e| ZorpError::config(e.to_string()))?;
        Ok(Arc::new(PolicyVerifier {
            inner,
            policy: self.policy,
            max_chain_depth: self.max_chain_depth,
        }))
    }

    /// Builds a client-facing [`rustls::ClientConfig`] implementing this
    /// session's verification policy and, if key material was supplied,
    /// client certificate authentication.
    pub fn client_config(&self) -> ZorpResult<Arc<ClientConfig>> {
        let verifier = self.build_verifier()?;
        let builder = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let config = match (self.load_cert_chain()?, self.load_private_key()?) {
            (certs, Some(key)) if !certs.is_empty() => builder
                .with_client_auth_cert(certs, key.into())
                .map_err(|e| ZorpError::config(e.to_string()))?,
            _ => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }

    /// Builds a server-facing [`rustls::ServerConfig`] serving this
    /// session's certificate and key, advertising the CA directory's
    /// subject names to clients as the trust anchors it accepts.
    pub fn server_config(&self, ca_names: Option<&CaNameCache>) -> ZorpResult<Arc<ServerConfig>> {
        let certs = self.load_cert_chain()?;
        let key = self
            .load_private_key()?
            .ok_or_else(|| ZorpError::config("server TLS session requires a private key"))?;

        let builder = match (&self.ca_dir, ca_names) {
            (Some(dir), Some(cache)) => {
                let roots = cache.get_or_refresh(dir)?;
                ServerConfig::builder().with_client_cert_verifier(
                    rustls::server::WebPkiClientVerifier::builder(roots)
                        .allow_unauthenticated()
                        .build()
                        .map_err(|e| ZorpError::config(e.to_string()))?,
                )
            }
            _ => ServerConfig::builder().with_no_client_auth(),
        };

        let config = builder
            .with_single_cert(certs, key.into())
            .map_err(|e| ZorpError::config(e.to_string()))?;
        Ok(Arc::new(config))
    }
}

/// Accepts any certificate unconditionally: policy `None`.
#[derive(Debug)]
struct AcceptAllVerifier;

impl ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }
    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }
    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        default_schemes()
    }
}

/// Enforces the chain-depth limit, delegates to a `WebPkiServerVerifier`
/// for path building and the CRL check baked into its roots, and under
/// `Optional`/`RequiredUntrusted` suppresses trust-chain errors (unknown
/// issuer, expired, not-yet-valid) rather than failing the handshake.
#[derive(Debug)]
struct PolicyVerifier {
    inner: Arc<WebPkiServerVerifier>,
    policy: VerifyPolicy,
    max_chain_depth: usize,
}

impl PolicyVerifier {
    fn is_trust_chain_error(err: &rustls::Error) -> bool {
        matches!(
            err,
            rustls::Error::InvalidCertificate(
                rustls::CertificateError::UnknownIssuer
                    | rustls::CertificateError::Expired
                    | rustls::CertificateError::NotValidYet
                    | rustls::CertificateError::UnknownRevocationStatus
            )
        )
    }
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if intermediates.len() + 1 > self.max_chain_depth {
            return Err(rustls::Error::General("CERT_CHAIN_TOO_LONG".to_string()));
        }
        let result =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        match result {
            Ok(ok) => Ok(ok),
            Err(e) if self.policy != VerifyPolicy::RequiredTrusted && Self::is_trust_chain_error(&e) => {
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn default_schemes() -> Vec<SignatureScheme> {
    use SignatureScheme::*;
    vec![
        RSA_PKCS1_SHA256,
        RSA_PKCS1_SHA384,
        RSA_PKCS1_SHA512,
        ECDSA_NISTP256_SHA256,
        ECDSA_NISTP384_SHA384,
        RSA_PSS_SHA256,
        RSA_PSS_SHA384,
        RSA_PSS_SHA512,
        ED25519,
    ]
}

/// Per-process cache mapping a CA directory's path + mtime to the subject
/// names the server-side handshake advertises as acceptable client-cert
/// issuers, refreshed only when the directory's mtime changes.
#[derive(Default)]
pub struct CaNameCache {
    entry: Mutex<Option<(PathBuf, SystemTime, Arc<RootCertStore>)>>,
}

impl CaNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_refresh(&self, dir: &Path) -> ZorpResult<Arc<RootCertStore>> {
        let mtime = fs::metadata(dir).and_then(|m| m.modified()).map_err(ZorpError::Io)?;
        let mut guard = self.entry.lock().unwrap();
        if let Some((cached_dir, cached_mtime, roots)) = guard.as_ref() {
            if cached_dir == dir && *cached_mtime == mtime {
                return Ok(roots.clone());
            }
        }
        let mut roots = RootCertStore::empty();
        for entry in fs::read_dir(dir).map_err(ZorpError::Io)? {
            let entry = entry.map_err(ZorpError::Io)?;
            let bytes = fs::read(entry.path()).map_err(ZorpError::Io)?;
            let certs: Vec<_> = rustls_pemfile::certs(&mut bytes.as_slice())
                .collect::<Result<_, _>>()
                .map_err(ZorpError::Io)?;
            roots.add_parsable_certificates(certs);
        }
        let roots = Arc::new(roots);
        *guard = Some((dir.to_path_buf(), mtime, roots.clone()));
        Ok(roots)
    }
}
