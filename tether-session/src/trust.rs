//! Per-account certificate trust store and the TLS verifier built on it.
//!
//! A certificate the user accepted is stored by fingerprint under the bare
//! account address. [`TrustStoreVerifier`] consults that store before the
//! regular webpki path, so a server presenting an accepted certificate
//! connects without another prompt.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::jid::Jid;

pub type Certificate = CertificateDer<'static>;

/// Hex SHA-256 of the DER encoding.
pub fn fingerprint(cert: &Certificate) -> String {
    hex::encode(Sha256::digest(cert.as_ref()))
}

pub trait CertificateStorage: Send {
    fn contains(&self, cert: &Certificate) -> bool;
    fn add(&mut self, cert: &Certificate) -> Result<(), Error>;
}

/// Opens the trust store for one account.
pub trait CertificateStorageFactory: Send {
    fn create(&self, account: &Jid) -> Result<Box<dyn CertificateStorage>, Error>;
}

/// Asks the user whether to trust a certificate chain for good.
pub trait TrustPrompt: Send {
    fn ask_to_trust_permanently(&mut self, message: &str, chain: &[Certificate]) -> bool;
}

#[derive(Debug, Default)]
pub struct MemoryCertificateStorage {
    fingerprints: HashSet<String>,
}

impl CertificateStorage for MemoryCertificateStorage {
    fn contains(&self, cert: &Certificate) -> bool {
        self.fingerprints.contains(&fingerprint(cert))
    }

    fn add(&mut self, cert: &Certificate) -> Result<(), Error> {
        self.fingerprints.insert(fingerprint(cert));
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryCertificateStorageFactory;

impl CertificateStorageFactory for MemoryCertificateStorageFactory {
    fn create(&self, _account: &Jid) -> Result<Box<dyn CertificateStorage>, Error> {
        Ok(Box::<MemoryCertificateStorage>::default())
    }
}

/// Stores accepted certificates as `<fingerprint>.der` files in a
/// directory of their own.
#[derive(Debug)]
pub struct FileCertificateStorage {
    dir: PathBuf,
}

impl FileCertificateStorage {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, cert: &Certificate) -> PathBuf {
        self.dir.join(format!("{}.der", fingerprint(cert)))
    }
}

impl CertificateStorage for FileCertificateStorage {
    fn contains(&self, cert: &Certificate) -> bool {
        match std::fs::read(self.path_for(cert)) {
            Ok(stored) => stored == cert.as_ref(),
            Err(_) => false,
        }
    }

    fn add(&mut self, cert: &Certificate) -> Result<(), Error> {
        let path = self.path_for(cert);
        std::fs::write(&path, cert.as_ref())?;
        tracing::debug!(path = %path.display(), "Stored trusted certificate");
        Ok(())
    }
}

/// One directory per bare account address under a common root.
#[derive(Debug, Clone)]
pub struct FileCertificateStorageFactory {
    root: PathBuf,
}

impl FileCertificateStorageFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for FileCertificateStorageFactory {
    fn default() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tether")
            .join("certificates");
        Self::new(root)
    }
}

impl CertificateStorageFactory for FileCertificateStorageFactory {
    fn create(&self, account: &Jid) -> Result<Box<dyn CertificateStorage>, Error> {
        let dir = self.root.join(account.to_bare().to_string());
        Ok(Box::new(FileCertificateStorage::open(dir)?))
    }
}

/// Trust decisions for one account's connections.
///
/// Shared between the controller (prompting, "show certificate") and the
/// engine's TLS verifier, which calls [`is_trusted`](Self::is_trusted) from
/// inside the handshake.
pub struct CertificateTrustChecker {
    storage: Mutex<Box<dyn CertificateStorage>>,
    last_chain: Mutex<Vec<Certificate>>,
}

impl CertificateTrustChecker {
    pub fn new(storage: Box<dyn CertificateStorage>) -> Self {
        Self {
            storage: Mutex::new(storage),
            last_chain: Mutex::new(Vec::new()),
        }
    }

    /// Remember `chain` as the last one seen and check its leaf against
    /// the store.
    pub fn is_trusted(&self, chain: &[Certificate]) -> bool {
        *self.last_chain.lock() = chain.to_vec();
        match chain.first() {
            Some(leaf) => self.storage.lock().contains(leaf),
            None => false,
        }
    }

    pub fn add_certificate(&self, cert: &Certificate) -> Result<(), Error> {
        self.storage.lock().add(cert)
    }

    pub fn last_chain(&self) -> Vec<Certificate> {
        self.last_chain.lock().clone()
    }
}

impl fmt::Debug for CertificateTrustChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateTrustChecker")
            .field("last_chain_len", &self.last_chain.lock().len())
            .finish_non_exhaustive()
    }
}

fn install_crypto_provider() {
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn crypto_provider() -> Result<Arc<CryptoProvider>, Error> {
    install_crypto_provider();
    CryptoProvider::get_default()
        .cloned()
        .ok_or(Error::NoCryptoProvider)
}

/// Server certificate verifier that accepts certificates from the
/// account's trust store and otherwise defers to webpki with the Mozilla
/// root set.
pub struct TrustStoreVerifier {
    inner: Arc<WebPkiServerVerifier>,
    checker: Arc<CertificateTrustChecker>,
}

impl TrustStoreVerifier {
    pub fn new(checker: Arc<CertificateTrustChecker>) -> Result<Self, Error> {
        let roots =
            rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), crypto_provider()?)
            .build()?;
        Ok(Self { inner, checker })
    }

    /// A client config using this verifier, for engines built on tokio-rustls.
    pub fn client_config(checker: Arc<CertificateTrustChecker>) -> Result<rustls::ClientConfig, Error> {
        let verifier = Self::new(checker)?;
        let config = rustls::ClientConfig::builder_with_provider(crypto_provider()?)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        Ok(config)
    }
}

impl fmt::Debug for TrustStoreVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustStoreVerifier")
            .field("checker", &self.checker)
            .finish_non_exhaustive()
    }
}

impl ServerCertVerifier for TrustStoreVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain: Vec<Certificate> = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|c| c.clone().into_owned())
            .collect();
        if self.checker.is_trusted(&chain) {
            tracing::debug!(server = ?server_name, "Certificate accepted from trust store");
            return Ok(ServerCertVerified::assertion());
        }
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientErrorKind;

    fn self_signed() -> Certificate {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        certified.cert.der().clone()
    }

    fn memory_checker() -> CertificateTrustChecker {
        CertificateTrustChecker::new(Box::<MemoryCertificateStorage>::default())
    }

    #[test]
    fn accepted_certificate_is_trusted_next_time() {
        let checker = memory_checker();
        let cert = self_signed();
        assert!(!checker.is_trusted(std::slice::from_ref(&cert)));
        checker.add_certificate(&cert).unwrap();
        assert!(checker.is_trusted(std::slice::from_ref(&cert)));
    }

    #[test]
    fn last_chain_is_recorded_even_when_untrusted() {
        let checker = memory_checker();
        let leaf = self_signed();
        let other = self_signed();
        assert!(!checker.is_trusted(&[leaf.clone(), other.clone()]));
        assert_eq!(checker.last_chain(), vec![leaf, other]);
    }

    #[test]
    fn empty_chain_is_never_trusted() {
        assert!(!memory_checker().is_trusted(&[]));
    }

    #[test]
    fn file_storage_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FileCertificateStorageFactory::new(dir.path());
        let account: Jid = "alice@example.org/laptop".parse().unwrap();
        let cert = self_signed();

        factory.create(&account).unwrap().add(&cert).unwrap();

        // A different resource of the same account shares the store.
        let other_resource: Jid = "alice@example.org/phone".parse().unwrap();
        let reopened = factory.create(&other_resource).unwrap();
        assert!(reopened.contains(&cert));
        assert!(dir.path().join("alice@example.org").is_dir());

        let stranger: Jid = "bob@example.org".parse().unwrap();
        assert!(!factory.create(&stranger).unwrap().contains(&cert));
    }

    #[test]
    fn verifier_defers_to_trust_store() {
        let cert = self_signed();
        let checker = Arc::new(memory_checker());
        let verifier = TrustStoreVerifier::new(checker.clone()).unwrap();
        let name = ServerName::try_from("localhost").unwrap();

        let err = verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .unwrap_err();
        assert!(ClientErrorKind::from_tls(&err).is_certificate_error(), "{err:?}");
        assert_eq!(checker.last_chain(), vec![cert.clone()]);

        checker.add_certificate(&cert).unwrap();
        assert!(
            verifier
                .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
                .is_ok()
        );
    }

    #[test]
    fn client_config_builds() {
        assert!(TrustStoreVerifier::client_config(Arc::new(memory_checker())).is_ok());
    }
}
