//! Error types: the crate's own [`Error`] and the disconnect taxonomy.
//!
//! [`ClientErrorKind`] is the table the controller consults when a connection
//! ends: every kind maps to a user-facing message and to a [`Failure`] class
//! that decides between backoff retry, certificate trust negotiation and a
//! forced sign-out.

use std::fmt;

use rustls::CertificateError;
use serde::Serialize;

/// Errors returned by the library's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("certificate storage: {0}")]
    Storage(#[from] std::io::Error),
    #[error("malformed settings file: {0}")]
    SettingsParse(#[from] toml::de::Error),
    #[error("could not serialize settings: {0}")]
    SettingsSerialize(#[from] toml::ser::Error),
    #[error("TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
    #[error("certificate verifier: {0}")]
    Verifier(#[from] rustls::client::VerifierBuilderError),
    #[error("no TLS crypto provider is available (enable the `ring` or `aws-lc-rs` feature)")]
    NoCryptoProvider,
    #[error("session controller has stopped")]
    ControllerStopped,
}

/// Why a connection ended, as reported by the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorKind {
    Unknown,
    DomainNameResolve,
    Connection,
    ConnectionRead,
    ConnectionWrite,
    Xml,
    AuthenticationFailed,
    CompressionFailed,
    ServerVerificationFailed,
    NoSupportedAuthMechanisms,
    UnexpectedElement,
    ResourceBind,
    SessionStart,
    Stream,
    Tls,
    ClientCertificateLoad,
    ClientCertificate,
    CertificateCardRemoved,

    UnknownCertificate,
    CertificateExpired,
    CertificateNotYetValid,
    CertificateSelfSigned,
    CertificateRejected,
    CertificateUntrusted,
    InvalidCertificatePurpose,
    CertificatePathLengthExceeded,
    InvalidCertificateSignature,
    InvalidCa,
    InvalidServerIdentity,
    Revoked,
    RevocationCheckFailed,
}

/// How the controller should react to a [`ClientErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Transient; retried with backoff once a session has been established.
    Ordinary(&'static str),
    /// The server's certificate was refused; the user may trust it permanently.
    Certificate(&'static str),
    /// Always ends in a sign-out, whatever the session age.
    Fatal(&'static str),
}

impl Failure {
    pub fn message(self) -> &'static str {
        match self {
            Failure::Ordinary(m) | Failure::Certificate(m) | Failure::Fatal(m) => m,
        }
    }
}

impl ClientErrorKind {
    pub fn failure(self) -> Failure {
        use ClientErrorKind::*;
        use Failure::*;
        match self {
            Unknown => Ordinary("Unknown Error"),
            DomainNameResolve => Ordinary("Unable to find server"),
            Connection => Ordinary("Error connecting to server"),
            ConnectionRead => Ordinary("Error while receiving server data"),
            ConnectionWrite => Ordinary("Error while sending data to the server"),
            Xml => Ordinary("Error parsing server data"),
            AuthenticationFailed => Ordinary("Login/password invalid"),
            CompressionFailed => Ordinary("Error while compressing stream"),
            ServerVerificationFailed => Ordinary("Server verification failed"),
            NoSupportedAuthMechanisms => Ordinary("Authentication mechanisms not supported"),
            UnexpectedElement => Ordinary("Unexpected response"),
            ResourceBind => Ordinary("Error binding resource"),
            SessionStart => Ordinary("Error starting session"),
            Stream => Ordinary("Stream error"),
            Tls => Ordinary("Encryption error"),
            ClientCertificateLoad => Ordinary("Error loading certificate (Invalid password?)"),
            ClientCertificate => Ordinary("Certificate not authorized"),
            CertificateCardRemoved => Fatal("Certificate card removed"),

            UnknownCertificate => Certificate("Unknown certificate"),
            CertificateExpired => Certificate("Certificate has expired"),
            CertificateNotYetValid => Certificate("Certificate is not yet valid"),
            CertificateSelfSigned => Certificate("Certificate is self-signed"),
            CertificateRejected => Certificate("Certificate has been rejected"),
            CertificateUntrusted => Certificate("Certificate is not trusted"),
            InvalidCertificatePurpose => {
                Certificate("Certificate cannot be used for encrypting your connection")
            }
            CertificatePathLengthExceeded => {
                Certificate("Certificate path length constraint exceeded")
            }
            InvalidCertificateSignature => Certificate("Invalid certificate signature"),
            InvalidCa => Certificate("Invalid Certificate Authority"),
            InvalidServerIdentity => Certificate("Certificate does not match the host identity"),
            Revoked => Certificate("Certificate has been revoked"),
            RevocationCheckFailed => Certificate("Unable to determine certificate revocation state"),
        }
    }

    pub fn is_certificate_error(self) -> bool {
        matches!(self.failure(), Failure::Certificate(_))
    }

    /// Classify a rustls handshake failure.
    pub fn from_tls(err: &rustls::Error) -> Self {
        match err {
            rustls::Error::InvalidCertificate(cert) => match cert {
                CertificateError::Expired => ClientErrorKind::CertificateExpired,
                CertificateError::NotValidYet => ClientErrorKind::CertificateNotYetValid,
                CertificateError::UnknownIssuer => ClientErrorKind::CertificateUntrusted,
                CertificateError::BadSignature => ClientErrorKind::InvalidCertificateSignature,
                CertificateError::Revoked => ClientErrorKind::Revoked,
                CertificateError::UnknownRevocationStatus => ClientErrorKind::RevocationCheckFailed,
                CertificateError::NotValidForName => ClientErrorKind::InvalidServerIdentity,
                CertificateError::InvalidPurpose => ClientErrorKind::InvalidCertificatePurpose,
                CertificateError::ApplicationVerificationFailure => {
                    ClientErrorKind::CertificateRejected
                }
                _ => ClientErrorKind::UnknownCertificate,
            },
            _ => ClientErrorKind::Tls,
        }
    }
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.failure().message())
    }
}

/// A classified disconnect cause plus the engine's low-level code, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub code: Option<String>,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind) -> Self {
        Self { kind, code: None }
    }

    pub fn with_code(kind: ClientErrorKind, code: impl Into<String>) -> Self {
        Self {
            kind,
            code: Some(code.into()),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<ClientErrorKind> for ClientError {
    fn from(kind: ClientErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}
