//! Certificate bootstrap for capstan clusters
//!
//! Generates the per-cluster certificate authority and the admin client
//! certificate that authenticates against the Kubernetes API as
//! `system:masters`. Everything is exchanged as PEM strings; the provisioner
//! attaches them to the config snapshot before any step runs.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use std::time::{Duration, SystemTime};
use thiserror::Error;

const CA_COMMON_NAME: &str = "kubernetes-ca";
const PARENT_COMMON_NAME: &str = "kubernetes-parent-ca";
const ADMIN_COMMON_NAME: &str = "admin";
const ADMIN_ORGANIZATION: &str = "system:masters";

const CA_VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
const LEAF_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Error type for certificate generation
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// A certificate and its private key, both PEM-encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPair {
    pub cert: String,
    pub key: String,
}

fn ca_params(common_name: &str, validity: Duration) -> Result<CertificateParams> {
    let mut params = CertificateParams::new(Vec::new())?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

    let not_before = SystemTime::now();
    params.not_before = not_before.into();
    params.not_after = (not_before + validity).into();

    Ok(params)
}

/// Generate a cluster CA pair.
///
/// With `parent` given, the CA is signed by it; otherwise it is self-signed.
/// Signing works from the parent's key alone: the parent certificate is
/// reconstructed from its key pair, so only stable parameters go into it.
pub fn new_ca_pair(parent: Option<&CertPair>) -> Result<CertPair> {
    let key = KeyPair::generate()?;
    let params = ca_params(CA_COMMON_NAME, CA_VALIDITY)?;

    let cert = match parent {
        None => params.self_signed(&key)?,
        Some(parent) => {
            let parent_key = KeyPair::from_pem(&parent.key)?;
            let parent_cert = ca_params(PARENT_COMMON_NAME, CA_VALIDITY)?.self_signed(&parent_key)?;
            params.signed_by(&key, &parent_cert, &parent_key)?
        }
    };

    Ok(CertPair {
        cert: cert.pem(),
        key: key.serialize_pem(),
    })
}

/// Generate the admin client pair signed by the cluster CA.
///
/// The subject is `CN=admin, O=system:masters`, which Kubernetes RBAC maps
/// to full cluster access.
pub fn new_admin_pair(ca: &CertPair) -> Result<CertPair> {
    let ca_key = KeyPair::from_pem(&ca.key)?;
    let ca_cert = ca_params(CA_COMMON_NAME, CA_VALIDITY)?.self_signed(&ca_key)?;

    let key = KeyPair::generate()?;
    let mut params = CertificateParams::new(Vec::new())?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, ADMIN_COMMON_NAME);
    params
        .distinguished_name
        .push(DnType::OrganizationName, ADMIN_ORGANIZATION);
    params
        .extended_key_usages
        .push(ExtendedKeyUsagePurpose::ClientAuth);

    let not_before = SystemTime::now();
    params.not_before = not_before.into();
    params.not_after = (not_before + LEAF_VALIDITY).into();

    let cert = params.signed_by(&key, &ca_cert, &ca_key)?;

    Ok(CertPair {
        cert: cert.pem(),
        key: key.serialize_pem(),
    })
}
