//! CA bundle merging
//!
//! When a proxy configmap is updated the trust anchors of the old and new
//! versions are combined, so a backing service that rotates its serving
//! certificate keeps working while either CA is in use. Expired
//! certificates are dropped and duplicates are recognised by their DER
//! bytes.

use std::collections::HashSet;

use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{Error, Result};

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Parse the certificates of a PEM bundle, ignoring non-certificate blocks
pub fn certificates(bundle: &[u8]) -> Result<Vec<Vec<u8>>> {
    let blocks = ::pem::parse_many(bundle)
        .map_err(|e| Error::Certificate(format!("failed to parse PEM: {}", e)))?;
    Ok(blocks
        .into_iter()
        .filter(|b| b.tag() == CERTIFICATE_TAG)
        .map(|b| b.into_contents())
        .collect())
}

fn not_after(der: &[u8]) -> Result<i64> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::Certificate(format!("failed to parse certificate: {}", e)))?;
    Ok(cert.validity().not_after.timestamp())
}

/// Union of the non-expired certificates of `previous` and `current` at
/// unix time `now`
///
/// Certificates of `current` come first; a certificate present in both
/// bundles appears once.
pub fn merge_at(previous: &[u8], current: &[u8], now: i64) -> Result<Vec<u8>> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for der in certificates(current)?.into_iter().chain(certificates(previous)?) {
        if not_after(&der)? < now {
            continue;
        }
        if seen.insert(der.clone()) {
            merged.push(::pem::Pem::new(CERTIFICATE_TAG, der));
        }
    }

    Ok(::pem::encode_many(&merged).into_bytes())
}

/// Union of the non-expired certificates of two PEM bundles
pub fn merge(previous: &[u8], current: &[u8]) -> Result<Vec<u8>> {
    merge_at(previous, current, ::time::OffsetDateTime::now_utc().unix_timestamp())
}

/// Drop expired certificates from a single bundle
pub fn prune(bundle: &[u8]) -> Result<Vec<u8>> {
    merge(&[], bundle)
}
