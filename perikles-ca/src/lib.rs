//! Process-local certificate authority.
//!
//! Mints a self-signed organization CA once per process and signs leaf
//! certificates for arbitrary DNS SAN sets on demand. Key material never
//! leaves the process except through the PEM accessors.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use time::{Duration, OffsetDateTime};

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("certificate generation failed: {0}")]
    Rcgen(#[from] rcgen::Error),
    #[error("invalid DNS name in SAN list: {0}")]
    InvalidDnsName(String),
    #[error("no DNS names supplied for leaf certificate")]
    EmptySanSet,
}

/// A minted leaf certificate and its private key, both PEM-encoded.
#[derive(Debug, Clone)]
pub struct LeafCert {
    pub cert_pem: String,
    pub key_pem: String,
}

/// The process's certificate authority: one self-signed CA keypair,
/// constructed once via [`Authority::bootstrap`] and reused for every
/// [`Authority::issue_leaf`] call.
pub struct Authority {
    org: String,
    ca_cert: Certificate,
    ca_key: KeyPair,
}

fn not_before() -> OffsetDateTime {
    OffsetDateTime::now_utc() - Duration::minutes(5)
}

fn not_after(validity_days: i64) -> OffsetDateTime {
    OffsetDateTime::now_utc() + Duration::days(validity_days)
}

impl Authority {
    /// Generates a fresh self-signed organization CA, valid for
    /// `validity_days`. Idempotent in the sense that callers are expected to
    /// construct exactly one `Authority` per process and share it (e.g. via
    /// `Arc`); calling this twice simply produces two independent CAs.
    pub fn bootstrap(org: &str, validity_days: i64) -> Result<Self, CaError> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, org);
        dn.push(DnType::CommonName, format!("{org} root CA"));
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.not_before = not_before();
        params.not_after = not_after(validity_days);

        let ca_key = KeyPair::generate()?;
        let ca_cert = params.self_signed(&ca_key)?;

        tracing::info!(org, validity_days, "certificate authority bootstrapped");

        Ok(Self {
            org: org.to_string(),
            ca_cert,
            ca_key,
        })
    }

    /// Issues a leaf keypair signed by this CA. The SAN list on the
    /// resulting certificate contains every entry of `dns_names`, verbatim
    /// and in order.
    pub fn issue_leaf(&self, dns_names: &[String], validity_days: i64) -> Result<LeafCert, CaError> {
        if dns_names.is_empty() {
            return Err(CaError::EmptySanSet);
        }

        let mut params = CertificateParams::new(dns_names.to_vec())
            .map_err(|_| CaError::InvalidDnsName(dns_names.join(",")))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, self.org.as_str());
        dn.push(DnType::CommonName, dns_names[0].as_str());
        params.distinguished_name = dn;
        params.not_before = not_before();
        params.not_after = not_after(validity_days);
        params.subject_alt_names = dns_names
            .iter()
            .map(|name| SanType::DnsName(name.clone().try_into().unwrap()))
            .collect();

        let leaf_key = KeyPair::generate()?;
        let leaf_cert = params.signed_by(&leaf_key, &self.ca_cert, &self.ca_key)?;

        Ok(LeafCert {
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key.serialize_pem(),
        })
    }

    /// Returns the CA certificate, PEM-encoded, suitable for embedding in a
    /// `tls.pem`-style secret key or a client trust bundle.
    pub fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_produces_pem_ca() {
        let authority = Authority::bootstrap("odysseia", 3650).unwrap();
        let pem = authority.ca_pem();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn issue_leaf_includes_every_san_verbatim() {
        let authority = Authority::bootstrap("odysseia", 3650).unwrap();
        let sans = vec![
            "perikles".to_string(),
            "perikles.odysseia".to_string(),
            "perikles.odysseia.svc".to_string(),
            "perikles.odysseia.svc.cluster.local".to_string(),
        ];
        let leaf = authority.issue_leaf(&sans, 10).unwrap();
        assert!(leaf.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(leaf.key_pem.contains("PRIVATE KEY"));

        let (_, pem) = x509_parser::pem::parse_x509_pem(leaf.cert_pem.as_bytes()).unwrap();
        let (_, x509) = x509_parser::parse_x509_certificate(&pem.contents).unwrap();
        let san_ext = x509
            .subject_alternative_name()
            .unwrap()
            .expect("SAN extension present");
        let names: Vec<String> = san_ext
            .value
            .general_names
            .iter()
            .filter_map(|gn| match gn {
                x509_parser::extensions::GeneralName::DNSName(d) => Some(d.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(names, sans);
    }

    #[test]
    fn issue_leaf_rejects_empty_san_set() {
        let authority = Authority::bootstrap("odysseia", 3650).unwrap();
        let err = authority.issue_leaf(&[], 10).unwrap_err();
        assert!(matches!(err, CaError::EmptySanSet));
    }
}
