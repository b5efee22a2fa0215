//! Task certificate inspection.
//!
//! Tasks labelled `validate-certificate=true` ship a PEM certificate in the
//! `CERTIFICATE` environment variable. The executor refuses to launch with a
//! missing or expired certificate and schedules a kill ahead of expiry (see
//! `Executor::check_cert`).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::FromDer;

use crate::error::{Error, Result};

/// Environment variable carrying the PEM-encoded task certificate.
pub const CERTIFICATE_ENV_VAR: &str = "CERTIFICATE";

/// The subset of certificate data the executor acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCertificate {
    /// Instant after which the certificate is invalid.
    pub not_after: SystemTime,
    /// Subject, kept for log messages.
    pub subject: String,
}

/// Extracts and parses the task certificate from an environment variable set.
pub fn cert_from_env(vars: impl Iterator<Item = (String, String)>) -> Result<TaskCertificate> {
    for (name, value) in vars {
        if name == CERTIFICATE_ENV_VAR {
            return parse_certificate(value.as_bytes());
        }
    }
    Err(Error::Certificate("missing certificate".into()))
}

fn parse_certificate(pem_encoded: &[u8]) -> Result<TaskCertificate> {
    let (_, pem) = parse_x509_pem(pem_encoded)
        .map_err(|_| Error::Certificate("missing certificate data".into()))?;
    let (_, certificate) = x509_parser::certificate::X509Certificate::from_der(&pem.contents)
        .map_err(|err| Error::Certificate(format!("certificate is invalid: {err}")))?;

    let not_after = certificate.validity().not_after.timestamp();
    let not_after = if not_after >= 0 {
        UNIX_EPOCH + Duration::from_secs(not_after as u64)
    } else {
        UNIX_EPOCH
    };

    Ok(TaskCertificate {
        not_after,
        subject: certificate.subject().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pem_with_validity(not_after: SystemTime) -> String {
        let mut params = rcgen::CertificateParams::new(vec!["task.example.com".to_string()])
            .expect("certificate params");
        params.not_after = not_after.into();
        let key = rcgen::KeyPair::generate().expect("key pair");
        params.self_signed(&key).expect("self signed").pem()
    }

    #[test]
    fn extracts_certificate_from_environment() {
        let not_after = SystemTime::now() + Duration::from_secs(3600);
        let vars = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            (CERTIFICATE_ENV_VAR.to_string(), pem_with_validity(not_after)),
        ];

        let certificate = cert_from_env(vars.into_iter()).unwrap();
        let drift = certificate
            .not_after
            .duration_since(not_after - Duration::from_secs(2))
            .unwrap();
        // ASN.1 validity has second granularity.
        assert!(drift <= Duration::from_secs(4));
    }

    #[test]
    fn missing_variable_is_an_error() {
        let vars = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let err = cert_from_env(vars.into_iter()).unwrap_err();
        assert!(err.to_string().contains("missing certificate"));
    }

    #[test]
    fn garbage_payload_is_an_error() {
        let vars = vec![(CERTIFICATE_ENV_VAR.to_string(), "not a pem".to_string())];
        let err = cert_from_env(vars.into_iter()).unwrap_err();
        assert!(err.to_string().contains("certificate"));
    }
}
