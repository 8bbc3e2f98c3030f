//! Self-signed serving certificate of the admission webhook
//!
//! A fresh CA is generated at every start; its certificate becomes the
//! `caBundle` of the ValidatingWebhookConfiguration, so nothing has to be
//! persisted.

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;

/// Validity of the CA and serving certificates
const VALIDITY_DAYS: i64 = 365;

/// Certificate generation errors
#[derive(Debug, Error)]
pub enum CertError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Building or signing a certificate failed
    #[error("certificate generation failed: {0}")]
    Generation(String),
}

/// PEM material served by the webhook
#[derive(Clone, Debug)]
pub struct WebhookCerts {
    /// CA certificate, published as the webhook's CA bundle
    pub ca_cert_pem: String,
    /// Serving certificate
    pub cert_pem: String,
    /// Serving key
    pub key_pem: String,
}

/// DNS names a Service is reachable under from the API server
pub fn service_dns_names(service: &str, namespace: &str) -> Vec<String> {
    vec![
        service.to_string(),
        format!("{}.{}", service, namespace),
        format!("{}.{}.svc", service, namespace),
        format!("{}.{}.svc.cluster.local", service, namespace),
    ]
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String("kyma-project.io".to_string()),
    );
    dn
}

fn set_validity(params: &mut CertificateParams) {
    let now = ::time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + ::time::Duration::days(VALIDITY_DAYS);
}

/// Generate a CA and a serving certificate for `service.namespace.svc`
pub fn generate(service: &str, namespace: &str) -> Result<WebhookCerts, CertError> {
    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name = distinguished_name("telemetry-manager-webhook-ca");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    set_validity(&mut ca_params);

    let ca_key = KeyPair::generate().map_err(|e| CertError::KeyGeneration(e.to_string()))?;
    let ca_cert = ca_params
        .self_signed(&ca_key)
        .map_err(|e| CertError::Generation(format!("CA: {}", e)))?;
    let ca_cert_pem = ca_cert.pem();

    let dns_names = service_dns_names(service, namespace);
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&dns_names[2]);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    set_validity(&mut params);
    params.subject_alt_names = dns_names
        .iter()
        .map(|name| {
            Ia5String::try_from(name.clone())
                .map(SanType::DnsName)
                .map_err(|e| CertError::Generation(format!("invalid DNS name '{}': {}", name, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let key = KeyPair::generate().map_err(|e| CertError::KeyGeneration(e.to_string()))?;
    let issuer = Issuer::from_ca_cert_pem(&ca_cert_pem, &ca_key)
        .map_err(|e| CertError::Generation(format!("issuer: {}", e)))?;
    let cert = params
        .signed_by(&key, &issuer)
        .map_err(|e| CertError::Generation(format!("serving certificate: {}", e)))?;

    Ok(WebhookCerts {
        ca_cert_pem,
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    fn parse(pem_data: &str) -> Vec<u8> {
        ::pem::parse(pem_data.as_bytes()).unwrap().contents().to_vec()
    }

    #[test]
    fn serving_cert_covers_service_names() {
        let certs = generate("telemetry-manager-webhook", "kyma-system").unwrap();
        let der = parse(&certs.cert_pem);
        let (_, cert) = X509Certificate::from_der(&der).unwrap();

        let sans: Vec<String> = cert
            .subject_alternative_name()
            .unwrap()
            .unwrap()
            .value
            .general_names
            .iter()
            .filter_map(|n| match n {
                GeneralName::DNSName(d) => Some(d.to_string()),
                _ => None,
            })
            .collect();
        assert!(sans.contains(&"telemetry-manager-webhook.kyma-system.svc".to_string()));
        assert_eq!(sans.len(), 4);
        assert!(!cert.is_ca());
    }

    #[test]
    fn ca_is_a_ca_and_issues_the_serving_cert() {
        let certs = generate("svc", "ns").unwrap();
        let ca_der = parse(&certs.ca_cert_pem);
        let (_, ca) = X509Certificate::from_der(&ca_der).unwrap();
        let leaf_der = parse(&certs.cert_pem);
        let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();

        assert!(ca.is_ca());
        assert_eq!(leaf.issuer(), ca.subject());
        assert!(certs.key_pem.contains("PRIVATE KEY"));
    }
}
