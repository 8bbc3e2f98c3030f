//! Environment bindings consumed by OTLP exporters
//!
//! Every secret-derived value of an exporter is exposed as an environment
//! variable named `<PREFIX>_<PIPELINE>` (headers add `_<HEADER>`), and the
//! rendered configuration refers to it as `${NAME}`.

use std::collections::BTreeMap;

use base64::prelude::*;

use crate::crd::OtlpOutput;
use crate::secrets::ResolvedSecrets;
use crate::Error;

/// Prefix of the endpoint variable
pub const OTLP_ENDPOINT_PREFIX: &str = "OTLP_ENDPOINT";
/// Prefix of the basic auth header variable
pub const BASIC_AUTH_HEADER_PREFIX: &str = "BASIC_AUTH_HEADER";
/// Prefix of custom header variables
pub const HEADER_PREFIX: &str = "HEADER";
/// Prefix of the client certificate variable
pub const TLS_CERT_PREFIX: &str = "OTLP_TLS_CERT_PEM";
/// Prefix of the client key variable
pub const TLS_KEY_PREFIX: &str = "OTLP_TLS_KEY_PEM";
/// Prefix of the CA variable
pub const TLS_CA_PREFIX: &str = "OTLP_TLS_CA_PEM";

/// Make `name` usable as part of an environment variable name
pub fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_uppercase()
}

fn var(prefix: &str, pipeline: &str) -> String {
    format!("{}_{}", prefix, normalize(pipeline))
}

/// `OTLP_ENDPOINT_<PIPELINE>`
pub fn endpoint_var(pipeline: &str) -> String {
    var(OTLP_ENDPOINT_PREFIX, pipeline)
}

/// `BASIC_AUTH_HEADER_<PIPELINE>`
pub fn basic_auth_var(pipeline: &str) -> String {
    var(BASIC_AUTH_HEADER_PREFIX, pipeline)
}

/// `HEADER_<PIPELINE>_<HEADER>`
pub fn header_var(pipeline: &str, header: &str) -> String {
    format!("{}_{}_{}", HEADER_PREFIX, normalize(pipeline), normalize(header))
}

/// `OTLP_TLS_CERT_PEM_<PIPELINE>`
pub fn tls_cert_var(pipeline: &str) -> String {
    var(TLS_CERT_PREFIX, pipeline)
}

/// `OTLP_TLS_KEY_PEM_<PIPELINE>`
pub fn tls_key_var(pipeline: &str) -> String {
    var(TLS_KEY_PREFIX, pipeline)
}

/// `OTLP_TLS_CA_PEM_<PIPELINE>`
pub fn tls_ca_var(pipeline: &str) -> String {
    var(TLS_CA_PREFIX, pipeline)
}

/// Config reference to an environment variable
pub fn reference(name: &str) -> String {
    format!("${{{}}}", name)
}

/// `endpoint` with `path` appended, joined by exactly one slash
pub fn join_path(endpoint: &str, path: Option<&str>) -> String {
    match path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(path) => format!(
            "{}/{}",
            endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
        None => endpoint.to_string(),
    }
}

/// Replace escaped newlines in PEM text
pub fn sanitize_pem(value: &str) -> String {
    value.replace("\\n", "\n")
}

/// `Basic base64(user:password)`
pub fn basic_auth_header(user: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64_STANDARD.encode(format!("{}:{}", user, password))
    )
}

/// Environment entries of one pipeline's OTLP exporter
pub fn otlp_env(
    pipeline: &str,
    output: &OtlpOutput,
    secrets: &ResolvedSecrets,
) -> Result<BTreeMap<String, String>, Error> {
    let mut env = BTreeMap::new();

    if let Some(basic) = output.basic_auth() {
        if basic.user.is_defined() && basic.password.is_defined() {
            let user = secrets.value(&basic.user)?;
            let password = secrets.value(&basic.password)?;
            env.insert(basic_auth_var(pipeline), basic_auth_header(&user, &password));
        }
    }

    let endpoint = secrets.value(&output.endpoint)?;
    env.insert(endpoint_var(pipeline), join_path(&endpoint, output.path()));

    for header in &output.headers {
        let value = secrets.value(&header.value)?;
        let value = match header.prefix.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{} {}", prefix, value),
            None => value,
        };
        env.insert(header_var(pipeline, &header.name), value);
    }

    if let Some(tls) = &output.tls {
        if let Some(ca) = tls.ca.as_ref().filter(|v| v.is_defined()) {
            env.insert(tls_ca_var(pipeline), secrets.value(ca)?);
        }
        let cert = tls.cert.as_ref().filter(|v| v.is_defined());
        let key = tls.key.as_ref().filter(|v| v.is_defined());
        if let (Some(cert), Some(key)) = (cert, key) {
            env.insert(tls_cert_var(pipeline), sanitize_pem(&secrets.value(cert)?));
            env.insert(tls_key_var(pipeline), sanitize_pem(&secrets.value(key)?));
        }
    }

    Ok(env)
}
