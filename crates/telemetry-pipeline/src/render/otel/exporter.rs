//! Per-pipeline OTLP exporters
//!
//! Exporter bodies only reference environment variables; the values
//! themselves come from [`crate::render::env::otlp_env`].

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::crd::{OtlpOutput, OtlpProtocol};
use crate::render::env;
use crate::secrets::ResolvedSecrets;
use crate::Error;

/// Total sending queue capacity shared by all pipelines of a gateway
pub const MAX_QUEUE_SIZE: usize = 256;

/// Exporter id for a pipeline (`otlp/<name>` or `otlphttp/<name>`)
pub fn exporter_id(pipeline: &str, protocol: OtlpProtocol) -> String {
    match protocol {
        OtlpProtocol::Grpc => format!("otlp/{}", pipeline),
        OtlpProtocol::Http => format!("otlphttp/{}", pipeline),
    }
}

/// Exporter body plus the environment it consumes
pub struct RenderedExporter {
    /// Component id
    pub id: String,
    /// Component body
    pub body: Value,
    /// Environment bindings referenced by the body
    pub env: BTreeMap<String, String>,
}

/// Build the exporter of one pipeline.
///
/// `pipeline_count` splits the shared queue capacity evenly.
pub fn otlp_exporter(
    pipeline: &str,
    output: &OtlpOutput,
    secrets: &ResolvedSecrets,
    pipeline_count: usize,
) -> Result<RenderedExporter, Error> {
    let env = env::otlp_env(pipeline, output, secrets)?;

    let mut headers = Map::new();
    if env.contains_key(&env::basic_auth_var(pipeline)) {
        headers.insert(
            "Authorization".to_string(),
            Value::String(env::reference(&env::basic_auth_var(pipeline))),
        );
    }
    for header in &output.headers {
        headers.insert(
            header.name.clone(),
            Value::String(env::reference(&env::header_var(pipeline, &header.name))),
        );
    }

    let mut tls = Map::new();
    let (insecure, skip_verify) = output
        .tls
        .as_ref()
        .map_or((false, false), |t| (t.insecure, t.insecure_skip_verify));
    tls.insert("insecure".to_string(), Value::Bool(insecure));
    if skip_verify {
        tls.insert("insecure_skip_verify".to_string(), Value::Bool(true));
    }
    if env.contains_key(&env::tls_ca_var(pipeline)) {
        tls.insert(
            "ca_pem".to_string(),
            Value::String(env::reference(&env::tls_ca_var(pipeline))),
        );
    }
    if env.contains_key(&env::tls_cert_var(pipeline)) {
        tls.insert(
            "cert_pem".to_string(),
            Value::String(env::reference(&env::tls_cert_var(pipeline))),
        );
        tls.insert(
            "key_pem".to_string(),
            Value::String(env::reference(&env::tls_key_var(pipeline))),
        );
    }

    let mut body = json!({
        "endpoint": env::reference(&env::endpoint_var(pipeline)),
        "tls": tls,
        "sending_queue": {
            "enabled": true,
            "queue_size": MAX_QUEUE_SIZE / pipeline_count.max(1),
        },
        "retry_on_failure": {
            "enabled": true,
            "initial_interval": "5s",
            "max_interval": "30s",
            "max_elapsed_time": "300s",
        },
    });
    if !headers.is_empty() {
        body["headers"] = Value::Object(headers);
    }

    Ok(RenderedExporter {
        id: exporter_id(pipeline, output.protocol),
        body,
        env,
    })
}

/// Exporter forwarding agent data to a gateway's in-cluster OTLP service
pub fn internal_exporter(service: &str, namespace: &str, port: i32) -> Value {
    json!({
        "endpoint": format!("{}.{}.svc.cluster.local:{}", service, namespace, port),
        "tls": { "insecure": true },
        "sending_queue": { "enabled": true, "queue_size": 512 },
        "retry_on_failure": {
            "enabled": true,
            "initial_interval": "5s",
            "max_interval": "30s",
            "max_elapsed_time": "300s",
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Header, OtlpTls, ValueType};

    #[test]
    fn grpc_exporter_references_endpoint_env() {
        let output = OtlpOutput::new(OtlpProtocol::Grpc, "https://backend:4317");
        let exporter = otlp_exporter("tracing", &output, &ResolvedSecrets::new(), 2).unwrap();
        assert_eq!(exporter.id, "otlp/tracing");
        assert_eq!(exporter.body["endpoint"], "${OTLP_ENDPOINT_TRACING}");
        assert_eq!(exporter.body["sending_queue"]["queue_size"], 128);
        assert_eq!(exporter.body["tls"]["insecure"], false);
        assert!(exporter.body.get("headers").is_none());
    }

    #[test]
    fn http_exporter_carries_headers_and_tls_refs() {
        let mut output = OtlpOutput::new(OtlpProtocol::Http, "https://backend:4318");
        output.headers.push(Header {
            name: "x-token".to_string(),
            prefix: None,
            value: ValueType::inline("abc"),
        });
        output.tls = Some(OtlpTls {
            insecure_skip_verify: true,
            cert: Some(ValueType::inline("cert")),
            key: Some(ValueType::inline("key")),
            ..Default::default()
        });
        let exporter = otlp_exporter("my-backend", &output, &ResolvedSecrets::new(), 1).unwrap();
        assert_eq!(exporter.id, "otlphttp/my-backend");
        assert_eq!(
            exporter.body["headers"]["x-token"],
            "${HEADER_MY_BACKEND_X_TOKEN}"
        );
        assert_eq!(exporter.body["tls"]["insecure_skip_verify"], true);
        assert_eq!(
            exporter.body["tls"]["cert_pem"],
            "${OTLP_TLS_CERT_PEM_MY_BACKEND}"
        );
        assert!(exporter.body["tls"].get("ca_pem").is_none());
        assert_eq!(exporter.env["HEADER_MY_BACKEND_X_TOKEN"], "abc");
    }
}
