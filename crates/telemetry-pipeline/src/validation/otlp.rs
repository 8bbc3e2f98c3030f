//! Admission checks shared by every OTLP output

use crate::crd::{OtlpOutput, OtlpProtocol, ValueType};
use crate::Error;

/// Rejection message for a half-configured client certificate
pub const MSG_CERT_KEY_PAIR: &str = "Can define either both 'cert' and 'key', or neither";

/// Check one value slot: inline and secret reference are exclusive, and a
/// secret reference must name secret, namespace and key.
pub fn validate_value(pipeline: &str, field: &str, value: &ValueType) -> Result<(), Error> {
    if value.has_value_and_ref() {
        return Err(Error::validation_for_field(
            pipeline,
            field,
            "Only one of 'value' or 'valueFrom' can be set",
        ));
    }
    if let Some(from) = &value.value_from {
        match &from.secret_key_ref {
            Some(r) if r.is_complete() => {}
            Some(_) => {
                return Err(Error::validation_for_field(
                    pipeline,
                    field,
                    "secret key reference must define name, namespace and key",
                ))
            }
            None => {
                return Err(Error::validation_for_field(
                    pipeline,
                    field,
                    "valueFrom must define a secretKeyRef",
                ))
            }
        }
    }
    Ok(())
}

/// Admission rules of an OTLP output rooted at `prefix` (e.g. `spec.output.otlp`)
pub fn validate_otlp_output(pipeline: &str, prefix: &str, output: &OtlpOutput) -> Result<(), Error> {
    if !output.endpoint.is_defined() {
        return Err(Error::validation_for_field(
            pipeline,
            format!("{prefix}.endpoint"),
            "endpoint must have either a value or a secret key reference",
        ));
    }
    validate_value(pipeline, &format!("{prefix}.endpoint"), &output.endpoint)?;

    if output.protocol == OtlpProtocol::Grpc && output.path().is_some() {
        return Err(Error::validation_for_field(
            pipeline,
            format!("{prefix}.path"),
            "Path is only available with HTTP protocol",
        ));
    }

    if let Some(basic) = output.basic_auth() {
        let field = format!("{prefix}.authentication.basic");
        if !basic.user.is_defined() || !basic.password.is_defined() {
            return Err(Error::validation_for_field(
                pipeline,
                field,
                "basic authentication requires both user and password",
            ));
        }
        validate_value(pipeline, &format!("{field}.user"), &basic.user)?;
        validate_value(pipeline, &format!("{field}.password"), &basic.password)?;
    }

    for (i, header) in output.headers.iter().enumerate() {
        let field = format!("{prefix}.headers[{i}]");
        if header.name.trim().is_empty() {
            return Err(Error::validation_for_field(
                pipeline,
                field,
                "header name must not be empty",
            ));
        }
        validate_value(pipeline, &field, &header.value)?;
    }

    if let Some(tls) = &output.tls {
        let field = format!("{prefix}.tls");
        let cert = tls.cert.as_ref().is_some_and(ValueType::is_defined);
        let key = tls.key.as_ref().is_some_and(ValueType::is_defined);
        if cert != key {
            return Err(Error::validation_for_field(pipeline, field, MSG_CERT_KEY_PAIR));
        }
        for (name, value) in [("ca", &tls.ca), ("cert", &tls.cert), ("key", &tls.key)] {
            if let Some(value) = value {
                validate_value(pipeline, &format!("{field}.{name}"), value)?;
            }
        }
    }
    Ok(())
}
