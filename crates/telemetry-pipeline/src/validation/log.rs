//! Admission rules for LogPipeline and LogParser

use kube::ResourceExt;

use super::ottl::validate_transforms;
use super::otlp::{validate_otlp_output, validate_value};
use crate::conditions::MSG_UNSUPPORTED_LOKI_OUTPUT;
use crate::crd::{ApplicationInput, HttpOutput, LogMode, LogParser, LogPipeline, ValueType};
use crate::render::fluent_bit::Section;
use crate::{Error, Signal};

/// Filter plugins that would break the generated pipeline
const FORBIDDEN_FILTERS: [&str; 2] = ["kubernetes", "rewrite_tag"];

/// Admission check of a LogPipeline
pub fn validate_log_pipeline(pipeline: &LogPipeline) -> Result<(), Error> {
    let name = pipeline.name_any();
    validate_output(&name, pipeline)?;
    for (i, filter) in pipeline.spec.filters.iter().enumerate() {
        validate_custom_filter(&name, i, &filter.custom)?;
    }
    validate_input(&name, pipeline)?;
    validate_transforms_for_mode(&name, pipeline)?;
    validate_files_and_variables(&name, pipeline)
}

fn validate_transforms_for_mode(name: &str, pipeline: &LogPipeline) -> Result<(), Error> {
    let transforms = &pipeline.spec.transforms;
    if transforms.is_empty() {
        return Ok(());
    }
    if pipeline.spec.mode() != LogMode::Otel {
        return Err(Error::validation_for_field(
            name,
            "spec.transforms",
            "transforms are only supported with an OTLP output",
        ));
    }
    validate_transforms(Signal::Logs, transforms)
        .map_err(|e| Error::validation_for_field(name, "spec.transforms", e.to_string()))
}

fn validate_output(name: &str, pipeline: &LogPipeline) -> Result<(), Error> {
    let output = &pipeline.spec.output;
    match output.defined_count() {
        0 => {
            return Err(Error::validation_for_field(
                name,
                "spec.output",
                "no output plugin is defined, you must define one output plugin",
            ))
        }
        1 => {}
        _ => {
            return Err(Error::validation_for_field(
                name,
                "spec.output",
                "multiple output plugins are defined, you must define only one output plugin",
            ))
        }
    }

    if output.grafana_loki.is_some() {
        return Err(Error::validation_for_field(
            name,
            "spec.output.grafana-loki",
            MSG_UNSUPPORTED_LOKI_OUTPUT,
        ));
    }
    if let Some(http) = &output.http {
        validate_http_output(name, http)?;
    }
    if let Some(custom) = output.custom.as_deref().filter(|c| !c.trim().is_empty()) {
        validate_custom_output(name, custom)?;
    }
    if let Some(otlp) = &output.otlp {
        validate_otlp_output(name, "spec.output.otlp", otlp)?;
    }
    Ok(())
}

fn validate_http_output(name: &str, http: &HttpOutput) -> Result<(), Error> {
    if let Some(host) = http.host.inline_value() {
        if !is_valid_hostname(host) {
            return Err(Error::validation_for_field(
                name,
                "spec.output.http.host",
                format!("invalid hostname '{}'", host),
            ));
        }
    }
    if !http.uri.is_empty() && !http.uri.starts_with('/') {
        return Err(Error::validation_for_field(
            name,
            "spec.output.http.uri",
            "uri must start with /",
        ));
    }

    let slots: [(&str, &ValueType); 3] = [
        ("host", &http.host),
        ("user", &http.user),
        ("password", &http.password),
    ];
    for (slot, value) in slots {
        if value.has_value_and_ref() {
            return Err(Error::validation_for_field(
                name,
                format!("spec.output.http.{slot}"),
                format!(
                    "http output {} must have either a value or secret key reference",
                    slot
                ),
            ));
        }
        validate_value(name, &format!("spec.output.http.{slot}"), value)?;
    }
    if !http.host.is_defined() {
        return Err(Error::validation_for_field(
            name,
            "spec.output.http.host",
            "http output host must have either a value or secret key reference",
        ));
    }

    let tls = &http.tls;
    let cert = tls.cert.as_ref().is_some_and(ValueType::is_defined);
    let key = tls.key.as_ref().is_some_and(ValueType::is_defined);
    if cert != key {
        return Err(Error::validation_for_field(
            name,
            "spec.output.http.tls",
            super::otlp::MSG_CERT_KEY_PAIR,
        ));
    }
    Ok(())
}

fn validate_custom_output(name: &str, content: &str) -> Result<(), Error> {
    let field = "spec.output.custom";
    let section =
        Section::parse(content).map_err(|e| Error::validation_for_field(name, field, e))?;
    let plugin = section.get("name").ok_or_else(|| {
        Error::validation_for_field(name, field, "configuration section must have name attribute")
    })?;
    if section.contains("match") {
        return Err(Error::validation_for_field(
            name,
            field,
            format!(
                "output plugin '{}' contains match condition. Match conditions are forbidden",
                plugin
            ),
        ));
    }
    if section.contains("storage.total_limit_size") {
        return Err(Error::validation_for_field(
            name,
            field,
            format!(
                "output plugin '{}' contains forbidden configuration key 'storage.total_limit_size'",
                plugin
            ),
        ));
    }
    Ok(())
}

fn validate_custom_filter(name: &str, index: usize, content: &str) -> Result<(), Error> {
    if content.trim().is_empty() {
        return Ok(());
    }
    let field = format!("spec.filters[{index}].custom");
    let section = Section::parse(content)
        .map_err(|e| Error::validation_for_field(name, field.as_str(), e))?;
    let plugin = section.get("name").ok_or_else(|| {
        Error::validation_for_field(
            name,
            field.as_str(),
            "configuration section must have name attribute",
        )
    })?;
    if FORBIDDEN_FILTERS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(plugin))
    {
        return Err(Error::validation_for_field(
            name,
            field,
            format!("filter plugin '{}' is forbidden. ", plugin),
        ));
    }
    if section.contains("match") {
        return Err(Error::validation_for_field(
            name,
            field,
            format!(
                "filter plugin '{}' contains match condition. Match conditions are forbidden",
                plugin
            ),
        ));
    }
    Ok(())
}

fn validate_input(name: &str, pipeline: &LogPipeline) -> Result<(), Error> {
    let input = &pipeline.spec.input;
    if pipeline.spec.mode() == LogMode::FluentBit && input.otlp.is_some() {
        return Err(Error::validation_for_field(
            name,
            "spec.input.otlp",
            "invalid log pipeline definition: cannot use OTLP input for pipeline in FluentBit mode",
        ));
    }
    if let Some(otlp) = &input.otlp {
        if let Some(ns) = &otlp.namespaces {
            if !ns.include.is_empty() && !ns.exclude.is_empty() {
                return Err(Error::validation_for_field(
                    name,
                    "spec.input.otlp.namespaces",
                    "Can only define one namespace selector - either 'include' or 'exclude'",
                ));
            }
        }
    }
    match &input.application {
        Some(app) => validate_application(name, app),
        None => Ok(()),
    }
}

fn validate_application(name: &str, app: &ApplicationInput) -> Result<(), Error> {
    if !app.containers.include.is_empty() && !app.containers.exclude.is_empty() {
        return Err(Error::validation_for_field(
            name,
            "spec.input.application.containers",
            "invalid log pipeline definition: Cannot define both 'input.application.containers.include' and 'input.application.containers.exclude'",
        ));
    }
    let ns = &app.namespaces;
    let selectors = [!ns.include.is_empty(), !ns.exclude.is_empty(), ns.system]
        .into_iter()
        .filter(|set| *set)
        .count();
    if selectors > 1 {
        return Err(Error::validation_for_field(
            name,
            "spec.input.application.namespaces",
            "invalid log pipeline definition: Can only define one 'input.application.namespaces' selector - either 'include', 'exclude', or 'system'",
        ));
    }
    Ok(())
}

fn validate_files_and_variables(name: &str, pipeline: &LogPipeline) -> Result<(), Error> {
    let mut seen = std::collections::BTreeSet::new();
    for (i, file) in pipeline.spec.files.iter().enumerate() {
        if file.name.trim().is_empty() {
            return Err(Error::validation_for_field(
                name,
                format!("spec.files[{i}].name"),
                "file name must not be empty",
            ));
        }
        if !seen.insert(file.name.as_str()) {
            return Err(Error::validation_for_field(
                name,
                format!("spec.files[{i}].name"),
                format!("duplicate file name '{}'", file.name),
            ));
        }
    }
    for (i, var) in pipeline.spec.variables.iter().enumerate() {
        let field = format!("spec.variables[{i}]");
        if var.name.trim().is_empty() {
            return Err(Error::validation_for_field(
                name,
                field,
                "variable name must not be empty",
            ));
        }
        if !var
            .value_from
            .secret_key_ref
            .as_ref()
            .is_some_and(|r| r.is_complete())
        {
            return Err(Error::validation_for_field(
                name,
                field,
                "variable must reference a secret by name, namespace and key",
            ));
        }
    }
    Ok(())
}

/// Hostname as accepted by Fluent Bit: dot-separated alphanumeric labels,
/// inner hyphens allowed
pub fn is_valid_hostname(host: &str) -> bool {
    let host = host.trim();
    !host.is_empty()
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

/// Admission check of a LogParser
pub fn validate_log_parser(parser: &LogParser) -> Result<(), Error> {
    let name = parser.name_any();
    let field = "spec.parser";
    if parser.spec.parser.trim().is_empty() {
        return Err(Error::validation_for_field(
            name,
            field,
            "parser definition must not be empty",
        ));
    }
    let section = Section::parse(&parser.spec.parser)
        .map_err(|e| Error::validation_for_field(name.as_str(), field, e))?;
    if section.contains("name") {
        return Err(Error::validation_for_field(
            name,
            field,
            "parser definition must not contain a 'Name' attribute, the resource name is used",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        FileMount, InputNamespaces, LogFilter, LogInput, LogOtlpInput, LogOutput, LogParserSpec,
        LogPipelineSpec, LokiOutput, OtlpOutput, OtlpProtocol, TransformSpec,
    };
    use rstest::rstest;

    fn http_pipeline(host: &str) -> LogPipeline {
        LogPipeline::new(
            "backend",
            LogPipelineSpec {
                output: LogOutput {
                    http: Some(HttpOutput {
                        host: ValueType::inline(host),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
    }

    fn with_filter(mut pipeline: LogPipeline, custom: &str) -> LogPipeline {
        pipeline.spec.filters.push(LogFilter {
            custom: custom.to_string(),
        });
        pipeline
    }

    fn message(err: Error) -> String {
        match err {
            Error::Validation { message, .. } => message,
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    #[test]
    fn http_output_with_valid_host_is_accepted() {
        assert!(validate_log_pipeline(&http_pipeline("logs.example.com")).is_ok());
    }

    #[test]
    fn pipeline_without_output_is_rejected() {
        let pipeline = LogPipeline::new("empty", LogPipelineSpec::default());
        assert_eq!(
            message(validate_log_pipeline(&pipeline).unwrap_err()),
            "no output plugin is defined, you must define one output plugin"
        );
    }

    #[test]
    fn pipeline_with_two_outputs_is_rejected() {
        let mut pipeline = http_pipeline("logs.example.com");
        pipeline.spec.output.custom = Some("name stdout".to_string());
        assert_eq!(
            message(validate_log_pipeline(&pipeline).unwrap_err()),
            "multiple output plugins are defined, you must define only one output plugin"
        );
    }

    #[test]
    fn loki_output_is_rejected() {
        let pipeline = LogPipeline::new(
            "loki",
            LogPipelineSpec {
                output: LogOutput {
                    grafana_loki: Some(LokiOutput {
                        url: ValueType::inline("http://loki:3100"),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        assert_eq!(
            message(validate_log_pipeline(&pipeline).unwrap_err()),
            MSG_UNSUPPORTED_LOKI_OUTPUT
        );
    }

    #[rstest]
    #[case::space("logs example.com")]
    #[case::leading_hyphen("-logs.example.com")]
    #[case::scheme("http://logs.example.com")]
    fn invalid_hostnames_are_rejected(#[case] host: &str) {
        assert_eq!(
            message(validate_log_pipeline(&http_pipeline(host)).unwrap_err()),
            format!("invalid hostname '{}'", host)
        );
    }

    #[test]
    fn http_basic_auth_reference_needs_name_and_key() {
        let mut pipeline = http_pipeline("logs.example.com");
        if let Some(http) = pipeline.spec.output.http.as_mut() {
            http.user = ValueType::from_secret("", "default", "user");
        }
        assert!(validate_log_pipeline(&pipeline).is_err());
    }

    #[test]
    fn custom_output_must_not_set_storage_limit() {
        let mut pipeline = LogPipeline::new("custom", LogPipelineSpec::default());
        pipeline.spec.output.custom =
            Some("name http\nstorage.total_limit_size 10G".to_string());
        assert_eq!(
            message(validate_log_pipeline(&pipeline).unwrap_err()),
            "output plugin 'http' contains forbidden configuration key 'storage.total_limit_size'"
        );
    }

    #[test]
    fn otlp_output_runs_shared_otlp_rules() {
        let mut output = OtlpOutput::new(OtlpProtocol::Grpc, "http://collector:4317");
        output.path = Some("/v1/logs".to_string());
        let pipeline = LogPipeline::new(
            "otel",
            LogPipelineSpec {
                output: LogOutput {
                    otlp: Some(output),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        assert!(validate_log_pipeline(&pipeline).is_err());
    }

    // =========================================================================
    // Filters
    // =========================================================================

    #[rstest]
    #[case::kubernetes("Name kubernetes", "filter plugin 'kubernetes' is forbidden. ")]
    #[case::rewrite_tag("name Rewrite_Tag", "filter plugin 'Rewrite_Tag' is forbidden. ")]
    #[case::match_key(
        "name grep\nmatch *",
        "filter plugin 'grep' contains match condition. Match conditions are forbidden"
    )]
    #[case::no_name("regex log aa", "configuration section must have name attribute")]
    fn denylisted_filters_are_rejected(#[case] custom: &str, #[case] expected: &str) {
        let pipeline = with_filter(http_pipeline("logs.example.com"), custom);
        assert_eq!(message(validate_log_pipeline(&pipeline).unwrap_err()), expected);
    }

    #[test]
    fn ordinary_filter_is_accepted() {
        let pipeline = with_filter(http_pipeline("logs.example.com"), "name grep\nregex log aa");
        assert!(validate_log_pipeline(&pipeline).is_ok());
    }

    // =========================================================================
    // Inputs, files and variables
    // =========================================================================

    #[test]
    fn otlp_input_is_rejected_in_fluent_bit_mode() {
        let mut pipeline = http_pipeline("logs.example.com");
        pipeline.spec.input = LogInput {
            otlp: Some(LogOtlpInput::default()),
            ..Default::default()
        };
        assert!(validate_log_pipeline(&pipeline).is_err());
    }

    fn otel_pipeline(statement: &str) -> LogPipeline {
        LogPipeline::new(
            "otel",
            LogPipelineSpec {
                output: LogOutput {
                    otlp: Some(OtlpOutput::new(OtlpProtocol::Grpc, "http://collector:4317")),
                    ..Default::default()
                },
                transforms: vec![TransformSpec {
                    statements: vec![statement.to_string()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
    }

    #[test]
    fn transforms_need_an_otlp_output() {
        let mut pipeline = http_pipeline("logs.example.com");
        pipeline.spec.transforms = otel_pipeline(r#"set(log.severity_text, "INFO")"#).spec.transforms;
        assert!(message(validate_log_pipeline(&pipeline).unwrap_err())
            .contains("only supported with an OTLP output"));
    }

    #[rstest]
    #[case(r#"set(log.attributes["processed"], "true") where log.severity_text == "ERROR""#, None)]
    #[case(r#"set(log.invalid, "x")"#, Some("log has no field invalid"))]
    #[case(r#"set(span.name, "x")"#, Some("context span is not supported"))]
    fn otel_transforms_are_parsed(#[case] statement: &str, #[case] problem: Option<&str>) {
        let result = validate_log_pipeline(&otel_pipeline(statement));
        match problem {
            None => assert!(result.is_ok(), "{result:?}"),
            Some(problem) => assert!(message(result.unwrap_err()).contains(problem)),
        }
    }

    #[test]
    fn namespace_selectors_are_exclusive() {
        let mut pipeline = http_pipeline("logs.example.com");
        pipeline.spec.input.application = Some(ApplicationInput {
            namespaces: InputNamespaces {
                include: vec!["app".to_string()],
                system: true,
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(message(validate_log_pipeline(&pipeline).unwrap_err())
            .contains("Can only define one 'input.application.namespaces' selector"));
    }

    #[test]
    fn duplicate_file_names_are_rejected() {
        let mut pipeline = http_pipeline("logs.example.com");
        let file = FileMount {
            name: "script.lua".to_string(),
            content: "-- noop".to_string(),
        };
        pipeline.spec.files = vec![file.clone(), file];
        assert!(validate_log_pipeline(&pipeline).is_err());
    }

    // =========================================================================
    // Parsers
    // =========================================================================

    #[test]
    fn parser_must_not_name_itself() {
        let parser = LogParser::new(
            "my-regex",
            LogParserSpec {
                parser: "Name my-regex\nFormat regex\nRegex ^(?<log>.*)$".to_string(),
            },
        );
        assert!(validate_log_parser(&parser).is_err());

        let parser = LogParser::new(
            "my-regex",
            LogParserSpec {
                parser: "Format regex\nRegex ^(?<log>.*)$".to_string(),
            },
        );
        assert!(validate_log_parser(&parser).is_ok());
    }
}
