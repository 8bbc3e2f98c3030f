//! Fluent Bit configuration for LogPipelines in FluentBit mode
//!
//! Every admitted pipeline contributes one tail input, a fixed filter chain
//! around its custom filters, and one output, all tagged `<pipeline>.*` so
//! records never cross pipelines. Secret-backed HTTP values become `${VAR}`
//! references resolved from the env Secret; TLS material is mounted as files.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::{ApplicationInput, HttpOutput, LogParser, LogPipeline, ValueType, SYSTEM_NAMESPACES};
use crate::render::env::{normalize, reference, sanitize_pem};
use crate::render::RenderedConfig;
use crate::secrets::ResolvedSecrets;
use crate::signal::{Signal, FLUENT_BIT_HTTP_PORT, FLUENT_BIT_NAME};
use crate::Error;

mod section;

pub use section::Section;

/// Directory the rendered ConfigMap is mounted at
pub const CONFIG_DIR: &str = "/fluent-bit/etc/conf";
/// Directory the TLS Secret is mounted at
pub const TLS_DIR: &str = "/fluent-bit/etc/output-tls-config";
/// Main configuration file
pub const MAIN_CONFIG: &str = "fluent-bit.conf";
/// Parsers generated from LogParser resources
pub const PARSERS_CONFIG: &str = "dynamic-parsers.conf";
/// Lua helpers referenced by the generated filters
pub const LUA_SCRIPT: &str = "filter-script.lua";
/// Host path of the tail input databases and filesystem buffers
pub const DATA_DIR: &str = "/data";

const CONTAINER_LOGS: &str = "/var/log/containers";
const RETRY_LIMIT: &str = "300";
const STORAGE_LIMIT: &str = "1G";
const DEFAULT_PORT: &str = "443";

const FILTER_SCRIPT: &str = r#"function enrich_app_name(tag, timestamp, record)
  if record.kubernetes == nil then
    return 0
  end
  enrich_app_name_internal(record.kubernetes)
  return 2, timestamp, record
end
function kubernetes_map_keys(tag, timestamp, record)
  if record.kubernetes == nil then
    return 0
  end
  map_keys(record.kubernetes.annotations)
  map_keys(record.kubernetes.labels)
  return 2, timestamp, record
end
function enrich_app_name_internal(table)
  if table.labels == nil then
    return 0
  end
  table["app_name"] = table.labels["app.kubernetes.io/name"] or table.labels["app"]
end
function map_keys(table)
  if table == nil then
    return
  end
  local new_table = {}
  local changed_keys = {}
  for key, val in pairs(table) do
    local mapped_key = string.gsub(key, "[%/%.]", "_")
    if mapped_key ~= key then
      new_table[mapped_key] = val
      changed_keys[key] = true
    end
  end
  for key in pairs(changed_keys) do
    table[key] = nil
  end
  for key, val in pairs(new_table) do
    table[key] = val
  end
end
"#;

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn service_section() -> Section {
    Section::new()
        .with("daemon", "off")
        .with("flush", "1")
        .with("log_level", "warn")
        .with("http_server", "on")
        .with("http_listen", "0.0.0.0")
        .with("http_port", FLUENT_BIT_HTTP_PORT.to_string())
        .with("parsers_file", format!("{}/{}", CONFIG_DIR, PARSERS_CONFIG))
        .with("storage.path", format!("{}/flb-storage/", DATA_DIR))
        .with("storage.metrics", "on")
}

fn container_log_path(namespace: &str, container: &str) -> String {
    format!("{}/*_{}_{}-*.log", CONTAINER_LOGS, namespace, container)
}

/// Comma-separated tail `path`
pub fn include_path(app: &ApplicationInput) -> String {
    let star = vec!["*".to_string()];
    let namespaces = if app.namespaces.include.is_empty() {
        &star
    } else {
        &app.namespaces.include
    };
    let containers = if app.containers.include.is_empty() {
        &star
    } else {
        &app.containers.include
    };
    namespaces
        .iter()
        .flat_map(|ns| containers.iter().map(move |c| container_log_path(ns, c)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Comma-separated tail `exclude_path`; Fluent Bit's own logs and the OTel
/// log agent's are always excluded
pub fn exclude_path(app: &ApplicationInput, namespace: &str) -> String {
    let mut paths = vec![format!(
        "{}/{}-*_{}_fluent-bit-*.log",
        CONTAINER_LOGS, FLUENT_BIT_NAME, namespace
    )];
    if let Some(agent) = Signal::Logs.agent_name() {
        paths.push(format!(
            "{}/{}-*_{}_collector-*.log",
            CONTAINER_LOGS, agent, namespace
        ));
    }

    let selector = &app.namespaces;
    if !selector.system && selector.include.is_empty() && selector.exclude.is_empty() {
        paths.extend(SYSTEM_NAMESPACES.iter().map(|ns| container_log_path(ns, "*")));
    }
    paths.extend(selector.exclude.iter().map(|ns| container_log_path(ns, "*")));
    paths.extend(app.containers.exclude.iter().map(|c| container_log_path("*", c)));
    paths.join(",")
}

fn input_section(name: &str, app: &ApplicationInput, namespace: &str) -> Section {
    Section::new()
        .with("name", "tail")
        .with("alias", name)
        .with("db", format!("{}/flb_{}.db", DATA_DIR, name))
        .with("exclude_path", exclude_path(app, namespace))
        .with("mem_buf_limit", "5MB")
        .with("multiline.parser", "cri")
        .with("path", include_path(app))
        .with("read_from_head", "true")
        .with("skip_long_lines", "on")
        .with("storage.type", "filesystem")
        .with("tag", format!("{}.*", name))
}

fn lua_filter(tag: &str, call: &str) -> Section {
    Section::new()
        .with("name", "lua")
        .with("match", tag)
        .with("call", call)
        .with("script", format!("{}/{}", CONFIG_DIR, LUA_SCRIPT))
}

fn custom_section(pipeline: &str, content: &str, tag: &str) -> Result<Section, Error> {
    let mut section = Section::parse(content).map_err(|e| {
        Error::render(
            Signal::Logs.data_type(),
            format!("pipeline {}: {}", pipeline, e),
        )
    })?;
    section.remove("match");
    section.push("match", tag);
    Ok(section)
}

/// Env variable carrying a secret-backed HTTP output value
pub fn secret_env_var(pipeline: &str, value: &ValueType) -> Option<String> {
    value.secret_key_ref().map(|r| {
        normalize(&format!("{}_{}_{}_{}", pipeline, r.namespace, r.name, r.key))
    })
}

/// Config text of a value: the inline value or a `${VAR}` reference
fn config_value(pipeline: &str, value: &ValueType) -> String {
    match (value.inline_value(), secret_env_var(pipeline, value)) {
        (Some(inline), _) => inline.to_string(),
        (None, Some(var)) => reference(&var),
        (None, None) => String::new(),
    }
}

/// Mounted path of a pipeline's TLS file
pub fn tls_file(pipeline: &str, suffix: &str) -> String {
    format!("{}/{}-{}", TLS_DIR, pipeline, suffix)
}

fn http_output(name: &str, tag: &str, http: &HttpOutput) -> Section {
    let format = if http.format.is_empty() {
        "json"
    } else {
        http.format.as_str()
    };
    let port = if http.port.is_empty() {
        DEFAULT_PORT
    } else {
        http.port.as_str()
    };

    let mut section = Section::new()
        .with("name", "http")
        .with("match", tag)
        .with("alias", format!("{}-http", name))
        .with("allow_duplicated_headers", "true")
        .with("format", format)
        .with("host", config_value(name, &http.host))
        .with("port", port)
        .with("retry_limit", RETRY_LIMIT)
        .with("storage.total_limit_size", STORAGE_LIMIT)
        .with("tls", on_off(!http.tls.disabled))
        .with("tls.verify", on_off(!http.tls.skip_certificate_validation));
    if format == "json" {
        section.push("json_date_format", "iso8601");
    }
    if http.user.is_defined() {
        section.push("http_user", config_value(name, &http.user));
    }
    if http.password.is_defined() {
        section.push("http_passwd", config_value(name, &http.password));
    }
    if !http.uri.is_empty() {
        section.push("uri", http.uri.as_str());
    }
    if !http.compress.is_empty() {
        section.push("compress", http.compress.as_str());
    }
    if http.tls.ca.as_ref().is_some_and(ValueType::is_defined) {
        section.push("tls.ca_file", tls_file(name, "ca.crt"));
    }
    if has_client_cert(http) {
        section.push("tls.crt_file", tls_file(name, "cert.crt"));
        section.push("tls.key_file", tls_file(name, "key.key"));
    }
    section
}

fn has_client_cert(http: &HttpOutput) -> bool {
    http.tls.cert.as_ref().is_some_and(ValueType::is_defined)
        && http.tls.key.as_ref().is_some_and(ValueType::is_defined)
}

/// Sections of one pipeline, in the order Fluent Bit runs them
pub fn pipeline_sections(pipeline: &LogPipeline, namespace: &str) -> Result<String, Error> {
    let name = pipeline.name_any();
    let tag = format!("{}.*", name);
    let spec = &pipeline.spec;
    let app = spec.input.application.clone().unwrap_or_default();
    let http = spec.output.http.as_ref();

    let mut out = input_section(&name, &app, namespace).render("INPUT");

    let mut multiline = Vec::new();
    let mut filters = Vec::new();
    for filter in &spec.filters {
        let section = custom_section(&name, &filter.custom, &tag)?;
        if section.get("name") == Some("multiline") {
            multiline.push(section);
        } else {
            filters.push(section);
        }
    }
    for section in &multiline {
        out.push_str(&section.render("FILTER"));
    }

    out.push_str(
        &Section::new()
            .with("name", "record_modifier")
            .with("match", &tag)
            .with("record", "cluster_identifier ${KUBERNETES_SERVICE_HOST}")
            .render("FILTER"),
    );
    out.push_str(
        &Section::new()
            .with("name", "kubernetes")
            .with("match", &tag)
            .with("annotations", on_off(app.keep_annotations))
            .with("buffer_size", "1MB")
            .with("k8s-logging.exclude", "off")
            .with("k8s-logging.parser", "on")
            .with("keep_log", on_off(app.keeps_original_body()))
            .with("kube_tag_prefix", format!("{}.var.log.containers.", name))
            .with("labels", on_off(!app.drop_labels))
            .with("merge_log", "on")
            .render("FILTER"),
    );
    if http.is_some() {
        out.push_str(
            &Section::new()
                .with("name", "modify")
                .with("match", &tag)
                .with("copy", "time @timestamp")
                .render("FILTER"),
        );
    }
    for section in &filters {
        out.push_str(&section.render("FILTER"));
    }

    match (http, spec.output.custom.as_deref().filter(|c| !c.trim().is_empty())) {
        (Some(http), _) => {
            out.push_str(&lua_filter(&tag, "enrich_app_name").render("FILTER"));
            if http.dedot {
                out.push_str(&lua_filter(&tag, "kubernetes_map_keys").render("FILTER"));
            }
            out.push_str(&http_output(&name, &tag, http).render("OUTPUT"));
        }
        (None, Some(custom)) => {
            let mut output = custom_section(&name, custom, &tag)?;
            let plugin = output.get("name").unwrap_or("custom").to_string();
            if !output.contains("alias") {
                output.push("alias", format!("{}-{}", name, plugin));
            }
            if !output.contains("retry_limit") {
                output.push("retry_limit", RETRY_LIMIT);
            }
            if !output.contains("storage.total_limit_size") {
                output.push("storage.total_limit_size", STORAGE_LIMIT);
            }
            out.push_str(&output.render("OUTPUT"));
        }
        (None, None) => {
            return Err(Error::render(
                Signal::Logs.data_type(),
                format!("log pipeline {} has no Fluent Bit output", name),
            ))
        }
    }
    Ok(out)
}

/// `parsers.conf` built from LogParser resources, sorted by name
pub fn parsers_config(parsers: &[&LogParser]) -> Result<String, Error> {
    let mut sorted: Vec<&LogParser> = parsers.to_vec();
    sorted.sort_by_key(|p| p.name_any());

    let mut out = String::new();
    for parser in sorted {
        let name = parser.name_any();
        let mut section = Section::parse(&parser.spec.parser)
            .map_err(|e| Error::render(Signal::Logs.data_type(), format!("parser {}: {}", name, e)))?;
        section.remove("name");
        section.push("name", name);
        out.push_str(&section.render("PARSER"));
    }
    Ok(out)
}

fn secret_env(pipeline: &LogPipeline, secrets: &ResolvedSecrets, env: &mut BTreeMap<String, String>) -> Result<(), Error> {
    let name = pipeline.name_any();
    if let Some(http) = &pipeline.spec.output.http {
        for value in [&http.host, &http.user, &http.password] {
            if value.inline_value().is_some() {
                continue;
            }
            if let Some(var) = secret_env_var(&name, value) {
                env.insert(var, secrets.value(value)?);
            }
        }
    }
    for variable in &pipeline.spec.variables {
        if let Some(key) = &variable.value_from.secret_key_ref {
            let value = secrets.get(key).ok_or_else(|| Error::SecretRef {
                secret: key.name.clone(),
                namespace: key.namespace.clone(),
                key: key.key.clone(),
                message: "value was not resolved".to_string(),
            })?;
            env.insert(variable.name.clone(), value.to_string());
        }
    }
    Ok(())
}

fn tls_files(pipeline: &LogPipeline, secrets: &ResolvedSecrets, files: &mut BTreeMap<String, String>) -> Result<(), Error> {
    let Some(http) = &pipeline.spec.output.http else {
        return Ok(());
    };
    let name = pipeline.name_any();
    if let Some(ca) = http.tls.ca.as_ref().filter(|v| v.is_defined()) {
        files.insert(format!("{}-ca.crt", name), secrets.value(ca)?);
    }
    if let (true, Some(cert), Some(key)) = (has_client_cert(http), &http.tls.cert, &http.tls.key) {
        files.insert(format!("{}-cert.crt", name), sanitize_pem(&secrets.value(cert)?));
        files.insert(format!("{}-key.key", name), sanitize_pem(&secrets.value(key)?));
    }
    Ok(())
}

/// Render the Fluent Bit DaemonSet configuration for the admitted
/// FluentBit-mode pipelines
pub fn fluent_bit_config(
    pipelines: &[&LogPipeline],
    parsers: &[&LogParser],
    secrets: &ResolvedSecrets,
    namespace: &str,
) -> Result<RenderedConfig, Error> {
    let mut sorted: Vec<&LogPipeline> = pipelines.to_vec();
    sorted.sort_by_key(|p| p.name_any());

    let mut main = service_section().render("SERVICE");
    let mut files = BTreeMap::new();
    let mut env = BTreeMap::new();
    let mut tls = BTreeMap::new();

    for pipeline in &sorted {
        main.push_str(&pipeline_sections(pipeline, namespace)?);
        secret_env(pipeline, secrets, &mut env)?;
        tls_files(pipeline, secrets, &mut tls)?;
        for file in &pipeline.spec.files {
            files.insert(file.name.clone(), file.content.clone());
        }
    }

    files.insert(MAIN_CONFIG.to_string(), main);
    files.insert(PARSERS_CONFIG.to_string(), parsers_config(parsers)?);
    files.insert(LUA_SCRIPT.to_string(), FILTER_SCRIPT.to_string());

    Ok(RenderedConfig::new(files, env).with_secret_files(tls))
}
