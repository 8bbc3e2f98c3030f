//! OTTL checks of user-defined transforms and filters
//!
//! A recursive-descent parser over the statement grammar the collector
//! accepts. Transform statements are editor invocations with an optional
//! `where` clause; transform and filter conditions are boolean expressions.
//! Every path must start with a context of the signal and name a field that
//! context has, and every function must be a known editor or converter.

use thiserror::Error;

use crate::crd::{FilterSpec, TransformSpec};
use crate::signal::Signal;

/// A transform or filter that the collector would refuse
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OttlError {
    #[error("invalid TransformSpec: {0}")]
    Transform(String),

    #[error("invalid FilterSpec: {0}")]
    Filter(String),
}

/// Functions that modify telemetry; only valid as statements
const EDITORS: &[&str] = &[
    "append",
    "delete_key",
    "delete_matching_keys",
    "flatten",
    "keep_keys",
    "keep_matching_keys",
    "limit",
    "merge_maps",
    "replace_all_matches",
    "replace_all_patterns",
    "replace_match",
    "replace_pattern",
    "set",
    "truncate_all",
    "aggregate_on_attributes",
    "aggregate_on_attribute_value",
    "convert_gauge_to_sum",
    "convert_sum_to_gauge",
    "convert_summary_count_val_to_sum",
    "convert_summary_sum_val_to_sum",
    "copy_metric",
    "extract_count_metric",
    "extract_sum_metric",
    "scale_metric",
];

/// Functions that compute values; valid anywhere a value is
const CONVERTERS: &[&str] = &[
    "Base64Decode",
    "Concat",
    "ContainsValue",
    "ConvertCase",
    "Day",
    "Decode",
    "Double",
    "Duration",
    "ExtractGrokPatterns",
    "ExtractPatterns",
    "FNV",
    "Format",
    "FormatTime",
    "GetXML",
    "HasPrefix",
    "HasSuffix",
    "Hex",
    "Hour",
    "Hours",
    "Index",
    "InsertXML",
    "Int",
    "IsBool",
    "IsDouble",
    "IsInt",
    "IsList",
    "IsMap",
    "IsMatch",
    "IsRootSpan",
    "IsString",
    "IsValidLuhn",
    "Keys",
    "Len",
    "Log",
    "MD5",
    "Microseconds",
    "Milliseconds",
    "Minute",
    "Minutes",
    "Month",
    "Murmur3Hash",
    "Murmur3Hash128",
    "Nanosecond",
    "Nanoseconds",
    "Now",
    "ParseCSV",
    "ParseJSON",
    "ParseKeyValue",
    "ParseSimplifiedXML",
    "ParseXML",
    "RemoveXML",
    "SHA1",
    "SHA256",
    "SHA512",
    "Second",
    "Seconds",
    "SliceToMap",
    "Sort",
    "SpanID",
    "Split",
    "String",
    "Substring",
    "Time",
    "ToKeyValueString",
    "ToLowerCase",
    "ToUpperCase",
    "TraceID",
    "TruncateTime",
    "URL",
    "UUID",
    "Unix",
    "UnixMicro",
    "UnixMilli",
    "UnixNano",
    "UnixSeconds",
    "UserAgent",
    "Values",
    "Weekday",
    "Year",
];

/// Fields of each path context; deeper segments are not checked
const CONTEXTS: &[(&str, &[&str])] = &[
    (
        "resource",
        &["attributes", "dropped_attributes_count", "schema_url", "cache"],
    ),
    (
        "scope",
        &["name", "version", "attributes", "dropped_attributes_count", "schema_url", "cache"],
    ),
    (
        "log",
        &[
            "body",
            "attributes",
            "time_unix_nano",
            "observed_time_unix_nano",
            "time",
            "observed_time",
            "severity_number",
            "severity_text",
            "trace_id",
            "span_id",
            "flags",
            "dropped_attributes_count",
            "event_name",
            "cache",
        ],
    ),
    (
        "metric",
        &[
            "name",
            "description",
            "unit",
            "type",
            "aggregation_temporality",
            "is_monotonic",
            "data_points",
            "metadata",
            "cache",
        ],
    ),
    (
        "datapoint",
        &[
            "attributes",
            "start_time_unix_nano",
            "time_unix_nano",
            "start_time",
            "time",
            "value_double",
            "value_int",
            "exemplars",
            "flags",
            "count",
            "sum",
            "bucket_counts",
            "explicit_bounds",
            "scale",
            "zero_count",
            "positive",
            "negative",
            "quantile_values",
            "cache",
        ],
    ),
    (
        "span",
        &[
            "trace_id",
            "span_id",
            "parent_span_id",
            "trace_state",
            "name",
            "kind",
            "start_time_unix_nano",
            "end_time_unix_nano",
            "start_time",
            "end_time",
            "attributes",
            "dropped_attributes_count",
            "events",
            "dropped_events_count",
            "links",
            "dropped_links_count",
            "status",
            "cache",
        ],
    ),
    (
        "spanevent",
        &["time_unix_nano", "time", "name", "attributes", "dropped_attributes_count", "event_index", "cache"],
    ),
];

/// Where an expression is used; filters see fewer contexts than transforms
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Usage {
    Transform,
    Filter,
}

fn contexts(signal: Signal, usage: Usage) -> &'static [&'static str] {
    match (signal, usage) {
        (Signal::Logs, _) => &["resource", "scope", "log"],
        (Signal::Metrics, _) => &["resource", "scope", "metric", "datapoint"],
        (Signal::Traces, Usage::Transform) => &["resource", "scope", "span", "spanevent"],
        (Signal::Traces, Usage::Filter) => &["resource", "scope", "span"],
    }
}

/// Check every statement and condition of `specs`, stopping at the first error
pub fn validate_transforms(signal: Signal, specs: &[TransformSpec]) -> Result<(), OttlError> {
    for spec in specs {
        for condition in &spec.conditions {
            check_condition(condition, signal, Usage::Transform).map_err(OttlError::Transform)?;
        }
        for statement in &spec.statements {
            check_statement(statement, signal).map_err(OttlError::Transform)?;
        }
    }
    Ok(())
}

/// Check every condition of `specs`, stopping at the first error
pub fn validate_filters(signal: Signal, specs: &[FilterSpec]) -> Result<(), OttlError> {
    for spec in specs {
        for condition in &spec.conditions {
            check_condition(condition, signal, Usage::Filter).map_err(OttlError::Filter)?;
        }
    }
    Ok(())
}

fn check_statement(source: &str, signal: Signal) -> Result<(), String> {
    let tokens = tokenize(source).map_err(|e| format!("statement '{}': {}", source, e))?;
    Parser::new(tokens, signal, Usage::Transform)
        .statement()
        .map_err(|e| format!("statement '{}': {}", source, e))
}

fn check_condition(source: &str, signal: Signal, usage: Usage) -> Result<(), String> {
    let tokens = tokenize(source).map_err(|e| format!("condition '{}': {}", source, e))?;
    Parser::new(tokens, signal, usage)
        .condition()
        .map_err(|e| format!("condition '{}': {}", source, e))
}

// =============================================================================
// Tokens
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str,
    Number,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Assign,
    Compare,
    Math(char),
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\n' | b'\r' | b'\t' => i += 1,
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            b']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            b'{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            b'}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            b',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            b'.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            b':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            b'=' | b'!' | b'<' | b'>' => {
                let double = bytes.get(i + 1) == Some(&b'=');
                match (c, double) {
                    (b'=', false) => tokens.push(Token::Assign),
                    (b'!', false) => return Err(format!("unexpected '!' at offset {}", i)),
                    _ => tokens.push(Token::Compare),
                }
                i += if double { 2 } else { 1 };
            }
            b'+' | b'-' | b'*' | b'/' => {
                tokens.push(Token::Math(char::from(c)));
                i += 1;
            }
            b'"' => {
                let start = i;
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(format!("unterminated string at offset {}", start)),
                        Some(b'\\') => i += 2,
                        Some(b'"') => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
                tokens.push(Token::Str);
            }
            b'0'..=b'9' => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.' || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Token::Number);
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push(Token::Ident(source[start..i].to_string()));
            }
            _ => {
                return Err(format!(
                    "unexpected character '{}' at offset {}",
                    source[i..].chars().next().unwrap_or('?'),
                    i
                ))
            }
        }
    }
    Ok(tokens)
}

// =============================================================================
// Grammar
// =============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    signal: Signal,
    usage: Usage,
}

impl Parser {
    fn new(tokens: Vec<Token>, signal: Signal, usage: Usage) -> Self {
        Self {
            tokens,
            pos: 0,
            signal,
            usage,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), String> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(format!("expected {}", what))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(name)) if name == keyword => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn end(&self) -> Result<(), String> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(format!("unexpected {:?} after the expression", token)),
        }
    }

    /// `editor(args) [where condition]`
    fn statement(mut self) -> Result<(), String> {
        let name = match (self.next(), self.peek()) {
            (Some(Token::Ident(name)), Some(Token::LParen)) => name,
            _ => return Err("a statement must invoke an editor".to_string()),
        };
        if !EDITORS.contains(&name.as_str()) {
            return Err(if CONVERTERS.contains(&name.as_str()) {
                format!("converter {} cannot be used as a statement", name)
            } else {
                format!("unknown editor {}", name)
            });
        }
        self.arguments()?;
        if self.eat_keyword("where") {
            self.boolean()?;
        }
        self.end()
    }

    fn condition(mut self) -> Result<(), String> {
        if self.peek().is_none() {
            return Err("empty condition".to_string());
        }
        self.boolean()?;
        self.end()
    }

    fn boolean(&mut self) -> Result<(), String> {
        self.conjunction()?;
        while self.eat_keyword("or") {
            self.conjunction()?;
        }
        Ok(())
    }

    fn conjunction(&mut self) -> Result<(), String> {
        self.negation()?;
        while self.eat_keyword("and") {
            self.negation()?;
        }
        Ok(())
    }

    fn negation(&mut self) -> Result<(), String> {
        if self.eat_keyword("not") {
            return self.negation();
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<(), String> {
        self.arithmetic()?;
        if self.eat(&Token::Compare) {
            self.arithmetic()?;
        }
        Ok(())
    }

    fn arithmetic(&mut self) -> Result<(), String> {
        if matches!(self.peek(), Some(Token::Math('-'))) {
            self.pos += 1;
        }
        self.value()?;
        while matches!(self.peek(), Some(Token::Math(_))) {
            self.pos += 1;
            self.value()?;
        }
        Ok(())
    }

    fn value(&mut self) -> Result<(), String> {
        match self.next() {
            Some(Token::Str) | Some(Token::Number) => Ok(()),
            Some(Token::LParen) => {
                self.boolean()?;
                self.expect(Token::RParen, "')'")
            }
            Some(Token::LBracket) => self.list(),
            Some(Token::LBrace) => self.map(),
            Some(Token::Ident(name)) => self.named(name),
            Some(token) => Err(format!("unexpected {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn list(&mut self) -> Result<(), String> {
        if self.eat(&Token::RBracket) {
            return Ok(());
        }
        loop {
            self.boolean()?;
            if self.eat(&Token::RBracket) {
                return Ok(());
            }
            self.expect(Token::Comma, "',' or ']'")?;
        }
    }

    fn map(&mut self) -> Result<(), String> {
        if self.eat(&Token::RBrace) {
            return Ok(());
        }
        loop {
            self.expect(Token::Str, "a map key")?;
            self.expect(Token::Colon, "':'")?;
            self.boolean()?;
            if self.eat(&Token::RBrace) {
                return Ok(());
            }
            self.expect(Token::Comma, "',' or '}'")?;
        }
    }

    /// Literal keyword, converter call, enum symbol or path
    fn named(&mut self, name: String) -> Result<(), String> {
        if matches!(name.as_str(), "true" | "false" | "nil") {
            return Ok(());
        }
        if self.peek() == Some(&Token::LParen) {
            if EDITORS.contains(&name.as_str()) {
                return Err(format!("editor {} cannot be used as a value or condition", name));
            }
            if !CONVERTERS.contains(&name.as_str()) {
                return Err(format!("unknown function {}", name));
            }
            self.arguments()?;
            return self.keys();
        }
        if name.starts_with(|c: char| c.is_ascii_uppercase()) {
            // Enum symbols such as SPAN_KIND_SERVER, or a converter passed by name
            return Ok(());
        }
        self.path(name)
    }

    fn arguments(&mut self) -> Result<(), String> {
        self.expect(Token::LParen, "'('")?;
        if self.eat(&Token::RParen) {
            return Ok(());
        }
        loop {
            if matches!(
                (self.peek(), self.peek_at(1)),
                (Some(Token::Ident(_)), Some(Token::Assign))
            ) {
                self.pos += 2;
            }
            self.boolean()?;
            if self.eat(&Token::RParen) {
                return Ok(());
            }
            self.expect(Token::Comma, "',' or ')'")?;
        }
    }

    fn keys(&mut self) -> Result<(), String> {
        while self.eat(&Token::LBracket) {
            self.boolean()?;
            self.expect(Token::RBracket, "']'")?;
        }
        Ok(())
    }

    /// `context.field(.segment)*([key])*`
    fn path(&mut self, head: String) -> Result<(), String> {
        let mut segments = vec![head];
        while self.eat(&Token::Dot) {
            match self.next() {
                Some(Token::Ident(segment)) => segments.push(segment),
                _ => return Err(format!("path {} ends with '.'", segments.join("."))),
            }
        }
        self.check_path(&segments)?;
        self.keys()
    }

    fn check_path(&self, segments: &[String]) -> Result<(), String> {
        let path = segments.join(".");
        let allowed = contexts(self.signal, self.usage);
        let context = segments[0].as_str();
        if !allowed.contains(&context) {
            let known = CONTEXTS.iter().any(|(name, _)| *name == context);
            return Err(if known {
                format!("context {} is not supported here, use one of: {}", context, allowed.join(", "))
            } else {
                format!("path {} must start with a context: {}", path, allowed.join(", "))
            });
        }
        let fields = CONTEXTS
            .iter()
            .find(|(name, _)| *name == context)
            .map(|(_, fields)| *fields)
            .unwrap_or_default();
        match segments.get(1) {
            Some(field) if fields.contains(&field.as_str()) => Ok(()),
            Some(field) => Err(format!("{} has no field {}", context, field)),
            None => Err(format!("path {} must name a field of {}", path, context)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn transform(conditions: &[&str], statements: &[&str]) -> TransformSpec {
        TransformSpec {
            conditions: conditions.iter().map(|s| s.to_string()).collect(),
            statements: statements.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn filter(conditions: &[&str]) -> FilterSpec {
        FilterSpec {
            conditions: conditions.iter().map(|s| s.to_string()).collect(),
        }
    }

    // =========================================================================
    // Story Tests: transforms
    // =========================================================================

    #[rstest]
    #[case(Signal::Traces, &[r#"IsMatch(resource.attributes["test"], "bar")"#], &[r#"set(resource.attributes["test"], "foo")"#])]
    #[case(Signal::Metrics, &[r#"IsMatch(scope.name, "opentelemetry")"#], &[r#"set(scope.attributes["timestamp"], Now())"#])]
    #[case(Signal::Logs, &[r#"log.severity_text == "ERROR""#, r#"IsMatch(log.body, "database")"#], &[r#"set(log.attributes["error_category"], "database")"#])]
    #[case(Signal::Logs, &[], &[r#"replace_pattern(log.body, "password=\\w+", "password=***")"#])]
    #[case(Signal::Traces, &[r#"span.name == "HTTP GET""#], &[r#"set(span.attributes["processed"], "true") where span.kind == SPAN_KIND_SERVER"#])]
    #[case(Signal::Traces, &[], &[r#"set(spanevent.attributes["seen"], true)"#])]
    #[case(Signal::Metrics, &[r#"metric.type == METRIC_DATA_TYPE_SUM and not IsMatch(metric.name, "^k8s\\.")"#], &[r#"set(datapoint.attributes["x"], Concat([metric.name, "-", metric.unit], delimiter=""))"#])]
    #[case(Signal::Metrics, &[], &[r#"set(datapoint.value_double, datapoint.value_double * 1000 + 1) where datapoint.value_double > -1.5"#])]
    #[case(Signal::Logs, &[], &[r#"merge_maps(log.attributes, ParseJSON(log.body), "upsert") where IsMatch(log.body, "^\\{")"#])]
    fn valid_transforms_are_accepted(
        #[case] signal: Signal,
        #[case] conditions: &[&str],
        #[case] statements: &[&str],
    ) {
        assert_eq!(validate_transforms(signal, &[transform(conditions, statements)]), Ok(()));
    }

    #[rstest]
    #[case::editor_as_condition(&[r#"set(resource.attributes["test"], "foo")"#], &[], "editor set")]
    #[case::converter_as_statement(&[], &[r#"IsMatch(resource.attributes["test"], "bar")"#], "converter IsMatch")]
    #[case::comparison_as_statement(&[], &[r#"log.severity_text == "ERROR""#], "must invoke an editor")]
    #[case::unknown_converter(&[r#"IisMatch(resource.attributes["test"], "bar")"#], &[], "unknown function IisMatch")]
    #[case::unknown_editor(&[], &[r#"sset(resource.attributes["test"], "foo")"#], "unknown editor sset")]
    #[case::lowercase_unknown(&[r#"get(log.body) == "x""#], &[], "unknown function get")]
    #[case::unclosed_call(&[r#"IsMatch(resource.attributes["test"], "bar""#], &[], "expected")]
    #[case::unclosed_statement(&[], &[r#"set(log.attributes["processed"], "true""#], "expected")]
    #[case::unterminated_string(&[r#"log.severity_text == "ERROR"#], &[], "unterminated string")]
    #[case::unknown_resource_field(&[r#"IsMatch(resource.invalid["test"], "bar")"#], &[], "resource has no field invalid")]
    #[case::unknown_scope_field(&[], &[r#"set(scope.invalid["version"], "1.0.0")"#], "scope has no field invalid")]
    #[case::unknown_log_field(&[r#"log.invalid == "ERROR""#], &[], "log has no field invalid")]
    #[case::misspelled_context(&[r#"llog.severity_text == "ERROR""#], &[], "must start with a context")]
    #[case::missing_context(&[], &[r#"set(attributes["x"], "y")"#], "must start with a context")]
    #[case::foreign_context(&[r#"span.name == "x""#], &[], "context span is not supported")]
    fn invalid_log_transforms_are_rejected(
        #[case] conditions: &[&str],
        #[case] statements: &[&str],
        #[case] problem: &str,
    ) {
        let err = validate_transforms(Signal::Logs, &[transform(conditions, statements)]).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("invalid TransformSpec: "), "{}", message);
        assert!(message.contains(problem), "{} does not mention {}", message, problem);
    }

    #[rstest]
    #[case(r#"set(datapoint.value, 1)"#, "datapoint has no field value")]
    #[case(r#"set(datapoint.invalid, 1)"#, "datapoint has no field invalid")]
    #[case(r#"set(metric.name, "x") where"#, "unexpected end")]
    fn invalid_metric_statements_name_the_problem(#[case] statement: &str, #[case] problem: &str) {
        let err = validate_transforms(Signal::Metrics, &[transform(&[], &[statement])]).unwrap_err();
        assert!(err.to_string().contains(problem), "{}", err);
    }

    #[test]
    fn first_invalid_spec_is_reported() {
        let specs = [
            transform(&[], &[r#"set(span.name, "ok")"#]),
            transform(&[], &[r#"truncate_all(span.attributes, 10)"#, r#"sset(span.name, "x")"#]),
        ];
        let err = validate_transforms(Signal::Traces, &specs).unwrap_err();
        assert_eq!(
            err,
            OttlError::Transform(r#"statement 'sset(span.name, "x")': unknown editor sset"#.to_string())
        );
    }

    // =========================================================================
    // Story Tests: filters
    // =========================================================================

    #[rstest]
    #[case(Signal::Metrics, r#"metric.name == "k8s.pod.cpu.time""#)]
    #[case(Signal::Metrics, r#"datapoint.attributes["tenant"] == nil or IsMatch(resource.attributes["k8s.namespace.name"], "^kube-")"#)]
    #[case(Signal::Traces, r#"span.status.code == STATUS_CODE_UNSET and Len(span.events) > 0"#)]
    #[case(Signal::Logs, r#"log.severity_number < SEVERITY_NUMBER_WARN"#)]
    fn valid_filters_are_accepted(#[case] signal: Signal, #[case] condition: &str) {
        assert_eq!(validate_filters(signal, &[filter(&[condition])]), Ok(()));
    }

    #[rstest]
    #[case::spanevent_not_filterable(Signal::Traces, r#"spanevent.name == "x""#, "context spanevent is not supported")]
    #[case::editor_as_condition(Signal::Traces, r#"truncate_all(span.attributes, 10)"#, "editor truncate_all")]
    #[case::bare_attributes(Signal::Metrics, r#"attributes["x"] == "y""#, "must start with a context")]
    #[case::unbalanced_parens(Signal::Metrics, r#"(metric.name == "x""#, "expected ')'")]
    #[case::stray_bang(Signal::Metrics, r#"!metric.is_monotonic"#, "unexpected '!'")]
    #[case::empty(Signal::Logs, "   ", "empty condition")]
    fn invalid_filters_are_rejected(#[case] signal: Signal, #[case] condition: &str, #[case] problem: &str) {
        let err = validate_filters(signal, &[filter(&[condition])]).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("invalid FilterSpec: "), "{}", message);
        assert!(message.contains(problem), "{} does not mention {}", message, problem);
    }
}
