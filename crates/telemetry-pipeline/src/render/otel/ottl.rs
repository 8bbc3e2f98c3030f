//! OTTL expression helpers for filter and transform processors

use crate::crd::NamespaceSelector;

/// Instrumentation scope stamped on runtime (kubeletstats) metrics
pub const SCOPE_RUNTIME: &str = "io.kyma-project.telemetry/runtime";
/// Instrumentation scope stamped on scraped Prometheus metrics
pub const SCOPE_PROMETHEUS: &str = "io.kyma-project.telemetry/prometheus";
/// Instrumentation scope stamped on Istio proxy metrics
pub const SCOPE_ISTIO: &str = "io.kyma-project.telemetry/istio";
/// Instrumentation scope of operator-internal metrics
pub const SCOPE_KYMA: &str = "io.kyma-project.telemetry/kyma";

/// Resource attribute holding the namespace
pub const NAMESPACE_ATTRIBUTE: &str = "k8s.namespace.name";

/// `resource.attributes["key"]`
pub fn resource_attribute(key: &str) -> String {
    format!("resource.attributes[\"{}\"]", key)
}

/// `attributes["key"]`
pub fn attribute(key: &str) -> String {
    format!("attributes[\"{}\"]", key)
}

/// `resource.attributes["key"] == "value"`
pub fn resource_attribute_equals(key: &str, value: &str) -> String {
    format!("{} == \"{}\"", resource_attribute(key), value)
}

/// `attributes["key"] == "value"`
pub fn attribute_equals(key: &str, value: &str) -> String {
    format!("{} == \"{}\"", attribute(key), value)
}

/// `resource.attributes["key"] != nil`
pub fn resource_attribute_not_nil(key: &str) -> String {
    format!("{} != nil", resource_attribute(key))
}

/// `IsMatch(target, "regex")`
pub fn is_match(target: &str, regex: &str) -> String {
    format!("IsMatch({}, \"{}\")", target, regex)
}

/// `instrumentation_scope.name == "scope"`
pub fn scope_name_equals(scope: &str) -> String {
    format!("instrumentation_scope.name == \"{}\"", scope)
}

/// `not(expr)`
pub fn not(expr: &str) -> String {
    format!("not({})", expr)
}

/// Join with ` and `
pub fn join_and<S: AsRef<str>>(exprs: &[S]) -> String {
    exprs.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" and ")
}

/// Join with ` or `
pub fn join_or<S: AsRef<str>>(exprs: &[S]) -> String {
    exprs.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" or ")
}

/// `(expr)`
pub fn parenthesize(expr: &str) -> String {
    format!("({})", expr)
}

/// Drop condition for data of `source` outside the namespaces `selector`
/// admits, or `None` when the selector admits everything
pub fn namespace_filter(source: &str, selector: &NamespaceSelector) -> Option<String> {
    let any_of = |namespaces: &[String]| -> String {
        let checks: Vec<String> = namespaces
            .iter()
            .map(|ns| resource_attribute_equals(NAMESPACE_ATTRIBUTE, ns))
            .collect();
        join_or(&checks)
    };

    if !selector.include.is_empty() {
        return Some(join_and(&[
            source.to_string(),
            resource_attribute_not_nil(NAMESPACE_ATTRIBUTE),
            not(&any_of(&selector.include)),
        ]));
    }
    if !selector.exclude.is_empty() {
        return Some(join_and(&[
            source.to_string(),
            parenthesize(&any_of(&selector.exclude)),
        ]));
    }
    None
}

/// Metrics that entered through the OTLP push endpoint, i.e. none of the
/// scopes the agent stamps
pub fn is_otlp_metric() -> String {
    not(&join_or(&[
        scope_name_equals(SCOPE_RUNTIME),
        scope_name_equals(SCOPE_PROMETHEUS),
        scope_name_equals(SCOPE_ISTIO),
        scope_name_equals(SCOPE_KYMA),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_selector_keeps_only_listed_namespaces() {
        let expr = namespace_filter("SRC", &NamespaceSelector::include(&["a", "b"])).unwrap();
        assert_eq!(
            expr,
            r#"SRC and resource.attributes["k8s.namespace.name"] != nil and not(resource.attributes["k8s.namespace.name"] == "a" or resource.attributes["k8s.namespace.name"] == "b")"#
        );
    }

    #[test]
    fn exclude_selector_drops_listed_namespaces() {
        let expr = namespace_filter("SRC", &NamespaceSelector::exclude(&["a"])).unwrap();
        assert_eq!(expr, r#"SRC and (resource.attributes["k8s.namespace.name"] == "a")"#);
        assert!(namespace_filter("SRC", &NamespaceSelector::default()).is_none());
    }

    #[test]
    fn otlp_metric_excludes_agent_scopes() {
        let expr = is_otlp_metric();
        assert!(expr.starts_with("not(instrumentation_scope.name == \"io.kyma-project.telemetry/runtime\""));
        assert!(expr.contains("io.kyma-project.telemetry/kyma"));
    }
}
