//! CloudFormation intrinsic functions and reference discovery.

use serde_json::{json, Value};
use std::sync::OnceLock;

use super::LogicalId;

pub const REGION: &str = "AWS::Region";
pub const STACK_NAME: &str = "AWS::StackName";

/// `{"Ref": target}` for a resource or pseudo parameter
pub fn reference(target: impl AsRef<str>) -> Value {
    json!({ "Ref": target.as_ref() })
}

/// `{"Fn::GetAtt": [resource, attribute]}`
pub fn get_att(resource: &LogicalId, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [resource.as_str(), attribute] })
}

/// `{"Fn::Sub": template}`
pub fn sub(template: impl Into<String>) -> Value {
    let template: String = template.into();
    json!({ "Fn::Sub": template })
}

fn sub_placeholder() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    // ${Name} or ${Name.Attr}; ${!Literal} is an escape and never matches
    RE.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z0-9:]+)(?:\.[A-Za-z0-9.]+)?\}").expect("static regex")
    })
}

/// Every logical id or pseudo parameter that `value` refers to, in document order.
///
/// Covers `Ref`, `Fn::GetAtt` (list and dotted string forms) and the
/// placeholders of `Fn::Sub`. Duplicates are kept; callers dedupe.
pub fn references(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_references(value, &mut found);
    found
}

fn collect_references(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Object(map) if map.len() == 1 => {
            let Some((key, inner)) = map.iter().next() else {
                return;
            };
            match (key.as_str(), inner) {
                ("Ref", Value::String(target)) => found.push(target.clone()),
                ("Fn::GetAtt", Value::Array(parts)) => {
                    if let Some(Value::String(target)) = parts.first() {
                        found.push(target.clone());
                    }
                }
                ("Fn::GetAtt", Value::String(dotted)) => {
                    if let Some((target, _)) = dotted.split_once('.') {
                        found.push(target.to_string());
                    }
                }
                ("Fn::Sub", Value::String(template)) => collect_sub(template, None, found),
                ("Fn::Sub", Value::Array(parts)) => {
                    let variables = parts.get(1).and_then(Value::as_object);
                    if let Some(Value::String(template)) = parts.first() {
                        collect_sub(template, variables, found);
                    }
                    if let Some(vars) = variables {
                        for v in vars.values() {
                            collect_references(v, found);
                        }
                    }
                }
                _ => collect_references(inner, found),
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_references(v, found);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, found);
            }
        }
        _ => {}
    }
}

fn collect_sub(
    template: &str,
    variables: Option<&serde_json::Map<String, Value>>,
    found: &mut Vec<String>,
) {
    for caps in sub_placeholder().captures_iter(template) {
        let name = &caps[1];
        // Local Fn::Sub variables shadow resource names
        if variables.is_some_and(|vars| vars.contains_key(name)) {
            continue;
        }
        found.push(name.to_string());
    }
}

/// Pseudo parameters (`AWS::Region`, ...) are never resources
pub fn is_pseudo_parameter(name: &str) -> bool {
    name.starts_with("AWS::")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    #[test]
    fn test_ref_and_get_att_are_found() {
        let value = json!({
            "A": reference("Secret"),
            "B": [get_att(&id("Role"), "Arn")],
            "C": { "Fn::GetAtt": "Lb.DNSName" },
        });

        assert_eq!(references(&value), vec!["Secret", "Role", "Lb"]);
    }

    #[test]
    fn test_sub_placeholders_include_attributes_and_pseudo_parameters() {
        let value = sub("arn:${AWS::Partition}:ecr:${AWS::Region}:${Repo.Arn}/${!Literal}");

        assert_eq!(
            references(&value),
            vec!["AWS::Partition", "AWS::Region", "Repo"]
        );
    }

    #[test]
    fn test_sub_variables_shadow_names() {
        let value = json!({
            "Fn::Sub": ["${Name}-${Other}", { "Name": reference("Real") }]
        });

        assert_eq!(references(&value), vec!["Other", "Real"]);
    }

    #[test]
    fn test_plain_objects_named_like_intrinsics_are_walked() {
        // Two keys: not an intrinsic, but nested refs still count
        let value = json!({ "Ref": "X", "Other": reference("Y") });

        let mut found = references(&value);
        found.sort();
        assert_eq!(found, vec!["Y"]);
    }

    #[test]
    fn test_references_inside_other_intrinsics() {
        let value = json!({
            "Fn::Join": [",", [
                { "Fn::Select": ["0", get_att(&id("Lb"), "SecurityGroups")] },
                reference("Sg")
            ]]
        });

        assert_eq!(references(&value), vec!["Lb", "Sg"]);
    }

    #[test]
    fn test_pseudo_parameters() {
        assert!(is_pseudo_parameter(REGION));
        assert!(!is_pseudo_parameter("Region"));
    }
}
