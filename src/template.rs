use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("no value for placeholder {{{0}}}")]
    Missing(String),

    #[error("placeholder {{{0}}} is not a string or an integer")]
    NotScalar(String),

    #[error("unclosed placeholder in '{0}'")]
    Unclosed(String),
}

/// Substitute `{field}` placeholders in `template` with values from `facts`.
///
/// Only string and integer values can be substituted.
pub fn render(template: &str, facts: &Map<String, Value>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| TemplateError::Unclosed(template.to_string()))?;
        let key = &after[..end];
        match facts.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => out.push_str(&n.to_string()),
            Some(_) => return Err(TemplateError::NotScalar(key.to_string())),
            None => return Err(TemplateError::Missing(key.to_string())),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(render("base.apk", &Map::new()).unwrap(), "base.apk");
    }

    #[test]
    fn substitutes_strings_and_integers() {
        let f = facts(json!({"package_name": "com.example", "version_code": 12}));
        assert_eq!(
            render("{package_name}.apk", &f).unwrap(),
            "com.example.apk"
        );
        assert_eq!(
            render("out/{package_name}-{version_code}", &f).unwrap(),
            "out/com.example-12"
        );
    }

    #[test]
    fn missing_key() {
        assert_eq!(
            render("{package_name}.apk", &Map::new()),
            Err(TemplateError::Missing("package_name".into()))
        );
    }

    #[test]
    fn non_scalar_value() {
        let f = facts(json!({"permissions": ["a"], "ratio": 1.5}));
        assert_eq!(
            render("{permissions}", &f),
            Err(TemplateError::NotScalar("permissions".into()))
        );
        assert_eq!(
            render("{ratio}", &f),
            Err(TemplateError::NotScalar("ratio".into()))
        );
    }

    #[test]
    fn unclosed() {
        assert!(matches!(
            render("{package_name.apk", &Map::new()),
            Err(TemplateError::Unclosed(_))
        ));
    }
}
