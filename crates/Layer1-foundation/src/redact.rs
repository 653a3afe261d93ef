//! Masking of sensitive values before they reach the logs

use serde_json::Value;

/// Replacement text for masked values
pub const MASK: &str = "********";

/// Keys whose values never get logged (compared case-insensitively)
const SENSITIVE_KEYS: &[&str] = &["password", "token", "apikey", "secret", "credit_card"];

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&key.as_str())
}

/// Return a copy of `value` with sensitive object keys masked, at any depth
pub fn mask_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let masked = if is_sensitive(key) && !inner.is_null() {
                        Value::String(MASK.to_string())
                    } else {
                        mask_sensitive(inner)
                    };
                    (key.clone(), masked)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(mask_sensitive).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_masks_nested_keys() {
        let input = json!({
            "url": "https://example.com/login",
            "apiKey": "abc",
            "steps": [{ "fill": "#pw", "password": "hunter2" }],
            "token": null
        });

        let masked = mask_sensitive(&input);
        assert_eq!(masked["url"], "https://example.com/login");
        assert_eq!(masked["apiKey"], MASK);
        assert_eq!(masked["steps"][0]["password"], MASK);
        assert_eq!(masked["steps"][0]["fill"], "#pw");
        assert!(masked["token"].is_null());
    }

    #[test]
    fn test_scalars_untouched() {
        assert_eq!(mask_sensitive(&json!("secret")), json!("secret"));
        assert_eq!(mask_sensitive(&json!(42)), json!(42));
    }
}
