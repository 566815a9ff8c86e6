//! Applicant profile as the portal strategies see it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub years_experience: Option<u32>,
    /// Anything else the profile service returns (work history, skills...).
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    /// Flat `key -> text` view handed to the field mapper. Nested values are
    /// flattened with dotted keys; empty values are left out.
    pub fn summary(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let mut put = |k: &str, v: &str| {
            if !v.trim().is_empty() {
                out.insert(k.to_string(), v.trim().to_string());
            }
        };
        put("first_name", &self.first_name);
        put("last_name", &self.last_name);
        put("full_name", &self.full_name());
        put("email", &self.email);
        put("phone", self.phone.as_deref().unwrap_or_default());
        put("location", self.location.as_deref().unwrap_or_default());
        put("linkedin_url", self.linkedin_url.as_deref().unwrap_or_default());
        put("website", self.website.as_deref().unwrap_or_default());
        if let Some(years) = self.years_experience {
            put("years_experience", &years.to_string());
        }
        for (k, v) in &self.extra {
            flatten_into(&mut out, k, v);
        }
        out
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, key: &str, value: &JsonValue) {
    match value {
        JsonValue::Null => {}
        JsonValue::String(s) if s.trim().is_empty() => {}
        JsonValue::String(s) => {
            out.insert(key.to_string(), s.trim().to_string());
        }
        JsonValue::Object(map) => {
            for (k, v) in map {
                flatten_into(out, &format!("{key}.{k}"), v);
            }
        }
        JsonValue::Array(items) => {
            if items.iter().all(|v| v.is_string()) {
                let joined: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
                if !joined.is_empty() {
                    out.insert(key.to_string(), joined.join(", "));
                }
            } else {
                for (i, v) in items.iter().enumerate() {
                    flatten_into(out, &format!("{key}.{i}"), v);
                }
            }
        }
        other => {
            out.insert(key.to_string(), other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_flattens_nested_extras() {
        let profile: UserProfile = serde_json::from_value(json!({
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
            "years_experience": 7,
            "skills": ["rust", "sql"],
            "address": {"city": "London", "zip": ""},
            "history": [{"company": "Analytical Engines"}]
        }))
        .unwrap();

        let s = profile.summary();
        assert_eq!(s["full_name"], "Ada Lovelace");
        assert_eq!(s["years_experience"], "7");
        assert_eq!(s["skills"], "rust, sql");
        assert_eq!(s["address.city"], "London");
        assert!(!s.contains_key("address.zip"));
        assert_eq!(s["history.0.company"], "Analytical Engines");
        assert!(!s.contains_key("phone"));
    }
}
