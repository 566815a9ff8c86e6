//! Form field discovery and the field-mapping contract.

use serde::{Deserialize, Serialize};

use crate::engine::js_string;

/// Profile key whose mapping routes to a file upload instead of typing.
pub const RESUME_UPLOAD: &str = "resume_upload";

/// Collects visible inputs with a best-guess label: an explicit
/// `<label for>`, an enclosing label, `aria-label`, then the placeholder.
pub const EXTRACT_FIELDS_SCRIPT: &str = r#"(() => {
  const visible = (el) => {
    const r = el.getBoundingClientRect();
    const s = getComputedStyle(el);
    return (el.type === 'file' || (r.width > 0 && r.height > 0)) && s.visibility !== 'hidden';
  };
  const labelFor = (el) => {
    if (el.id) {
      const l = document.querySelector(`label[for="${CSS.escape(el.id)}"]`);
      if (l) return l.innerText.trim();
    }
    const wrap = el.closest('label');
    if (wrap) return wrap.innerText.trim();
    return (el.getAttribute('aria-label') || el.placeholder || '').trim();
  };
  const skip = ['hidden', 'submit', 'button', 'image', 'reset'];
  return Array.from(document.querySelectorAll('input, textarea, select'))
    .filter((el) => !skip.includes((el.type || '').toLowerCase()) && visible(el))
    .filter((el) => el.id || el.name)
    .map((el) => ({
      tag: el.tagName.toLowerCase(),
      type: (el.type || '').toLowerCase(),
      name: el.name || '',
      id: el.id || '',
      placeholder: el.placeholder || '',
      label: labelFor(el),
    }));
})()"#;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub tag: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub label: String,
}

impl FormField {
    pub fn is_file(&self) -> bool {
        self.field_type == "file"
    }
}

/// One mapper answer: fill form element `id`/`name` with profile key `field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl FieldMapping {
    /// CSS selector for the target element, preferring the id.
    pub fn selector(&self) -> Option<String> {
        if let Some(id) = self.id.as_deref().filter(|s| !s.is_empty()) {
            return Some(format!("[id={}]", js_string(id)));
        }
        self.name
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|name| format!("[name={}]", js_string(name)))
    }
}

/// Mapper response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMappings {
    #[serde(default)]
    pub mappings: Vec<FieldMapping>,
}

/// Keyword rules used when no remote mapper is configured: the first rule
/// whose keyword appears in a field's label, name, id or placeholder wins.
const HEURISTICS: &[(&str, &[&str])] = &[
    ("email", &["email", "e-mail"]),
    ("phone", &["phone", "mobile", "tel"]),
    ("first_name", &["first name", "first_name", "firstname", "given"]),
    ("last_name", &["last name", "last_name", "lastname", "surname", "family"]),
    ("full_name", &["full name", "your name", "name"]),
    ("linkedin_url", &["linkedin"]),
    ("website", &["website", "portfolio", "url"]),
    ("location", &["city", "location", "address"]),
    ("years_experience", &["years of experience", "experience"]),
];

/// Best-effort local mapping. File inputs map to the resume.
pub fn heuristic_mappings(fields: &[FormField], profile_keys: &[&str]) -> Vec<FieldMapping> {
    fields
        .iter()
        .filter_map(|f| {
            let key = if f.is_file() {
                Some(RESUME_UPLOAD)
            } else {
                let haystack =
                    format!("{} {} {} {}", f.label, f.name, f.id, f.placeholder).to_lowercase();
                HEURISTICS
                    .iter()
                    .find(|(key, words)| {
                        profile_keys.contains(key) && words.iter().any(|w| haystack.contains(w))
                    })
                    .map(|(key, _)| *key)
            }?;
            Some(FieldMapping {
                field: key.to_string(),
                id: Some(f.id.clone()).filter(|s| !s.is_empty()),
                name: Some(f.name.clone()).filter(|s| !s.is_empty()),
            })
        })
        .collect()
}
