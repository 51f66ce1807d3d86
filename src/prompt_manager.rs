//! Named template lookup with `{placeholder}` interpolation against a
//! challenge/environment/role-specific field set.
//!
//! Grounded on the original source's `Prompter` (a thin wrapper around a
//! `dict` loaded from YAML plus Python `str.format(**kwargs)`). Loading the
//! YAML file itself is out of core scope (§4.6); this module only owns the
//! lookup and interpolation behavior over an already-parsed template map.

use std::collections::HashMap;

use crate::challenge::{Challenge, ServerType};

/// The documented template keys a prompt-template YAML file may define.
pub const SYSTEM: &str = "system";
pub const INITIAL: &str = "initial";
pub const CONTINUE: &str = "continue";
pub const FINISH_TASK: &str = "finish_task";
pub const FINISH_AUTOPROMPT: &str = "finish_autoprompt";
pub const FINISH_EMPTY: &str = "finish_empty";
pub const FINISH_ERROR: &str = "finish_error";
pub const WEB_SERVER_DESCRIPTION: &str = "web_server_description";
pub const NC_SERVER_DESCRIPTION: &str = "nc_server_description";

/// Derives the `{prompter.server_description}` placeholder from the
/// challenge's server type: a canned blurb for `web`/`nc`, empty otherwise.
pub fn server_description(challenge: &Challenge, templates: &HashMap<String, String>) -> String {
    match challenge.server_type {
        ServerType::Web => templates
            .get(WEB_SERVER_DESCRIPTION)
            .cloned()
            .unwrap_or_default(),
        ServerType::Nc => templates
            .get(NC_SERVER_DESCRIPTION)
            .cloned()
            .unwrap_or_default(),
        ServerType::None => String::new(),
    }
}

/// Named template lookup over an already-parsed `HashMap<String, String>`.
/// A missing key yields an empty string rather than an error, matching the
/// original's `dict.get(key, "")` behavior.
pub struct PromptManager {
    templates: HashMap<String, String>,
}

impl PromptManager {
    pub fn new(templates: HashMap<String, String>) -> Self {
        PromptManager { templates }
    }

    /// Looks up `key` and interpolates `{name}` placeholders present in
    /// `fields` (typically `challenge.*` / `environment.*` /
    /// `prompter.server_description` plus any call-specific extras, e.g.
    /// `task_description`). Unrecognized placeholders are left verbatim
    /// rather than erroring, since templates may reference fields this
    /// particular call didn't supply.
    pub fn get(&self, key: &str, fields: &HashMap<&str, String>) -> String {
        let template = match self.templates.get(key) {
            Some(t) => t,
            None => return String::new(),
        };
        interpolate(template, fields)
    }
}

/// Replaces every `{name}` occurring in `template` with `fields[name]`,
/// leaving unknown placeholders untouched.
fn interpolate(template: &str, fields: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(close) = template[i + 1..].find('}') {
                let name = &template[i + 1..i + 1 + close];
                if let Some(value) = fields.get(name) {
                    out.push_str(value);
                    i = i + 1 + close + 1;
                    continue;
                }
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{Category, EventKind};
    use std::path::PathBuf;

    fn challenge(server_type: ServerType) -> Challenge {
        Challenge::new(
            "netcat chal",
            Category::Pwn,
            100,
            "connect to {box}:{port}",
            "flag{x}",
            vec![],
            server_type,
            Some("challenge".into()),
            Some(1337),
            false,
            PathBuf::from("/c"),
            "img",
            2024,
            EventKind::Qualifier,
        )
        .unwrap()
    }

    #[test]
    fn missing_key_yields_empty_string() {
        let pm = PromptManager::new(HashMap::new());
        assert_eq!(pm.get(SYSTEM, &HashMap::new()), "");
    }

    #[test]
    fn interpolates_known_fields_and_preserves_unknown() {
        let mut templates = HashMap::new();
        templates.insert(INITIAL.to_string(), "Solve {challenge.name} at {box}".to_string());
        let pm = PromptManager::new(templates);
        let mut fields = HashMap::new();
        fields.insert("challenge.name", "baby pwn".to_string());
        let rendered = pm.get(INITIAL, &fields);
        assert_eq!(rendered, "Solve baby pwn at {box}");
    }

    #[test]
    fn server_description_picks_template_by_server_type() {
        let mut templates = HashMap::new();
        templates.insert(NC_SERVER_DESCRIPTION.to_string(), "nc the box".to_string());
        templates.insert(WEB_SERVER_DESCRIPTION.to_string(), "browse the box".to_string());

        let nc = challenge(ServerType::Nc);
        assert_eq!(server_description(&nc, &templates), "nc the box");

        let web = challenge(ServerType::Web);
        assert_eq!(server_description(&web, &templates), "browse the box");

        let none = challenge(ServerType::None);
        assert_eq!(server_description(&none, &templates), "");
    }
}
