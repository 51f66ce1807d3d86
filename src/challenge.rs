//! The read-only challenge record. Loading it from a dataset file is out of
//! scope here; this module only describes the shape and the invariants the
//! rest of the crate relies on.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Rev,
    Pwn,
    Crypto,
    Misc,
    Forensics,
    Web,
}

impl Category {
    /// The 3-letter code used in canonical run-log names.
    pub fn code(self) -> &'static str {
        match self {
            Category::Rev => "rev",
            Category::Pwn => "pwn",
            Category::Crypto => "cry",
            Category::Misc => "msc",
            Category::Forensics => "for",
            Category::Web => "web",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    None,
    Nc,
    Web,
}

/// Whether a challenge's canonical name belongs to a qualifier or a finals
/// event; encoded as `q`/`f` in the run-log filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Qualifier,
    Finals,
}

impl EventKind {
    fn code(self) -> char {
        match self {
            EventKind::Qualifier => 'q',
            EventKind::Finals => 'f',
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub name: String,
    pub category: Category,
    pub points: u32,
    /// May contain `{box}`/`{port}` placeholders, interpolated by the
    /// prompt manager, not by this struct.
    pub description: String,
    flag: String,
    pub files: Vec<String>,
    pub server_type: ServerType,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub compose: bool,
    pub challenge_dir: PathBuf,
    pub container_image: String,
    pub event_year: u32,
    pub event_kind: EventKind,
}

/// Raised when a `Challenge` would violate the flag/flag-format invariant,
/// e.g. a flag with no `{…}` body to redact.
#[derive(Debug)]
pub struct InvalidChallenge(pub String);

impl std::fmt::Display for InvalidChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid challenge: {}", self.0)
    }
}
impl std::error::Error for InvalidChallenge {}

impl Challenge {
    /// Constructs a challenge, asserting the flag/flag_format invariant at
    /// load time: the externally-visible `flag_format` must never equal the
    /// real flag.
    pub fn new(
        name: impl Into<String>,
        category: Category,
        points: u32,
        description: impl Into<String>,
        flag: impl Into<String>,
        files: Vec<String>,
        server_type: ServerType,
        server_host: Option<String>,
        server_port: Option<u16>,
        compose: bool,
        challenge_dir: PathBuf,
        container_image: impl Into<String>,
        event_year: u32,
        event_kind: EventKind,
    ) -> Result<Self, InvalidChallenge> {
        let flag = flag.into();
        let challenge = Challenge {
            name: name.into(),
            category,
            points,
            description: description.into(),
            flag,
            files,
            server_type,
            server_host,
            server_port,
            compose,
            challenge_dir,
            container_image: container_image.into(),
            event_year,
            event_kind,
        };
        if challenge.flag_format() == challenge.flag {
            return Err(InvalidChallenge(format!(
                "flag_format must not equal the real flag for challenge {}",
                challenge.name
            )));
        }
        Ok(challenge)
    }

    pub fn flag(&self) -> &str {
        &self.flag
    }

    /// The flag with its `{body}` replaced by the literal `{...}`, safe to
    /// show the model.
    pub fn flag_format(&self) -> String {
        match (self.flag.find('{'), self.flag.rfind('}')) {
            (Some(open), Some(close)) if open < close => {
                format!("{}{{...}}{}", &self.flag[..open], &self.flag[close + 1..])
            }
            _ => self.flag.clone(),
        }
    }

    /// The flag's inner contents only (between the first `{` and last `}`),
    /// used by the passive flag-detection backstop in addition to the full
    /// flag string.
    pub fn flag_inner(&self) -> Option<&str> {
        match (self.flag.find('{'), self.flag.rfind('}')) {
            (Some(open), Some(close)) if open < close => Some(&self.flag[open + 1..close]),
            _ => None,
        }
    }

    /// `"<year><q|f>-<cat3>-<safe-name>"`, matching
    /// `^[0-9]{4}[qf]-(cry|for|msc|pwn|rev|web)-[a-z0-9_]+$`.
    pub fn canonical_name(&self) -> String {
        format!(
            "{}{}-{}-{}",
            self.event_year,
            self.event_kind.code(),
            self.category.code(),
            safe_name(&self.name)
        )
    }
}

/// Lowercases and replaces runs of non-alphanumeric characters with a single
/// underscore, stripping any trailing underscore.
fn safe_name(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_was_sep = false;
    for c in lower.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Validates a canonical name against the documented format. Used by tests
/// and by the run-log writer as a defensive check before use as a filename.
pub fn canonical_name_regex() -> Regex {
    Regex::new(r"^[0-9]{4}[qf]-(cry|for|msc|pwn|rev|web)-[a-z0-9_]+$").expect("static regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Challenge {
        Challenge::new(
            "Baby's First Pwn!",
            Category::Pwn,
            100,
            "pwn me at {box}:{port}",
            "flag{abc123}",
            vec!["chal".into()],
            ServerType::Nc,
            Some("challenge".into()),
            Some(1337),
            false,
            PathBuf::from("/challenges/babypwn"),
            "ctf-pwn-base",
            2024,
            EventKind::Qualifier,
        )
        .unwrap()
    }

    #[test]
    fn flag_format_redacts_body_only() {
        let c = sample();
        assert_eq!(c.flag_format(), "flag{...}");
        assert_ne!(c.flag_format(), c.flag());
    }

    #[test]
    fn rejects_flag_with_no_body() {
        let err = Challenge::new(
            "x",
            Category::Misc,
            1,
            "d",
            "justastring",
            vec![],
            ServerType::None,
            None,
            None,
            false,
            PathBuf::from("/c"),
            "img",
            2024,
            EventKind::Qualifier,
        )
        .unwrap_err();
        assert!(err.0.contains("flag_format"));
    }

    #[test]
    fn canonical_name_matches_regex() {
        let c = sample();
        let name = c.canonical_name();
        assert_eq!(name, "2024q-pwn-baby_s_first_pwn");
        assert!(canonical_name_regex().is_match(&name));
    }
}
