//! Name and tag grammar enforcement for LVM2 resources.
//!
//! Every name or tag that reaches the LVM driver must first pass through
//! one of these constructors; the driver itself never re-validates.

use thiserror::Error;

const MAX_NAME_LEN: usize = 127;
const MIN_TAG_LEN: usize = 1;
const MAX_TAG_LEN: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("Name contains invalid character(s) in \"{0}\"")]
    InvalidName(String),
    #[error("tag length must be between {MIN_TAG_LEN} and {MAX_TAG_LEN} octets, got {0}")]
    TagInvalidLength(usize),
    #[error("tag \"{0}\" contains invalid character(s)")]
    TagHasInvalidChars(String),
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-')
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '.' | '-')
}

/// A validated LVM volume-group or logical-volume name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LvmName(String);

impl LvmName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LvmName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for LvmName {
    type Error = NameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty()
            || value.len() > MAX_NAME_LEN
            || value.starts_with('-')
            || value.starts_with('.')
            || !value.chars().all(is_name_char)
        {
            return Err(NameError::InvalidName(value.to_string()));
        }

        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for LvmName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

/// A validated LVM tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag(String);

impl Tag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for Tag {
    type Error = NameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.len() < MIN_TAG_LEN || value.len() > MAX_TAG_LEN {
            return Err(NameError::TagInvalidLength(value.len()));
        }
        if value.starts_with('-') || !value.chars().all(is_tag_char) {
            return Err(NameError::TagHasInvalidChars(value.to_string()));
        }

        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for Tag {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

/// Compose the on-disk LV name from the owning VG and a user-provided
/// name: `<VG>_<user-provided-name>`.
pub fn lv_disk_name(vg: &LvmName, user_name: &str) -> String {
    format!("{vg}_{user_name}")
}

/// Strip the `<VG>_` prefix from an on-disk LV name, if present.
pub fn strip_vg_prefix<'a>(vg: &LvmName, disk_name: &'a str) -> Option<&'a str> {
    disk_name.strip_prefix(&format!("{vg}_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legal_names() {
        assert!(LvmName::try_from("data01").is_ok());
        assert!(LvmName::try_from("my.vg-1_x").is_ok());
    }

    #[test]
    fn rejects_empty_and_leading_dash_or_dot() {
        assert_eq!(
            LvmName::try_from(""),
            Err(NameError::InvalidName(String::new()))
        );
        assert!(LvmName::try_from("-leading").is_err());
        assert!(LvmName::try_from(".hidden").is_err());
    }

    #[test]
    fn rejects_illegal_characters() {
        assert!(LvmName::try_from("has space").is_err());
        assert!(LvmName::try_from("slash/es").is_err());
    }

    #[test]
    fn rejects_overlong_names() {
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(LvmName::try_from(long.as_str()).is_err());
    }

    #[test]
    fn tag_grammar() {
        assert!(Tag::try_from("env.prod").is_ok());
        assert!(Tag::try_from("").is_err());
        assert!(Tag::try_from("-bad").is_err());
        assert!(Tag::try_from("bad char").is_err());
        assert!(Tag::try_from("a".repeat(MAX_TAG_LEN + 1).as_str()).is_err());
    }

    #[test]
    fn disk_name_composition() {
        let vg = LvmName::try_from("testvg").unwrap();
        let disk = lv_disk_name(&vg, "v1");
        assert_eq!(disk, "testvg_v1");
        assert_eq!(strip_vg_prefix(&vg, &disk), Some("v1"));
        assert_eq!(strip_vg_prefix(&vg, "othervg_v1"), None);
    }
}
