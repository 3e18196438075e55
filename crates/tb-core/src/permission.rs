//! # Permission
//!
//! The five principal ranks, ordered from weakest to strongest.
//! Stored as an integer level in the database.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Guest = 0,
    User = 1,
    Trusted = 2,
    Administrator = 3,
    Owner = 4,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Permission::Guest,
        Permission::User,
        Permission::Trusted,
        Permission::Administrator,
        Permission::Owner,
    ];

    /// Parses a stored level. Anything outside `[Guest, Owner]` is rejected.
    pub fn from_level(level: i64) -> Result<Self> {
        match level {
            0 => Ok(Permission::Guest),
            1 => Ok(Permission::User),
            2 => Ok(Permission::Trusted),
            3 => Ok(Permission::Administrator),
            4 => Ok(Permission::Owner),
            other => Err(ErrorKind::InvalidPermission.with_context(format!("level {other}"))),
        }
    }

    pub fn level(self) -> i64 {
        self as i64
    }

    /// `self > min`, or `self == min` when `inclusive`.
    pub fn satisfies(self, min: Permission, inclusive: bool) -> bool {
        self > min || (inclusive && self == min)
    }

    /// Whether a user may be promoted (or demoted) to this level.
    /// `Owner` is reserved for the configured owner account.
    pub fn promotable(self) -> bool {
        self < Permission::Owner
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Guest => "guest",
            Permission::User => "user",
            Permission::Trusted => "trusted",
            Permission::Administrator => "administrator",
            Permission::Owner => "owner",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ErrorKind::InvalidPermission.with_context(format!("name {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        for pair in Permission::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].level() + 1, pair[1].level());
        }
    }

    #[test]
    fn test_from_level_rejects_out_of_range() {
        assert_eq!(Permission::from_level(3).unwrap(), Permission::Administrator);
        assert_eq!(
            Permission::from_level(5).unwrap_err().kind(),
            ErrorKind::InvalidPermission
        );
        assert_eq!(
            Permission::from_level(-1).unwrap_err().kind(),
            ErrorKind::InvalidPermission
        );
    }

    #[test]
    fn test_satisfies_respects_inclusive_flag() {
        assert!(Permission::Trusted.satisfies(Permission::User, false));
        assert!(Permission::Trusted.satisfies(Permission::Trusted, true));
        assert!(!Permission::Trusted.satisfies(Permission::Trusted, false));
        assert!(!Permission::User.satisfies(Permission::Trusted, true));
    }

    #[test]
    fn test_owner_is_not_promotable() {
        assert!(Permission::Administrator.promotable());
        assert!(Permission::Guest.promotable());
        assert!(!Permission::Owner.promotable());
    }

    #[test]
    fn test_parses_names_case_insensitively() {
        assert_eq!("Trusted".parse::<Permission>().unwrap(), Permission::Trusted);
        assert_eq!(" owner ".parse::<Permission>().unwrap(), Permission::Owner);
        assert!("root".parse::<Permission>().is_err());
    }

    #[test]
    fn test_serializes_as_lowercase_name() {
        let json = serde_json::to_string(&Permission::Administrator).unwrap();
        assert_eq!(json, "\"administrator\"");
    }
}
