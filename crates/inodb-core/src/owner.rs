//! User and group lookups.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Which ownership column a lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum OwnerKind {
    User,
    Group,
}

impl OwnerKind {
    /// Resolve a name or numeric id to an id.
    ///
    /// Numeric strings are taken as ids without consulting the system
    /// database.
    pub fn resolve(self, value: &str) -> Option<u32> {
        if let Ok(id) = value.parse::<u32>() {
            return Some(id);
        }
        lookup_id(self, value)
    }

    /// Name of an id, if the system database knows it.
    pub fn name_of(self, id: u32) -> Option<String> {
        lookup_name(self, id)
    }
}

#[cfg(unix)]
fn lookup_id(kind: OwnerKind, name: &str) -> Option<u32> {
    use nix::unistd::{Group, User};

    match kind {
        OwnerKind::User => User::from_name(name).ok().flatten().map(|u| u.uid.as_raw()),
        OwnerKind::Group => Group::from_name(name).ok().flatten().map(|g| g.gid.as_raw()),
    }
}

#[cfg(not(unix))]
fn lookup_id(_kind: OwnerKind, _name: &str) -> Option<u32> {
    None
}

#[cfg(unix)]
fn lookup_name(kind: OwnerKind, id: u32) -> Option<String> {
    use nix::unistd::{Gid, Group, Uid, User};

    match kind {
        OwnerKind::User => User::from_uid(Uid::from_raw(id)).ok().flatten().map(|u| u.name),
        OwnerKind::Group => Group::from_gid(Gid::from_raw(id)).ok().flatten().map(|g| g.name),
    }
}

#[cfg(not(unix))]
fn lookup_name(_kind: OwnerKind, _id: u32) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ids_resolve_directly() {
        assert_eq!(OwnerKind::User.resolve("5424"), Some(5424));
        assert_eq!(OwnerKind::Group.resolve("0"), Some(0));
    }

    #[cfg(unix)]
    #[test]
    fn test_root_user_lookup() {
        assert_eq!(OwnerKind::User.resolve("root"), Some(0));
        assert_eq!(OwnerKind::User.name_of(0).as_deref(), Some("root"));
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(OwnerKind::User.resolve("no-such-user-inodb-test"), None);
    }
}
