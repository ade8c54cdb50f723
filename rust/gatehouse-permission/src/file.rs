use std::any::Any;

use crate::{GatehousePermissionError, Permission};

/// Kind name of [`FilePermission`].
pub const FILE_PERMISSION: &str = "FilePermission";

/// Special path matching every file.
pub const ALL_FILES: &str = "<<ALL FILES>>";

const EXECUTE: u32 = 0x1;
const WRITE: u32 = 0x2;
const READ: u32 = 0x4;
const DELETE: u32 = 0x8;
const READLINK: u32 = 0x10;

const ACTIONS: [(u32, &str); 5] = [
    (READ, "read"),
    (WRITE, "write"),
    (EXECUTE, "execute"),
    (DELETE, "delete"),
    (READLINK, "readlink"),
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Target {
    AllFiles,
    File(String),
    /// Every file directly inside the directory.
    Children(String),
    /// Every file anywhere below the directory.
    Descendants(String),
}

impl Target {
    fn is_absolute(&self) -> bool {
        match self {
            Target::AllFiles => true,
            Target::File(path) | Target::Children(path) | Target::Descendants(path) => {
                path.starts_with('/')
            }
        }
    }
}

/// Access to a file or directory.
///
/// Paths:
/// - `/path/file` names a single file;
/// - `/path/*` names every file directly in `/path/`;
/// - `/path/-` names every file under `/path/`, recursively;
/// - `<<ALL FILES>>` names every file.
///
/// Paths without a leading `/` are relative to the working directory: a bare
/// `-` or `*` covers files below it, and never an absolute path.
///
/// Actions are a comma separated list of `read`, `write`, `execute`,
/// `delete` and `readlink`. Actions combine across grants in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilePermission {
    path: String,
    target: Target,
    mask: u32,
}

impl FilePermission {
    /// A permission to perform `actions` on `path`.
    pub fn new(path: impl Into<String>, actions: &str) -> Result<Self, GatehousePermissionError> {
        let path = path.into();
        let mask = parse_actions(actions)?;
        if path.is_empty() {
            return Err(GatehousePermissionError::InvalidName {
                kind: FILE_PERMISSION.into(),
                name: path,
            });
        }

        let target = if path == ALL_FILES {
            Target::AllFiles
        } else if path == "-" {
            Target::Descendants(String::new())
        } else if path == "*" {
            Target::Children(String::new())
        } else if let Some(directory) = path.strip_suffix('-').filter(|p| p.ends_with('/')) {
            Target::Descendants(directory.to_owned())
        } else if let Some(directory) = path.strip_suffix('*').filter(|p| p.ends_with('/')) {
            Target::Children(directory.to_owned())
        } else {
            Target::File(path.clone())
        };

        Ok(Self { path, target, mask })
    }

    fn implies_path(&self, other: &FilePermission) -> bool {
        match (&self.target, &other.target) {
            (Target::AllFiles, _) => true,
            (_, Target::AllFiles) => false,
            (this, that) if this.is_absolute() != that.is_absolute() => false,
            (Target::Descendants(this), Target::Descendants(that))
            | (Target::Descendants(this), Target::Children(that)) => {
                that.starts_with(this.as_str())
            }
            (Target::Descendants(this), Target::File(that)) => {
                that.len() > this.len() && that.starts_with(this.as_str())
            }
            (Target::Children(this), Target::Children(that)) => this == that,
            (Target::Children(_), Target::Descendants(_)) => false,
            (Target::Children(this), Target::File(that)) => match that.rfind('/') {
                Some(last) => &that[..=last] == this.as_str(),
                None => this.is_empty(),
            },
            (Target::File(_), Target::Children(_) | Target::Descendants(_)) => false,
            (Target::File(this), Target::File(that)) => this == that,
        }
    }
}

fn parse_actions(actions: &str) -> Result<u32, GatehousePermissionError> {
    let invalid = || GatehousePermissionError::InvalidActions {
        kind: FILE_PERMISSION.into(),
        actions: actions.into(),
    };

    let mut mask = 0;
    for action in actions.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        let (bit, _) = ACTIONS
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(action))
            .ok_or_else(invalid)?;
        mask |= bit;
    }

    if mask == 0 { Err(invalid()) } else { Ok(mask) }
}

impl Permission for FilePermission {
    fn kind(&self) -> &str {
        FILE_PERMISSION
    }

    fn name(&self) -> &str {
        &self.path
    }

    fn actions(&self) -> String {
        ACTIONS
            .iter()
            .filter(|(bit, _)| self.mask & bit != 0)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn implies(&self, other: &dyn Permission) -> bool {
        match other.downcast_ref::<FilePermission>() {
            Some(other) => self.mask & other.mask == other.mask && self.implies_path(other),
            None => false,
        }
    }

    fn action_mask(&self) -> Option<u32> {
        Some(self.mask)
    }

    fn implies_target(&self, other: &dyn Permission) -> bool {
        match other.downcast_ref::<FilePermission>() {
            Some(other) => self.implies_path(other),
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    fn file(path: &str, actions: &str) -> FilePermission {
        FilePermission::new(path, actions).unwrap()
    }

    #[test]
    fn it_canonicalizes_actions() {
        assert_eq!(file("/a", "WRITE, read").actions(), "read,write");
        assert_eq!(
            file("/a", "readlink,delete,execute,write,read").actions(),
            "read,write,execute,delete,readlink"
        );
    }

    #[test]
    fn it_rejects_unknown_or_missing_actions() {
        assert!(FilePermission::new("/a", "read,chmod").is_err());
        assert!(FilePermission::new("/a", " , ").is_err());
        assert!(FilePermission::new("", "read").is_err());
    }

    #[test]
    fn it_keeps_relative_wildcards_out_of_absolute_paths() {
        let below = file("-", "read");
        let inside = file("*", "read");

        assert!(below.implies(&file("cache/index", "read")));
        assert!(below.implies(&file("cache/-", "read")));
        assert!(!below.implies(&file("/etc/shadow", "read")));
        assert!(!below.implies(&file("/-", "read")));
        assert!(inside.implies(&file("index", "read")));
        assert!(!inside.implies(&file("cache/index", "read")));
        assert!(!inside.implies(&file("/index", "read")));
        assert!(!file("/-", "read").implies(&file("notes.txt", "read")));
    }

    #[test]
    fn it_matches_direct_children_only_with_a_star() {
        let tmp = file("/tmp/*", "read");

        assert!(tmp.implies(&file("/tmp/foo", "read")));
        assert!(!tmp.implies(&file("/tmp/foo/bar", "read")));
        assert!(!tmp.implies(&file("/tmp/-", "read")));
        assert!(tmp.implies(&file("/tmp/*", "read")));
    }

    #[test]
    fn it_matches_recursively_with_a_dash() {
        let tmp = file("/tmp/-", "read");

        assert!(tmp.implies(&file("/tmp/foo", "read")));
        assert!(tmp.implies(&file("/tmp/foo/bar", "read")));
        assert!(tmp.implies(&file("/tmp/foo/*", "read")));
        assert!(tmp.implies(&file("/tmp/-", "read")));
        assert!(!tmp.implies(&file("/tmp/", "read")));
        assert!(!tmp.implies(&file("/var/tmp/foo", "read")));
    }

    #[test]
    fn it_requires_a_superset_of_actions() {
        let read = file("/tmp/*", "read");

        assert!(!read.implies(&file("/tmp/foo", "write")));
        assert!(!read.implies(&file("/tmp/foo", "read,write")));
        assert!(file("/tmp/*", "read,write").implies(&file("/tmp/foo", "write")));
    }

    #[test]
    fn it_matches_everything_with_all_files() -> TestResult {
        let all = FilePermission::new(ALL_FILES, "read")?;

        assert!(all.implies(&file("/etc/passwd", "read")));
        assert!(all.implies(&file("/-", "read")));
        assert!(!file("/-", "read").implies(&all));
        Ok(())
    }
}
