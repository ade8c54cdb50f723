use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// A permission shared between collections, contexts and error values.
pub type SharedPermission = Arc<dyn Permission>;

/// An assertion of an allowed action.
///
/// Implementors only need to describe themselves and decide `implies`;
/// everything else has a default.
pub trait Permission: Debug + Send + Sync + Any {
    /// Type name of the permission (e.g. `FilePermission`). Permissions of
    /// different kinds never imply one another unless one of them is
    /// [`AllPermission`].
    fn kind(&self) -> &str;

    /// The target name (e.g. a path or a dotted property name).
    fn name(&self) -> &str;

    /// Canonical actions string, empty when the kind takes no actions.
    fn actions(&self) -> String {
        String::new()
    }

    /// Whether holding `self` is sufficient to justify `other`.
    fn implies(&self, other: &dyn Permission) -> bool;

    /// Structural equality across trait objects.
    fn same_as(&self, other: &dyn Permission) -> bool {
        self.kind() == other.kind()
            && self.name() == other.name()
            && self.actions() == other.actions()
    }

    /// Action bits for kinds whose grants combine across entries.
    ///
    /// When this returns `Some`, a collection answers `implies` by taking
    /// the union of the actions of every member that
    /// [implies the target](Permission::implies_target), instead of
    /// requiring one member to cover all requested actions on its own.
    fn action_mask(&self) -> Option<u32> {
        None
    }

    /// `implies` without considering actions. Only consulted when
    /// [`Permission::action_mask`] returns `Some`.
    fn implies_target(&self, other: &dyn Permission) -> bool {
        self.implies(other)
    }

    /// Upcast used for downcasting to a concrete permission type.
    fn as_any(&self) -> &dyn Any;

    /// Wrap in an [`Arc`] for sharing.
    fn shared(self) -> SharedPermission
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

impl dyn Permission {
    /// Downcast to a concrete permission type.
    pub fn downcast_ref<T: Permission>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl Display for dyn Permission {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let actions = self.actions();
        if actions.is_empty() {
            write!(f, "(\"{}\" \"{}\")", self.kind(), self.name())
        } else {
            write!(f, "(\"{}\" \"{}\" \"{}\")", self.kind(), self.name(), actions)
        }
    }
}

/// Kind name of [`AllPermission`].
pub const ALL_PERMISSION: &str = "AllPermission";

/// The permission that implies every other permission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AllPermission;

impl Permission for AllPermission {
    fn kind(&self) -> &str {
        ALL_PERMISSION
    }

    fn name(&self) -> &str {
        "<all permissions>"
    }

    fn actions(&self) -> String {
        "<all actions>".into()
    }

    fn implies(&self, _other: &dyn Permission) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BasicPermission, FilePermission};
    use testresult::TestResult;

    #[test]
    fn it_implies_everything_with_all_permission() -> TestResult {
        let all = AllPermission;

        assert!(all.implies(&FilePermission::new("/etc/passwd", "read,write")?));
        assert!(all.implies(&BasicPermission::runtime("exitVM")?));
        assert!(all.implies(&AllPermission));
        Ok(())
    }

    #[test]
    fn it_displays_kind_name_and_actions() -> TestResult {
        let permission: SharedPermission = FilePermission::new("/tmp/foo", "write,read")?.shared();

        assert_eq!(
            permission.to_string(),
            "(\"FilePermission\" \"/tmp/foo\" \"read,write\")"
        );
        Ok(())
    }

    #[test]
    fn it_downcasts_to_the_concrete_type() -> TestResult {
        let permission: SharedPermission = BasicPermission::runtime("exitVM")?.shared();

        assert!(permission.downcast_ref::<BasicPermission>().is_some());
        assert!(permission.downcast_ref::<FilePermission>().is_none());
        Ok(())
    }
}
