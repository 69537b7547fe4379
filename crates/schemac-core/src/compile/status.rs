//! Status visibility between definitions.

use crate::error::{CompileError, CompileResult};
use crate::schema::Status;

/// One side of a reference, for [`check_status`].
#[derive(Debug, Clone, Copy)]
pub struct StatusRef<'a> {
    pub status: Status,
    pub module: &'a str,
    pub name: &'a str,
}

impl<'a> StatusRef<'a> {
    pub fn new(status: Status, module: &'a str, name: &'a str) -> Self {
        Self {
            status,
            module,
            name,
        }
    }
}

/// Check that `referencing` may reference `referenced`.
///
/// Statuses are ordered current, deprecated, obsolete. The reference is
/// invalid iff the referenced definition is strictly more current than the
/// referencing one, whichever modules they belong to.
pub fn check_status(referencing: StatusRef<'_>, referenced: StatusRef<'_>) -> CompileResult<()> {
    if referenced.status < referencing.status {
        return Err(CompileError::invalid(format!(
            "A {} definition \"{}:{}\" is not permitted to reference a {} definition \"{}:{}\".",
            referencing.status.as_str(),
            referencing.module,
            referencing.name,
            referenced.status.as_str(),
            referenced.module,
            referenced.name,
        )));
    }
    Ok(())
}
