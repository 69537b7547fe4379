//! Compiler and context configuration.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Flags modifying how a (sub)tree is compiled.
///
/// The walk sets the RPC and notification flags itself when it descends into
/// operations; callers of [`compile`](crate::compile) normally pass
/// [`CompileFlags::NONE`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompileFlags(u32);

impl CompileFlags {
    pub const NONE: CompileFlags = CompileFlags(0);
    /// Compiling the input of an RPC or action; config is not inherited.
    pub const RPC_INPUT: CompileFlags = CompileFlags(0x01);
    /// Compiling the output of an RPC or action; config is not inherited.
    pub const RPC_OUTPUT: CompileFlags = CompileFlags(0x02);
    pub const RPC_MASK: CompileFlags = CompileFlags(0x03);
    /// Compiling a notification; config is not inherited.
    pub const NOTIFICATION: CompileFlags = CompileFlags(0x08);
    /// Validating a grouping that is not instantiated anywhere. Checks that
    /// depend on where the grouping ends up are skipped.
    pub const GROUPING: CompileFlags = CompileFlags(0x10);

    pub fn bits(self) -> u32 {
        self.0
    }

    /// True if any of the bits in `other` are set.
    pub fn intersects(self, other: CompileFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(self, other: CompileFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn without(self, other: CompileFlags) -> CompileFlags {
        CompileFlags(self.0 & !other.0)
    }

    /// Set inside RPC input/output or notifications, where nodes carry no config.
    pub fn is_operation(self) -> bool {
        self.intersects(CompileFlags::RPC_MASK | CompileFlags::NOTIFICATION)
    }
}

impl BitOr for CompileFlags {
    type Output = CompileFlags;

    fn bitor(self, rhs: CompileFlags) -> CompileFlags {
        CompileFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CompileFlags {
    fn bitor_assign(&mut self, rhs: CompileFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for CompileFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(CompileFlags, &str); 4] = [
            (CompileFlags::RPC_INPUT, "RPC_INPUT"),
            (CompileFlags::RPC_OUTPUT, "RPC_OUTPUT"),
            (CompileFlags::NOTIFICATION, "NOTIFICATION"),
            (CompileFlags::GROUPING, "GROUPING"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&set.join(" | "))
        }
    }
}

/// Registry-wide behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    /// Implement a module automatically when a definition in it is
    /// referenced (identity base, if-feature, extension, XPath prefix,
    /// augment target). When disabled such references fail and name the
    /// module that would have to be implemented.
    pub implicit_implement: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            implicit_implement: true,
        }
    }
}

/// Which features of a module are enabled when it gets implemented.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureSelection {
    #[default]
    None,
    All,
    Named(Vec<String>),
}

impl FeatureSelection {
    pub fn selects(&self, feature: &str) -> bool {
        match self {
            FeatureSelection::None => false,
            FeatureSelection::All => true,
            FeatureSelection::Named(names) => names.iter().any(|n| n == feature),
        }
    }
}
