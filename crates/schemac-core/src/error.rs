//! Compile error type.

use thiserror::Error;

/// Result type for every compiler operation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The schema is malformed or breaks a structural rule.
    Invalid,
    /// Resource exhaustion.
    NoMemory,
}

/// Compilation error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("{}", render_invalid(.message, .path))]
    Invalid {
        /// Human readable diagnostic naming the offending definitions.
        message: String,
        /// Schema path accumulated up to the failing statement.
        path: String,
    },

    #[error("memory exhausted")]
    NoMemory,
}

fn render_invalid(message: &str, path: &str) -> String {
    if path.is_empty() {
        message.to_string()
    } else {
        format!("{message} (path \"{path}\")")
    }
}

impl CompileError {
    pub fn invalid(message: impl Into<String>) -> Self {
        CompileError::Invalid {
            message: message.into(),
            path: String::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Invalid { .. } => ErrorKind::Invalid,
            CompileError::NoMemory => ErrorKind::NoMemory,
        }
    }

    /// The diagnostic text without the path.
    pub fn message(&self) -> &str {
        match self {
            CompileError::Invalid { message, .. } => message,
            CompileError::NoMemory => "memory exhausted",
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            CompileError::Invalid { path, .. } if !path.is_empty() => Some(path),
            _ => None,
        }
    }

    /// Attach a path unless the error already carries a more precise one.
    pub fn at(self, at: &str) -> Self {
        match self {
            CompileError::Invalid { message, path } if path.is_empty() => CompileError::Invalid {
                message,
                path: at.to_string(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_and_without_path() {
        let bare = CompileError::invalid("Duplicate identifier \"a\".");
        assert_eq!(bare.to_string(), "Duplicate identifier \"a\".");

        let located = bare.at("/m:top");
        assert_eq!(
            located.to_string(),
            "Duplicate identifier \"a\". (path \"/m:top\")"
        );
        assert_eq!(located.path(), Some("/m:top"));
    }

    #[test]
    fn test_at_keeps_inner_path() {
        let err = CompileError::invalid("x").at("/m:inner").at("/m:outer");
        assert_eq!(err.path(), Some("/m:inner"));
    }

    #[test]
    fn test_kind() {
        assert_eq!(CompileError::invalid("x").kind(), ErrorKind::Invalid);
        assert_eq!(CompileError::NoMemory.kind(), ErrorKind::NoMemory);
        assert_eq!(CompileError::NoMemory.at("/x").path(), None);
    }
}
