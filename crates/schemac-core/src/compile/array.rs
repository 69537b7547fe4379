//! Building compiled arrays with rollback.

use crate::error::{CompileError, CompileResult};

/// Compile `items` one by one, appending the results to `out`.
///
/// `f` returns `Ok(None)` for an item that is denied (e.g. disabled by
/// if-feature) and produces nothing. If any item fails, `out` is truncated
/// back to its length before the call and the error is returned.
pub fn compile_array<P, T>(
    out: &mut Vec<T>,
    items: &[P],
    mut f: impl FnMut(&P) -> CompileResult<Option<T>>,
) -> CompileResult<()> {
    let mark = out.len();
    out.try_reserve(items.len())
        .map_err(|_| CompileError::NoMemory)?;

    for item in items {
        match f(item) {
            Ok(Some(value)) => out.push(value),
            Ok(None) => {}
            Err(err) => {
                out.truncate(mark);
                return Err(err);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_items_are_skipped() {
        let mut out = vec![0];
        compile_array(&mut out, &[1, 2, 3, 4], |i| {
            Ok((i % 2 == 0).then_some(*i * 10))
        })
        .unwrap();
        assert_eq!(out, vec![0, 20, 40]);
    }

    #[test]
    fn test_failure_rolls_back() {
        let mut out = vec![7];
        let err = compile_array(&mut out, &[1, 2, 3], |i| {
            if *i == 3 {
                Err(CompileError::invalid("bad item"))
            } else {
                Ok(Some(*i))
            }
        })
        .unwrap_err();
        assert_eq!(err.message(), "bad item");
        assert_eq!(out, vec![7]);
    }
}
