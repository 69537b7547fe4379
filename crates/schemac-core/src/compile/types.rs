//! Types: built-in types, typedef resolution, restrictions and values.

use std::sync::Arc;

use super::cctx::{CompileCtx, Scope};
use super::extension::compile_exts;
use super::identity::{compile_identity_bases, is_derived_from, BaseTarget};
use super::status::{check_status, StatusRef};
use crate::context::SchemaContext;
use crate::error::{CompileError, CompileResult};
use crate::ids::ModuleId;
use crate::parsed::{ParsedBit, ParsedEnum, ParsedType, ParsedTypedef};
use crate::schema::{
    BitItem, BuiltinType, EnumItem, ExtParent, Leafref, RangeSet, Status, Type, TypeKind, Value,
};
use crate::syntax::{split_prefix, Expr};

/// A compiled type together with what it inherits from its typedefs.
#[derive(Debug, Clone)]
pub struct ResolvedType {
    pub ty: Type,
    /// Nearest typedef default, with the module its prefixes resolve in.
    pub default: Option<(String, ModuleId)>,
    pub units: Option<String>,
}

/// Compile a `type` statement of a definition named `owner` with the given
/// status, as written in `cctx.pmod`.
pub fn compile_type(
    cctx: &mut CompileCtx<'_>,
    pty: &ParsedType,
    status: Status,
    owner: &str,
) -> CompileResult<ResolvedType> {
    let (prefix, name) = split_prefix(&pty.name);
    let mut resolved = match (prefix, BuiltinType::from_name(name)) {
        (None, Some(builtin)) => {
            let mut ty = builtin_type(builtin, cctx.pmod);
            apply_restrictions(cctx, &mut ty, pty, true, status, owner)?;
            ResolvedType {
                ty,
                default: None,
                units: None,
            }
        }
        _ => {
            let mut resolved = resolve_typedef(cctx, prefix, name, status, owner)?;
            apply_restrictions(cctx, &mut resolved.ty, pty, false, status, owner)?;
            resolved
        }
    };

    let exts = compile_exts(cctx, &pty.exts, ExtParent::Type)?;
    resolved.ty.exts.extend(exts);
    Ok(resolved)
}

/// Type with the unrestricted value space of a built-in type.
pub fn builtin_type(base: BuiltinType, pmod: ModuleId) -> Type {
    let kind = match base {
        BuiltinType::Boolean | BuiltinType::Empty => TypeKind::Plain,
        BuiltinType::Decimal64 => TypeKind::Number {
            range: RangeSet::full(i64::MIN as i128, i64::MAX as i128),
            fraction_digits: None,
        },
        BuiltinType::String | BuiltinType::Binary => TypeKind::String {
            length: RangeSet::full(0, u64::MAX as i128),
        },
        BuiltinType::Enumeration => TypeKind::Enumeration(Vec::new()),
        BuiltinType::Bits => TypeKind::Bits(Vec::new()),
        BuiltinType::Identityref => TypeKind::Identityref { bases: Vec::new() },
        BuiltinType::InstanceIdentifier => TypeKind::InstanceIdentifier {
            require_instance: true,
        },
        BuiltinType::Leafref => TypeKind::Leafref(Leafref {
            path: Arc::new(Expr {
                text: String::new(),
                tokens: Vec::new(),
            }),
            pmod,
            require_instance: true,
            realtype: None,
            target: None,
        }),
        BuiltinType::Union => TypeKind::Union(Vec::new()),
        int => {
            let (min, max) = int.int_bounds().unwrap_or((0, 0));
            TypeKind::Number {
                range: RangeSet::full(min, max),
                fraction_digits: None,
            }
        }
    };
    Type {
        base,
        typedef: None,
        kind,
        exts: Vec::new(),
    }
}

struct FoundTypedef {
    tpdf: ParsedTypedef,
    module: ModuleId,
    /// Scope the typedef was defined in.
    scope: Scope,
}

fn find_typedef(cctx: &CompileCtx<'_>, prefix: Option<&str>, name: &str) -> CompileResult<FoundTypedef> {
    let module = cctx
        .sctx
        .resolve_opt_prefix(cctx.pmod, prefix)
        .map_err(|err| cctx.locate(err))?;

    if module == cctx.pmod {
        let mut frame = cctx.scope.clone();
        while let Some(f) = frame {
            if let Some(tpdf) = f.typedefs.iter().find(|t| t.name == name) {
                return Ok(FoundTypedef {
                    tpdf: tpdf.clone(),
                    module,
                    scope: Some(f.clone()),
                });
            }
            frame = f.parent.clone();
        }
    }

    cctx.sctx
        .module(module)
        .parsed
        .typedefs
        .iter()
        .find(|t| t.name == name)
        .map(|tpdf| FoundTypedef {
            tpdf: tpdf.clone(),
            module,
            scope: None,
        })
        .ok_or_else(|| {
            cctx.invalid(format!(
                "Referenced type \"{}\" not found.",
                prefix.map_or_else(|| name.to_string(), |p| format!("{p}:{name}"))
            ))
        })
}

fn resolve_typedef(
    cctx: &mut CompileCtx<'_>,
    prefix: Option<&str>,
    name: &str,
    status: Status,
    owner: &str,
) -> CompileResult<ResolvedType> {
    let found = find_typedef(cctx, prefix, name)?;
    let key = (found.module, found.tpdf.name.clone());
    if cctx.tpdf_chain.contains(&key) {
        return Err(cctx.invalid(format!(
            "Invalid \"{name}\" type reference - circular chain of types detected."
        )));
    }
    let tpdf_status = found.tpdf.status.unwrap_or_default();
    check_status(
        StatusRef::new(status, &cctx.module_name(cctx.pmod), owner),
        StatusRef::new(tpdf_status, &cctx.module_name(found.module), name),
    )
    .map_err(|err| cctx.locate(err))?;

    cctx.tpdf_chain.push(key);
    let saved_pmod = std::mem::replace(&mut cctx.pmod, found.module);
    let saved_scope = std::mem::replace(&mut cctx.scope, found.scope);
    let result = compile_type(cctx, &found.tpdf.ty, tpdf_status, &found.tpdf.name);
    cctx.scope = saved_scope;
    cctx.pmod = saved_pmod;
    cctx.tpdf_chain.pop();

    let mut resolved = result?;
    resolved.ty.typedef = Some(cctx.sctx.intern(&found.tpdf.name));
    if let Some(default) = &found.tpdf.default {
        resolved.default = Some((default.clone(), found.module));
    }
    if let Some(units) = &found.tpdf.units {
        resolved.units = Some(units.clone());
    }
    Ok(resolved)
}

fn not_allowed(cctx: &CompileCtx<'_>, base: BuiltinType, what: &str) -> CompileError {
    cctx.invalid(format!(
        "Invalid type restrictions for {} type: \"{what}\" is not allowed.",
        base.as_str()
    ))
}

fn missing(cctx: &CompileCtx<'_>, base: BuiltinType, what: &str) -> CompileError {
    cctx.invalid(format!(
        "Missing {what} substatement for {} type.",
        base.as_str()
    ))
}

fn not_direct(cctx: &CompileCtx<'_>, base: BuiltinType, what: &str) -> CompileError {
    cctx.invalid(format!(
        "Invalid {what} substatement for the type not directly derived from {} built-in type.",
        base.as_str()
    ))
}

/// Apply the restrictions of `pty` on `ty`. `direct` is set when `pty`
/// names the built-in type itself.
fn apply_restrictions(
    cctx: &mut CompileCtx<'_>,
    ty: &mut Type,
    pty: &ParsedType,
    direct: bool,
    status: Status,
    owner: &str,
) -> CompileResult<()> {
    let base = ty.base;

    match (&mut ty.kind, pty.fraction_digits) {
        (TypeKind::Number { fraction_digits, .. }, fd) if base == BuiltinType::Decimal64 => {
            if direct {
                let fd = fd.ok_or_else(|| missing(cctx, base, "fraction-digits"))?;
                if !(1..=18).contains(&fd) {
                    return Err(cctx.invalid(format!(
                        "Invalid fraction-digits value {fd}, expected 1..18."
                    )));
                }
                *fraction_digits = Some(fd);
            } else if fd.is_some() {
                return Err(not_direct(cctx, base, "fraction-digits"));
            }
        }
        (_, Some(_)) => return Err(not_allowed(cctx, base, "fraction-digits")),
        _ => {}
    }

    if let Some(text) = &pty.range {
        match &mut ty.kind {
            TypeKind::Number {
                range,
                fraction_digits,
            } => {
                *range = parse_ranges(text, range, *fraction_digits, "range")
                    .map_err(|msg| cctx.invalid(msg))?;
            }
            _ => return Err(not_allowed(cctx, base, "range")),
        }
    }

    if let Some(text) = &pty.length {
        match &mut ty.kind {
            TypeKind::String { length } => {
                *length = parse_ranges(text, length, None, "length").map_err(|msg| cctx.invalid(msg))?;
            }
            _ => return Err(not_allowed(cctx, base, "length")),
        }
    }

    match &mut ty.kind {
        TypeKind::Enumeration(items) => {
            if !pty.enums.is_empty() {
                compile_enums(cctx, items, &pty.enums, direct)?;
            } else if direct {
                return Err(missing(cctx, base, "enum"));
            }
        }
        _ if !pty.enums.is_empty() => return Err(not_allowed(cctx, base, "enum")),
        _ => {}
    }

    match &mut ty.kind {
        TypeKind::Bits(items) => {
            if !pty.bits.is_empty() {
                compile_bits(cctx, items, &pty.bits, direct)?;
            } else if direct {
                return Err(missing(cctx, base, "bit"));
            }
        }
        _ if !pty.bits.is_empty() => return Err(not_allowed(cctx, base, "bit")),
        _ => {}
    }

    match &mut ty.kind {
        TypeKind::Identityref { bases } => {
            if !pty.bases.is_empty() {
                if !direct {
                    return Err(not_direct(cctx, base, "base"));
                }
                let pmod = cctx.pmod;
                compile_identity_bases(cctx, pmod, &pty.bases, BaseTarget::Identityref(bases))?;
            } else if direct {
                return Err(missing(cctx, base, "base"));
            }
        }
        _ if !pty.bases.is_empty() => return Err(not_allowed(cctx, base, "base")),
        _ => {}
    }

    match &mut ty.kind {
        TypeKind::Leafref(lref) => match &pty.path {
            Some(_) if !direct => return Err(not_direct(cctx, base, "path")),
            Some(path) => {
                let expr = Expr::parse(path).map_err(|err| cctx.invalid(err.to_string()))?;
                lref.path = Arc::new(expr);
                lref.pmod = cctx.pmod;
            }
            None if direct => return Err(missing(cctx, base, "path")),
            None => {}
        },
        _ if pty.path.is_some() => return Err(not_allowed(cctx, base, "path")),
        _ => {}
    }

    if let Some(value) = pty.require_instance {
        match &mut ty.kind {
            TypeKind::Leafref(lref) => lref.require_instance = value,
            TypeKind::InstanceIdentifier { require_instance } => *require_instance = value,
            _ => return Err(not_allowed(cctx, base, "require-instance")),
        }
    }

    match &mut ty.kind {
        TypeKind::Union(members) => {
            if !pty.types.is_empty() {
                if !direct {
                    return Err(not_direct(cctx, base, "type"));
                }
                for member in &pty.types {
                    members.push(compile_type(cctx, member, status, owner)?.ty);
                }
            } else if direct {
                return Err(missing(cctx, base, "type"));
            }
        }
        _ if !pty.types.is_empty() => return Err(not_allowed(cctx, base, "type")),
        _ => {}
    }

    Ok(())
}

fn compile_enums(
    cctx: &CompileCtx<'_>,
    items: &mut Vec<EnumItem>,
    penums: &[ParsedEnum],
    direct: bool,
) -> CompileResult<()> {
    let base_items = std::mem::take(items);
    let mut out: Vec<EnumItem> = Vec::new();
    let mut highest: Option<i64> = None;

    for penum in penums {
        if penum.name.is_empty() || penum.name.trim() != penum.name {
            return Err(cctx.invalid(format!(
                "Enum name \"{}\" must not be empty or have leading/trailing whitespace.",
                penum.name
            )));
        }
        let name = cctx.sctx.intern(&penum.name);
        if out.iter().any(|e| e.name == name) {
            return Err(cctx.invalid(format!(
                "Duplicate identifier \"{}\" of enum statement.",
                penum.name
            )));
        }

        let value = if direct {
            match (penum.value, highest) {
                (Some(v), _) => v,
                (None, None) => 0,
                (None, Some(h)) if h >= i32::MAX as i64 => {
                    return Err(cctx.invalid(format!(
                        "Invalid enumeration - it is not possible to auto-assign enum value for \"{}\" since the highest value is already 2147483647.",
                        penum.name
                    )))
                }
                (None, Some(h)) => h + 1,
            }
        } else {
            let Some(base) = base_items.iter().find(|e| e.name == name) else {
                return Err(cctx.invalid(format!(
                    "Invalid enumeration - derived type adds new item \"{}\".",
                    penum.name
                )));
            };
            if let Some(v) = penum.value {
                if v != base.value {
                    return Err(cctx.invalid(format!(
                        "Invalid enumeration - value of the item \"{}\" has changed from {} to {v} in the derived type.",
                        penum.name, base.value
                    )));
                }
            }
            base.value
        };

        if value < i32::MIN as i64 || value > i32::MAX as i64 {
            return Err(cctx.invalid(format!(
                "Invalid enumeration value {value} of \"{}\".",
                penum.name
            )));
        }
        if let Some(other) = out.iter().find(|e| e.value == value) {
            return Err(cctx.invalid(format!(
                "Invalid enumeration - value {value} collide in items \"{}\" and \"{}\".",
                cctx.sctx.str(other.name),
                penum.name
            )));
        }
        highest = Some(highest.map_or(value, |h| h.max(value)));
        out.push(EnumItem { name, value });
    }

    *items = out;
    Ok(())
}

fn compile_bits(
    cctx: &CompileCtx<'_>,
    items: &mut Vec<BitItem>,
    pbits: &[ParsedBit],
    direct: bool,
) -> CompileResult<()> {
    let base_items = std::mem::take(items);
    let mut out: Vec<BitItem> = Vec::new();
    let mut highest: Option<u32> = None;

    for pbit in pbits {
        let name = cctx.sctx.intern(&pbit.name);
        if out.iter().any(|b| b.name == name) {
            return Err(cctx.invalid(format!(
                "Duplicate identifier \"{}\" of bit statement.",
                pbit.name
            )));
        }

        let position = if direct {
            match (pbit.position, highest) {
                (Some(p), _) => p,
                (None, None) => 0,
                (None, Some(u32::MAX)) => {
                    return Err(cctx.invalid(format!(
                        "Invalid bits - it is not possible to auto-assign bit position for \"{}\" since the highest value is already 4294967295.",
                        pbit.name
                    )))
                }
                (None, Some(h)) => h + 1,
            }
        } else {
            let Some(base) = base_items.iter().find(|b| b.name == name) else {
                return Err(cctx.invalid(format!(
                    "Invalid bits - derived type adds new item \"{}\".",
                    pbit.name
                )));
            };
            if let Some(p) = pbit.position {
                if p != base.position {
                    return Err(cctx.invalid(format!(
                        "Invalid bits - position of the item \"{}\" has changed from {} to {p} in the derived type.",
                        pbit.name, base.position
                    )));
                }
            }
            base.position
        };

        if let Some(other) = out.iter().find(|b| b.position == position) {
            return Err(cctx.invalid(format!(
                "Invalid bits - position {position} collide in items \"{}\" and \"{}\".",
                cctx.sctx.str(other.name),
                pbit.name
            )));
        }
        highest = Some(highest.map_or(position, |h| h.max(position)));
        out.push(BitItem { name, position });
    }

    *items = out;
    Ok(())
}

/// Parse a `range` or `length` argument against the restriction it derives
/// from.
pub fn parse_ranges(
    text: &str,
    base: &RangeSet,
    fraction_digits: Option<u8>,
    kind: &str,
) -> Result<RangeSet, String> {
    let bound = |s: &str| -> Result<i128, String> {
        match s {
            "min" => base.min().ok_or_else(|| format!("Invalid {kind} restriction - empty base.")),
            "max" => base.max().ok_or_else(|| format!("Invalid {kind} restriction - empty base.")),
            _ => match fraction_digits {
                Some(fd) => parse_decimal(s, fd),
                None => s.parse::<i128>().ok(),
            }
            .ok_or_else(|| format!("Invalid {kind} restriction - invalid value \"{s}\".")),
        }
    };

    let mut parts: Vec<(i128, i128)> = Vec::new();
    for part in text.split('|') {
        let part = part.trim();
        let (lo, hi) = match part.split_once("..") {
            Some((lo, hi)) => (bound(lo.trim())?, bound(hi.trim())?),
            None => {
                let v = bound(part)?;
                (v, v)
            }
        };
        if lo > hi {
            return Err(format!(
                "Invalid {kind} restriction - lower bound is bigger than the upper bound ({part})."
            ));
        }
        if parts.last().is_some_and(|(_, prev)| lo <= *prev) {
            return Err(format!(
                "Invalid {kind} restriction - values are not in ascending order ({part})."
            ));
        }
        parts.push((lo, hi));
    }

    let set = RangeSet(parts);
    if !set.is_within(base) {
        return Err(format!(
            "Invalid {kind} restriction - the derived restriction ({text}) is not equally or more limiting."
        ));
    }
    Ok(set)
}

/// Parse a decimal number scaled by 10^fraction_digits.
pub fn parse_decimal(text: &str, fraction_digits: u8) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int, frac) = digits.split_once('.').unwrap_or((digits, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int.is_empty() && frac.is_empty())
        || !all_digits(int)
        || !all_digits(frac)
        || frac.len() > fraction_digits as usize
    {
        return None;
    }

    let scale = 10i128.checked_pow(fraction_digits as u32)?;
    let int: i128 = if int.is_empty() { 0 } else { int.parse().ok()? };
    let mut frac_value: i128 = if frac.is_empty() { 0 } else { frac.parse().ok()? };
    for _ in frac.len()..fraction_digits as usize {
        frac_value *= 10;
    }
    let value = int.checked_mul(scale)?.checked_add(frac_value)?;
    Some(if negative { -value } else { value })
}

/// Check a default value against a type, returning its canonical form.
/// Prefixes in the value resolve against `pmod`.
pub fn parse_value(cctx: &CompileCtx<'_>, ty: &Type, text: &str, pmod: ModuleId) -> CompileResult<Value> {
    value_of(cctx.sctx, ty, text, pmod).map_err(|reason| {
        cctx.invalid(format!(
            "Invalid default - value \"{text}\" does not fit the type ({reason})."
        ))
    })
}

fn value_of(sctx: &SchemaContext, ty: &Type, text: &str, pmod: ModuleId) -> Result<Value, String> {
    match &ty.kind {
        TypeKind::Plain => match (ty.base, text) {
            (BuiltinType::Boolean, "true") => Ok(Value::Bool(true)),
            (BuiltinType::Boolean, "false") => Ok(Value::Bool(false)),
            (BuiltinType::Boolean, _) => Err("invalid boolean value".to_string()),
            _ => Err("type empty cannot have a value".to_string()),
        },
        TypeKind::Number {
            range,
            fraction_digits,
        } => {
            let value = match fraction_digits {
                Some(fd) => parse_decimal(text, *fd).ok_or("invalid decimal64 value")?,
                None => text.parse::<i128>().map_err(|_| "invalid integer value")?,
            };
            if !range.contains(value) {
                return Err("value is out of the allowed range".to_string());
            }
            Ok(match fraction_digits {
                Some(fd) => Value::Decimal {
                    value,
                    fraction_digits: *fd,
                },
                None => Value::Int(value),
            })
        }
        TypeKind::String { length } => {
            if ty.base == BuiltinType::String && !length.contains(text.chars().count() as i128) {
                return Err("length is out of the allowed range".to_string());
            }
            Ok(Value::String(sctx.intern(text)))
        }
        TypeKind::Enumeration(items) => items
            .iter()
            .find(|e| &*sctx.str(e.name) == text)
            .map(|e| Value::Enum(e.name))
            .ok_or_else(|| "unknown enumeration item".to_string()),
        TypeKind::Bits(items) => {
            let mut set = Vec::new();
            for word in text.split_whitespace() {
                let bit = items
                    .iter()
                    .find(|b| &*sctx.str(b.name) == word)
                    .ok_or_else(|| format!("unknown bit \"{word}\""))?;
                if set.contains(&bit.name) {
                    return Err(format!("duplicate bit \"{word}\""));
                }
                set.push(bit.name);
            }
            Ok(Value::Bits(set))
        }
        TypeKind::Identityref { bases } => {
            let (prefix, name) = split_prefix(text);
            let module = sctx
                .resolve_opt_prefix(pmod, prefix)
                .map_err(|err| err.message().to_string())?;
            let ident = sctx
                .find_identity(module, name)
                .ok_or_else(|| format!("identity \"{text}\" not found"))?;
            if !bases.iter().any(|b| is_derived_from(sctx, ident, *b)) {
                return Err(format!(
                    "identity \"{text}\" is not derived from any base of the identityref"
                ));
            }
            Ok(Value::Identity(ident))
        }
        TypeKind::InstanceIdentifier { .. } => {
            Expr::parse(text).map_err(|err| err.to_string())?;
            Ok(Value::InstanceId(sctx.intern(text)))
        }
        TypeKind::Leafref(lref) => match &lref.realtype {
            Some(real) => value_of(sctx, real, text, pmod),
            None => Ok(Value::String(sctx.intern(text))),
        },
        TypeKind::Union(members) => members
            .iter()
            .find_map(|m| value_of(sctx, m, text, pmod).ok())
            .ok_or_else(|| "no member type of the union accepts the value".to_string()),
    }
}

/// Locations of every leafref inside a type, as union member index paths.
pub fn leafref_slots(ty: &Type) -> Vec<Vec<usize>> {
    fn walk(ty: &Type, prefix: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        match &ty.kind {
            TypeKind::Leafref(_) => out.push(prefix.clone()),
            TypeKind::Union(members) => {
                for (i, member) in members.iter().enumerate() {
                    prefix.push(i);
                    walk(member, prefix, out);
                    prefix.pop();
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(ty, &mut Vec::new(), &mut out);
    out
}

pub fn type_at<'t>(ty: &'t Type, slot: &[usize]) -> Option<&'t Type> {
    match slot.split_first() {
        None => Some(ty),
        Some((i, rest)) => match &ty.kind {
            TypeKind::Union(members) => type_at(members.get(*i)?, rest),
            _ => None,
        },
    }
}

pub fn type_at_mut<'t>(ty: &'t mut Type, slot: &[usize]) -> Option<&'t mut Type> {
    match slot.split_first() {
        None => Some(ty),
        Some((i, rest)) => match &mut ty.kind {
            TypeKind::Union(members) => type_at_mut(members.get_mut(*i)?, rest),
            _ => None,
        },
    }
}
