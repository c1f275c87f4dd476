//! Structural assertions over AST nodes.
//!
//! Every helper fails with a shape mismatch naming the idiom being matched
//! and the offending node's location.

use crate::ast::{Cursor, CursorKind};
use crate::error::{Error, Result};
use crate::model::{Literal, TypeDesc};

use super::idioms::{CLASS_DEF, ENUM_DEF};

/// Skip value-preserving wrappers down to the meaningful expression.
pub fn unwrap(mut cursor: Cursor<'_>) -> Cursor<'_> {
    while cursor.kind().is_transparent() && cursor.child_count() == 1 {
        match cursor.child(0) {
            Some(inner) => cursor = inner,
            None => break,
        }
    }
    cursor
}

/// Split a call into its receiver object (member calls) and its explicit
/// arguments; defaulted arguments are dropped.
pub fn call_parts<'tu>(call: Cursor<'tu>) -> (Option<Cursor<'tu>>, Vec<Cursor<'tu>>) {
    let receiver = call
        .child(0)
        .map(unwrap)
        .filter(|callee| callee.kind() == CursorKind::MemberRef)
        .and_then(|callee| callee.child(0));
    let args = call
        .children()
        .skip(1)
        .filter(|arg| arg.kind() != CursorKind::DefaultArg)
        .collect();
    (receiver, args)
}

pub fn expect_args(
    idiom: &'static str,
    call: Cursor<'_>,
    args: &[Cursor<'_>],
    min: usize,
    max: usize,
) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(Error::shape(
            idiom,
            call.location(),
            format!("expected {} arguments, found {}", expected, args.len()),
        ));
    }
    Ok(())
}

/// A compile-time string literal argument.
pub fn string_literal(idiom: &'static str, arg: Cursor<'_>) -> Result<String> {
    let inner = unwrap(arg);
    match (inner.kind(), inner.value()) {
        (CursorKind::StringLiteral, Some(text)) => Ok(text.to_string()),
        _ => Err(Error::shape(
            idiom,
            inner.location(),
            format!("expected a string literal, found {}", inner.kind()),
        )),
    }
}

/// A doc string argument: a literal or `nullptr`. Empty text counts as absent.
pub fn doc_text(idiom: &'static str, arg: Cursor<'_>) -> Result<Option<String>> {
    let inner = unwrap(arg);
    if inner.kind() == CursorKind::NullPtrLiteral {
        return Ok(None);
    }
    let text = string_literal(idiom, inner)?;
    if text.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

pub fn is_null(arg: Cursor<'_>) -> bool {
    unwrap(arg).kind() == CursorKind::NullPtrLiteral
}

/// Best-effort literal value of a constant expression.
pub fn literal(arg: Cursor<'_>) -> Option<Literal> {
    let inner = unwrap(arg);
    let value = inner.value();
    match inner.kind() {
        CursorKind::IntegerLiteral => value.map(|v| Literal::Integer(trim_suffix(v))),
        CursorKind::FloatingLiteral => value.map(|v| Literal::Float(trim_suffix(v))),
        CursorKind::BoolLiteral => value.map(|v| Literal::Bool(v == "true")),
        CursorKind::StringLiteral => value.map(|v| Literal::String(v.to_string())),
        CursorKind::UnaryOperator if inner.spelling() == "-" => match literal(inner.child(0)?)? {
            Literal::Integer(v) => Some(Literal::Integer(negate(&v))),
            Literal::Float(v) => Some(Literal::Float(negate(&v))),
            _ => None,
        },
        CursorKind::UnaryOperator if inner.spelling() == "+" => literal(inner.child(0)?),
        CursorKind::DeclRef => {
            let target = inner.referenced()?;
            match target.kind() {
                CursorKind::EnumConstant => {
                    target.value().map(|v| Literal::Integer(v.to_string()))
                }
                CursorKind::Var => target.children().find_map(literal),
                _ => None,
            }
        }
        // Folded constant expressions carry their value.
        CursorKind::Unexposed => match value {
            Some(v) if v.parse::<i128>().is_ok() => Some(Literal::Integer(v.to_string())),
            _ => inner.child(0).and_then(literal),
        },
        _ => None,
    }
}

fn trim_suffix(value: &str) -> String {
    let is_hex = value.starts_with("0x") || value.starts_with("0X");
    value
        .trim_end_matches(|c: char| {
            matches!(c, 'u' | 'U' | 'l' | 'L') || (!is_hex && matches!(c, 'f' | 'F'))
        })
        .to_string()
}

fn negate(value: &str) -> String {
    match value.strip_prefix('-') {
        Some(positive) => positive.to_string(),
        None => format!("-{}", value),
    }
}

/// `ClassDef<T, S>` handle type: the C++ type and the shadow key.
pub fn class_handle(idiom: &'static str, expr: Cursor<'_>) -> Result<(TypeDesc, String)> {
    let ty = expr_type(idiom, expr)?;
    if ty.name.trim_start_matches("::") != CLASS_DEF || ty.arg_count() != 2 {
        return Err(Error::shape(
            idiom,
            expr.location(),
            format!("expected a `{}<T, S>` expression, found `{}`", CLASS_DEF, ty),
        ));
    }
    let cpp_type = ty.arg(0).cloned().unwrap_or_else(|| TypeDesc::named(""));
    let shadow = ty.arg(1).map(|s| s.to_string()).unwrap_or_default();
    Ok((cpp_type, shadow))
}

/// `EnumDef<E>` handle type: the enum's C++ name.
pub fn enum_handle(idiom: &'static str, expr: Cursor<'_>) -> Result<String> {
    let ty = expr_type(idiom, expr)?;
    match ty.arg(0) {
        Some(arg) if ty.name.trim_start_matches("::") == ENUM_DEF && ty.arg_count() == 1 => {
            Ok(arg.to_string())
        }
        _ => Err(Error::shape(
            idiom,
            expr.location(),
            format!("expected a `{}<E>` expression, found `{}`", ENUM_DEF, ty),
        )),
    }
}

fn expr_type(idiom: &'static str, expr: Cursor<'_>) -> Result<TypeDesc> {
    expr.type_desc()
        .or_else(|| unwrap(expr).type_desc())
        .ok_or_else(|| Error::shape(idiom, expr.location(), "expression has no type"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstBuilder, NodeSpec};

    #[test]
    fn test_unwrap_skips_casts_and_parens() {
        let mut b = AstBuilder::new("t.cpp");
        let root = b.root();
        let cast = b.push(Some(root), NodeSpec::new(CursorKind::ImplicitCast, ""));
        let paren = b.push(Some(cast), NodeSpec::new(CursorKind::Paren, ""));
        b.push(
            Some(paren),
            NodeSpec::new(CursorKind::StringLiteral, "").value("hello"),
        );
        let tu = b.finish();
        let arg = tu.root().child(0).unwrap();
        assert_eq!(unwrap(arg).kind(), CursorKind::StringLiteral);
        assert_eq!(string_literal("add_method", arg).unwrap(), "hello");
    }

    #[test]
    fn test_non_literal_string_is_shape_mismatch() {
        let mut b = AstBuilder::new("t.cpp");
        let root = b.root();
        b.push(Some(root), NodeSpec::new(CursorKind::CallExpr, "make_name"));
        let tu = b.finish();
        let err = string_literal("add_method", tu.root().child(0).unwrap()).unwrap_err();
        assert!(err.to_string().contains("expected a string literal"));
    }

    #[test]
    fn test_negative_and_suffixed_literals() {
        let mut b = AstBuilder::new("t.cpp");
        let root = b.root();
        let neg = b.push(Some(root), NodeSpec::new(CursorKind::UnaryOperator, "-"));
        b.push(Some(neg), NodeSpec::new(CursorKind::IntegerLiteral, "").value("42ul"));
        b.push(Some(root), NodeSpec::new(CursorKind::FloatingLiteral, "").value("2.5f"));
        let tu = b.finish();
        assert_eq!(
            literal(tu.root().child(0).unwrap()),
            Some(Literal::Integer("-42".to_string()))
        );
        assert_eq!(
            literal(tu.root().child(1).unwrap()),
            Some(Literal::Float("2.5".to_string()))
        );
    }

    #[test]
    fn test_class_handle_reads_both_keys() {
        let mut b = AstBuilder::new("t.cpp");
        let root = b.root();
        b.push(
            Some(root),
            NodeSpec::new(CursorKind::CallExpr, "declare_class")
                .ty("pyembed::ClassDef<gfx::Widget, WidgetShadow>"),
        );
        let tu = b.finish();
        let (cpp_type, shadow) = class_handle("declare_class", tu.root().child(0).unwrap()).unwrap();
        assert_eq!(cpp_type, TypeDesc::named("gfx::Widget"));
        assert_eq!(shadow, "WidgetShadow");
    }
}
