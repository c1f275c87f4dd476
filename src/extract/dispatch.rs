//! Dispatcher analysis: finding the call a registration really performs.
//!
//! A dispatcher is a lambda or a function reference handed to the
//! embedding layer. Its own signature is an adapter; the parameter and
//! return types come from the single expression its body evaluates.

use crate::ast::{Cursor, CursorKind};
use crate::error::{Error, Result};
use crate::model::{split_function_type, Parameter, Signature, TypeDesc};

use super::shape::unwrap;

/// What a dispatcher ends up doing.
#[derive(Debug, Clone, Copy)]
pub enum Target<'tu> {
    /// Calls a function or method. `site` is the call expression inside a
    /// lambda body; absent for direct function references.
    Call {
        decl: Cursor<'tu>,
        site: Option<Cursor<'tu>>,
    },
    /// Constructs an object through `decl`.
    Construct { decl: Cursor<'tu> },
    /// Reads a data member.
    FieldRead { field: Cursor<'tu> },
    /// Assigns a data member.
    FieldWrite { field: Cursor<'tu> },
}

impl<'tu> Target<'tu> {
    /// Whether the target takes its receiver implicitly (`obj.method()`).
    pub fn is_member(&self) -> bool {
        match self {
            Target::Call { decl, .. } => decl.kind() == CursorKind::Method && !decl.is_static(),
            Target::FieldRead { .. } | Target::FieldWrite { .. } => true,
            Target::Construct { .. } => false,
        }
    }

    pub fn decl(&self) -> Cursor<'tu> {
        match *self {
            Target::Call { decl, .. } | Target::Construct { decl } => decl,
            Target::FieldRead { field } | Target::FieldWrite { field } => field,
        }
    }

    /// Parameters as declared by the target, receiver included for free
    /// functions.
    pub fn params(&self) -> Vec<Parameter> {
        match self {
            Target::Call { decl, .. } | Target::Construct { decl } => declared_params(*decl),
            Target::FieldRead { .. } => Vec::new(),
            Target::FieldWrite { field } => vec![Parameter {
                name: "value".to_string(),
                ty: field.type_desc().unwrap_or_else(|| TypeDesc::named("object")),
            }],
        }
    }

    /// Return type; `None` for constructions.
    pub fn return_type(&self) -> Option<TypeDesc> {
        match self {
            Target::Call { decl, site } => site
                .and_then(|s| s.type_desc())
                .or_else(|| decl.result_ty().map(TypeDesc::parse))
                .or_else(|| Some(TypeDesc::named("void"))),
            Target::Construct { .. } => None,
            Target::FieldRead { field } => field.type_desc(),
            Target::FieldWrite { .. } => Some(TypeDesc::named("void")),
        }
    }

    pub fn raw_signature(&self) -> String {
        self.decl().ty().unwrap_or_default().to_string()
    }

    /// Qualified C++ name and type of the target, for diagnostics.
    pub fn cpp_signature(&self) -> String {
        let decl = self.decl();
        match decl.ty() {
            Some(ty) => format!("{}: {}", decl.qualified_name(), ty),
            None => decl.qualified_name(),
        }
    }

    /// Signature with the first `skip` declared parameters hidden.
    pub fn signature(&self, skip: usize) -> Signature {
        Signature {
            return_type: self.return_type(),
            params: self.params().into_iter().skip(skip).collect(),
            raw_signature: self.raw_signature(),
        }
    }
}

fn declared_params(decl: Cursor<'_>) -> Vec<Parameter> {
    let params: Vec<Parameter> = decl
        .children_of_kind(CursorKind::Parm)
        .map(|p| Parameter {
            name: p.spelling().to_string(),
            ty: p.type_desc().unwrap_or_else(|| TypeDesc::named("object")),
        })
        .collect();
    if !params.is_empty() {
        return params;
    }
    // Declarations known only by reference carry no parameter nodes.
    decl.ty()
        .and_then(split_function_type)
        .map(|(_, spellings)| {
            spellings
                .iter()
                .map(|s| Parameter {
                    name: String::new(),
                    ty: TypeDesc::parse(s),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Locate the real target of dispatcher argument `arg`.
pub fn analyze<'tu>(idiom: &'static str, arg: Cursor<'tu>) -> Result<Target<'tu>> {
    let inner = unwrap(arg);
    match inner.kind() {
        CursorKind::LambdaExpr => lambda_target(idiom, inner),
        CursorKind::DeclRef => function_reference(idiom, inner),
        CursorKind::UnaryOperator if inner.spelling() == "&" => match inner.child(0).map(unwrap) {
            Some(target) if target.kind() == CursorKind::DeclRef => {
                function_reference(idiom, target)
            }
            _ => Err(Error::shape(
                idiom,
                inner.location(),
                "expected `&function` as dispatcher",
            )),
        },
        other => Err(Error::shape(
            idiom,
            inner.location(),
            format!(
                "expected a lambda or function reference as dispatcher, found {}",
                other
            ),
        )),
    }
}

fn function_reference<'tu>(idiom: &'static str, reference: Cursor<'tu>) -> Result<Target<'tu>> {
    match reference.referenced() {
        Some(decl) if decl.kind().is_function_like() => Ok(Target::Call { decl, site: None }),
        _ => Err(Error::shape(
            idiom,
            reference.location(),
            format!("`{}` does not name a function", reference.spelling()),
        )),
    }
}

/// The closure's `operator()` body, or the lambda's own body statement.
fn lambda_body<'tu>(lambda: Cursor<'tu>) -> Option<Cursor<'tu>> {
    let via_closure = lambda
        .children()
        .filter(|c| c.kind().is_record())
        .flat_map(|record| record.children_of_kind(CursorKind::Method))
        .find(|m| m.spelling() == "operator()")
        .and_then(|call_op| call_op.children_of_kind(CursorKind::CompoundStmt).next());
    via_closure.or_else(|| lambda.children_of_kind(CursorKind::CompoundStmt).last())
}

fn lambda_target<'tu>(idiom: &'static str, lambda: Cursor<'tu>) -> Result<Target<'tu>> {
    let body = lambda_body(lambda).ok_or_else(|| {
        Error::shape(idiom, lambda.location(), "dispatcher lambda has no body")
    })?;
    if body.child_count() != 1 {
        return Err(Error::shape(
            idiom,
            body.location(),
            format!(
                "dispatcher body must be a single statement, found {}",
                body.child_count()
            ),
        ));
    }
    let mut statement = body.child(0).ok_or_else(|| {
        Error::shape(idiom, body.location(), "dispatcher body is empty")
    })?;
    if statement.kind() == CursorKind::ReturnStmt {
        statement = statement.child(0).ok_or_else(|| {
            Error::shape(idiom, statement.location(), "dispatcher returns no value")
        })?;
    }
    let expr = unwrap(statement);
    match expr.kind() {
        CursorKind::CallExpr => match expr.referenced() {
            Some(decl) => Ok(Target::Call {
                decl,
                site: Some(expr),
            }),
            None => Err(Error::shape(
                idiom,
                expr.location(),
                format!("cannot resolve the function called as `{}`", expr.spelling()),
            )),
        },
        CursorKind::ConstructExpr => match expr.referenced() {
            Some(decl) => Ok(Target::Construct { decl }),
            None => Err(Error::shape(
                idiom,
                expr.location(),
                "cannot resolve the constructor being called",
            )),
        },
        CursorKind::MemberRef => match expr.referenced() {
            Some(field) if field.kind() == CursorKind::Field => Ok(Target::FieldRead { field }),
            _ => Err(Error::shape(
                idiom,
                expr.location(),
                format!("`{}` is not a data member", expr.spelling()),
            )),
        },
        CursorKind::BinaryOperator if expr.spelling() == "=" => {
            let lhs = expr.child(0).map(unwrap);
            match lhs.and_then(|l| l.referenced().filter(|_| l.kind() == CursorKind::MemberRef)) {
                Some(field) if field.kind() == CursorKind::Field => {
                    Ok(Target::FieldWrite { field })
                }
                _ => Err(Error::shape(
                    idiom,
                    expr.location(),
                    "assignment dispatcher must assign a data member",
                )),
            }
        }
        other => Err(Error::shape(
            idiom,
            expr.location(),
            format!("dispatcher must call a function, found {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstBuilder, Location, NodeId, NodeSpec};

    /// `[](Widget& self, int n) { return self.grow(n); }` with `Widget::grow`.
    fn lambda_unit(statements: usize) -> (crate::ast::TranslationUnit, NodeId) {
        let mut b = AstBuilder::new("w.cpp");
        let root = b.root();
        let class = b.push(Some(root), NodeSpec::new(CursorKind::ClassDecl, "Widget"));
        let grow = b.push(
            Some(class),
            NodeSpec::new(CursorKind::Method, "grow").ty("double (int)"),
        );
        b.push(Some(grow), NodeSpec::new(CursorKind::Parm, "amount").ty("int"));

        let lambda = b.push(
            Some(root),
            NodeSpec::new(CursorKind::LambdaExpr, "").at(Location::new("w.cpp", 9, 3)),
        );
        let closure = b.push(Some(lambda), NodeSpec::new(CursorKind::ClassDecl, ""));
        let call_op = b.push(
            Some(closure),
            NodeSpec::new(CursorKind::Method, "operator()").ty("double (Widget &, int) const"),
        );
        let body = b.push(Some(call_op), NodeSpec::new(CursorKind::CompoundStmt, ""));
        for _ in 0..statements {
            let ret = b.push(Some(body), NodeSpec::new(CursorKind::ReturnStmt, ""));
            let call = b.push(
                Some(ret),
                NodeSpec::new(CursorKind::CallExpr, "grow").ty("double"),
            );
            b.set_referenced(call, grow);
        }
        (b.finish(), lambda)
    }

    #[test]
    fn test_lambda_drills_into_called_method() {
        let (tu, lambda) = lambda_unit(1);
        let target = analyze("add_method", tu.cursor(lambda)).unwrap();
        assert!(target.is_member());
        let sig = target.signature(0);
        assert_eq!(sig.return_type, Some(TypeDesc::named("double")));
        assert_eq!(sig.params.len(), 1);
        assert_eq!(sig.params[0].name, "amount");
        assert_eq!(sig.params[0].ty, TypeDesc::named("int"));
        assert_eq!(target.cpp_signature(), "Widget::grow: double (int)");
    }

    #[test]
    fn test_multi_statement_body_is_rejected() {
        let (tu, lambda) = lambda_unit(2);
        let err = analyze("add_method", tu.cursor(lambda)).unwrap_err();
        assert!(err.to_string().contains("single statement"));
    }

    #[test]
    fn test_function_reference_without_parameter_nodes() {
        let mut b = AstBuilder::new("f.cpp");
        let root = b.root();
        let decl = b.push(None, NodeSpec::new(CursorKind::Function, "scale").ty("float (float, int)"));
        let addr = b.push(Some(root), NodeSpec::new(CursorKind::UnaryOperator, "&"));
        let reference = b.push(Some(addr), NodeSpec::new(CursorKind::DeclRef, "scale"));
        b.set_referenced(reference, decl);
        let tu = b.finish();

        let target = analyze("add_function", tu.root().child(0).unwrap()).unwrap();
        assert!(!target.is_member());
        let sig = target.signature(0);
        assert_eq!(sig.return_type, Some(TypeDesc::named("float")));
        assert_eq!(
            sig.params.iter().map(|p| p.ty.name.as_str()).collect::<Vec<_>>(),
            vec!["float", "int"]
        );
        assert!(sig.params.iter().all(|p| p.name.is_empty()));
    }

    #[test]
    fn test_field_assignment_target() {
        let mut b = AstBuilder::new("p.cpp");
        let root = b.root();
        let class = b.push(Some(root), NodeSpec::new(CursorKind::StructDecl, "Point"));
        let field = b.push(Some(class), NodeSpec::new(CursorKind::Field, "x").ty("double"));
        let lambda = b.push(Some(root), NodeSpec::new(CursorKind::LambdaExpr, ""));
        let body = b.push(Some(lambda), NodeSpec::new(CursorKind::CompoundStmt, ""));
        let assign = b.push(Some(body), NodeSpec::new(CursorKind::BinaryOperator, "="));
        let member = b.push(Some(assign), NodeSpec::new(CursorKind::MemberRef, "x"));
        b.set_referenced(member, field);
        b.push(Some(assign), NodeSpec::new(CursorKind::DeclRef, "v"));
        let tu = b.finish();

        let target = analyze("add_property", tu.cursor(lambda)).unwrap();
        assert!(matches!(target, Target::FieldWrite { .. }));
        assert_eq!(target.params()[0].ty, TypeDesc::named("double"));
    }
}
