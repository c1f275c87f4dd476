//! Recognition of registration idioms in one translation unit.
//!
//! The walk is post-order, so the inner calls of a chain
//! (`declare_class(...).add_method(...).add_method(...)`) are seen before
//! the outer ones and overloads keep their source order. Only call
//! expressions and record declarations are inspected; everything else is
//! just traversed.

mod dispatch;
mod exporter;
mod idioms;
mod shape;

use indexmap::IndexMap;

use crate::ast::{Cursor, CursorKind, Location, TranslationUnit};
use crate::error::{Error, Result};
use crate::model::{
    BindingModel, CallableDef, ConstantDef, GetSetter, Literal, Parameter, Signature, TypeDesc,
};

pub use dispatch::Target;
pub use idioms::{reflected_operator, Idiom};

use idioms::{CLASS_DEF, EMBEDDING_NAMESPACE, MODULE_DEF};
use shape::{call_parts, doc_text, expect_args, literal, string_literal, unwrap};

/// Build the fragment of the binding model declared by `tu`.
pub fn extract(tu: &TranslationUnit) -> Result<BindingModel> {
    let mut extractor = Extractor::new(tu);
    extractor.walk()?;
    Ok(extractor.model)
}

struct Extractor<'tu> {
    tu: &'tu TranslationUnit,
    model: BindingModel,
}

/// The object a module or class idiom is called on.
enum Receiver {
    Module(String),
    Class { shadow: String, cpp_type: TypeDesc },
}

impl<'tu> Extractor<'tu> {
    fn new(tu: &'tu TranslationUnit) -> Self {
        Self {
            tu,
            model: BindingModel::new(),
        }
    }

    fn walk(&mut self) -> Result<()> {
        let mut stack = vec![(self.tu.root(), false, false)];
        while let Some((cursor, visited, in_layer)) = stack.pop() {
            if visited {
                self.inspect(cursor, in_layer)?;
                continue;
            }
            // Template patterns, and the implicit instantiations listed
            // under them, are not registrations.
            if matches!(
                cursor.kind(),
                CursorKind::ClassTemplate | CursorKind::FunctionTemplate
            ) {
                continue;
            }
            let in_layer = in_layer || is_embedding_namespace(cursor);
            stack.push((cursor, true, in_layer));
            let children: Vec<Cursor<'tu>> = cursor.children().collect();
            for child in children.into_iter().rev() {
                stack.push((child, false, in_layer));
            }
        }
        Ok(())
    }

    /// Calls inside the embedding layer's own namespace are its
    /// implementation, not registrations; its exporters still count.
    fn inspect(&mut self, cursor: Cursor<'tu>, in_layer: bool) -> Result<()> {
        match cursor.kind() {
            CursorKind::CallExpr if !in_layer => self.inspect_call(cursor),
            CursorKind::StructDecl | CursorKind::ClassDecl | CursorKind::PartialSpecialization => {
                self.inspect_record(cursor)
            }
            _ => Ok(()),
        }
    }

    fn inspect_record(&mut self, record: Cursor<'tu>) -> Result<()> {
        if !exporter::is_exporter(record) {
            return Ok(());
        }
        let rule = exporter::rule_from(record)?;
        tracing::trace!(matched = %rule.matched_type, at = %rule.location, "type exporter");
        self.model.add_rule(rule)
    }

    fn inspect_call(&mut self, call: Cursor<'tu>) -> Result<()> {
        let idiom = match Idiom::from_spelling(call.spelling()) {
            Some(idiom) => idiom,
            None => return Ok(()),
        };
        match call.type_desc() {
            Some(result) if idiom.accepts(&result) => {}
            _ => return Ok(()),
        }
        tracing::trace!(idiom = idiom.name(), at = %call.location(), "registration");

        let (receiver, args) = call_parts(call);
        match idiom {
            Idiom::DeclareModule => self.declare_module(call, &args),
            Idiom::DeclareClass => self.declare_class(call, &args),
            Idiom::DeclareEnum => self.declare_enum(call, &args),
            Idiom::AddFunction => self.add_function(call, receiver, &args),
            Idiom::AddClass => self.add_class(call, receiver, &args),
            Idiom::AddEnum => self.add_enum(call, receiver, &args),
            Idiom::AddConstructor => self.add_constructor(call, receiver, &args),
            Idiom::AddMethod => self.add_method(call, receiver, &args, false),
            Idiom::AddStaticMethod => self.add_method(call, receiver, &args, true),
            Idiom::AddProperty => self.add_property(call, receiver, &args),
            Idiom::AddStaticConstant => self.add_static_constant(call, receiver, &args),
            Idiom::AddInnerClass => self.add_inner_class(call, receiver, &args),
            Idiom::AddInnerEnum => self.add_inner_enum(call, receiver, &args),
            Idiom::AddImplicitConverter => self.add_implicit_converter(call, receiver, &args),
        }
    }

    // ---- declarations ---------------------------------------------------

    fn declare_module(&mut self, call: Cursor<'tu>, args: &[Cursor<'tu>]) -> Result<()> {
        const IDIOM: &str = "declare_module";
        expect_args(IDIOM, call, args, 2, 2)?;
        let name = string_literal(IDIOM, args[0])?;
        let doc = doc_text(IDIOM, args[1])?;
        let key = declared_module_key(call, &name);
        self.model.declare_module(&key, &name, doc, call.location())
    }

    fn declare_class(&mut self, call: Cursor<'tu>, args: &[Cursor<'tu>]) -> Result<()> {
        const IDIOM: &str = "declare_class";
        expect_args(IDIOM, call, args, 2, 3)?;
        let (cpp_type, shadow) = shape::class_handle(IDIOM, call)?;
        let name = string_literal(IDIOM, args[0])?;
        let doc = doc_text(IDIOM, args[1])?;
        let parent = match args.get(2) {
            Some(arg) => {
                let (parent_type, parent_shadow) = shape::class_handle(IDIOM, *arg)?;
                self.model
                    .class_entry(&parent_shadow, &parent_type, arg.location())?;
                Some(parent_shadow)
            }
            None => None,
        };
        self.model
            .declare_class(&shadow, &cpp_type, &name, doc, parent, call.location())
    }

    fn declare_enum(&mut self, call: Cursor<'tu>, args: &[Cursor<'tu>]) -> Result<()> {
        const IDIOM: &str = "declare_enum";
        expect_args(IDIOM, call, args, 2, 3)?;
        let cpp_name = shape::enum_handle(IDIOM, call)?;
        let name = string_literal(IDIOM, args[0])?;
        let doc = doc_text(IDIOM, args[1])?;
        let values = match args.get(2) {
            Some(list) => explicit_enum_values(IDIOM, *list)?,
            None => self.declared_enum_values(&cpp_name),
        };
        self.model
            .declare_enum(&cpp_name, &name, doc, values, call.location())
    }

    /// Enumerators of the C++ enum: explicit values where known, otherwise
    /// counted up from the previous one.
    fn declared_enum_values(&self, cpp_name: &str) -> IndexMap<String, Option<Literal>> {
        let mut values = IndexMap::new();
        let decl = match self.tu.type_declaration(cpp_name) {
            Some(decl) => decl,
            None => {
                tracing::debug!(cpp_name, "enum declaration not found; values left empty");
                return values;
            }
        };
        let mut previous: Option<i128> = Some(-1);
        for constant in decl.children_of_kind(CursorKind::EnumConstant) {
            let value = match constant.value() {
                Some(v) => v.parse::<i128>().ok(),
                None => previous.map(|p| p + 1),
            };
            values.insert(
                constant.spelling().to_string(),
                value.map(|v| Literal::Integer(v.to_string())),
            );
            previous = value;
        }
        values
    }

    // ---- module idioms --------------------------------------------------

    fn add_function(
        &mut self,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
        args: &[Cursor<'tu>],
    ) -> Result<()> {
        const IDIOM: &str = "add_function";
        expect_args(IDIOM, call, args, 3, 3)?;
        let module = self.module_receiver(IDIOM, call, receiver)?;
        let name = string_literal(IDIOM, args[0])?;
        let doc = doc_text(IDIOM, args[1])?;
        let target = dispatch::analyze(IDIOM, args[2])?;
        let def = callable(&target, target.signature(0), doc, false, call.location());
        self.model.module_entry(&module).add_function(name, def);
        Ok(())
    }

    fn add_class(
        &mut self,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
        args: &[Cursor<'tu>],
    ) -> Result<()> {
        const IDIOM: &str = "add_class";
        expect_args(IDIOM, call, args, 1, 1)?;
        let module = self.module_receiver(IDIOM, call, receiver)?;
        let (cpp_type, shadow) = shape::class_handle(IDIOM, args[0])?;
        self.model.class_entry(&shadow, &cpp_type, call.location())?;
        self.model
            .module_entry(&module)
            .add_inner_class(&shadow, call.location())
    }

    fn add_enum(
        &mut self,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
        args: &[Cursor<'tu>],
    ) -> Result<()> {
        const IDIOM: &str = "add_enum";
        expect_args(IDIOM, call, args, 1, 1)?;
        let module = self.module_receiver(IDIOM, call, receiver)?;
        let cpp_name = shape::enum_handle(IDIOM, args[0])?;
        self.model.enum_entry(&cpp_name);
        self.model
            .module_entry(&module)
            .add_inner_enum(&cpp_name, call.location())
    }

    // ---- class idioms ---------------------------------------------------

    fn add_constructor(
        &mut self,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
        args: &[Cursor<'tu>],
    ) -> Result<()> {
        const IDIOM: &str = "add_constructor";
        expect_args(IDIOM, call, args, 2, 2)?;
        let (shadow, cpp_type) = self.class_receiver(IDIOM, call, receiver)?;
        let doc = doc_text(IDIOM, args[0])?;
        let target = dispatch::analyze(IDIOM, args[1])?;
        if matches!(target, Target::FieldRead { .. } | Target::FieldWrite { .. }) {
            return Err(Error::shape(
                IDIOM,
                call.location(),
                "constructor dispatcher must construct an object or call a factory",
            ));
        }
        let mut signature = target.signature(0);
        signature.return_type = None;
        let def = callable(&target, signature, doc, false, call.location());
        self.model
            .class_entry(&shadow, &cpp_type, call.location())?
            .add_constructor(def);
        Ok(())
    }

    fn add_method(
        &mut self,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
        args: &[Cursor<'tu>],
        is_static: bool,
    ) -> Result<()> {
        let idiom = if is_static {
            "add_static_method"
        } else {
            "add_method"
        };
        expect_args(idiom, call, args, 3, 3)?;
        let (shadow, cpp_type) = self.class_receiver(idiom, call, receiver)?;
        let mut name = string_literal(idiom, args[0])?;
        let doc = doc_text(idiom, args[1])?;
        let target = dispatch::analyze(idiom, args[2])?;
        if matches!(target, Target::Construct { .. }) {
            return Err(Error::shape(
                idiom,
                call.location(),
                "method dispatcher must call a function",
            ));
        }

        let signature = if is_static || target.is_member() {
            target.signature(0)
        } else {
            let params = target.params();
            match reflected_operator(&name) {
                Some(reflected) if is_reflected(&params, &cpp_type) => {
                    tracing::debug!(from = %name, to = reflected, "reflected operator");
                    name = reflected.to_string();
                    let mut signature = target.signature(0);
                    signature.params.truncate(1);
                    signature
                }
                _ => {
                    if params.is_empty() {
                        return Err(Error::shape(
                            idiom,
                            call.location(),
                            "non-member method target must take the receiver as first parameter",
                        ));
                    }
                    target.signature(1)
                }
            }
        };
        let def = callable(&target, signature, doc, is_static, call.location());
        self.model
            .class_entry(&shadow, &cpp_type, call.location())?
            .add_method(name, def);
        Ok(())
    }

    fn add_property(
        &mut self,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
        args: &[Cursor<'tu>],
    ) -> Result<()> {
        const IDIOM: &str = "add_property";
        expect_args(IDIOM, call, args, 3, 4)?;
        let (shadow, cpp_type) = self.class_receiver(IDIOM, call, receiver)?;
        let name = string_literal(IDIOM, args[0])?;
        let doc = doc_text(IDIOM, args[1])?;

        let get_type = match args.get(2).filter(|g| !shape::is_null(**g)) {
            Some(getter) => {
                let target = dispatch::analyze(IDIOM, *getter)?;
                match target {
                    Target::Call { .. } | Target::FieldRead { .. } => target.return_type(),
                    _ => {
                        return Err(Error::shape(
                            IDIOM,
                            getter.location(),
                            "getter must read a member or call a function",
                        ))
                    }
                }
            }
            None => None,
        };

        let mut set_type = None;
        let mut set_param_name = None;
        if let Some(setter) = args.get(3).filter(|s| !shape::is_null(**s)) {
            let target = dispatch::analyze(IDIOM, *setter)?;
            let skip = usize::from(!target.is_member());
            let visible: Vec<Parameter> = target.params().into_iter().skip(skip).collect();
            if visible.len() != 1 || matches!(target, Target::Construct { .. }) {
                return Err(Error::shape(
                    IDIOM,
                    setter.location(),
                    format!("setter must take exactly one value, found {}", visible.len()),
                ));
            }
            let param = visible.into_iter().next();
            set_param_name = param.as_ref().map(|p| p.name.clone());
            set_type = param.map(|p| p.ty);
        }

        if get_type.is_none() && set_type.is_none() {
            return Err(Error::shape(
                IDIOM,
                call.location(),
                format!("property `{}` has neither getter nor setter", name),
            ));
        }
        let property = GetSetter {
            name,
            doc,
            get_type,
            set_type,
            set_param_name,
            location: call.location().clone(),
        };
        self.model
            .class_entry(&shadow, &cpp_type, call.location())?
            .add_property(property)
    }

    fn add_static_constant(
        &mut self,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
        args: &[Cursor<'tu>],
    ) -> Result<()> {
        const IDIOM: &str = "add_static_constant";
        expect_args(IDIOM, call, args, 2, 2)?;
        let name = string_literal(IDIOM, args[0])?;
        let value = args[1];
        let ty = value
            .type_desc()
            .or_else(|| unwrap(value).type_desc())
            .ok_or_else(|| Error::shape(IDIOM, value.location(), "constant value has no type"))?;
        let constant = ConstantDef {
            name,
            ty,
            value: literal(value),
            location: call.location().clone(),
        };
        match self.receiver(IDIOM, call, receiver)? {
            Receiver::Module(key) => self.model.module_entry(&key).add_constant(constant),
            Receiver::Class { shadow, cpp_type } => self
                .model
                .class_entry(&shadow, &cpp_type, call.location())?
                .add_constant(constant),
        }
    }

    fn add_inner_class(
        &mut self,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
        args: &[Cursor<'tu>],
    ) -> Result<()> {
        const IDIOM: &str = "add_inner_class";
        expect_args(IDIOM, call, args, 1, 1)?;
        let (shadow, cpp_type) = self.class_receiver(IDIOM, call, receiver)?;
        let (inner_type, inner_shadow) = shape::class_handle(IDIOM, args[0])?;
        self.model
            .class_entry(&inner_shadow, &inner_type, call.location())?;
        self.model
            .class_entry(&shadow, &cpp_type, call.location())?
            .add_inner_class(&inner_shadow, call.location())
    }

    fn add_inner_enum(
        &mut self,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
        args: &[Cursor<'tu>],
    ) -> Result<()> {
        const IDIOM: &str = "add_inner_enum";
        expect_args(IDIOM, call, args, 1, 1)?;
        let (shadow, cpp_type) = self.class_receiver(IDIOM, call, receiver)?;
        let cpp_name = shape::enum_handle(IDIOM, args[0])?;
        self.model.enum_entry(&cpp_name);
        self.model
            .class_entry(&shadow, &cpp_type, call.location())?
            .add_inner_enum(&cpp_name, call.location())
    }

    fn add_implicit_converter(
        &mut self,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
        args: &[Cursor<'tu>],
    ) -> Result<()> {
        const IDIOM: &str = "add_implicit_converter";
        expect_args(IDIOM, call, args, 1, 1)?;
        let (shadow, cpp_type) = self.class_receiver(IDIOM, call, receiver)?;
        let target = dispatch::analyze(IDIOM, args[0])?;
        let params = match target {
            Target::Call { .. } | Target::Construct { .. } => target.params(),
            _ => Vec::new(),
        };
        if params.len() != 1 {
            return Err(Error::shape(
                IDIOM,
                call.location(),
                format!(
                    "converter must take exactly one source value, found {}",
                    params.len()
                ),
            ));
        }
        let source = params[0].ty.clone();
        self.model
            .class_entry(&shadow, &cpp_type, call.location())?
            .add_implicit_conversion(source);
        Ok(())
    }

    // ---- receivers ------------------------------------------------------

    fn receiver(
        &self,
        idiom: &'static str,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
    ) -> Result<Receiver> {
        let object = receiver.ok_or_else(|| {
            Error::shape(idiom, call.location(), "expected a member call on a registration object")
        })?;
        let ty = object
            .type_desc()
            .or_else(|| unwrap(object).type_desc())
            .or_else(|| call.type_desc());
        let is_class = ty
            .as_ref()
            .map(|t| t.name.trim_start_matches("::") == CLASS_DEF)
            .unwrap_or(false);
        if is_class {
            let (cpp_type, shadow) = shape::class_handle(idiom, object)?;
            return Ok(Receiver::Class { shadow, cpp_type });
        }
        let is_module = ty
            .as_ref()
            .map(|t| t.name.trim_start_matches("::") == MODULE_DEF)
            .unwrap_or(false);
        if !is_module {
            return Err(Error::shape(
                idiom,
                object.location(),
                "receiver is neither a module nor a class definition",
            ));
        }
        Ok(Receiver::Module(module_key(idiom, object)?))
    }

    fn module_receiver(
        &self,
        idiom: &'static str,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
    ) -> Result<String> {
        match self.receiver(idiom, call, receiver)? {
            Receiver::Module(key) => Ok(key),
            Receiver::Class { .. } => Err(Error::shape(
                idiom,
                call.location(),
                "expected a module receiver, found a class definition",
            )),
        }
    }

    fn class_receiver(
        &self,
        idiom: &'static str,
        call: Cursor<'tu>,
        receiver: Option<Cursor<'tu>>,
    ) -> Result<(String, TypeDesc)> {
        let object = receiver.ok_or_else(|| {
            Error::shape(idiom, call.location(), "expected a member call on a class definition")
        })?;
        let (cpp_type, shadow) = match shape::class_handle(idiom, object) {
            Ok(handle) => handle,
            // Receivers spelled through `auto &` may carry no type; the call
            // returns the same handle.
            Err(_) => shape::class_handle(idiom, call)?,
        };
        Ok((shadow, cpp_type))
    }
}

fn is_embedding_namespace(cursor: Cursor<'_>) -> bool {
    cursor.kind() == CursorKind::Namespace
        && cursor.spelling() == EMBEDDING_NAMESPACE
        && cursor
            .semantic_parent()
            .map(|p| p.kind() == CursorKind::TranslationUnit)
            .unwrap_or(false)
}

/// Receiver parameters at position two mark a reflected binary operator.
fn is_reflected(params: &[Parameter], class: &TypeDesc) -> bool {
    params.len() == 2
        && params[1].ty.strip_pointers() == *class
        && params[0].ty.strip_pointers() != *class
}

fn callable(
    target: &Target<'_>,
    signature: Signature,
    doc: Option<String>,
    is_static: bool,
    at: &Location,
) -> CallableDef {
    CallableDef {
        signature,
        doc,
        is_static,
        cpp_signature: target.cpp_signature(),
        location: at.clone(),
    }
}

fn explicit_enum_values(
    idiom: &'static str,
    list: Cursor<'_>,
) -> Result<IndexMap<String, Option<Literal>>> {
    let list = unwrap(list);
    if list.kind() != CursorKind::InitList {
        return Err(Error::shape(
            idiom,
            list.location(),
            format!("expected a `{{name, value}}` list, found {}", list.kind()),
        ));
    }
    let mut values = IndexMap::new();
    for entry in list.children().map(unwrap) {
        let parts: Vec<Cursor<'_>> = match entry.kind() {
            CursorKind::InitList | CursorKind::ConstructExpr => entry
                .children()
                .filter(|c| c.kind() != CursorKind::DefaultArg)
                .collect(),
            _ => Vec::new(),
        };
        if parts.len() != 2 {
            return Err(Error::shape(
                idiom,
                entry.location(),
                "each enum value must be a `{name, value}` pair",
            ));
        }
        let name = string_literal(idiom, parts[0])?;
        if values.contains_key(&name) {
            return Err(Error::shape(
                idiom,
                parts[0].location(),
                format!("enum value `{}` listed twice", name),
            ));
        }
        values.insert(name, literal(parts[1]));
    }
    Ok(values)
}

/// Key of the module created by a `declare_module` call: the variable it
/// initializes, or its Python name when it initializes none.
fn declared_module_key(call: Cursor<'_>, dynamic_name: &str) -> String {
    call.ancestors()
        .take_while(|a| !matches!(a.kind(), CursorKind::CompoundStmt | CursorKind::TranslationUnit))
        .find(|a| a.kind() == CursorKind::Var)
        .map(variable_key)
        .unwrap_or_else(|| format!("module:{}", dynamic_name))
}

/// Module key of a module-typed receiver expression.
fn module_key(idiom: &'static str, expr: Cursor<'_>) -> Result<String> {
    let inner = unwrap(expr);
    match inner.kind() {
        CursorKind::DeclRef => match inner.referenced() {
            Some(var) if var.kind() == CursorKind::Var => Ok(variable_key(var)),
            _ => Err(Error::shape(
                idiom,
                inner.location(),
                format!("`{}` is not a module variable", inner.spelling()),
            )),
        },
        CursorKind::CallExpr if inner.spelling() == "declare_module" => {
            let (_, args) = call_parts(inner);
            let name = match args.first() {
                Some(arg) => string_literal(idiom, *arg)?,
                None => String::new(),
            };
            Ok(declared_module_key(inner, &name))
        }
        CursorKind::CallExpr => match call_parts(inner).0 {
            Some(object) => module_key(idiom, object),
            None => Err(Error::shape(
                idiom,
                inner.location(),
                "cannot trace the module this call returns",
            )),
        },
        other => Err(Error::shape(
            idiom,
            inner.location(),
            format!("expected a module variable, found {}", other),
        )),
    }
}

/// Globals are keyed by qualified name so `extern` declarations in other
/// files agree; locals also carry their declaration site.
fn variable_key(var: Cursor<'_>) -> String {
    let is_local = var.ancestors().any(|a| {
        a.kind().is_function_like()
            || matches!(a.kind(), CursorKind::LambdaExpr | CursorKind::CompoundStmt)
    });
    if is_local {
        format!("{}@{}", var.qualified_name(), var.location())
    } else {
        var.qualified_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstBuilder, NodeId, NodeSpec};

    const WIDGET_DEF: &str = "pyembed::ClassDef<Widget, Widget>";

    struct Unit {
        b: AstBuilder,
        line: u32,
    }

    impl Unit {
        fn new() -> Self {
            Self {
                b: AstBuilder::new("w.cpp"),
                line: 0,
            }
        }

        fn at(&mut self) -> Location {
            self.line += 1;
            Location::new("w.cpp", self.line, 5)
        }

        fn call(&mut self, parent: NodeId, name: &str, ty: &str, receiver: Option<&str>) -> NodeId {
            let at = self.at();
            let call = self
                .b
                .push(Some(parent), NodeSpec::new(CursorKind::CallExpr, name).ty(ty).at(at));
            let callee = self.b.push(
                Some(call),
                NodeSpec::new(CursorKind::MemberRef, name),
            );
            if let Some(receiver_ty) = receiver {
                self.b.push(
                    Some(callee),
                    NodeSpec::new(CursorKind::Unexposed, "").ty(receiver_ty),
                );
            }
            call
        }

        fn string(&mut self, parent: NodeId, text: &str) {
            self.b.push(
                Some(parent),
                NodeSpec::new(CursorKind::StringLiteral, "").ty("const char *").value(text),
            );
        }
    }

    #[test]
    fn test_unrelated_call_with_idiom_name_is_ignored() {
        let mut u = Unit::new();
        let root = u.b.root();
        let call = u.call(root, "add_method", "void", Some("Registry"));
        u.string(call, "x");
        let tu = u.b.finish();
        let model = extract(&tu).unwrap();
        assert!(model.is_empty());
    }

    #[test]
    fn test_declare_class_with_parent() {
        let mut u = Unit::new();
        let root = u.b.root();
        let call = u.b.push(
            Some(root),
            NodeSpec::new(CursorKind::CallExpr, "declare_class")
                .ty("pyembed::ClassDef<Button, Button>")
                .at(Location::new("w.cpp", 3, 1)),
        );
        u.b.push(Some(call), NodeSpec::new(CursorKind::DeclRef, "declare_class"));
        u.string(call, "Button");
        u.b.push(Some(call), NodeSpec::new(CursorKind::NullPtrLiteral, ""));
        u.b.push(
            Some(call),
            NodeSpec::new(CursorKind::DeclRef, "widget_def").ty(WIDGET_DEF),
        );
        let tu = u.b.finish();
        let model = extract(&tu).unwrap();
        let button = model.class("Button").unwrap();
        assert_eq!(button.parent_key.as_deref(), Some("Widget"));
        assert!(button.doc.is_none());
        assert!(model.class("Widget").unwrap().declared_at.is_none());
    }

    #[test]
    fn test_wrong_argument_count_names_idiom_and_location() {
        let mut u = Unit::new();
        let root = u.b.root();
        let call = u.call(root, "add_method", WIDGET_DEF, Some(WIDGET_DEF));
        u.string(call, "area");
        let tu = u.b.finish();
        let err = extract(&tu).unwrap_err();
        match &err {
            Error::ShapeMismatch { idiom, location, .. } => {
                assert_eq!(*idiom, "add_method");
                assert_eq!(location.line, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_enum_values_counted_from_declaration() {
        let mut b = AstBuilder::new("e.cpp");
        let root = b.root();
        let decl = b.push(Some(root), NodeSpec::new(CursorKind::EnumDecl, "Mode"));
        b.push(Some(decl), NodeSpec::new(CursorKind::EnumConstant, "Off"));
        b.push(Some(decl), NodeSpec::new(CursorKind::EnumConstant, "Low").value("4"));
        b.push(Some(decl), NodeSpec::new(CursorKind::EnumConstant, "High"));
        let call = b.push(
            Some(root),
            NodeSpec::new(CursorKind::CallExpr, "declare_enum").ty("pyembed::EnumDef<Mode>"),
        );
        b.push(Some(call), NodeSpec::new(CursorKind::DeclRef, "declare_enum"));
        b.push(Some(call), NodeSpec::new(CursorKind::StringLiteral, "").value("Mode"));
        b.push(Some(call), NodeSpec::new(CursorKind::StringLiteral, "").value(""));
        let tu = b.finish();

        let model = extract(&tu).unwrap();
        let mode = model.enumeration("Mode").unwrap();
        let values: Vec<(String, Option<Literal>)> = mode
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("Off".to_string(), Some(Literal::Integer("0".to_string()))),
                ("Low".to_string(), Some(Literal::Integer("4".to_string()))),
                ("High".to_string(), Some(Literal::Integer("5".to_string()))),
            ]
        );
    }

    #[test]
    fn test_calls_inside_embedding_namespace_are_ignored() {
        let mut b = AstBuilder::new("p.cpp");
        let root = b.root();
        let ns = b.push(Some(root), NodeSpec::new(CursorKind::Namespace, "pyembed"));
        let call = b.push(
            Some(ns),
            NodeSpec::new(CursorKind::CallExpr, "declare_module").ty("pyembed::ModuleDef"),
        );
        b.push(Some(call), NodeSpec::new(CursorKind::DeclRef, "declare_module"));
        let tu = b.finish();
        assert!(extract(&tu).unwrap().is_empty());
    }

    #[test]
    fn test_reflected_detection() {
        let vec = TypeDesc::named("Vec");
        let param = |ty: &str| Parameter {
            name: String::new(),
            ty: TypeDesc::parse(ty),
        };
        assert!(is_reflected(&[param("double"), param("const Vec &")], &vec));
        assert!(!is_reflected(&[param("const Vec &"), param("double")], &vec));
        assert!(!is_reflected(&[param("Vec"), param("Vec")], &vec));
    }
}
