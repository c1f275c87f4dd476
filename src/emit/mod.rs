//! Rendering of the binding model as Python stub files.
//!
//! One `.pyi` document per non-imported module. Rendering is a single
//! deterministic pass in discovery order; type references go through a
//! [`Resolver`] scoped to the module being rendered, whose prelude (rule
//! declarations and cross-module imports) ends up in the file header.

mod postformat;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::{
    BindingModel, CallableDef, ClassDef, ConstantDef, EnumDef, EnumValueKind, GetSetter,
    ModuleDef, Parameter, TypeDesc,
};
use crate::resolve::Resolver;

pub use postformat::PostFormatter;

const INDENT: &str = "    ";

const RICH_COMPARISONS: &[&str] = &["__eq__", "__ne__", "__lt__", "__le__", "__gt__", "__ge__"];

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// A rendered module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stub {
    /// Fully-qualified module name.
    pub module: String,
    pub text: String,
}

impl Stub {
    /// `a.b.c` is written to `<root>/a/b/c.pyi`.
    pub fn path_under(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        let mut parts = self.module.split('.').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                path.push(part);
            } else {
                path.push(format!("{}.pyi", part));
            }
        }
        path
    }
}

/// Render every module this run is responsible for, in discovery order,
/// then write them. Without `output_dir` everything goes to `out`.
pub fn emit(
    model: &BindingModel,
    output_dir: Option<&Path>,
    out: &mut dyn Write,
) -> anyhow::Result<Vec<PathBuf>> {
    use anyhow::Context;

    let stubs = model
        .modules()
        .iter()
        .filter(|m| !m.imported)
        .map(|module| {
            render_module(model, module)
                .with_context(|| format!("while emitting module `{}`", module.dynamic_name))
        })
        .collect::<anyhow::Result<Vec<Stub>>>()?;

    let mut written = Vec::new();
    for stub in stubs {
        match output_dir {
            Some(root) => {
                let path = stub.path_under(root);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                fs::write(&path, &stub.text)
                    .with_context(|| format!("writing {}", path.display()))?;
                tracing::debug!(module = %stub.module, path = %path.display(), "stub written");
                written.push(path);
            }
            None => {
                writeln!(out, "# module {}", stub.module)?;
                out.write_all(stub.text.as_bytes())?;
            }
        }
    }
    Ok(written)
}

pub fn render_module(model: &BindingModel, module: &ModuleDef) -> Result<Stub> {
    let fq = module.fully_qualified_name.clone().ok_or_else(|| {
        Error::Emission(format!(
            "module `{}` has no fully-qualified name",
            module.cpp_name
        ))
    })?;
    let mut renderer = ModuleRenderer {
        model,
        resolver: Resolver::scoped(model, &fq),
        lines: Vec::new(),
        depth: 0,
        uses_enum: false,
        uses_final: false,
        uses_overload: false,
    };
    renderer.module_body(module)?;
    let text = renderer.finish(module.doc.as_deref());
    Ok(Stub { module: fq, text })
}

struct ModuleRenderer<'m> {
    model: &'m BindingModel,
    resolver: Resolver<'m>,
    lines: Vec<String>,
    depth: usize,
    uses_enum: bool,
    uses_final: bool,
    uses_overload: bool,
}

impl<'m> ModuleRenderer<'m> {
    fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines.push(format!("{}{}", INDENT.repeat(self.depth), text));
        }
    }

    fn blank(&mut self) {
        if self.lines.last().map(|l| !l.is_empty()).unwrap_or(false) {
            self.lines.push(String::new());
        }
    }

    fn module_body(&mut self, module: &ModuleDef) -> Result<()> {
        for key in module.inner_enums.keys() {
            self.blank();
            self.enumeration(key)?;
        }
        for key in module.inner_classes.keys() {
            self.blank();
            self.class(key)?;
        }
        if !module.constants.is_empty() {
            self.blank();
            for constant in module.constants.values() {
                self.constant(constant)?;
            }
        }
        for (name, overloads) in &module.functions {
            self.blank();
            self.overload_group(name, overloads, false)?;
        }
        Ok(())
    }

    fn enumeration(&mut self, key: &str) -> Result<()> {
        let model = self.model;
        let def: &EnumDef = model
            .enumeration(key)
            .filter(|e| e.declared_at.is_some())
            .ok_or_else(|| Error::Emission(format!("enum `{}` is never declared", key)))?;
        self.uses_enum = true;
        let base = match def.value_kind {
            EnumValueKind::Integer => "enum.IntEnum",
            EnumValueKind::String | EnumValueKind::Opaque => "enum.Enum",
        };
        self.line(format!("class {}({}):", def.dynamic_name, base));
        self.depth += 1;
        if let Some(doc) = &def.doc {
            self.docstring(doc);
        }
        if def.values.is_empty() && def.doc.is_none() {
            self.line("...");
        }
        for (name, value) in &def.values {
            let rendered = value
                .as_ref()
                .map(|v| v.to_python())
                .unwrap_or_else(|| "...".to_string());
            self.line(format!("{} = {}", name, rendered));
        }
        self.depth -= 1;
        Ok(())
    }

    fn class(&mut self, key: &str) -> Result<()> {
        let model = self.model;
        let class: &ClassDef = model
            .class(key)
            .filter(|c| c.declared_at.is_some())
            .ok_or_else(|| Error::Emission(format!("class `{}` is never declared", key)))?;

        let base = match class.parent_key.as_deref() {
            Some(parent) if model.class(parent).map(|p| p.declared_at.is_some()).unwrap_or(false) => {
                self.resolver.class_name(parent)?
            }
            Some(parent) => {
                tracing::warn!(class = %class.shadow_key, parent, "base class is not registered; rendering without base");
                None
            }
            None => None,
        };
        match base {
            Some(base) => self.line(format!("class {}({}):", class.dynamic_name, base)),
            None => self.line(format!("class {}:", class.dynamic_name)),
        }
        self.depth += 1;
        if let Some(doc) = &class.doc {
            self.docstring(doc);
        }
        if !class.has_members() {
            self.line("...");
        }
        for inner in class.inner_enums.keys() {
            self.enumeration(inner)?;
        }
        for inner in class.inner_classes.keys() {
            self.class(inner)?;
        }
        for constant in class.constants.values() {
            self.constant(constant)?;
        }
        if !class.constructors.is_empty() {
            self.overload_group("__init__", &class.constructors, true)?;
        }
        for property in class.properties.values() {
            self.property(class, property)?;
        }
        for (name, overloads) in &class.methods {
            if RICH_COMPARISONS.contains(&name.as_str()) {
                self.rich_comparison(name, overloads);
            } else {
                self.overload_group(name, overloads, true)?;
            }
        }
        self.depth -= 1;
        Ok(())
    }

    fn constant(&mut self, constant: &ConstantDef) -> Result<()> {
        self.uses_final = true;
        let ty = self.resolver.resolve(&constant.ty)?;
        let value = constant
            .value
            .as_ref()
            .map(|v| v.to_python())
            .unwrap_or_else(|| "...".to_string());
        self.line(format!("{}: Final[{}] = {}", constant.name, ty, value));
        Ok(())
    }

    fn property(&mut self, class: &ClassDef, property: &GetSetter) -> Result<()> {
        let get_type = property.get_type.as_ref().ok_or_else(|| {
            Error::Emission(format!(
                "property `{}.{}`: a setter is registered but no getter",
                class.dynamic_name, property.name
            ))
        })?;
        let rendered = self.resolver.resolve(get_type)?;
        self.line("@property");
        self.def_line(
            &property.name,
            "self",
            &[],
            &rendered,
            property.doc.as_deref(),
        );
        if let Some(set_type) = &property.set_type {
            let value_name = property
                .set_param_name
                .as_deref()
                .filter(|n| !n.is_empty())
                .unwrap_or("value");
            let param = Parameter {
                name: value_name.to_string(),
                ty: set_type.clone(),
            };
            let params = self.params(&[param], true)?;
            self.line(format!("@{}.setter", property.name));
            self.def_line(&property.name, "self", &params, "None", None);
        }
        Ok(())
    }

    fn rich_comparison(&mut self, name: &str, overloads: &[CallableDef]) {
        let doc = overloads.iter().find_map(|o| o.doc.as_deref());
        self.def_line(name, "self", &["other".to_string()], "bool", doc);
    }

    fn overload_group(&mut self, name: &str, overloads: &[CallableDef], in_class: bool) -> Result<()> {
        let grouped = overloads.len() > 1;
        if grouped {
            self.uses_overload = true;
        }
        for overload in overloads {
            if grouped {
                self.line("@overload");
            }
            let receiver = if !in_class {
                ""
            } else if overload.is_static {
                self.line("@staticmethod");
                ""
            } else {
                "self"
            };
            let params = self.params(&overload.signature.params, in_class && !overload.is_static)?;
            let returns = match &overload.signature.return_type {
                Some(ty) => self.resolver.resolve(ty)?,
                None => "None".to_string(),
            };
            self.def_line(name, receiver, &params, &returns, overload.doc.as_deref());
        }
        Ok(())
    }

    /// Render `name: type` pairs for visible parameters.
    fn params(&mut self, params: &[Parameter], has_self: bool) -> Result<Vec<String>> {
        let mut taken: Vec<String> = Vec::new();
        let mut rendered = Vec::with_capacity(params.len());
        for (i, param) in params.iter().enumerate() {
            let mut name = python_identifier(&param.name, i);
            if has_self && name == "self" {
                name.push('_');
            }
            while taken.contains(&name) {
                name.push('_');
            }
            taken.push(name.clone());
            let ty = self.param_type(&param.ty)?;
            rendered.push(format!("{}: {}", name, ty));
        }
        Ok(rendered)
    }

    /// Classes accepting implicit conversions take a union of their sources.
    fn param_type(&mut self, ty: &TypeDesc) -> Result<String> {
        let model = self.model;
        let rendered = self.resolver.resolve(ty)?;
        let sources = match model.class_for_type(ty) {
            Some(class) if !class.implicit_conversion_sources.is_empty() => {
                &class.implicit_conversion_sources
            }
            _ => return Ok(rendered),
        };
        let mut parts = vec![rendered];
        for source in sources {
            let part = self.resolver.resolve(source)?;
            if !parts.contains(&part) {
                parts.push(part);
            }
        }
        Ok(parts.join(" | "))
    }

    fn def_line(
        &mut self,
        name: &str,
        receiver: &str,
        params: &[String],
        returns: &str,
        doc: Option<&str>,
    ) {
        let mut items: Vec<&str> = Vec::new();
        if !receiver.is_empty() {
            items.push(receiver);
        }
        items.extend(params.iter().map(String::as_str));
        let list = if items.is_empty() {
            String::new()
        } else {
            format!("{}, /", items.join(", "))
        };
        match doc {
            Some(doc) => {
                self.line(format!("def {}({}) -> {}:", name, list, returns));
                self.depth += 1;
                self.docstring(doc);
                self.depth -= 1;
            }
            None => self.line(format!("def {}({}) -> {}: ...", name, list, returns)),
        }
    }

    fn docstring(&mut self, doc: &str) {
        for l in docstring_lines(doc) {
            self.line(l);
        }
    }

    fn finish(self, doc: Option<&str>) -> String {
        let mut header: Vec<String> = Vec::new();
        if let Some(doc) = doc {
            header.extend(docstring_lines(doc));
            header.push(String::new());
        }

        let mut imports = Vec::new();
        if self.uses_enum {
            imports.push("import enum".to_string());
        }
        let typing: Vec<&str> = [
            (self.uses_final, "Final"),
            (self.uses_overload, "overload"),
        ]
        .iter()
        .filter(|(used, _)| *used)
        .map(|(_, name)| *name)
        .collect();
        if !typing.is_empty() {
            imports.push(format!("from typing import {}", typing.join(", ")));
        }
        imports.extend(self.resolver.prelude());
        if !imports.is_empty() {
            header.extend(imports);
            header.push(String::new());
        }

        let mut body = self.lines;
        while body.first().map(|l| l.is_empty()).unwrap_or(false) {
            body.remove(0);
        }
        let mut text = header.join("\n");
        if !header.is_empty() {
            text.push('\n');
        }
        text.push_str(&body.join("\n"));
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text
    }
}

fn docstring_lines(doc: &str) -> Vec<String> {
    let escaped = doc.trim().replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"");
    let lines: Vec<&str> = escaped.lines().collect();
    if lines.len() <= 1 {
        return vec![format!("\"\"\"{}\"\"\"", escaped)];
    }
    let mut out = vec!["\"\"\"".to_string()];
    out.extend(lines.iter().map(|l| l.trim_end().to_string()));
    out.push("\"\"\"".to_string());
    out
}

fn python_identifier(name: &str, index: usize) -> String {
    if name.is_empty() {
        return format!("arg{}", index);
    }
    if PYTHON_KEYWORDS.contains(&name) {
        format!("{}_", name)
    } else {
        name.to_string()
    }
}
