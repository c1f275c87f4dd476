//! In-memory translation units for driving the whole pipeline.
//!
//! A [`Unit`] records registrations the way binding code would write them
//! (`geo_def.add_class(widget_def)`, lambdas calling the real methods) and
//! builds the matching AST on every parse, so the extractor sees the same
//! shapes the clang provider produces.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use stubsmith::ast::{AstBuilder, NodeId, NodeSpec};
use stubsmith::{AstProvider, CursorKind, Location, ParsedUnit, TranslationUnit};

const MODULE_DEF: &str = "pyembed::ModuleDef";

fn class_def(cpp: &str) -> String {
    format!("pyembed::ClassDef<{}, {}>", cpp, cpp)
}

fn class_var(cpp: &str) -> String {
    format!("{}_def", cpp.rsplit("::").next().unwrap_or(cpp).to_lowercase())
}

#[derive(Debug, Clone)]
enum Reg {
    Module { var: String, name: String, doc: Option<String> },
    Class { cpp: String, name: String, parent: Option<String> },
    AddClass { module: String, cpp: String },
    Constructor { cpp: String, params: Vec<(String, String)> },
    Method { cpp: String, name: String, ret: String, params: Vec<(String, String)>, is_static: bool },
    FreeMethod { cpp: String, name: String, target: String, ret: String, params: Vec<(String, String)> },
    Property { cpp: String, name: String, getter: Option<String>, setter: Option<String> },
    Function { module: String, name: String, ret: String, params: Vec<(String, String)> },
    Exporter { params: Vec<String>, argument: String, rendering: String, declarations: Option<String> },
}

/// Registrations of one translation unit, in source order.
#[derive(Debug, Clone)]
pub struct Unit {
    path: PathBuf,
    regs: Vec<Reg>,
}

fn owned(params: &[(&str, &str)]) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(n, t)| (n.to_string(), t.to_string()))
        .collect()
}

impl Unit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            regs: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `pyembed::ModuleDef& <var> = pyembed::declare_module("<name>", doc);`
    pub fn module(mut self, var: &str, name: &str, doc: Option<&str>) -> Self {
        self.regs.push(Reg::Module {
            var: var.to_string(),
            name: name.to_string(),
            doc: doc.map(str::to_string),
        });
        self
    }

    /// `auto <cpp>_def = pyembed::declare_class<T, T>("<name>", nullptr[, parent]);`
    pub fn class(mut self, cpp: &str, name: &str) -> Self {
        self.regs.push(Reg::Class {
            cpp: cpp.to_string(),
            name: name.to_string(),
            parent: None,
        });
        self
    }

    pub fn subclass(mut self, cpp: &str, name: &str, parent: &str) -> Self {
        self.regs.push(Reg::Class {
            cpp: cpp.to_string(),
            name: name.to_string(),
            parent: Some(parent.to_string()),
        });
        self
    }

    /// `<module>.add_class(<cpp>_def);`
    pub fn add_class(mut self, module: &str, cpp: &str) -> Self {
        self.regs.push(Reg::AddClass {
            module: module.to_string(),
            cpp: cpp.to_string(),
        });
        self
    }

    /// `add_constructor(nullptr, [](...) { return T(...); })`
    pub fn constructor(mut self, cpp: &str, params: &[(&str, &str)]) -> Self {
        self.regs.push(Reg::Constructor {
            cpp: cpp.to_string(),
            params: owned(params),
        });
        self
    }

    /// `add_method("<name>", nullptr, [](T& self, ...) { return self.<name>(...); })`
    pub fn method(mut self, cpp: &str, name: &str, ret: &str, params: &[(&str, &str)]) -> Self {
        self.regs.push(Reg::Method {
            cpp: cpp.to_string(),
            name: name.to_string(),
            ret: ret.to_string(),
            params: owned(params),
            is_static: false,
        });
        self
    }

    pub fn static_method(mut self, cpp: &str, name: &str, ret: &str, params: &[(&str, &str)]) -> Self {
        self.regs.push(Reg::Method {
            cpp: cpp.to_string(),
            name: name.to_string(),
            ret: ret.to_string(),
            params: owned(params),
            is_static: true,
        });
        self
    }

    /// `add_method("<name>", nullptr, &<target>)` with a free function target.
    pub fn free_method(
        mut self,
        cpp: &str,
        name: &str,
        target: &str,
        ret: &str,
        params: &[(&str, &str)],
    ) -> Self {
        self.regs.push(Reg::FreeMethod {
            cpp: cpp.to_string(),
            name: name.to_string(),
            target: target.to_string(),
            ret: ret.to_string(),
            params: owned(params),
        });
        self
    }

    /// `add_property("<name>", nullptr, getter-or-nullptr[, setter])`; the
    /// getter and setter are given as their C++ value types.
    pub fn property(mut self, cpp: &str, name: &str, getter: Option<&str>, setter: Option<&str>) -> Self {
        self.regs.push(Reg::Property {
            cpp: cpp.to_string(),
            name: name.to_string(),
            getter: getter.map(str::to_string),
            setter: setter.map(str::to_string),
        });
        self
    }

    /// `<module>.add_function("<name>", nullptr, &<name>)`
    pub fn function(mut self, module: &str, name: &str, ret: &str, params: &[(&str, &str)]) -> Self {
        self.regs.push(Reg::Function {
            module: module.to_string(),
            name: name.to_string(),
            ret: ret.to_string(),
            params: owned(params),
        });
        self
    }

    /// `struct pyembed::type_export<<argument>> : pyembed::TypeExporter`
    /// declaring `py_type` and optionally `py_declarations`. With `params`
    /// it is a partial specialization over those template parameters.
    pub fn exporter(
        mut self,
        params: &[&str],
        argument: &str,
        rendering: &str,
        declarations: Option<&str>,
    ) -> Self {
        self.regs.push(Reg::Exporter {
            params: params.iter().map(|p| p.to_string()).collect(),
            argument: argument.to_string(),
            rendering: rendering.to_string(),
            declarations: declarations.map(str::to_string),
        });
        self
    }

    pub fn build(&self) -> TranslationUnit {
        UnitWriter::new(&self.path).write(&self.regs)
    }
}

struct UnitWriter {
    b: AstBuilder,
    file: String,
    line: u32,
    modules: HashMap<String, NodeId>,
    body: Option<NodeId>,
}

impl UnitWriter {
    fn new(path: &Path) -> Self {
        Self {
            b: AstBuilder::new(path),
            file: path.display().to_string(),
            line: 0,
            modules: HashMap::new(),
            body: None,
        }
    }

    fn next_location(&mut self) -> Location {
        self.line += 1;
        Location::new(self.file.clone(), self.line, 5)
    }

    /// The body of the file's registration function.
    fn body(&mut self) -> NodeId {
        if let Some(body) = self.body {
            return body;
        }
        let root = self.b.root();
        let at = self.next_location();
        let func = self.b.push(
            Some(root),
            NodeSpec::new(CursorKind::Function, "register_bindings").ty("void ()").at(at),
        );
        let body = self.b.push(Some(func), NodeSpec::new(CursorKind::CompoundStmt, ""));
        self.body = Some(body);
        body
    }

    fn write(mut self, regs: &[Reg]) -> TranslationUnit {
        for reg in regs {
            self.reg(reg);
        }
        self.b.finish()
    }

    fn string(&mut self, parent: NodeId, text: &str) {
        self.b.push(
            Some(parent),
            NodeSpec::new(CursorKind::StringLiteral, "").ty("const char *").value(text),
        );
    }

    fn null(&mut self, parent: NodeId) {
        self.b.push(Some(parent), NodeSpec::new(CursorKind::NullPtrLiteral, "").ty("std::nullptr_t"));
    }

    fn free_call(&mut self, parent: NodeId, name: &str, ty: &str, at: Location) -> NodeId {
        let call = self
            .b
            .push(Some(parent), NodeSpec::new(CursorKind::CallExpr, name).ty(ty).at(at));
        self.b.push(Some(call), NodeSpec::new(CursorKind::DeclRef, name));
        call
    }

    /// `<receiver>.<name>(...)` returning `ty`.
    fn member_call(&mut self, name: &str, ty: &str, receiver: &str, receiver_ty: &str) -> NodeId {
        let body = self.body();
        let at = self.next_location();
        let call = self
            .b
            .push(Some(body), NodeSpec::new(CursorKind::CallExpr, name).ty(ty).at(at.clone()));
        let callee = self.b.push(Some(call), NodeSpec::new(CursorKind::MemberRef, name).at(at.clone()));
        let object = self.b.push(
            Some(callee),
            NodeSpec::new(CursorKind::DeclRef, receiver).ty(receiver_ty).at(at),
        );
        if let Some(var) = self.modules.get(receiver) {
            self.b.set_referenced(object, *var);
        }
        call
    }

    fn class_call(&mut self, cpp: &str, name: &str) -> NodeId {
        let handle = class_def(cpp);
        self.member_call(name, &handle, &class_var(cpp), &handle)
    }

    fn method_decl(&mut self, name: &str, kind: CursorKind, ret: &str, params: &[(String, String)]) -> NodeId {
        let types: Vec<&str> = params.iter().map(|(_, t)| t.as_str()).collect();
        let spec = NodeSpec::new(kind, name).ty(format!("{} ({})", ret, types.join(", ")));
        let decl = self.b.push(None, spec);
        for (param, ty) in params {
            self.b.push(Some(decl), NodeSpec::new(CursorKind::Parm, param.as_str()).ty(ty.as_str()));
        }
        decl
    }

    /// `[](...) { return <expr>; }` where `<expr>` invokes `decl`.
    fn lambda(&mut self, parent: NodeId, kind: CursorKind, spelling: &str, ty: &str, decl: NodeId) {
        let lambda = self.b.push(Some(parent), NodeSpec::new(CursorKind::LambdaExpr, ""));
        let body = self.b.push(Some(lambda), NodeSpec::new(CursorKind::CompoundStmt, ""));
        let ret = self.b.push(Some(body), NodeSpec::new(CursorKind::ReturnStmt, ""));
        let expr = self.b.push(Some(ret), NodeSpec::new(kind, spelling).ty(ty));
        self.b.set_referenced(expr, decl);
    }

    fn function_ref(&mut self, parent: NodeId, name: &str, decl: NodeId) {
        let addr = self.b.push(Some(parent), NodeSpec::new(CursorKind::UnaryOperator, "&"));
        let reference = self.b.push(Some(addr), NodeSpec::new(CursorKind::DeclRef, name));
        self.b.set_referenced(reference, decl);
    }

    fn reg(&mut self, reg: &Reg) {
        match reg {
            Reg::Module { var, name, doc } => {
                let root = self.b.root();
                let at = self.next_location();
                let var_node = self.b.push(
                    Some(root),
                    NodeSpec::new(CursorKind::Var, var.as_str())
                        .ty(format!("{} &", MODULE_DEF))
                        .at(at.clone())
                        .static_storage(),
                );
                let call = self.free_call(var_node, "declare_module", MODULE_DEF, at);
                self.string(call, name);
                match doc {
                    Some(doc) => self.string(call, doc),
                    None => self.null(call),
                }
                self.modules.insert(var.clone(), var_node);
            }
            Reg::Class { cpp, name, parent } => {
                let body = self.body();
                let at = self.next_location();
                let call = self.free_call(body, "declare_class", &class_def(cpp), at);
                self.string(call, name);
                self.null(call);
                if let Some(parent) = parent {
                    let handle = class_def(parent);
                    self.b.push(
                        Some(call),
                        NodeSpec::new(CursorKind::DeclRef, class_var(parent)).ty(handle),
                    );
                }
            }
            Reg::AddClass { module, cpp } => {
                let call = self.member_call("add_class", MODULE_DEF, module, MODULE_DEF);
                self.b.push(
                    Some(call),
                    NodeSpec::new(CursorKind::DeclRef, class_var(cpp)).ty(class_def(cpp)),
                );
            }
            Reg::Constructor { cpp, params } => {
                let call = self.class_call(cpp, "add_constructor");
                self.null(call);
                let short = cpp.rsplit("::").next().unwrap_or(cpp).to_string();
                let decl = self.method_decl(&short, CursorKind::Constructor, "void", params);
                self.lambda(call, CursorKind::ConstructExpr, cpp, cpp, decl);
            }
            Reg::Method { cpp, name, ret, params, is_static } => {
                let idiom = if *is_static { "add_static_method" } else { "add_method" };
                let call = self.class_call(cpp, idiom);
                self.string(call, name);
                self.null(call);
                let decl = self.method_decl(name, CursorKind::Method, ret, params);
                self.lambda(call, CursorKind::CallExpr, name, ret, decl);
            }
            Reg::FreeMethod { cpp, name, target, ret, params } => {
                let call = self.class_call(cpp, "add_method");
                self.string(call, name);
                self.null(call);
                let decl = self.method_decl(target, CursorKind::Function, ret, params);
                self.function_ref(call, target, decl);
            }
            Reg::Property { cpp, name, getter, setter } => {
                let call = self.class_call(cpp, "add_property");
                self.string(call, name);
                self.null(call);
                match getter {
                    Some(ty) => {
                        let get = format!("get_{}", name);
                        let decl = self.method_decl(&get, CursorKind::Method, ty, &[]);
                        self.lambda(call, CursorKind::CallExpr, &get, ty, decl);
                    }
                    None => self.null(call),
                }
                if let Some(ty) = setter {
                    let set = format!("set_{}", name);
                    let params = vec![("value".to_string(), ty.clone())];
                    let decl = self.method_decl(&set, CursorKind::Method, "void", &params);
                    self.lambda(call, CursorKind::CallExpr, &set, "void", decl);
                }
            }
            Reg::Function { module, name, ret, params } => {
                let call = self.member_call("add_function", MODULE_DEF, module, MODULE_DEF);
                self.string(call, name);
                self.null(call);
                let decl = self.method_decl(name, CursorKind::Function, ret, params);
                self.function_ref(call, name, decl);
            }
            Reg::Exporter { params, argument, rendering, declarations } => {
                let root = self.b.root();
                let at = self.next_location();
                let kind = if params.is_empty() {
                    CursorKind::StructDecl
                } else {
                    CursorKind::PartialSpecialization
                };
                let record = self.b.push(Some(root), NodeSpec::new(kind, "type_export").at(at));
                self.b.push(
                    Some(record),
                    NodeSpec::new(CursorKind::BaseSpecifier, "").ty("pyembed::TypeExporter"),
                );
                for param in params {
                    self.b.push(Some(record), NodeSpec::new(CursorKind::TemplateTypeParam, param.as_str()));
                }
                self.b.push(
                    Some(record),
                    NodeSpec::new(CursorKind::TemplateArgument, "").ty(canonical_parameters(argument, params)),
                );
                let members = [("py_type", Some(rendering)), ("py_declarations", declarations.as_ref())];
                for (member, text) in members {
                    if let Some(text) = text {
                        let var = self.b.push(
                            Some(record),
                            NodeSpec::new(CursorKind::Var, member).ty("const char *const").static_storage(),
                        );
                        self.string(var, text);
                    }
                }
            }
        }
    }
}

/// Spell template parameters the way clang prints them inside a partial
/// specialization's argument: `T` at index 0 becomes `type-parameter-0-0`.
fn canonical_parameters(argument: &str, params: &[String]) -> String {
    let mut out = String::new();
    let mut word = String::new();
    for c in argument.chars().map(Some).chain(std::iter::once(None)) {
        if let Some(c) = c {
            if c.is_alphanumeric() || c == '_' || c == ':' {
                word.push(c);
                continue;
            }
        }
        match params.iter().position(|p| *p == word) {
            Some(index) => out.push_str(&format!("type-parameter-0-{}", index)),
            None => out.push_str(&word),
        }
        word.clear();
        if let Some(c) = c {
            out.push(c);
        }
    }
    out
}

/// Serves [`Unit`]s by path and counts parses.
pub struct MemoryProvider {
    units: HashMap<PathBuf, Unit>,
    parses: AtomicUsize,
}

impl MemoryProvider {
    pub fn new(units: impl IntoIterator<Item = Unit>) -> Self {
        Self {
            units: units.into_iter().map(|u| (u.path.clone(), u)).collect(),
            parses: AtomicUsize::new(0),
        }
    }

    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }
}

impl AstProvider for MemoryProvider {
    fn parse(&self, source: &Path, _prefix: Option<&Path>) -> anyhow::Result<ParsedUnit> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        let unit = self
            .units
            .get(source)
            .ok_or_else(|| anyhow::anyhow!("no in-memory unit for {}", source.display()))?;
        Ok(ParsedUnit {
            unit: unit.build(),
            dependencies: Vec::new(),
        })
    }

    fn fingerprint(&self) -> String {
        "memory".to_string()
    }
}

/// A call the pipeline made on its AST provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    BuildPrefix { source: PathBuf, output: PathBuf },
    Parse { source: PathBuf, prefix: Option<PathBuf> },
}

/// A [`MemoryProvider`] that also builds precompiled prefixes and records
/// every call in the order it completed.
pub struct RecordingProvider {
    inner: MemoryProvider,
    prefix_dependencies: Vec<PathBuf>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingProvider {
    pub fn new(units: impl IntoIterator<Item = Unit>, prefix_dependencies: Vec<PathBuf>) -> Self {
        Self {
            inner: MemoryProvider::new(units),
            prefix_dependencies,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// The prefix a source was parsed on top of, if it was parsed.
    pub fn parsed_with(&self, source: &str) -> Option<Option<PathBuf>> {
        self.calls().into_iter().find_map(|call| match call {
            Call::Parse { source: parsed, prefix } if parsed == Path::new(source) => Some(prefix),
            _ => None,
        })
    }
}

impl AstProvider for RecordingProvider {
    fn parse(&self, source: &Path, prefix: Option<&Path>) -> anyhow::Result<ParsedUnit> {
        let parsed = self.inner.parse(source, prefix);
        self.calls.lock().unwrap().push(Call::Parse {
            source: source.to_path_buf(),
            prefix: prefix.map(Path::to_path_buf),
        });
        parsed
    }

    fn build_prefix(&self, source: &Path, output: &Path) -> anyhow::Result<Vec<PathBuf>> {
        // Slow enough that an early worker would record its parse first.
        std::thread::sleep(Duration::from_millis(30));
        std::fs::write(output, b"precompiled")?;
        self.calls.lock().unwrap().push(Call::BuildPrefix {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
        });
        Ok(self.prefix_dependencies.clone())
    }

    fn fingerprint(&self) -> String {
        self.inner.fingerprint()
    }
}
