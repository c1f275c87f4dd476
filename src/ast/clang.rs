//! AST provider backed by the clang driver's JSON AST dump.
//!
//! `clang++ -fsyntax-only -Xclang -ast-dump=json` prints the whole
//! translation unit as one JSON document. Locations in the dump are delta
//! encoded (a field is omitted when it equals the previously printed one),
//! so nodes are converted in print order while tracking the last file and
//! line seen.

use anyhow::{anyhow, Context};
use phf::phf_map;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use super::{AstBuilder, AstProvider, CursorKind, Location, NodeId, NodeSpec, ParsedUnit, TranslationUnit};
use crate::depfile;
use crate::error::Error;
use crate::model::split_function_type;

/// Stack for JSON conversion; clang nests deeply on long expression chains.
const CONVERT_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Flags handed to every clang invocation.
#[derive(Debug, Clone)]
pub struct ClangOptions {
    pub executable: String,
    pub std: Option<String>,
    pub include_dirs: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub extra_args: Vec<String>,
}

impl Default for ClangOptions {
    fn default() -> Self {
        Self {
            executable: "clang++".to_string(),
            std: None,
            include_dirs: Vec::new(),
            defines: Vec::new(),
            extra_args: Vec::new(),
        }
    }
}

pub struct ClangProvider {
    options: ClangOptions,
}

impl ClangProvider {
    pub fn new(options: ClangOptions) -> Self {
        Self { options }
    }

    fn flags(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(std) = &self.options.std {
            args.push(format!("-std={}", std));
        }
        for dir in &self.options.include_dirs {
            args.push(format!("-I{}", dir.display()));
        }
        for define in &self.options.defines {
            args.push(format!("-D{}", define));
        }
        args.extend(self.options.extra_args.iter().cloned());
        args
    }

    fn run(&self, args: &[String], source: &Path) -> anyhow::Result<Output> {
        tracing::debug!(
            executable = %self.options.executable,
            args = %args.join(" "),
            source = %source.display(),
            "invoking clang"
        );
        Command::new(&self.options.executable)
            .args(args)
            .arg(source)
            .output()
            .with_context(|| format!("failed to run `{}`", self.options.executable))
    }

    /// Run clang and fail with its error diagnostics if it reports any.
    fn run_checked(&self, args: &[String], source: &Path) -> anyhow::Result<Output> {
        let output = self.run(args, source)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostics: Vec<String> = stderr
            .lines()
            .filter(|l| l.contains("error:"))
            .map(str::to_string)
            .collect();
        if diagnostics.is_empty() && !output.status.success() {
            diagnostics = stderr.lines().map(str::to_string).collect();
            diagnostics.push(format!("{} exited with {}", self.options.executable, output.status));
        }
        if !diagnostics.is_empty() {
            return Err(Error::Parse {
                path: source.to_path_buf(),
                diagnostics,
            }
            .into());
        }
        Ok(output)
    }

    fn dependencies(&self, mut args: Vec<String>, source: &Path) -> anyhow::Result<Vec<PathBuf>> {
        args.push("-M".to_string());
        let output = self.run_checked(&args, source)?;
        Ok(depfile::parse_make_rule(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl AstProvider for ClangProvider {
    fn parse(&self, source: &Path, prefix: Option<&Path>) -> anyhow::Result<ParsedUnit> {
        let mut args = self.flags();
        if let Some(prefix) = prefix {
            args.push("-include-pch".to_string());
            args.push(prefix.display().to_string());
        }

        let mut dump_args = args.clone();
        dump_args.extend(
            ["-fsyntax-only", "-Xclang", "-ast-dump=json"]
                .iter()
                .map(|s| s.to_string()),
        );
        let output = self.run_checked(&dump_args, source)?;
        let unit = unit_from_json(source, &output.stdout)
            .with_context(|| format!("reading the AST dump of {}", source.display()))?;
        let dependencies = self.dependencies(args, source)?;
        tracing::debug!(
            source = %source.display(),
            nodes = unit.node_count(),
            dependencies = dependencies.len(),
            "parsed"
        );
        Ok(ParsedUnit { unit, dependencies })
    }

    fn build_prefix(&self, source: &Path, output: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut args = self.flags();
        args.push("-x".to_string());
        args.push("c++-header".to_string());

        let mut build_args = args.clone();
        build_args.push("-o".to_string());
        build_args.push(output.display().to_string());
        self.run_checked(&build_args, source)?;
        self.dependencies(args, source)
    }

    fn fingerprint(&self) -> String {
        let mut parts = vec![self.options.executable.clone()];
        parts.extend(self.flags());
        parts.join("\u{1f}")
    }
}

/// Convert a clang JSON AST dump into a [`TranslationUnit`].
pub fn unit_from_json(path: &Path, json: &[u8]) -> anyhow::Result<TranslationUnit> {
    std::thread::scope(|scope| {
        let worker = std::thread::Builder::new()
            .name("clang-json".to_string())
            .stack_size(CONVERT_STACK_SIZE)
            .spawn_scoped(scope, || convert(path, json))
            .context("spawning the AST conversion thread")?;
        worker
            .join()
            .map_err(|_| anyhow!("AST conversion of {} panicked", path.display()))?
    })
}

fn convert(path: &Path, json: &[u8]) -> anyhow::Result<TranslationUnit> {
    let mut de = serde_json::Deserializer::from_slice(json);
    de.disable_recursion_limit();
    let root = RawNode::deserialize(&mut de).map_err(Error::from)?;
    de.end().map_err(Error::from)?;
    if root.kind != "TranslationUnitDecl" {
        anyhow::bail!("expected a TranslationUnitDecl, found `{}`", root.kind);
    }

    let mut converter = Converter {
        builder: AstBuilder::new(path),
        ids: HashMap::new(),
        pending: Vec::new(),
        last_file: String::new(),
        last_line: 0,
    };
    let top = converter.builder.root();
    converter.locate(&root);
    for child in &root.inner {
        converter.node(child, top);
    }
    converter.link();
    Ok(converter.builder.finish())
}

// ---- raw dump ---------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    #[serde(default)]
    id: String,
    #[serde(default)]
    kind: String,
    name: Option<String>,
    #[serde(default)]
    loc: RawLoc,
    #[serde(default)]
    range: RawRange,
    #[serde(rename = "type")]
    ty: Option<RawType>,
    #[serde(default)]
    inner: Vec<RawNode>,
    referenced_decl: Option<Box<RawNode>>,
    referenced_member_decl: Option<String>,
    value: Option<serde_json::Value>,
    opcode: Option<String>,
    storage_class: Option<String>,
    #[serde(default)]
    bases: Vec<RawBase>,
    ctor_type: Option<RawType>,
    tag_used: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLoc {
    file: Option<String>,
    line: Option<u32>,
    col: Option<u32>,
    spelling_loc: Option<Box<RawLoc>>,
    expansion_loc: Option<Box<RawLoc>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRange {
    #[serde(default)]
    begin: RawLoc,
    #[serde(default)]
    end: RawLoc,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawType {
    qual_type: Option<String>,
    desugared_qual_type: Option<String>,
}

impl RawType {
    /// Fully desugared spelling when clang gives one.
    fn spelling(&self) -> Option<String> {
        self.desugared_qual_type
            .clone()
            .or_else(|| self.qual_type.clone())
    }
}

#[derive(Debug, Deserialize)]
struct RawBase {
    #[serde(rename = "type")]
    ty: Option<RawType>,
}

static KINDS: phf::Map<&'static str, CursorKind> = phf_map! {
    "NamespaceDecl" => CursorKind::Namespace,
    "ClassTemplatePartialSpecializationDecl" => CursorKind::PartialSpecialization,
    "ClassTemplateDecl" => CursorKind::ClassTemplate,
    "FunctionTemplateDecl" => CursorKind::FunctionTemplate,
    "EnumDecl" => CursorKind::EnumDecl,
    "EnumConstantDecl" => CursorKind::EnumConstant,
    "FunctionDecl" => CursorKind::Function,
    "CXXMethodDecl" => CursorKind::Method,
    "CXXConversionDecl" => CursorKind::Method,
    "CXXConstructorDecl" => CursorKind::Constructor,
    "FieldDecl" => CursorKind::Field,
    "VarDecl" => CursorKind::Var,
    "ParmVarDecl" => CursorKind::Parm,
    "TemplateTypeParmDecl" => CursorKind::TemplateTypeParam,
    "NonTypeTemplateParmDecl" => CursorKind::NonTypeTemplateParam,
    "TemplateArgument" => CursorKind::TemplateArgument,
    "CallExpr" => CursorKind::CallExpr,
    "CXXMemberCallExpr" => CursorKind::CallExpr,
    "CXXOperatorCallExpr" => CursorKind::CallExpr,
    "CXXConstructExpr" => CursorKind::ConstructExpr,
    "CXXTemporaryObjectExpr" => CursorKind::ConstructExpr,
    "LambdaExpr" => CursorKind::LambdaExpr,
    "MemberExpr" => CursorKind::MemberRef,
    "DeclRefExpr" => CursorKind::DeclRef,
    "StringLiteral" => CursorKind::StringLiteral,
    "IntegerLiteral" => CursorKind::IntegerLiteral,
    "CharacterLiteral" => CursorKind::IntegerLiteral,
    "FloatingLiteral" => CursorKind::FloatingLiteral,
    "CXXBoolLiteralExpr" => CursorKind::BoolLiteral,
    "CXXNullPtrLiteralExpr" => CursorKind::NullPtrLiteral,
    "InitListExpr" => CursorKind::InitList,
    "BinaryOperator" => CursorKind::BinaryOperator,
    "CompoundAssignOperator" => CursorKind::BinaryOperator,
    "UnaryOperator" => CursorKind::UnaryOperator,
    "ImplicitCastExpr" => CursorKind::ImplicitCast,
    "ParenExpr" => CursorKind::Paren,
    "ExprWithCleanups" => CursorKind::Unexposed,
    "MaterializeTemporaryExpr" => CursorKind::Unexposed,
    "CXXBindTemporaryExpr" => CursorKind::Unexposed,
    "ConstantExpr" => CursorKind::Unexposed,
    "CXXFunctionalCastExpr" => CursorKind::Unexposed,
    "CStyleCastExpr" => CursorKind::Unexposed,
    "CXXStaticCastExpr" => CursorKind::Unexposed,
    "CXXStdInitializerListExpr" => CursorKind::Unexposed,
    "SubstNonTypeTemplateParmExpr" => CursorKind::Unexposed,
    "CXXDefaultArgExpr" => CursorKind::DefaultArg,
    "CompoundStmt" => CursorKind::CompoundStmt,
    "ReturnStmt" => CursorKind::ReturnStmt,
    "DeclStmt" => CursorKind::DeclStmt,
};

fn kind_of(raw: &RawNode) -> CursorKind {
    match raw.kind.as_str() {
        "CXXRecordDecl" | "RecordDecl" | "ClassTemplateSpecializationDecl" => {
            match raw.tag_used.as_deref() {
                Some("class") => CursorKind::ClassDecl,
                _ => CursorKind::StructDecl,
            }
        }
        other => KINDS.get(other).copied().unwrap_or(CursorKind::Other),
    }
}

// ---- conversion -------------------------------------------------------

/// A reference to a declaration that may appear later in the dump.
struct Pending {
    node: NodeId,
    target: String,
    fallback: NodeSpec,
}

struct Converter {
    builder: AstBuilder,
    ids: HashMap<String, NodeId>,
    pending: Vec<Pending>,
    last_file: String,
    last_line: u32,
}

impl Converter {
    fn node(&mut self, raw: &RawNode, parent: NodeId) {
        let location = self.locate(raw);
        let kind = kind_of(raw);

        let mut spec = NodeSpec::new(kind, spelling_of(raw, kind)).at(location);
        if let Some(ty) = raw.ty.as_ref().and_then(RawType::spelling) {
            spec = spec.ty(ty);
        }
        if let Some(value) = value_of(raw, kind) {
            spec = spec.value(value);
        }
        if raw.storage_class.as_deref() == Some("static") {
            spec = spec.static_storage();
        }
        let id = self.builder.push(Some(parent), spec);
        if !raw.id.is_empty() {
            self.ids.entry(raw.id.clone()).or_insert(id);
        }

        for base in &raw.bases {
            let mut spec = NodeSpec::new(CursorKind::BaseSpecifier, "");
            if let Some(ty) = base.ty.as_ref().and_then(RawType::spelling) {
                spec = spec.ty(ty);
            }
            self.builder.push(Some(id), spec);
        }

        match kind {
            CursorKind::DeclRef => {
                if let Some(decl) = &raw.referenced_decl {
                    self.defer(id, decl.id.clone(), declaration_spec(decl));
                }
            }
            CursorKind::MemberRef => {
                if let Some(target) = &raw.referenced_member_decl {
                    let member_kind = match raw.ty.as_ref().and_then(|t| t.qual_type.as_deref()) {
                        Some("<bound member function type>") => CursorKind::Method,
                        _ => CursorKind::Field,
                    };
                    let fallback =
                        NodeSpec::new(member_kind, raw.name.clone().unwrap_or_default());
                    self.defer(id, target.clone(), fallback);
                }
            }
            CursorKind::CallExpr => {
                if let Some(callee) = callee_of(raw) {
                    match (&callee.referenced_decl, &callee.referenced_member_decl) {
                        (Some(decl), _) => self.defer(id, decl.id.clone(), declaration_spec(decl)),
                        (None, Some(target)) => {
                            let fallback = NodeSpec::new(
                                CursorKind::Method,
                                callee.name.clone().unwrap_or_default(),
                            );
                            self.defer(id, target.clone(), fallback)
                        }
                        (None, None) => {}
                    }
                }
            }
            CursorKind::ConstructExpr => {
                let constructor = self.constructor(raw);
                self.builder.set_referenced(id, constructor);
            }
            _ => {}
        }

        for child in &raw.inner {
            self.node(child, id);
        }
    }

    fn defer(&mut self, node: NodeId, target: String, fallback: NodeSpec) {
        self.pending.push(Pending {
            node,
            target,
            fallback,
        });
    }

    /// Constructor calls carry only the constructor's type; the declaration
    /// is synthesized with one parameter node per argument type.
    fn constructor(&mut self, raw: &RawNode) -> NodeId {
        let class = raw
            .ty
            .as_ref()
            .and_then(RawType::spelling)
            .unwrap_or_default();
        let ctor_type = raw.ctor_type.as_ref().and_then(RawType::spelling);
        let mut spec = NodeSpec::new(CursorKind::Constructor, class);
        if let Some(ty) = &ctor_type {
            spec = spec.ty(ty.clone());
        }
        let decl = self.builder.push(None, spec);
        let params = ctor_type
            .as_deref()
            .and_then(split_function_type)
            .map(|(_, params)| params)
            .unwrap_or_default();
        for param in params {
            self.builder
                .push(Some(decl), NodeSpec::new(CursorKind::Parm, "").ty(param));
        }
        decl
    }

    /// Point every reference at its declaration, synthesizing a detached
    /// node for declarations the dump never printed.
    fn link(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for reference in pending {
            let target = match self.ids.get(&reference.target) {
                Some(&target) => target,
                None => {
                    let target = self.builder.push(None, reference.fallback);
                    self.ids.insert(reference.target, target);
                    target
                }
            };
            self.builder.set_referenced(reference.node, target);
        }
    }

    /// Decode the node's locations in print order; prefer its own location
    /// over the start of its range.
    fn locate(&mut self, raw: &RawNode) -> Location {
        let own = self.decode(&raw.loc);
        let begin = self.decode(&raw.range.begin);
        self.decode(&raw.range.end);
        own.or(begin).unwrap_or_default()
    }

    fn decode(&mut self, loc: &RawLoc) -> Option<Location> {
        if loc.spelling_loc.is_some() || loc.expansion_loc.is_some() {
            if let Some(spelling) = &loc.spelling_loc {
                self.decode(spelling);
            }
            return loc.expansion_loc.as_ref().and_then(|e| self.decode(e));
        }
        if let Some(file) = &loc.file {
            self.last_file = file.clone();
        }
        if let Some(line) = loc.line {
            self.last_line = line;
        }
        let column = loc.col?;
        Some(Location::new(self.last_file.clone(), self.last_line, column))
    }
}

fn declaration_spec(decl: &RawNode) -> NodeSpec {
    let kind = kind_of(decl);
    let mut spec = NodeSpec::new(kind, decl.name.clone().unwrap_or_default());
    if let Some(ty) = decl.ty.as_ref().and_then(RawType::spelling) {
        spec = spec.ty(ty);
    }
    spec
}

/// The callee expression of a call, through casts and parentheses.
fn callee_of(call: &RawNode) -> Option<&RawNode> {
    let mut callee = call.inner.first()?;
    while matches!(callee.kind.as_str(), "ImplicitCastExpr" | "ParenExpr") {
        callee = callee.inner.first()?;
    }
    Some(callee)
}

fn spelling_of(raw: &RawNode, kind: CursorKind) -> String {
    let spelling = match kind {
        CursorKind::CallExpr => callee_of(raw).and_then(|callee| {
            callee
                .referenced_decl
                .as_ref()
                .and_then(|d| d.name.clone())
                .or_else(|| callee.name.clone())
        }),
        CursorKind::DeclRef => raw.referenced_decl.as_ref().and_then(|d| d.name.clone()),
        CursorKind::BinaryOperator | CursorKind::UnaryOperator => raw.opcode.clone(),
        _ => raw.name.clone(),
    };
    spelling.unwrap_or_default()
}

fn value_of(raw: &RawNode, kind: CursorKind) -> Option<String> {
    match kind {
        CursorKind::StringLiteral => match &raw.value {
            Some(serde_json::Value::String(text)) => Some(decode_string_literal(text)),
            _ => None,
        },
        // Explicit enumerator values are folded into a constant expression.
        CursorKind::EnumConstant => raw
            .inner
            .iter()
            .find(|c| c.kind == "ConstantExpr")
            .and_then(|c| c.value.as_ref())
            .map(json_scalar),
        _ => raw.value.as_ref().map(json_scalar),
    }
}

fn json_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Text of a string literal as clang prints it: optional encoding prefix,
/// quotes, and C escapes (non-ASCII bytes as octal).
fn decode_string_literal(printed: &str) -> String {
    let body = match (printed.find('"'), printed.rfind('"')) {
        (Some(open), Some(close)) if close > open => &printed[open + 1..close],
        _ => return printed.to_string(),
    };

    let mut bytes: Vec<u8> = Vec::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let escape = match chars.next() {
            Some(e) => e,
            None => break,
        };
        match escape {
            'n' => bytes.push(b'\n'),
            't' => bytes.push(b'\t'),
            'r' => bytes.push(b'\r'),
            'a' => bytes.push(0x07),
            'b' => bytes.push(0x08),
            'f' => bytes.push(0x0c),
            'v' => bytes.push(0x0b),
            'e' => bytes.push(0x1b),
            '0'..='7' => {
                let mut value = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                bytes.push(value as u8);
            }
            'x' => {
                let mut value = 0u32;
                while let Some(d) = chars.peek().and_then(|d| d.to_digit(16)) {
                    value = value.wrapping_mul(16).wrapping_add(d);
                    chars.next();
                }
                bytes.push(value as u8);
            }
            'u' | 'U' => {
                let width = if escape == 'u' { 4 } else { 8 };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                let decoded = u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(decoded.encode_utf8(&mut buf).as_bytes());
            }
            other => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
