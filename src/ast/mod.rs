//! Compiler AST capability consumed by the extractor.
//!
//! The tree is owned by a [`TranslationUnit`] arena and inspected through
//! cheap, copyable [`Cursor`] handles, in the spirit of libclang cursors:
//! every node exposes a kind, a spelling, a canonical type, a source
//! location, its semantic parent, its children and (for references and
//! calls) the declaration it refers to.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │ Source file  │────▶│ AstProvider      │────▶│TranslationUnit│
//! └──────────────┘     │ (clang JSON dump)│     │  (arena)      │
//!                      └──────────────────┘     └───────────────┘
//! ```

mod builder;
pub mod clang;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::model::TypeDesc;

pub use builder::{AstBuilder, NodeSpec};

/// Source location of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    pub fn is_known(&self) -> bool {
        !self.file.is_empty()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "<unknown location>")
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

/// Closed set of node kinds the extractor distinguishes.
///
/// Everything the extractor never looks at collapses into `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorKind {
    TranslationUnit,
    Namespace,
    StructDecl,
    ClassDecl,
    PartialSpecialization,
    ClassTemplate,
    FunctionTemplate,
    EnumDecl,
    EnumConstant,
    Function,
    Method,
    Constructor,
    Field,
    Var,
    Parm,
    TemplateTypeParam,
    NonTypeTemplateParam,
    TemplateArgument,
    BaseSpecifier,
    CallExpr,
    ConstructExpr,
    LambdaExpr,
    MemberRef,
    DeclRef,
    StringLiteral,
    IntegerLiteral,
    FloatingLiteral,
    BoolLiteral,
    NullPtrLiteral,
    InitList,
    BinaryOperator,
    UnaryOperator,
    ImplicitCast,
    Paren,
    /// Value-preserving wrapper (temporaries, cleanups, constant folding).
    Unexposed,
    DefaultArg,
    CompoundStmt,
    ReturnStmt,
    DeclStmt,
    Other,
}

impl CursorKind {
    /// Nodes that never change the meaning of the expression they wrap.
    pub fn is_transparent(&self) -> bool {
        matches!(
            self,
            CursorKind::ImplicitCast | CursorKind::Paren | CursorKind::Unexposed
        )
    }

    pub fn is_record(&self) -> bool {
        matches!(self, CursorKind::StructDecl | CursorKind::ClassDecl)
    }

    pub fn is_function_like(&self) -> bool {
        matches!(
            self,
            CursorKind::Function | CursorKind::Method | CursorKind::Constructor
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CursorKind::TranslationUnit => "translation unit",
            CursorKind::Namespace => "namespace",
            CursorKind::StructDecl => "struct declaration",
            CursorKind::ClassDecl => "class declaration",
            CursorKind::PartialSpecialization => "partial specialization",
            CursorKind::ClassTemplate => "class template",
            CursorKind::FunctionTemplate => "function template",
            CursorKind::EnumDecl => "enum declaration",
            CursorKind::EnumConstant => "enumerator",
            CursorKind::Function => "function",
            CursorKind::Method => "method",
            CursorKind::Constructor => "constructor",
            CursorKind::Field => "field",
            CursorKind::Var => "variable",
            CursorKind::Parm => "parameter",
            CursorKind::TemplateTypeParam => "template type parameter",
            CursorKind::NonTypeTemplateParam => "non-type template parameter",
            CursorKind::TemplateArgument => "template argument",
            CursorKind::BaseSpecifier => "base specifier",
            CursorKind::CallExpr => "call expression",
            CursorKind::ConstructExpr => "construct expression",
            CursorKind::LambdaExpr => "lambda expression",
            CursorKind::MemberRef => "member reference",
            CursorKind::DeclRef => "declaration reference",
            CursorKind::StringLiteral => "string literal",
            CursorKind::IntegerLiteral => "integer literal",
            CursorKind::FloatingLiteral => "floating literal",
            CursorKind::BoolLiteral => "bool literal",
            CursorKind::NullPtrLiteral => "nullptr literal",
            CursorKind::InitList => "initializer list",
            CursorKind::BinaryOperator => "binary operator",
            CursorKind::UnaryOperator => "unary operator",
            CursorKind::ImplicitCast => "implicit cast",
            CursorKind::Paren => "parenthesized expression",
            CursorKind::Unexposed => "unexposed expression",
            CursorKind::DefaultArg => "default argument",
            CursorKind::CompoundStmt => "compound statement",
            CursorKind::ReturnStmt => "return statement",
            CursorKind::DeclStmt => "declaration statement",
            CursorKind::Other => "other",
        }
    }
}

impl fmt::Display for CursorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Index of a node inside its [`TranslationUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub kind: CursorKind,
    pub spelling: String,
    pub ty: Option<String>,
    pub result_ty: Option<String>,
    pub location: Location,
    pub value: Option<String>,
    pub is_static: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub referenced: Option<NodeId>,
}

/// One parsed translation unit.
#[derive(Debug)]
pub struct TranslationUnit {
    path: PathBuf,
    nodes: Vec<NodeData>,
    root: NodeId,
    type_decls: HashMap<String, NodeId>,
}

impl TranslationUnit {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> Cursor<'_> {
        self.cursor(self.root)
    }

    pub fn cursor(&self, id: NodeId) -> Cursor<'_> {
        Cursor { tu: self, id }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Find the defining declaration of a record or enum by qualified name.
    pub fn type_declaration(&self, qualified_name: &str) -> Option<Cursor<'_>> {
        self.type_decls
            .get(qualified_name)
            .map(|&id| self.cursor(id))
    }

    fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }
}

/// Handle to a node of a [`TranslationUnit`].
#[derive(Clone, Copy)]
pub struct Cursor<'tu> {
    tu: &'tu TranslationUnit,
    id: NodeId,
}

impl<'tu> Cursor<'tu> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn unit(&self) -> &'tu TranslationUnit {
        self.tu
    }

    pub fn kind(&self) -> CursorKind {
        self.tu.data(self.id).kind
    }

    pub fn spelling(&self) -> &'tu str {
        &self.tu.data(self.id).spelling
    }

    /// Canonical type spelling, if the node has a type.
    pub fn ty(&self) -> Option<&'tu str> {
        self.tu.data(self.id).ty.as_deref()
    }

    pub fn type_desc(&self) -> Option<TypeDesc> {
        self.ty().map(TypeDesc::parse)
    }

    /// Return type of a function-like declaration.
    pub fn result_ty(&self) -> Option<&'tu str> {
        self.tu.data(self.id).result_ty.as_deref()
    }

    pub fn location(&self) -> &'tu Location {
        &self.tu.data(self.id).location
    }

    /// Literal value of literal nodes and evaluated enumerators.
    pub fn value(&self) -> Option<&'tu str> {
        self.tu.data(self.id).value.as_deref()
    }

    pub fn is_static(&self) -> bool {
        self.tu.data(self.id).is_static
    }

    pub fn semantic_parent(&self) -> Option<Cursor<'tu>> {
        self.tu.data(self.id).parent.map(|id| self.tu.cursor(id))
    }

    pub fn referenced(&self) -> Option<Cursor<'tu>> {
        self.tu.data(self.id).referenced.map(|id| self.tu.cursor(id))
    }

    pub fn children(&self) -> impl Iterator<Item = Cursor<'tu>> + 'tu {
        let tu = self.tu;
        tu.data(self.id).children.iter().map(move |&id| tu.cursor(id))
    }

    pub fn child(&self, index: usize) -> Option<Cursor<'tu>> {
        self.tu
            .data(self.id)
            .children
            .get(index)
            .map(|&id| self.tu.cursor(id))
    }

    pub fn child_count(&self) -> usize {
        self.tu.data(self.id).children.len()
    }

    pub fn children_of_kind(&self, kind: CursorKind) -> impl Iterator<Item = Cursor<'tu>> + 'tu {
        self.children().filter(move |c| c.kind() == kind)
    }

    /// Walk up the semantic parents, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = Cursor<'tu>> + 'tu {
        std::iter::successors(self.semantic_parent(), |c| c.semantic_parent())
    }

    /// `ns::Outer::name`, built from enclosing namespaces and records.
    pub fn qualified_name(&self) -> String {
        let mut parts = vec![self.spelling().to_string()];
        for ancestor in self.ancestors() {
            match ancestor.kind() {
                CursorKind::Namespace => {
                    if ancestor.spelling().is_empty() {
                        parts.push("(anonymous namespace)".to_string());
                    } else {
                        parts.push(ancestor.spelling().to_string());
                    }
                }
                CursorKind::StructDecl
                | CursorKind::ClassDecl
                | CursorKind::PartialSpecialization => {
                    parts.push(ancestor.spelling().to_string())
                }
                _ => {}
            }
        }
        parts.reverse();
        parts.join("::")
    }
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("kind", &self.kind())
            .field("spelling", &self.spelling())
            .field("location", &self.location().to_string())
            .finish()
    }
}

/// Result of parsing one source file.
#[derive(Debug)]
pub struct ParsedUnit {
    pub unit: TranslationUnit,
    /// Every file the translation unit transitively included.
    pub dependencies: Vec<PathBuf>,
}

/// A source of translation units.
///
/// Implementations must be usable from several worker threads at once;
/// each call is independent of every other call.
pub trait AstProvider: Send + Sync {
    /// Parse one translation unit, optionally on top of a precompiled prefix.
    fn parse(&self, source: &Path, prefix: Option<&Path>) -> anyhow::Result<ParsedUnit>;

    /// Compile `source` into a reusable prefix artifact at `output`.
    ///
    /// Returns the files the prefix depends on.
    fn build_prefix(&self, source: &Path, output: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let _ = output;
        anyhow::bail!(
            "this AST provider cannot build a precompiled prefix from {}",
            source.display()
        )
    }

    /// Identity of the parse configuration (flags), used in cache keys.
    fn fingerprint(&self) -> String;
}
