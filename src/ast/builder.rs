//! Incremental construction of [`TranslationUnit`] arenas.

use std::collections::HashMap;
use std::path::PathBuf;

use super::{CursorKind, Location, NodeData, NodeId, TranslationUnit};
use crate::model::split_function_type;

/// Attributes of a node about to be added to an [`AstBuilder`].
#[derive(Debug, Clone)]
pub struct NodeSpec {
    kind: CursorKind,
    spelling: String,
    ty: Option<String>,
    result_ty: Option<String>,
    location: Location,
    value: Option<String>,
    is_static: bool,
}

impl NodeSpec {
    pub fn new(kind: CursorKind, spelling: impl Into<String>) -> Self {
        Self {
            kind,
            spelling: spelling.into(),
            ty: None,
            result_ty: None,
            location: Location::default(),
            value: None,
            is_static: false,
        }
    }

    pub fn ty(mut self, ty: impl Into<String>) -> Self {
        self.ty = Some(ty.into());
        self
    }

    pub fn result(mut self, ty: impl Into<String>) -> Self {
        self.result_ty = Some(ty.into());
        self
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn static_storage(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// Builds a translation unit node by node.
///
/// Node 0 is always the translation-unit root.
pub struct AstBuilder {
    path: PathBuf,
    nodes: Vec<NodeData>,
}

impl AstBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let root = NodeData {
            kind: CursorKind::TranslationUnit,
            spelling: path.to_string_lossy().to_string(),
            ty: None,
            result_ty: None,
            location: Location::default(),
            value: None,
            is_static: false,
            parent: None,
            children: Vec::new(),
            referenced: None,
        };
        Self {
            path,
            nodes: vec![root],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Add a node under `parent`; `None` creates a detached node that is
    /// only reachable as a reference target.
    pub fn push(&mut self, parent: Option<NodeId>, spec: NodeSpec) -> NodeId {
        let id = NodeId(self.nodes.len());
        let result_ty = match (&spec.result_ty, &spec.ty) {
            (Some(r), _) => Some(r.clone()),
            (None, Some(ty)) if spec.kind.is_function_like() => {
                split_function_type(ty).map(|(ret, _)| ret)
            }
            _ => None,
        };
        self.nodes.push(NodeData {
            kind: spec.kind,
            spelling: spec.spelling,
            ty: spec.ty,
            result_ty,
            location: spec.location,
            value: spec.value,
            is_static: spec.is_static,
            parent,
            children: Vec::new(),
            referenced: None,
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }

    pub fn set_referenced(&mut self, node: NodeId, target: NodeId) {
        self.nodes[node.0].referenced = Some(target);
    }

    pub fn set_value(&mut self, node: NodeId, value: impl Into<String>) {
        self.nodes[node.0].value = Some(value.into());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn finish(self) -> TranslationUnit {
        let mut tu = TranslationUnit {
            path: self.path,
            nodes: self.nodes,
            root: NodeId(0),
            type_decls: HashMap::new(),
        };

        let mut index: HashMap<String, NodeId> = HashMap::new();
        for i in 0..tu.nodes.len() {
            let kind = tu.nodes[i].kind;
            if !(kind.is_record() || kind == CursorKind::EnumDecl) {
                continue;
            }
            let cursor = tu.cursor(NodeId(i));
            let name = cursor.qualified_name();
            let has_body = cursor.child_count() > 0;
            match index.get(&name) {
                // Keep the definition over forward declarations.
                Some(&existing) if tu.cursor(existing).child_count() > 0 || !has_body => {}
                _ => {
                    index.insert(name, NodeId(i));
                }
            }
        }
        tu.type_decls = index;
        tu
    }
}
