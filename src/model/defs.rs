//! Definitions discovered from registration idioms.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use super::TypeDesc;
use crate::ast::Location;
use crate::error::{Error, Result};

/// A literal value as it appeared in the C++ source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Literal {
    Integer(String),
    Float(String),
    Bool(bool),
    String(String),
}

impl Literal {
    /// Python source text for the literal.
    pub fn to_python(&self) -> String {
        match self {
            Literal::Integer(v) => v.clone(),
            Literal::Float(v) => {
                if v.contains(['.', 'e', 'E']) || v.contains("inf") || v.contains("nan") {
                    v.clone()
                } else {
                    format!("{}.0", v)
                }
            }
            Literal::Bool(true) => "True".to_string(),
            Literal::Bool(false) => "False".to_string(),
            Literal::String(s) => python_string(s),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Literal::Integer(_))
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Literal::Integer(v) => v.parse().ok(),
            _ => None,
        }
    }
}

fn python_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeDesc,
}

/// Shape shared by functions, methods, static methods and constructors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Absent for constructors.
    pub return_type: Option<TypeDesc>,
    pub params: Vec<Parameter>,
    /// Diagnostic only.
    pub raw_signature: String,
}

/// A function, method, static method or constructor overload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallableDef {
    pub signature: Signature,
    pub doc: Option<String>,
    #[serde(default)]
    pub is_static: bool,
    pub cpp_signature: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantDef {
    pub name: String,
    pub ty: TypeDesc,
    pub value: Option<Literal>,
    pub location: Location,
}

/// A property; read-only while `set_type` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSetter {
    pub name: String,
    pub doc: Option<String>,
    pub get_type: Option<TypeDesc>,
    pub set_type: Option<TypeDesc>,
    pub set_param_name: Option<String>,
    pub location: Location,
}

impl GetSetter {
    pub fn is_read_only(&self) -> bool {
        self.set_type.is_none()
    }

    /// Fold a later registration of the same property into this one.
    pub fn absorb(&mut self, other: GetSetter, owner: &str) -> Result<()> {
        let key = format!("{}.{}", owner, self.name);
        if other.get_type.is_some() {
            if self.get_type.is_some() {
                return Err(Error::Duplicate {
                    kind: "property getter",
                    key,
                    first: self.location.clone(),
                    second: other.location,
                });
            }
            self.get_type = other.get_type;
        }
        if other.set_type.is_some() {
            if self.set_type.is_some() {
                return Err(Error::Duplicate {
                    kind: "property setter",
                    key,
                    first: self.location.clone(),
                    second: other.location,
                });
            }
            self.set_type = other.set_type;
            self.set_param_name = other.set_param_name;
        }
        if self.doc.is_none() {
            self.doc = other.doc;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumValueKind {
    Integer,
    String,
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub cpp_name: String,
    pub dynamic_name: String,
    pub doc: Option<String>,
    pub fully_qualified_name: Option<String>,
    /// Placed classes and enums, with the site of each `add_*` call.
    pub inner_classes: IndexMap<String, Location>,
    pub inner_enums: IndexMap<String, Location>,
    pub functions: IndexMap<String, Vec<CallableDef>>,
    pub constants: IndexMap<String, ConstantDef>,
    /// Where `declare_module` was called; `None` while only additions are known.
    pub declared_at: Option<Location>,
    /// Loaded from a previous run's artifact; not emitted again.
    #[serde(default)]
    pub imported: bool,
}

impl ModuleDef {
    pub fn placeholder(cpp_name: impl Into<String>) -> Self {
        Self {
            cpp_name: cpp_name.into(),
            dynamic_name: String::new(),
            doc: None,
            fully_qualified_name: None,
            inner_classes: IndexMap::new(),
            inner_enums: IndexMap::new(),
            functions: IndexMap::new(),
            constants: IndexMap::new(),
            declared_at: None,
            imported: false,
        }
    }

    pub fn add_function(&mut self, name: impl Into<String>, def: CallableDef) {
        self.functions.entry(name.into()).or_default().push(def);
    }

    pub fn add_constant(&mut self, constant: ConstantDef) -> Result<()> {
        insert_constant(&mut self.constants, constant, &self.cpp_name)
    }

    pub fn add_inner_class(&mut self, shadow_key: &str, at: &Location) -> Result<()> {
        place(&mut self.inner_classes, shadow_key, "module class", &self.cpp_name, at)
    }

    pub fn add_inner_enum(&mut self, enum_key: &str, at: &Location) -> Result<()> {
        place(&mut self.inner_enums, enum_key, "module enum", &self.cpp_name, at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    pub dynamic_name: String,
    pub shadow_key: String,
    pub cpp_type: TypeDesc,
    pub parent_key: Option<String>,
    pub doc: Option<String>,
    pub fully_qualified_name: Option<String>,
    /// Placed classes and enums, with the site of each `add_*` call.
    pub inner_classes: IndexMap<String, Location>,
    pub inner_enums: IndexMap<String, Location>,
    pub constructors: Vec<CallableDef>,
    pub methods: IndexMap<String, Vec<CallableDef>>,
    pub properties: IndexMap<String, GetSetter>,
    pub constants: IndexMap<String, ConstantDef>,
    pub implicit_conversion_sources: IndexSet<TypeDesc>,
    pub declared_at: Option<Location>,
    #[serde(default)]
    pub imported: bool,
}

impl ClassDef {
    pub fn placeholder(shadow_key: impl Into<String>, cpp_type: TypeDesc) -> Self {
        Self {
            dynamic_name: String::new(),
            shadow_key: shadow_key.into(),
            cpp_type,
            parent_key: None,
            doc: None,
            fully_qualified_name: None,
            inner_classes: IndexMap::new(),
            inner_enums: IndexMap::new(),
            constructors: Vec::new(),
            methods: IndexMap::new(),
            properties: IndexMap::new(),
            constants: IndexMap::new(),
            implicit_conversion_sources: IndexSet::new(),
            declared_at: None,
            imported: false,
        }
    }

    pub fn add_method(&mut self, name: impl Into<String>, def: CallableDef) {
        self.methods.entry(name.into()).or_default().push(def);
    }

    pub fn add_constructor(&mut self, def: CallableDef) {
        self.constructors.push(def);
    }

    /// Register a property or complete an existing one with its other half.
    pub fn add_property(&mut self, property: GetSetter) -> Result<()> {
        match self.properties.get_mut(&property.name) {
            Some(existing) => existing.absorb(property, &self.shadow_key),
            None => {
                self.properties.insert(property.name.clone(), property);
                Ok(())
            }
        }
    }

    pub fn add_constant(&mut self, constant: ConstantDef) -> Result<()> {
        insert_constant(&mut self.constants, constant, &self.shadow_key)
    }

    pub fn add_inner_class(&mut self, shadow_key: &str, at: &Location) -> Result<()> {
        place(&mut self.inner_classes, shadow_key, "inner class", &self.shadow_key, at)
    }

    pub fn add_inner_enum(&mut self, enum_key: &str, at: &Location) -> Result<()> {
        place(&mut self.inner_enums, enum_key, "inner enum", &self.shadow_key, at)
    }

    pub fn add_implicit_conversion(&mut self, source: TypeDesc) {
        self.implicit_conversion_sources.insert(source);
    }

    /// Whether the class contributes any member to the rendered body.
    pub fn has_members(&self) -> bool {
        !(self.inner_classes.is_empty()
            && self.inner_enums.is_empty()
            && self.constructors.is_empty()
            && self.methods.is_empty()
            && self.properties.is_empty()
            && self.constants.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDef {
    pub dynamic_name: String,
    pub cpp_name: String,
    pub value_kind: EnumValueKind,
    /// `None` marks a value that could not be read as a literal.
    pub values: IndexMap<String, Option<Literal>>,
    pub doc: Option<String>,
    pub fully_qualified_name: Option<String>,
    pub declared_at: Option<Location>,
    #[serde(default)]
    pub imported: bool,
}

impl EnumDef {
    pub fn placeholder(cpp_name: impl Into<String>) -> Self {
        Self {
            dynamic_name: String::new(),
            cpp_name: cpp_name.into(),
            value_kind: EnumValueKind::Opaque,
            values: IndexMap::new(),
            doc: None,
            fully_qualified_name: None,
            declared_at: None,
            imported: false,
        }
    }
}

/// A type-exporter rule mapping C++ types to a rendering template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMapRule {
    /// May contain the names in `template_params`.
    pub matched_type: TypeDesc,
    /// References parameters as `{Name}`.
    pub rendering: String,
    pub template_params: Vec<String>,
    pub extra_declarations: Vec<String>,
    pub location: Location,
}

impl TypeMapRule {
    pub fn is_full(&self) -> bool {
        self.template_params.is_empty()
    }

    pub fn is_param(&self, name: &str) -> bool {
        self.template_params.iter().any(|p| p == name)
    }

    /// Parameter-name independent form used to detect duplicate rules.
    ///
    /// Parameters are renamed positionally in order of first occurrence in
    /// the matched type, so `vector<T>` and `vector<U>` compare equal.
    pub fn canonical_form(&self) -> (TypeDesc, String, Vec<String>) {
        let mut order: Vec<&str> = Vec::new();
        self.matched_type.walk_names(&mut |name| {
            if self.is_param(name) && !order.contains(&name) {
                order.push(name);
            }
        });
        let renames: std::collections::HashMap<String, String> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), format!("${}", i)))
            .collect();
        let rename_text = |text: &str| {
            let mut out = text.to_string();
            for (from, to) in &renames {
                out = out.replace(&format!("{{{}}}", from), &format!("{{{}}}", to));
            }
            out
        };
        (
            self.matched_type.rename(&renames),
            rename_text(&self.rendering),
            self.extra_declarations.iter().map(|d| rename_text(d)).collect(),
        )
    }

    /// Short description naming the pattern and where it was declared.
    pub fn describe(&self) -> String {
        if self.is_full() {
            format!("{} (at {})", self.matched_type, self.location)
        } else {
            format!(
                "template<{}> {} (at {})",
                self.template_params.join(", "),
                self.matched_type,
                self.location
            )
        }
    }
}

fn insert_constant(
    constants: &mut IndexMap<String, ConstantDef>,
    constant: ConstantDef,
    owner: &str,
) -> Result<()> {
    if let Some(existing) = constants.get(&constant.name) {
        return Err(Error::Duplicate {
            kind: "constant",
            key: format!("{}.{}", owner, constant.name),
            first: existing.location.clone(),
            second: constant.location,
        });
    }
    constants.insert(constant.name.clone(), constant);
    Ok(())
}

fn place(
    placed: &mut IndexMap<String, Location>,
    key: &str,
    kind: &'static str,
    owner: &str,
    at: &Location,
) -> Result<()> {
    if let Some(first) = placed.get(key) {
        return Err(Error::Duplicate {
            kind,
            key: format!("{} in {}", key, owner),
            first: first.clone(),
            second: at.clone(),
        });
    }
    placed.insert(key.to_string(), at.clone());
    Ok(())
}
