//! The binding model: everything the embedding layer exposes.
//!
//! Modules, classes and enums live in arena vectors owned by one
//! [`BindingModel`]. Containment (`inner_classes`, `inner_enums`) and
//! inheritance (`parent_key`) refer to other entities by key, and lookups go
//! through index tables rebuilt by [`BindingModel::reindex`] after loading.
//! Classes are reachable through two independent keys: the shadow key the
//! runtime dispatches on and the C++ type.

mod defs;
mod merge;
mod types;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ast::Location;
use crate::error::{Error, Result};

pub use defs::{
    CallableDef, ClassDef, ConstantDef, EnumDef, EnumValueKind, GetSetter, Literal, ModuleDef,
    Parameter, Signature, TypeMapRule,
};
pub use types::{split_function_type, TypeDesc, POINTER_MARKER};

/// Rule-table key for rules whose matched type is itself a parameter
/// (`template <class T> struct TypeExporter<T *>`).
pub const WILDCARD_RULE_KEY: &str = "*";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BindingModel {
    modules: Vec<ModuleDef>,
    classes: Vec<ClassDef>,
    enums: Vec<EnumDef>,
    rules: IndexMap<String, Vec<TypeMapRule>>,

    #[serde(skip)]
    module_index: HashMap<String, usize>,
    #[serde(skip)]
    class_by_shadow: HashMap<String, usize>,
    #[serde(skip)]
    class_by_cpp: HashMap<TypeDesc, usize>,
    #[serde(skip)]
    enum_index: HashMap<String, usize>,
}

impl BindingModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
            && self.classes.is_empty()
            && self.enums.is_empty()
            && self.rules.is_empty()
    }

    pub fn modules(&self) -> &[ModuleDef] {
        &self.modules
    }

    pub fn classes(&self) -> &[ClassDef] {
        &self.classes
    }

    pub fn enums(&self) -> &[EnumDef] {
        &self.enums
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Rebuild the lookup tables from the arenas.
    pub fn reindex(&mut self) {
        self.module_index = self
            .modules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.cpp_name.clone(), i))
            .collect();
        self.class_by_shadow = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.shadow_key.clone(), i))
            .collect();
        self.class_by_cpp = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.cpp_type.clone(), i))
            .collect();
        self.enum_index = self
            .enums
            .iter()
            .enumerate()
            .map(|(i, e)| (e.cpp_name.clone(), i))
            .collect();
    }

    /// Flag every entity as loaded from a previous run.
    pub fn mark_imported(&mut self) {
        for m in &mut self.modules {
            m.imported = true;
        }
        for c in &mut self.classes {
            c.imported = true;
        }
        for e in &mut self.enums {
            e.imported = true;
        }
    }

    /// Drop every imported entity, keeping what this run declared.
    pub fn retain_local(&mut self) {
        self.modules.retain(|m| !m.imported);
        self.classes.retain(|c| !c.imported);
        self.enums.retain(|e| !e.imported);
        self.reindex();
    }

    // ---- lookup ---------------------------------------------------------

    pub fn module(&self, cpp_name: &str) -> Option<&ModuleDef> {
        self.module_index.get(cpp_name).map(|&i| &self.modules[i])
    }

    pub fn class(&self, shadow_key: &str) -> Option<&ClassDef> {
        self.class_by_shadow.get(shadow_key).map(|&i| &self.classes[i])
    }

    pub fn class_for_type(&self, cpp_type: &TypeDesc) -> Option<&ClassDef> {
        self.class_by_cpp.get(cpp_type).map(|&i| &self.classes[i])
    }

    pub fn enumeration(&self, cpp_name: &str) -> Option<&EnumDef> {
        self.enum_index.get(cpp_name).map(|&i| &self.enums[i])
    }

    /// Rules that may match a type named `name`, including wildcard rules.
    pub fn rules_for<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a TypeMapRule> + 'a {
        let named = self.rules.get(name).into_iter().flatten();
        let wildcard = self.rules.get(WILDCARD_RULE_KEY).into_iter().flatten();
        named.chain(wildcard)
    }

    pub fn rules(&self) -> impl Iterator<Item = &TypeMapRule> {
        self.rules.values().flatten()
    }

    // ---- mutation -------------------------------------------------------

    /// The module keyed by `cpp_name`, created as a placeholder if unseen.
    pub fn module_entry(&mut self, cpp_name: &str) -> &mut ModuleDef {
        let index = match self.module_index.get(cpp_name) {
            Some(&i) => i,
            None => {
                self.modules.push(ModuleDef::placeholder(cpp_name));
                let i = self.modules.len() - 1;
                self.module_index.insert(cpp_name.to_string(), i);
                i
            }
        };
        &mut self.modules[index]
    }

    /// Record the `declare_module` call for `cpp_name`.
    pub fn declare_module(
        &mut self,
        cpp_name: &str,
        dynamic_name: &str,
        doc: Option<String>,
        at: &Location,
    ) -> Result<()> {
        let module = self.module_entry(cpp_name);
        if let Some(first) = &module.declared_at {
            return Err(Error::Duplicate {
                kind: "module",
                key: cpp_name.to_string(),
                first: first.clone(),
                second: at.clone(),
            });
        }
        module.dynamic_name = dynamic_name.to_string();
        module.doc = doc;
        module.declared_at = Some(at.clone());
        Ok(())
    }

    /// The class keyed by `shadow_key`, created as a placeholder if unseen.
    ///
    /// Both keys must agree with any earlier registration: one C++ type
    /// under two shadow keys (or the reverse) is a duplicate.
    pub fn class_entry(
        &mut self,
        shadow_key: &str,
        cpp_type: &TypeDesc,
        at: &Location,
    ) -> Result<&mut ClassDef> {
        let by_shadow = self.class_by_shadow.get(shadow_key).copied();
        let by_cpp = self.class_by_cpp.get(cpp_type).copied();
        let index = match (by_shadow, by_cpp) {
            (Some(a), Some(b)) if a == b => a,
            (None, None) => {
                self.classes
                    .push(ClassDef::placeholder(shadow_key, cpp_type.clone()));
                let i = self.classes.len() - 1;
                self.class_by_shadow.insert(shadow_key.to_string(), i);
                self.class_by_cpp.insert(cpp_type.clone(), i);
                i
            }
            (Some(existing), _) | (None, Some(existing)) => {
                let other = &self.classes[existing];
                return Err(Error::Duplicate {
                    kind: "class",
                    key: format!(
                        "{} (shadow key `{}`), already bound to {} (shadow key `{}`)",
                        cpp_type, shadow_key, other.cpp_type, other.shadow_key
                    ),
                    first: other.declared_at.clone().unwrap_or_default(),
                    second: at.clone(),
                });
            }
        };
        Ok(&mut self.classes[index])
    }

    pub fn declare_class(
        &mut self,
        shadow_key: &str,
        cpp_type: &TypeDesc,
        dynamic_name: &str,
        doc: Option<String>,
        parent_key: Option<String>,
        at: &Location,
    ) -> Result<()> {
        let class = self.class_entry(shadow_key, cpp_type, at)?;
        if let Some(first) = &class.declared_at {
            return Err(Error::Duplicate {
                kind: "class",
                key: shadow_key.to_string(),
                first: first.clone(),
                second: at.clone(),
            });
        }
        class.dynamic_name = dynamic_name.to_string();
        class.doc = doc;
        class.parent_key = parent_key;
        class.declared_at = Some(at.clone());
        Ok(())
    }

    pub fn enum_entry(&mut self, cpp_name: &str) -> &mut EnumDef {
        let index = match self.enum_index.get(cpp_name) {
            Some(&i) => i,
            None => {
                self.enums.push(EnumDef::placeholder(cpp_name));
                let i = self.enums.len() - 1;
                self.enum_index.insert(cpp_name.to_string(), i);
                i
            }
        };
        &mut self.enums[index]
    }

    pub fn declare_enum(
        &mut self,
        cpp_name: &str,
        dynamic_name: &str,
        doc: Option<String>,
        values: IndexMap<String, Option<Literal>>,
        at: &Location,
    ) -> Result<()> {
        let value_kind = infer_value_kind(&values);
        let def = self.enum_entry(cpp_name);
        if let Some(first) = &def.declared_at {
            return Err(Error::Duplicate {
                kind: "enum",
                key: cpp_name.to_string(),
                first: first.clone(),
                second: at.clone(),
            });
        }
        def.dynamic_name = dynamic_name.to_string();
        def.doc = doc;
        def.values = values;
        def.value_kind = value_kind;
        def.declared_at = Some(at.clone());
        Ok(())
    }

    /// Register a type-mapping rule.
    ///
    /// Re-registering an equivalent rule is a no-op; a rule with the same
    /// pattern but different rendering is a duplicate naming both sites.
    pub fn add_rule(&mut self, rule: TypeMapRule) -> Result<()> {
        let key = rule_key(&rule);
        let (pattern, rendering, declarations) = rule.canonical_form();
        let bucket = self.rules.entry(key).or_default();
        for existing in bucket.iter() {
            if existing.template_params.len() != rule.template_params.len() {
                continue;
            }
            let (other_pattern, other_rendering, other_declarations) = existing.canonical_form();
            if other_pattern != pattern {
                continue;
            }
            if other_rendering == rendering && other_declarations == declarations {
                return Ok(());
            }
            return Err(Error::Duplicate {
                kind: "type mapping",
                key: rule.matched_type.to_string(),
                first: existing.location.clone(),
                second: rule.location,
            });
        }
        bucket.push(rule);
        Ok(())
    }

    pub(crate) fn modules_mut(&mut self) -> &mut [ModuleDef] {
        &mut self.modules
    }

    pub(crate) fn class_index(&self, shadow_key: &str) -> Option<usize> {
        self.class_by_shadow.get(shadow_key).copied()
    }

    pub(crate) fn enum_position(&self, cpp_name: &str) -> Option<usize> {
        self.enum_index.get(cpp_name).copied()
    }

    pub(crate) fn class_at_mut(&mut self, index: usize) -> &mut ClassDef {
        &mut self.classes[index]
    }

    pub(crate) fn enum_at_mut(&mut self, index: usize) -> &mut EnumDef {
        &mut self.enums[index]
    }
}

fn rule_key(rule: &TypeMapRule) -> String {
    if rule.is_param(rule.matched_type.base_name()) {
        WILDCARD_RULE_KEY.to_string()
    } else {
        rule.matched_type.name.clone()
    }
}

fn infer_value_kind(values: &IndexMap<String, Option<Literal>>) -> EnumValueKind {
    let known: Vec<&Literal> = values.values().flatten().collect();
    if known.is_empty() {
        EnumValueKind::Opaque
    } else if known.iter().all(|v| v.is_integer()) {
        EnumValueKind::Integer
    } else if known.iter().all(|v| matches!(v, Literal::String(_))) {
        EnumValueKind::String
    } else {
        EnumValueKind::Opaque
    }
}
