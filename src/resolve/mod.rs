//! Type-mapping resolution: C++ type descriptors to Python annotations.
//!
//! Resolution order for a concrete type:
//!
//! 1. a registered class or enum renders as its fully-qualified name;
//! 2. an exact full type-mapping rule;
//! 3. the most specific partial rule, ranked like C++ partial
//!    specializations (an ambiguity is an error, never a guess);
//! 4. the built-in table for fundamental and standard-library types;
//! 5. the raw C++ spelling.
//!
//! Auxiliary declarations and cross-module imports needed by the renderings
//! accumulate in the resolver's prelude, deduplicated in first-use order.

mod builtin;

use indexmap::IndexSet;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{BindingModel, TypeDesc, TypeMapRule};

/// Outcome of comparing two rules for specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specificity {
    More,
    Less,
    Equal,
    Incomparable,
}

/// Renders types for one output unit.
pub struct Resolver<'m> {
    model: &'m BindingModel,
    scope: Option<String>,
    prelude: IndexSet<String>,
}

impl<'m> Resolver<'m> {
    pub fn new(model: &'m BindingModel) -> Self {
        Self {
            model,
            scope: None,
            prelude: IndexSet::new(),
        }
    }

    /// Resolver rendering names relative to module `scope`.
    pub fn scoped(model: &'m BindingModel, scope: &str) -> Self {
        Self {
            model,
            scope: Some(scope.to_string()),
            prelude: IndexSet::new(),
        }
    }

    /// Declarations required by everything resolved so far.
    pub fn prelude(&self) -> Vec<String> {
        self.prelude.iter().cloned().collect()
    }

    pub(crate) fn declare(&mut self, declaration: &str) {
        let declaration = declaration.trim();
        if !declaration.is_empty() {
            self.prelude.insert(declaration.to_string());
        }
    }

    pub fn resolve(&mut self, ty: &TypeDesc) -> Result<String> {
        if let Some(name) = self.entity(ty)? {
            return Ok(name);
        }

        let model = self.model;
        let candidates: Vec<&'m TypeMapRule> = model.rules_for(&ty.name).collect();
        if let Some(rule) = candidates
            .iter()
            .find(|r| r.is_full() && r.matched_type == *ty)
        {
            return self.apply(rule, &HashMap::new());
        }

        let mut matches: Vec<(&'m TypeMapRule, HashMap<String, TypeDesc>)> = Vec::new();
        for rule in candidates.iter().filter(|r| !r.is_full()) {
            let mut bindings = HashMap::new();
            if unify(&rule.matched_type, ty, &rule.template_params, &mut bindings) {
                matches.push((rule, bindings));
            }
        }
        if !matches.is_empty() {
            let winner = select_most_specific(&matches.iter().map(|(r, _)| *r).collect::<Vec<_>>())
                .map_err(|candidates| Error::AmbiguousSpecialization {
                    ty: ty.to_string(),
                    candidates,
                })?;
            let (rule, bindings) = &matches[winner];
            return self.apply(rule, bindings);
        }

        if let Some(rendered) = builtin::lookup(self, ty)? {
            return Ok(rendered);
        }
        if let Some(pointee) = ty.pointee() {
            return self.resolve(&pointee);
        }
        Ok(ty.to_string())
    }

    pub(crate) fn resolve_arg(&mut self, ty: &TypeDesc, index: usize) -> Result<String> {
        match ty.arg(index) {
            Some(arg) => self.resolve(arg),
            None => Ok("object".to_string()),
        }
    }

    /// Name of a registered class (by shadow key) relative to the scope.
    pub fn class_name(&mut self, shadow_key: &str) -> Result<Option<String>> {
        let model = self.model;
        match model.class(shadow_key) {
            Some(class) => {
                let fq = class.fully_qualified_name.as_deref().ok_or_else(|| {
                    Error::Emission(format!(
                        "class `{}` is not added to any module",
                        class.shadow_key
                    ))
                })?;
                Ok(Some(self.relative(fq)))
            }
            None => Ok(None),
        }
    }

    fn entity(&mut self, ty: &TypeDesc) -> Result<Option<String>> {
        let model = self.model;
        if let Some(class) = model.class_for_type(ty) {
            return self.class_name(&class.shadow_key);
        }
        if ty.args.is_none() {
            if let Some(def) = model.enumeration(&ty.name) {
                let fq = def.fully_qualified_name.as_deref().ok_or_else(|| {
                    Error::Emission(format!("enum `{}` is not added to any module", def.cpp_name))
                })?;
                return Ok(Some(self.relative(fq)));
            }
        }
        Ok(None)
    }

    /// Strip the current module scope, or import the owning module.
    fn relative(&mut self, fq: &str) -> String {
        if let Some(scope) = &self.scope {
            if let Some(rest) = fq.strip_prefix(scope.as_str()).and_then(|r| r.strip_prefix('.')) {
                return rest.to_string();
            }
        }
        if let Some(owner) = self.owning_module(fq) {
            self.declare(&format!("import {}", owner));
        }
        fq.to_string()
    }

    fn owning_module(&self, fq: &str) -> Option<String> {
        self.model
            .modules()
            .iter()
            .filter_map(|m| m.fully_qualified_name.as_deref())
            .filter(|m| fq.starts_with(m) && fq[m.len()..].starts_with('.'))
            .max_by_key(|m| m.len())
            .map(str::to_string)
    }

    fn apply(&mut self, rule: &TypeMapRule, bindings: &HashMap<String, TypeDesc>) -> Result<String> {
        let mut rendered_bindings: Vec<(String, String)> = Vec::new();
        for param in &rule.template_params {
            let placeholder = format!("{{{}}}", param);
            let used = rule.rendering.contains(&placeholder)
                || rule.extra_declarations.iter().any(|d| d.contains(&placeholder));
            if !used {
                continue;
            }
            if let Some(bound) = bindings.get(param) {
                rendered_bindings.push((placeholder, self.resolve(bound)?));
            }
        }
        let fill = |template: &str| {
            rendered_bindings
                .iter()
                .fold(template.to_string(), |text, (placeholder, value)| {
                    text.replace(placeholder, value)
                })
        };
        for declaration in &rule.extra_declarations {
            self.declare(&fill(declaration));
        }
        Ok(fill(&rule.rendering))
    }
}

/// Match a rule pattern against a concrete type, binding rule parameters.
///
/// A bare parameter binds any type; a pointer-to-parameter binds the
/// pointee once the pattern's pointer levels are consumed. A parameter
/// seen twice must bind the same type both times.
pub fn unify(
    pattern: &TypeDesc,
    concrete: &TypeDesc,
    params: &[String],
    bindings: &mut HashMap<String, TypeDesc>,
) -> bool {
    if pattern.args.is_none() && params.iter().any(|p| p == pattern.base_name()) {
        let mut bound = concrete.clone();
        for _ in 0..pattern.pointer_depth() {
            match bound.pointee() {
                Some(inner) => bound = inner,
                None => return false,
            }
        }
        return match bindings.get(pattern.base_name()) {
            Some(existing) => *existing == bound,
            None => {
                bindings.insert(pattern.base_name().to_string(), bound);
                true
            }
        };
    }
    if pattern.name != concrete.name {
        return false;
    }
    match (&pattern.args, &concrete.args) {
        (None, None) => true,
        (Some(p), Some(c)) if p.len() == c.len() => p
            .iter()
            .zip(c.iter())
            .all(|(p, c)| unify(p, c, params, bindings)),
        _ => false,
    }
}

/// Compare two partial rules the way C++ orders partial specializations:
/// `a` is at least as specialized as `b` when `b`'s pattern deduces from
/// `a`'s pattern with `a`'s parameters held opaque.
pub fn compare(a: &TypeMapRule, b: &TypeMapRule) -> Specificity {
    let a_covered_by_b = deduces_from(b, a);
    let b_covered_by_a = deduces_from(a, b);
    match (a_covered_by_b, b_covered_by_a) {
        (true, true) => Specificity::Equal,
        (true, false) => Specificity::More,
        (false, true) => Specificity::Less,
        (false, false) => Specificity::Incomparable,
    }
}

fn deduces_from(general: &TypeMapRule, specific: &TypeMapRule) -> bool {
    let opaque: HashMap<String, String> = specific
        .template_params
        .iter()
        .enumerate()
        .map(|(i, p)| (p.clone(), format!("$opaque{}", i)))
        .collect();
    let target = specific.matched_type.rename(&opaque);
    let mut bindings = HashMap::new();
    unify(
        &general.matched_type,
        &target,
        &general.template_params,
        &mut bindings,
    )
}

/// Index of the rule more specific than every other one, or the
/// descriptions of the candidates when there is none.
fn select_most_specific(rules: &[&TypeMapRule]) -> std::result::Result<usize, Vec<String>> {
    let winner = (0..rules.len()).find(|&i| {
        (0..rules.len())
            .filter(|&j| j != i)
            .all(|j| compare(rules[i], rules[j]) == Specificity::More)
    });
    winner.ok_or_else(|| rules.iter().map(|r| r.describe()).collect())
}
