//! Aggregation of per-file fragments and fully-qualified name fix-up.

use super::{BindingModel, ClassDef, EnumDef, ModuleDef};
use crate::error::{Error, Result};

impl BindingModel {
    /// Union `fragment` into this model.
    ///
    /// Declarations must be unique; overloads, constructors and other
    /// additions are appended in the fragment's discovery order.
    pub fn merge(&mut self, fragment: BindingModel) -> Result<()> {
        let BindingModel {
            modules,
            classes,
            enums,
            rules,
            ..
        } = fragment;

        for module in modules {
            self.merge_module(module)?;
        }
        for class in classes {
            self.merge_class(class)?;
        }
        for def in enums {
            self.merge_enum(def)?;
        }
        for rule in rules.into_values().flatten() {
            self.add_rule(rule)?;
        }
        Ok(())
    }

    fn merge_module(&mut self, incoming: ModuleDef) -> Result<()> {
        let target = self.module_entry(&incoming.cpp_name);
        if let Some(second) = incoming.declared_at {
            if let Some(first) = &target.declared_at {
                return Err(Error::Duplicate {
                    kind: "module",
                    key: incoming.cpp_name,
                    first: first.clone(),
                    second,
                });
            }
            target.dynamic_name = incoming.dynamic_name;
            target.doc = incoming.doc;
            target.declared_at = Some(second);
            target.fully_qualified_name = incoming.fully_qualified_name;
        }
        target.imported |= incoming.imported;

        for (key, placed_at) in &incoming.inner_classes {
            target.add_inner_class(key, placed_at)?;
        }
        for (key, placed_at) in &incoming.inner_enums {
            target.add_inner_enum(key, placed_at)?;
        }
        for (name, overloads) in incoming.functions {
            target.functions.entry(name).or_default().extend(overloads);
        }
        for constant in incoming.constants.into_values() {
            target.add_constant(constant)?;
        }
        Ok(())
    }

    fn merge_class(&mut self, incoming: ClassDef) -> Result<()> {
        let at = incoming.declared_at.clone().unwrap_or_default();
        let target = self.class_entry(&incoming.shadow_key, &incoming.cpp_type, &at)?;
        if let Some(second) = incoming.declared_at {
            if let Some(first) = &target.declared_at {
                return Err(Error::Duplicate {
                    kind: "class",
                    key: incoming.shadow_key,
                    first: first.clone(),
                    second,
                });
            }
            target.dynamic_name = incoming.dynamic_name;
            target.doc = incoming.doc;
            target.parent_key = incoming.parent_key;
            target.declared_at = Some(second);
            target.fully_qualified_name = incoming.fully_qualified_name;
        }
        target.imported |= incoming.imported;

        for (key, placed_at) in &incoming.inner_classes {
            target.add_inner_class(key, placed_at)?;
        }
        for (key, placed_at) in &incoming.inner_enums {
            target.add_inner_enum(key, placed_at)?;
        }
        target.constructors.extend(incoming.constructors);
        for (name, overloads) in incoming.methods {
            target.methods.entry(name).or_default().extend(overloads);
        }
        for property in incoming.properties.into_values() {
            target.add_property(property)?;
        }
        for constant in incoming.constants.into_values() {
            target.add_constant(constant)?;
        }
        target
            .implicit_conversion_sources
            .extend(incoming.implicit_conversion_sources);
        Ok(())
    }

    fn merge_enum(&mut self, incoming: EnumDef) -> Result<()> {
        let target = self.enum_entry(&incoming.cpp_name);
        if let Some(second) = incoming.declared_at {
            if let Some(first) = &target.declared_at {
                return Err(Error::Duplicate {
                    kind: "enum",
                    key: incoming.cpp_name,
                    first: first.clone(),
                    second,
                });
            }
            target.dynamic_name = incoming.dynamic_name;
            target.doc = incoming.doc;
            target.values = incoming.values;
            target.value_kind = incoming.value_kind;
            target.declared_at = Some(second);
            target.fully_qualified_name = incoming.fully_qualified_name;
        }
        target.imported |= incoming.imported;
        Ok(())
    }

    /// Assign fully-qualified names top-down from every non-imported module.
    ///
    /// A name that is already set must equal the recomputed one, so running
    /// the pass twice is a no-op.
    pub fn fixup(&mut self, package_prefix: Option<&str>) -> Result<()> {
        let mut pending = Vec::new();
        for module in self.modules_mut().iter_mut().filter(|m| !m.imported) {
            if module.declared_at.is_none() {
                return Err(Error::Emission(format!(
                    "module `{}`: members are added but the module is never declared",
                    module.cpp_name
                )));
            }
            let computed = match package_prefix {
                Some(prefix) if !prefix.is_empty() => {
                    format!("{}.{}", prefix, module.dynamic_name)
                }
                _ => module.dynamic_name.clone(),
            };
            assign(
                &mut module.fully_qualified_name,
                computed.clone(),
                "module",
                &module.cpp_name,
            )?;
            pending.push((
                computed,
                module.inner_classes.keys().cloned().collect::<Vec<_>>(),
                module.inner_enums.keys().cloned().collect::<Vec<_>>(),
            ));
        }
        for (scope, classes, enums) in pending {
            self.fixup_members(&scope, &classes, &enums)?;
        }
        Ok(())
    }

    fn fixup_members(&mut self, scope: &str, classes: &[String], enums: &[String]) -> Result<()> {
        for key in enums {
            let index = self.enum_position(key).ok_or_else(|| {
                Error::Emission(format!("enum `{}` added to `{}` is never declared", key, scope))
            })?;
            let def = self.enum_at_mut(index);
            if def.declared_at.is_none() {
                return Err(Error::Emission(format!(
                    "enum `{}` added to `{}` is never declared",
                    key, scope
                )));
            }
            let computed = format!("{}.{}", scope, def.dynamic_name);
            assign(&mut def.fully_qualified_name, computed, "enum", key)?;
        }
        for key in classes {
            let index = self.class_index(key).ok_or_else(|| {
                Error::Emission(format!("class `{}` added to `{}` is never declared", key, scope))
            })?;
            let class = self.class_at_mut(index);
            if class.declared_at.is_none() {
                return Err(Error::Emission(format!(
                    "class `{}` added to `{}` is never declared",
                    key, scope
                )));
            }
            let computed = format!("{}.{}", scope, class.dynamic_name);
            assign(&mut class.fully_qualified_name, computed.clone(), "class", key)?;
            let inner_classes: Vec<String> = class.inner_classes.keys().cloned().collect();
            let inner_enums: Vec<String> = class.inner_enums.keys().cloned().collect();
            self.fixup_members(&computed, &inner_classes, &inner_enums)?;
        }
        Ok(())
    }
}

fn assign(slot: &mut Option<String>, computed: String, kind: &'static str, key: &str) -> Result<()> {
    match slot {
        Some(existing) if *existing != computed => Err(Error::Containment {
            kind,
            key: key.to_string(),
            existing: existing.clone(),
            computed,
        }),
        Some(_) => Ok(()),
        None => {
            *slot = Some(computed);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Location;
    use crate::model::{CallableDef, GetSetter, Signature, TypeDesc};

    fn at(file: &str, line: u32) -> Location {
        Location::new(file, line, 1)
    }

    fn method(ret: &str, param: &str, file: &str) -> CallableDef {
        CallableDef {
            signature: Signature {
                return_type: Some(TypeDesc::named(ret)),
                params: vec![crate::model::Parameter {
                    name: "v".to_string(),
                    ty: TypeDesc::named(param),
                }],
                raw_signature: format!("{} ({})", ret, param),
            },
            doc: None,
            is_static: false,
            cpp_signature: format!("{} ({})", ret, param),
            location: at(file, 1),
        }
    }

    fn widget_fragment(file: &str) -> BindingModel {
        let ty = TypeDesc::named("Widget");
        let mut fragment = BindingModel::new();
        fragment.declare_module("mod_m", "m", None, &at(file, 1)).unwrap();
        fragment
            .declare_class("W", &ty, "Widget", None, None, &at(file, 2))
            .unwrap();
        fragment
            .module_entry("mod_m")
            .add_inner_class("W", &at(file, 3))
            .unwrap();
        fragment
    }

    #[test]
    fn test_duplicate_class_across_fragments() {
        let mut model = BindingModel::new();
        let mut a = BindingModel::new();
        a.declare_class("W", &TypeDesc::named("Widget"), "Widget", None, None, &at("a.cpp", 4))
            .unwrap();
        let mut b = BindingModel::new();
        b.declare_class("W", &TypeDesc::named("Widget"), "Widget", None, None, &at("b.cpp", 8))
            .unwrap();
        model.merge(a).unwrap();
        let msg = model.merge(b).unwrap_err().to_string();
        assert!(msg.contains("`W`"));
        assert!(msg.contains("a.cpp:4:1"));
        assert!(msg.contains("b.cpp:8:1"));
    }

    #[test]
    fn test_overloads_appended_in_fragment_order() {
        let mut model = widget_fragment("a.cpp");
        let ty = TypeDesc::named("Widget");
        let mut second = BindingModel::new();
        second
            .class_entry("W", &ty, &Location::default())
            .unwrap()
            .add_method("foo", method("void", "int", "b.cpp"));
        let mut third = BindingModel::new();
        third
            .class_entry("W", &ty, &Location::default())
            .unwrap()
            .add_method("foo", method("void", "std::string", "c.cpp"));
        model.merge(second).unwrap();
        model.merge(third).unwrap();

        let foo = &model.class("W").unwrap().methods["foo"];
        assert_eq!(foo[0].location.file, "b.cpp");
        assert_eq!(foo[1].location.file, "c.cpp");
    }

    #[test]
    fn test_property_halves_merge_across_fragments() {
        let ty = TypeDesc::named("Widget");
        let half = |get: Option<&str>, set: Option<&str>| {
            let mut f = BindingModel::new();
            f.class_entry("W", &ty, &Location::default())
                .unwrap()
                .add_property(GetSetter {
                    name: "x".to_string(),
                    doc: None,
                    get_type: get.map(TypeDesc::named),
                    set_type: set.map(TypeDesc::named),
                    set_param_name: set.map(|_| "value".to_string()),
                    location: Location::default(),
                })
                .unwrap();
            f
        };
        let mut model = BindingModel::new();
        model.merge(half(Some("double"), None)).unwrap();
        model.merge(half(None, Some("double"))).unwrap();
        let class = model.class("W").unwrap();
        assert_eq!(class.properties.len(), 1);
        assert!(!class.properties["x"].is_read_only());
    }

    #[test]
    fn test_fixup_assigns_nested_names_and_is_idempotent() {
        let mut model = widget_fragment("a.cpp");
        let inner = TypeDesc::named("Widget::Part");
        model
            .declare_class("P", &inner, "Part", None, None, &at("a.cpp", 5))
            .unwrap();
        model
            .class_entry("W", &TypeDesc::named("Widget"), &Location::default())
            .unwrap()
            .add_inner_class("P", &at("a.cpp", 6))
            .unwrap();
        model
            .declare_enum("Widget::Mode", "Mode", None, Default::default(), &at("a.cpp", 7))
            .unwrap();
        model
            .class_entry("W", &TypeDesc::named("Widget"), &Location::default())
            .unwrap()
            .add_inner_enum("Widget::Mode", &at("a.cpp", 8))
            .unwrap();

        model.fixup(Some("pkg")).unwrap();
        let names = |m: &BindingModel| {
            (
                m.module("mod_m").unwrap().fully_qualified_name.clone(),
                m.class("P").unwrap().fully_qualified_name.clone(),
                m.enumeration("Widget::Mode").unwrap().fully_qualified_name.clone(),
            )
        };
        let first = names(&model);
        assert_eq!(first.0.as_deref(), Some("pkg.m"));
        assert_eq!(first.1.as_deref(), Some("pkg.m.Widget.Part"));
        assert_eq!(first.2.as_deref(), Some("pkg.m.Widget.Mode"));

        model.fixup(Some("pkg")).unwrap();
        assert_eq!(names(&model), first);
    }

    #[test]
    fn test_fixup_detects_two_containers() {
        let mut model = widget_fragment("a.cpp");
        model.declare_module("mod_n", "n", None, &at("a.cpp", 9)).unwrap();
        model
            .module_entry("mod_n")
            .add_inner_class("W", &at("a.cpp", 10))
            .unwrap();
        assert!(matches!(
            model.fixup(None),
            Err(Error::Containment { kind: "class", .. })
        ));
    }

    #[test]
    fn test_fixup_rejects_undeclared_inner_class() {
        let mut model = BindingModel::new();
        model.declare_module("mod_m", "m", None, &at("a.cpp", 1)).unwrap();
        model
            .module_entry("mod_m")
            .add_inner_class("Ghost", &at("a.cpp", 2))
            .unwrap();
        assert!(matches!(model.fixup(None), Err(Error::Emission(_))));
    }

    #[test]
    fn test_fixup_skips_imported_modules() {
        let mut model = widget_fragment("a.cpp");
        model.mark_imported();
        model.fixup(None).unwrap();
        assert!(model.module("mod_m").unwrap().fully_qualified_name.is_none());
    }
}
