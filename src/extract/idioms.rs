//! The fixed table of recognized registration calls.

use phf::phf_map;

use crate::model::TypeDesc;

pub const MODULE_DEF: &str = "pyembed::ModuleDef";
pub const CLASS_DEF: &str = "pyembed::ClassDef";
pub const ENUM_DEF: &str = "pyembed::EnumDef";
pub const TYPE_EXPORTER: &str = "pyembed::TypeExporter";

/// Namespace of the embedding layer itself; never scanned.
pub const EMBEDDING_NAMESPACE: &str = "pyembed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idiom {
    DeclareModule,
    DeclareClass,
    DeclareEnum,
    AddFunction,
    AddClass,
    AddEnum,
    AddConstructor,
    AddMethod,
    AddStaticMethod,
    AddProperty,
    AddStaticConstant,
    AddInnerClass,
    AddInnerEnum,
    AddImplicitConverter,
}

static SPELLINGS: phf::Map<&'static str, Idiom> = phf_map! {
    "declare_module" => Idiom::DeclareModule,
    "declare_class" => Idiom::DeclareClass,
    "declare_enum" => Idiom::DeclareEnum,
    "add_function" => Idiom::AddFunction,
    "add_class" => Idiom::AddClass,
    "add_enum" => Idiom::AddEnum,
    "add_constructor" => Idiom::AddConstructor,
    "add_method" => Idiom::AddMethod,
    "add_static_method" => Idiom::AddStaticMethod,
    "add_property" => Idiom::AddProperty,
    "add_static_constant" => Idiom::AddStaticConstant,
    "add_inner_class" => Idiom::AddInnerClass,
    "add_inner_enum" => Idiom::AddInnerEnum,
    "add_implicit_converter" => Idiom::AddImplicitConverter,
};

impl Idiom {
    pub fn from_spelling(spelling: &str) -> Option<Idiom> {
        SPELLINGS.get(spelling).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Idiom::DeclareModule => "declare_module",
            Idiom::DeclareClass => "declare_class",
            Idiom::DeclareEnum => "declare_enum",
            Idiom::AddFunction => "add_function",
            Idiom::AddClass => "add_class",
            Idiom::AddEnum => "add_enum",
            Idiom::AddConstructor => "add_constructor",
            Idiom::AddMethod => "add_method",
            Idiom::AddStaticMethod => "add_static_method",
            Idiom::AddProperty => "add_property",
            Idiom::AddStaticConstant => "add_static_constant",
            Idiom::AddInnerClass => "add_inner_class",
            Idiom::AddInnerEnum => "add_inner_enum",
            Idiom::AddImplicitConverter => "add_implicit_converter",
        }
    }

    /// Whether a call with result type `result` is this idiom rather than an
    /// unrelated function of the same name.
    pub fn accepts(&self, result: &TypeDesc) -> bool {
        let name = result.name.trim_start_matches("::");
        match self {
            Idiom::DeclareModule | Idiom::AddFunction | Idiom::AddClass | Idiom::AddEnum => {
                name == MODULE_DEF
            }
            Idiom::DeclareEnum => name == ENUM_DEF,
            Idiom::AddStaticConstant => name == MODULE_DEF || name == CLASS_DEF,
            Idiom::DeclareClass
            | Idiom::AddConstructor
            | Idiom::AddMethod
            | Idiom::AddStaticMethod
            | Idiom::AddProperty
            | Idiom::AddInnerClass
            | Idiom::AddInnerEnum
            | Idiom::AddImplicitConverter => name == CLASS_DEF,
        }
    }
}

/// Python name of the reflected counterpart of a binary operator.
pub fn reflected_operator(name: &str) -> Option<&'static str> {
    Some(match name {
        "__add__" => "__radd__",
        "__sub__" => "__rsub__",
        "__mul__" => "__rmul__",
        "__matmul__" => "__rmatmul__",
        "__truediv__" => "__rtruediv__",
        "__floordiv__" => "__rfloordiv__",
        "__mod__" => "__rmod__",
        "__divmod__" => "__rdivmod__",
        "__pow__" => "__rpow__",
        "__lshift__" => "__rlshift__",
        "__rshift__" => "__rrshift__",
        "__and__" => "__rand__",
        "__xor__" => "__rxor__",
        "__or__" => "__ror__",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spelling_lookup() {
        assert_eq!(Idiom::from_spelling("add_method"), Some(Idiom::AddMethod));
        assert_eq!(Idiom::from_spelling("add_methods"), None);
        assert_eq!(Idiom::AddInnerEnum.name(), "add_inner_enum");
    }

    #[test]
    fn test_result_type_disambiguates() {
        let class_def = TypeDesc::parse("pyembed::ClassDef<Widget, Widget> &");
        let module_def = TypeDesc::parse("pyembed::ModuleDef &");
        assert!(Idiom::AddMethod.accepts(&class_def));
        assert!(!Idiom::AddMethod.accepts(&TypeDesc::parse("void")));
        assert!(Idiom::AddStaticConstant.accepts(&class_def));
        assert!(Idiom::AddStaticConstant.accepts(&module_def));
        assert!(!Idiom::AddClass.accepts(&class_def));
    }

    #[test]
    fn test_reflected_operators() {
        assert_eq!(reflected_operator("__add__"), Some("__radd__"));
        assert_eq!(reflected_operator("__eq__"), None);
    }
}
