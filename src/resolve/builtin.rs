//! Built-in mappings for fundamental and standard-library types.
//!
//! Consulted only after registered classes, enums and type-mapping rules
//! have failed to match.

use lazy_static::lazy_static;
use phf::phf_map;
use regex::Regex;

use super::Resolver;
use crate::error::Result;
use crate::model::{split_function_type, TypeDesc};

/// Exact canonical spellings of scalar types.
static SCALARS: phf::Map<&'static str, &'static str> = phf_map! {
    "bool" => "bool",
    "char" => "str",
    "signed char" => "int",
    "unsigned char" => "int",
    "short" => "int",
    "unsigned short" => "int",
    "int" => "int",
    "unsigned int" => "int",
    "long" => "int",
    "unsigned long" => "int",
    "long long" => "int",
    "unsigned long long" => "int",
    "__int128" => "int",
    "unsigned __int128" => "int",
    "size_t" => "int",
    "std::size_t" => "int",
    "ssize_t" => "int",
    "ptrdiff_t" => "int",
    "std::ptrdiff_t" => "int",
    "int8_t" => "int",
    "int16_t" => "int",
    "int32_t" => "int",
    "int64_t" => "int",
    "uint8_t" => "int",
    "uint16_t" => "int",
    "uint32_t" => "int",
    "uint64_t" => "int",
    "std::int8_t" => "int",
    "std::int16_t" => "int",
    "std::int32_t" => "int",
    "std::int64_t" => "int",
    "std::uint8_t" => "int",
    "std::uint16_t" => "int",
    "std::uint32_t" => "int",
    "std::uint64_t" => "int",
    "float" => "float",
    "double" => "float",
    "long double" => "float",
    "void" => "None",
    "std::nullptr_t" => "None",
    "char*" => "str",
    "wchar_t*" => "str",
    "char8_t*" => "str",
    "PyObject*" => "object",
    "pyembed::Object" => "object",
};

#[derive(Debug, Clone, Copy)]
enum Shape {
    Str,
    Sequence,
    Set,
    Mapping,
    Optional,
    Tuple,
    Callable,
    Pointee,
    Complex,
    Union,
}

lazy_static! {
    static ref CHAR_ARRAY: Regex = Regex::new(r"^(char|wchar_t|char8_t)\s*\[\d*\]$").unwrap();

    /// Template names, allowing for inline ABI namespaces (`std::__1::`).
    static ref TEMPLATES: Vec<(Regex, Shape)> = vec![
        (Regex::new(r"^std::(__\w+::)?(basic_string|basic_string_view|string|string_view|wstring|u8string)$").unwrap(), Shape::Str),
        (Regex::new(r"^std::(__\w+::)?(vector|list|deque|array|span|forward_list|valarray)$").unwrap(), Shape::Sequence),
        (Regex::new(r"^std::(__\w+::)?(set|unordered_set|multiset|unordered_multiset)$").unwrap(), Shape::Set),
        (Regex::new(r"^std::(__\w+::)?(map|unordered_map|multimap|unordered_multimap)$").unwrap(), Shape::Mapping),
        (Regex::new(r"^std::(__\w+::)?optional$").unwrap(), Shape::Optional),
        (Regex::new(r"^std::(__\w+::)?(pair|tuple)$").unwrap(), Shape::Tuple),
        (Regex::new(r"^std::(__\w+::)?function$").unwrap(), Shape::Callable),
        (Regex::new(r"^std::(__\w+::)?(shared_ptr|unique_ptr|reference_wrapper)$").unwrap(), Shape::Pointee),
        (Regex::new(r"^std::(__\w+::)?complex$").unwrap(), Shape::Complex),
        (Regex::new(r"^std::(__\w+::)?variant$").unwrap(), Shape::Union),
    ];

    /// Non-template spellings of the string types.
    static ref PLAIN_STRINGS: Regex =
        Regex::new(r"^std::(__\w+::)?(__cxx11::)?(string|string_view|wstring|u8string)$").unwrap();
}

const CALLABLE_IMPORT: &str = "from collections.abc import Callable";

/// Render `ty` through the built-in table, or `None` if no entry applies.
pub(super) fn lookup(resolver: &mut Resolver<'_>, ty: &TypeDesc) -> Result<Option<String>> {
    if ty.args.is_none() {
        if let Some(rendering) = SCALARS.get(ty.name.as_str()) {
            return Ok(Some(rendering.to_string()));
        }
        if CHAR_ARRAY.is_match(&ty.name) || PLAIN_STRINGS.is_match(&ty.name) {
            return Ok(Some("str".to_string()));
        }
        return Ok(None);
    }
    if ty.is_pointer() {
        return Ok(None);
    }

    let shape = match TEMPLATES.iter().find(|(re, _)| re.is_match(&ty.name)) {
        Some((_, shape)) => *shape,
        None => return Ok(None),
    };
    let rendered = match shape {
        Shape::Str => "str".to_string(),
        Shape::Sequence => format!("list[{}]", resolver.resolve_arg(ty, 0)?),
        Shape::Set => format!("set[{}]", resolver.resolve_arg(ty, 0)?),
        Shape::Mapping => format!(
            "dict[{}, {}]",
            resolver.resolve_arg(ty, 0)?,
            resolver.resolve_arg(ty, 1)?
        ),
        Shape::Optional => format!("{} | None", resolver.resolve_arg(ty, 0)?),
        Shape::Tuple => {
            let parts = resolve_all(resolver, ty)?;
            if parts.is_empty() {
                "tuple[()]".to_string()
            } else {
                format!("tuple[{}]", parts.join(", "))
            }
        }
        Shape::Callable => return callable(resolver, ty),
        Shape::Pointee => resolver.resolve_arg(ty, 0)?,
        Shape::Complex => "complex".to_string(),
        Shape::Union => {
            let mut parts: Vec<String> = Vec::new();
            for part in resolve_all(resolver, ty)? {
                if !parts.contains(&part) {
                    parts.push(part);
                }
            }
            parts.join(" | ")
        }
    };
    Ok(Some(rendered))
}

fn resolve_all(resolver: &mut Resolver<'_>, ty: &TypeDesc) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    for arg in ty.args.iter().flatten() {
        parts.push(resolver.resolve(arg)?);
    }
    Ok(parts)
}

/// `std::function<R (A, B)>` as `Callable[[A, B], R]`.
fn callable(resolver: &mut Resolver<'_>, ty: &TypeDesc) -> Result<Option<String>> {
    let signature = match ty.arg(0).and_then(|a| split_function_type(&a.to_string())) {
        Some(sig) => sig,
        None => return Ok(None),
    };
    let (ret, params) = signature;
    let mut rendered_params = Vec::new();
    for param in &params {
        rendered_params.push(resolver.resolve(&TypeDesc::parse(param))?);
    }
    let ret = resolver.resolve(&TypeDesc::parse(&ret))?;
    resolver.declare(CALLABLE_IMPORT);
    Ok(Some(format!(
        "Callable[[{}], {}]",
        rendered_params.join(", "),
        ret
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BindingModel;

    fn render(spelling: &str) -> String {
        let model = BindingModel::new();
        let mut resolver = Resolver::new(&model);
        resolver.resolve(&TypeDesc::parse(spelling)).unwrap()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(render("unsigned long long"), "int");
        assert_eq!(render("const double &"), "float");
        assert_eq!(render("void"), "None");
        assert_eq!(render("const char *"), "str");
        assert_eq!(render("const char [6]"), "str");
    }

    #[test]
    fn test_sequence_without_rules() {
        assert_eq!(render("std::vector<int, std::allocator<int> >"), "list[int]");
        assert_eq!(render("std::__1::vector<double>"), "list[float]");
    }

    #[test]
    fn test_strings_across_standard_libraries() {
        assert_eq!(render("std::string"), "str");
        assert_eq!(
            render("std::__cxx11::basic_string<char, std::char_traits<char>, std::allocator<char> >"),
            "str"
        );
        assert_eq!(render("std::string_view"), "str");
    }

    #[test]
    fn test_nested_containers() {
        assert_eq!(
            render("std::map<std::string, std::vector<std::optional<int>>>"),
            "dict[str, list[int | None]]"
        );
        assert_eq!(render("std::pair<int, bool>"), "tuple[int, bool]");
        assert_eq!(render("std::variant<int, long, double>"), "int | float");
    }

    #[test]
    fn test_function_adds_callable_import() {
        let model = BindingModel::new();
        let mut resolver = Resolver::new(&model);
        let rendered = resolver
            .resolve(&TypeDesc::parse("std::function<bool (int, const std::string &)>"))
            .unwrap();
        assert_eq!(rendered, "Callable[[int, str], bool]");
        assert_eq!(resolver.prelude(), vec![CALLABLE_IMPORT.to_string()]);
    }

    #[test]
    fn test_unknown_type_is_verbatim() {
        assert_eq!(render("thirdparty::Handle"), "thirdparty::Handle");
    }
}
