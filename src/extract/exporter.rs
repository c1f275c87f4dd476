//! Discovery of type-mapping rules declared as type-exporter records.
//!
//! ```cpp
//! template <class T>
//! struct pyembed::type_export<Grid<T>> : pyembed::TypeExporter {
//!     static constexpr const char *py_type = "Grid_{T}";
//!     static constexpr const char *py_declarations = "Grid_{T} = list[list[{T}]]";
//! };
//! ```

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::ast::{Cursor, CursorKind};
use crate::error::{Error, Result};
use crate::model::{TypeDesc, TypeMapRule};

use super::idioms::TYPE_EXPORTER;
use super::shape::string_literal;

const IDIOM: &str = "TypeExporter";
const RENDERING_VAR: &str = "py_type";
const DECLARATIONS_VAR: &str = "py_declarations";

lazy_static! {
    /// Canonical spelling of the I-th template parameter at depth D.
    static ref CANONICAL_PARAM: Regex = Regex::new(r"^type-parameter-\d+-(\d+)$").unwrap();
    static ref BLANK_LINE: Regex = Regex::new(r"\n[ \t]*\n").unwrap();
}

pub fn is_exporter(record: Cursor<'_>) -> bool {
    record.children_of_kind(CursorKind::BaseSpecifier).any(|base| {
        let name = base
            .type_desc()
            .map(|t| t.name)
            .unwrap_or_else(|| base.spelling().to_string());
        let name = name.trim_start_matches("::");
        name == TYPE_EXPORTER || name == "TypeExporter"
    })
}

/// Read the rule declared by an exporter record.
pub fn rule_from(record: Cursor<'_>) -> Result<TypeMapRule> {
    let arguments: Vec<Cursor<'_>> = record
        .children_of_kind(CursorKind::TemplateArgument)
        .collect();
    if arguments.len() != 1 {
        return Err(Error::shape(
            IDIOM,
            record.location(),
            format!(
                "expected exactly one template argument, found {}",
                arguments.len()
            ),
        ));
    }
    let matched = arguments[0].type_desc().ok_or_else(|| {
        Error::shape(IDIOM, arguments[0].location(), "template argument has no type")
    })?;

    let template_params: Vec<String> = record
        .children()
        .filter(|c| {
            matches!(
                c.kind(),
                CursorKind::TemplateTypeParam | CursorKind::NonTypeTemplateParam
            )
        })
        .map(|c| c.spelling().to_string())
        .collect();

    let rendering = member_text(record, RENDERING_VAR)?.ok_or_else(|| {
        Error::shape(
            IDIOM,
            record.location(),
            format!("exporter declares no `{}` member", RENDERING_VAR),
        )
    })?;
    let extra_declarations = member_text(record, DECLARATIONS_VAR)?
        .map(|text| {
            BLANK_LINE
                .split(&text)
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(TypeMapRule {
        matched_type: name_parameters(&matched, &template_params),
        rendering,
        template_params,
        extra_declarations,
        location: record.location().clone(),
    })
}

fn member_text(record: Cursor<'_>, name: &str) -> Result<Option<String>> {
    let var = match record
        .children_of_kind(CursorKind::Var)
        .find(|v| v.spelling() == name)
    {
        Some(var) => var,
        None => return Ok(None),
    };
    let init = var
        .children()
        .find(|c| !matches!(c.kind(), CursorKind::Other))
        .ok_or_else(|| {
            Error::shape(IDIOM, var.location(), format!("`{}` has no initializer", name))
        })?;
    string_literal(IDIOM, init).map(Some)
}

/// Rewrite canonical `type-parameter-D-I` spellings to declared names.
fn name_parameters(matched: &TypeDesc, params: &[String]) -> TypeDesc {
    let mut renames = HashMap::new();
    matched.walk_names(&mut |name| {
        if let Some(caps) = CANONICAL_PARAM.captures(name) {
            let declared = caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| params.get(i));
            if let Some(declared) = declared {
                renames.insert(name.to_string(), declared.clone());
            }
        }
    });
    if renames.is_empty() {
        matched.clone()
    } else {
        matched.rename(&renames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstBuilder, NodeSpec};

    fn exporter(params: &[&str], argument: &str, declarations: Option<&str>) -> TypeMapRule {
        let mut b = AstBuilder::new("export.h");
        let root = b.root();
        let kind = if params.is_empty() {
            CursorKind::StructDecl
        } else {
            CursorKind::PartialSpecialization
        };
        let record = b.push(Some(root), NodeSpec::new(kind, "type_export"));
        b.push(
            Some(record),
            NodeSpec::new(CursorKind::BaseSpecifier, "").ty("pyembed::TypeExporter"),
        );
        for p in params {
            b.push(Some(record), NodeSpec::new(CursorKind::TemplateTypeParam, *p));
        }
        b.push(
            Some(record),
            NodeSpec::new(CursorKind::TemplateArgument, "").ty(argument),
        );
        let var = b.push(
            Some(record),
            NodeSpec::new(CursorKind::Var, RENDERING_VAR).static_storage(),
        );
        b.push(
            Some(var),
            NodeSpec::new(CursorKind::StringLiteral, "").value("Pair[{A}, {B}]"),
        );
        if let Some(text) = declarations {
            let var = b.push(Some(record), NodeSpec::new(CursorKind::Var, DECLARATIONS_VAR));
            let cast = b.push(Some(var), NodeSpec::new(CursorKind::ImplicitCast, ""));
            b.push(Some(cast), NodeSpec::new(CursorKind::StringLiteral, "").value(text));
        }
        let tu = b.finish();
        let record = tu.root().child(0).unwrap();
        assert!(is_exporter(record));
        rule_from(record).unwrap()
    }

    #[test]
    fn test_partial_specialization_parameters_are_named() {
        let rule = exporter(
            &["A", "B"],
            "Pair<type-parameter-0-0, type-parameter-0-1 *>",
            None,
        );
        assert_eq!(rule.template_params, vec!["A", "B"]);
        assert_eq!(rule.matched_type.to_string(), "Pair<A, B*>");
        assert!(!rule.is_full());
    }

    #[test]
    fn test_full_specialization_and_declarations() {
        let rule = exporter(
            &[],
            "Pair<int, double>",
            Some("First = int\n\nSecond = float\n  \n"),
        );
        assert!(rule.is_full());
        assert_eq!(rule.matched_type, TypeDesc::parse("Pair<int, double>"));
        assert_eq!(rule.extra_declarations, vec!["First = int", "Second = float"]);
    }

    #[test]
    fn test_missing_rendering_is_shape_mismatch() {
        let mut b = AstBuilder::new("export.h");
        let root = b.root();
        let record = b.push(Some(root), NodeSpec::new(CursorKind::StructDecl, "type_export"));
        b.push(
            Some(record),
            NodeSpec::new(CursorKind::BaseSpecifier, "").ty("pyembed::TypeExporter"),
        );
        b.push(Some(record), NodeSpec::new(CursorKind::TemplateArgument, "").ty("Path"));
        let tu = b.finish();
        let err = rule_from(tu.root().child(0).unwrap()).unwrap_err();
        assert!(err.to_string().contains("py_type"));
    }
}
