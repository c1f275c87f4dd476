//! Structural type descriptors parsed from canonical C++ type spellings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Suffix distinguishing a pointer descriptor from its pointee.
pub const POINTER_MARKER: char = '*';

/// An immutable, possibly templated, possibly pointer type.
///
/// `std::map<int, Widget *>` is `{ name: "std::map", args: [int, Widget*] }`.
/// Pointer levels are kept as trailing markers on the name, so a pointer
/// never compares equal to its pointee. Qualifiers and references are
/// dropped while parsing: they do not change the rendered interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeDesc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<TypeDesc>>,
}

impl TypeDesc {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: None,
        }
    }

    pub fn with_args(name: impl Into<String>, args: Vec<TypeDesc>) -> Self {
        Self {
            name: name.into(),
            args: Some(args),
        }
    }

    /// Parse a C++ type spelling such as `const std::vector<int> &`.
    pub fn parse(spelling: &str) -> Self {
        let (base, depth) = strip_declarator(spelling);
        let (name, args) = split_template(base);
        let mut name = name.to_string();
        for _ in 0..depth {
            name.push(POINTER_MARKER);
        }
        Self { name, args }
    }

    pub fn pointer_depth(&self) -> usize {
        self.name.len() - self.name.trim_end_matches(POINTER_MARKER).len()
    }

    pub fn is_pointer(&self) -> bool {
        self.pointer_depth() > 0
    }

    /// Name without pointer markers.
    pub fn base_name(&self) -> &str {
        self.name.trim_end_matches(POINTER_MARKER)
    }

    /// The descriptor with one pointer level removed.
    pub fn pointee(&self) -> Option<TypeDesc> {
        self.name.strip_suffix(POINTER_MARKER).map(|name| TypeDesc {
            name: name.to_string(),
            args: self.args.clone(),
        })
    }

    /// The descriptor with every pointer level removed.
    pub fn strip_pointers(&self) -> TypeDesc {
        TypeDesc {
            name: self.base_name().to_string(),
            args: self.args.clone(),
        }
    }

    pub fn pointer_to(&self) -> TypeDesc {
        let mut name = self.name.clone();
        name.push(POINTER_MARKER);
        TypeDesc {
            name,
            args: self.args.clone(),
        }
    }

    pub fn arg(&self, index: usize) -> Option<&TypeDesc> {
        self.args.as_ref().and_then(|args| args.get(index))
    }

    pub fn arg_count(&self) -> usize {
        self.args.as_ref().map(|a| a.len()).unwrap_or(0)
    }

    /// Replace named parameters with the bound descriptors.
    ///
    /// A bare parameter position (`T`) is replaced wholesale; a
    /// pointer-to-parameter position (`T*`) keeps its pointer levels on top
    /// of the binding.
    pub fn substitute(&self, bindings: &HashMap<String, TypeDesc>) -> TypeDesc {
        if bindings.is_empty() {
            return self.clone();
        }
        if self.args.is_none() {
            let depth = self.pointer_depth();
            if let Some(bound) = bindings.get(self.base_name()) {
                let mut result = bound.clone();
                for _ in 0..depth {
                    result = result.pointer_to();
                }
                return result;
            }
        }
        TypeDesc {
            name: self.name.clone(),
            args: self
                .args
                .as_ref()
                .map(|args| args.iter().map(|a| a.substitute(bindings)).collect()),
        }
    }

    /// Rename bare parameter names (and pointers to them) without binding.
    pub fn rename(&self, renames: &HashMap<String, String>) -> TypeDesc {
        let bindings: HashMap<String, TypeDesc> = renames
            .iter()
            .map(|(from, to)| (from.clone(), TypeDesc::named(to.clone())))
            .collect();
        self.substitute(&bindings)
    }

    /// Visit every bare name in the descriptor, depth first.
    pub fn walk_names<'a>(&'a self, visit: &mut impl FnMut(&'a str)) {
        visit(self.base_name());
        if let Some(args) = &self.args {
            for arg in args {
                arg.walk_names(visit);
            }
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_name())?;
        if let Some(args) = &self.args {
            write!(f, "<")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ">")?;
        }
        for _ in 0..self.pointer_depth() {
            write!(f, "{}", POINTER_MARKER)?;
        }
        Ok(())
    }
}

const LEADING_KEYWORDS: &[&str] = &[
    "const ", "volatile ", "struct ", "class ", "enum ", "union ", "typename ",
];

const TRAILING_QUALIFIERS: &[&str] = &["const", "volatile", "restrict", "__restrict"];

/// Strip qualifiers, references and elaboration keywords; count pointers.
fn strip_declarator(spelling: &str) -> (&str, usize) {
    let mut s = spelling.trim();
    loop {
        let before = s;
        for kw in LEADING_KEYWORDS {
            if let Some(rest) = s.strip_prefix(kw) {
                s = rest.trim_start();
            }
        }
        if s == before {
            break;
        }
    }

    let mut depth = 0;
    loop {
        let before = s;
        s = s.trim_end();
        if let Some(rest) = s.strip_suffix("&&") {
            s = rest;
        } else if let Some(rest) = s.strip_suffix('&') {
            s = rest;
        }
        s = s.trim_end();
        for q in TRAILING_QUALIFIERS {
            if let Some(rest) = s.strip_suffix(q) {
                let boundary = rest
                    .chars()
                    .last()
                    .map(|c| !(c.is_alphanumeric() || c == '_'))
                    .unwrap_or(false);
                if boundary {
                    s = rest.trim_end();
                }
            }
        }
        if let Some(rest) = s.strip_suffix(POINTER_MARKER) {
            depth += 1;
            s = rest;
        }
        if s == before {
            break;
        }
    }
    (s.trim(), depth)
}

/// Split `name<args>` into the template name and parsed arguments.
fn split_template(base: &str) -> (&str, Option<Vec<TypeDesc>>) {
    let open = match base.find('<') {
        Some(i) if i > 0 => i,
        _ => return (base, None),
    };
    let close = match matching_close(base, open) {
        Some(i) => i,
        None => return (base, None),
    };
    // `Outer<int>::Inner` names a member of a specialization, not a
    // specialization itself.
    if !base[close + 1..].trim().is_empty() {
        return (base, None);
    }
    let inner = &base[open + 1..close];
    let args = split_top_level(inner)
        .into_iter()
        .filter(|a| !a.is_empty())
        .map(TypeDesc::parse)
        .collect();
    (base[..open].trim_end(), Some(args))
}

fn matching_close(s: &str, open: usize) -> Option<usize> {
    let mut angle = 0usize;
    let mut paren = 0usize;
    for (i, c) in s.char_indices().skip_while(|(i, _)| *i < open) {
        match c {
            '<' if paren == 0 => angle += 1,
            '>' if paren == 0 => {
                angle -= 1;
                if angle == 0 {
                    return Some(i);
                }
            }
            '(' => paren += 1,
            ')' => paren = paren.saturating_sub(1),
            _ => {}
        }
    }
    None
}

/// Split on commas that are not nested inside `<>` or `()`.
pub(crate) fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

/// Split a function type spelling `R (A, B) const` into its return type and
/// parameter spellings.
pub fn split_function_type(spelling: &str) -> Option<(String, Vec<String>)> {
    let mut angle = 0i32;
    let mut open = None;
    for (i, c) in spelling.char_indices() {
        match c {
            '<' => angle += 1,
            '>' => angle -= 1,
            '(' if angle == 0 => {
                open = Some(i);
                break;
            }
            _ => {}
        }
    }
    let open = open?;
    let mut depth = 0i32;
    let mut close = None;
    for (i, c) in spelling[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;
    let ret = spelling[..open].trim().to_string();
    let params = split_top_level(&spelling[open + 1..close])
        .into_iter()
        .filter(|p| !p.is_empty() && *p != "void" && *p != "...")
        .map(str::to_string)
        .collect();
    Some((ret, params))
}
