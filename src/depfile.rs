//! Make-style dependency rules: written for build systems, read back from
//! the compiler's `-M` output.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Write `target: deps...` to `path`, one dependency per continuation line.
pub fn write(path: &Path, target: &Path, dependencies: &[PathBuf]) -> io::Result<()> {
    fs::write(path, render(target, dependencies))
}

pub fn render(target: &Path, dependencies: &[PathBuf]) -> String {
    let mut out = escape(&target.to_string_lossy());
    out.push(':');
    for dep in dependencies {
        out.push_str(" \\\n  ");
        out.push_str(&escape(&dep.to_string_lossy()));
    }
    out.push('\n');
    out
}

fn escape(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            ' ' => out.push_str("\\ "),
            '#' => out.push_str("\\#"),
            '$' => out.push_str("$$"),
            _ => out.push(c),
        }
    }
    out
}

/// Prerequisites of the first rule in `text`.
pub fn parse_make_rule(text: &str) -> Vec<PathBuf> {
    let joined = text.replace("\\\r\n", " ").replace("\\\n", " ");
    let rule = joined.lines().find(|l| !l.trim().is_empty()).unwrap_or("");

    let chars: Vec<char> = rule.chars().collect();
    // The target separator is the first colon followed by whitespace or the
    // end of the line; drive letters (`C:\`) are not separators.
    let separator = (0..chars.len()).find(|&i| {
        chars[i] == ':'
            && (i == 0 || chars[i - 1] != '\\')
            && chars.get(i + 1).map(|c| c.is_whitespace()).unwrap_or(true)
    });
    let start = match separator {
        Some(i) => i + 1,
        None => return Vec::new(),
    };

    let mut deps = Vec::new();
    let mut current = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if matches!(chars.get(i + 1), Some(' ') | Some('#')) => {
                current.push(chars[i + 1]);
                i += 1;
            }
            '$' if chars.get(i + 1) == Some(&'$') => {
                current.push('$');
                i += 1;
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    deps.push(PathBuf::from(std::mem::take(&mut current)));
                }
            }
            c => current.push(c),
        }
        i += 1;
    }
    if !current.is_empty() {
        deps.push(PathBuf::from(current));
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compiler_output() {
        let text = "widget.o: src/widget.cpp include/widget.h \\\n  /usr/include/c++/13/vector \\\n  include/my\\ header.h\n";
        let deps = parse_make_rule(text);
        assert_eq!(
            deps,
            vec![
                PathBuf::from("src/widget.cpp"),
                PathBuf::from("include/widget.h"),
                PathBuf::from("/usr/include/c++/13/vector"),
                PathBuf::from("include/my header.h"),
            ]
        );
    }

    #[test]
    fn test_drive_letters_are_not_separators() {
        let deps = parse_make_rule("C:\\build\\w.o: C:\\src\\w.cpp\n");
        assert_eq!(deps, vec![PathBuf::from("C:\\src\\w.cpp")]);
    }

    #[test]
    fn test_rendered_rule_reads_back() {
        let deps = vec![PathBuf::from("a b.cpp"), PathBuf::from("cost$.h")];
        let text = render(Path::new("out/model.json"), &deps);
        assert!(text.starts_with("out/model.json: \\\n  a\\ b.cpp"));
        assert_eq!(parse_make_rule(&text), deps);
    }

    #[test]
    fn test_no_rule() {
        assert!(parse_make_rule("").is_empty());
        assert!(parse_make_rule("just words").is_empty());
    }
}
