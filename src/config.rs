//! YAML configuration file.
//!
//! Every option can be given in `stubsmith.yaml` and on the command line.
//! Relative paths in the file are taken relative to the file's directory.

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::ast::clang::ClangOptions;
use crate::pipeline::{FragmentCache, RunOptions};

/// Configuration file names searched for in the working directory.
pub const DEFAULT_CONFIG_NAMES: &[&str] = &["stubsmith.yaml", ".stubsmith.yaml"];

/// Note written above each key by [`Config::to_commented_yaml`].
const KEY_NOTES: &[(&str, &str)] = &[
    ("inputs", "Translation units with pyembed registrations, or directories of them"),
    ("include_dirs", "Compiler flags passed to the clang driver"),
    ("output_dir", "Where .pyi files go; null prints every stub to stdout"),
    ("package_prefix", "Prepended to every fully-qualified module name"),
    ("imports", "Artifacts exported by earlier runs"),
    ("jobs", "Worker count; 0 uses every core"),
    ("prefix", "Precompiled prefix; first_is_prefix builds it from the first input"),
    ("clang", "clang driver and language standard"),
    ("cache_dir", "Fragment cache; null uses the per-user cache directory"),
    ("post_format", "Run on every written stub, e.g. \"ruff format\""),
    ("exclude", "Globs skipped while walking input directories"),
];

/// Extensions of translation units picked up when walking a directory.
const SOURCE_EXTENSIONS: &[&str] = &["cpp", "cc", "cxx", "c++"];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Translation units or directories holding them.
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Absent writes every stub to stdout.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub package_prefix: Option<String>,
    #[serde(default)]
    pub imports: Vec<PathBuf>,
    #[serde(default)]
    pub export: Option<PathBuf>,
    /// 0 picks the hardware concurrency.
    #[serde(default)]
    pub jobs: Option<usize>,
    #[serde(default)]
    pub parse_only: Option<bool>,
    #[serde(default)]
    pub prefix: Option<PathBuf>,
    #[serde(default)]
    pub first_is_prefix: Option<bool>,
    #[serde(default)]
    pub clang: Option<String>,
    #[serde(default)]
    pub std: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub no_cache: Option<bool>,
    /// Command run on every written stub, e.g. `ruff format`.
    #[serde(default)]
    pub post_format: Option<String>,
    /// Globs skipped when walking input directories.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Config {
    /// Parse a configuration from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing configuration {}", path.display()))?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.rebase(base);
        }
        Ok(config)
    }

    /// The first default configuration file present in `dir`.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        DEFAULT_CONFIG_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.inputs.iter_mut().for_each(join);
        self.include_dirs.iter_mut().for_each(join);
        self.imports.iter_mut().for_each(join);
        self.output_dir.iter_mut().for_each(join);
        self.export.iter_mut().for_each(join);
        self.prefix.iter_mut().for_each(join);
        self.cache_dir.iter_mut().for_each(join);
    }

    pub fn exclusions(&self) -> anyhow::Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            builder.add(
                Glob::new(pattern)
                    .map_err(|e| anyhow::anyhow!("invalid exclude pattern {:?}: {}", pattern, e))?,
            );
        }
        Ok(builder.build()?)
    }

    /// Expand directory inputs into their C++ sources. Files given directly
    /// are kept in place and never filtered.
    pub fn collect_inputs(&self) -> anyhow::Result<Vec<PathBuf>> {
        let excluded = self.exclusions()?;
        let mut files = Vec::new();
        for input in &self.inputs {
            if !input.is_dir() {
                files.push(input.clone());
                continue;
            }
            let mut found = Vec::new();
            for entry in WalkDir::new(input)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| !is_hidden_dir(e))
            {
                let entry = entry?;
                let path = entry.path();
                if !entry.file_type().is_file() || !is_source(path) {
                    continue;
                }
                let relative = path.strip_prefix(input).unwrap_or(path);
                if excluded.is_match(relative) || excluded.is_match(path) {
                    tracing::debug!(path = %path.display(), "excluded");
                    continue;
                }
                found.push(path.to_path_buf());
            }
            found.sort();
            files.extend(found);
        }
        Ok(files)
    }

    pub fn clang_options(&self) -> ClangOptions {
        let mut options = ClangOptions {
            std: self.std.clone(),
            include_dirs: self.include_dirs.clone(),
            defines: self.defines.clone(),
            extra_args: self.extra_args.clone(),
            ..Default::default()
        };
        if let Some(clang) = &self.clang {
            options.executable = clang.clone();
        }
        options
    }

    pub fn cache_enabled(&self) -> bool {
        !self.no_cache.unwrap_or(false)
    }

    /// The configuration `stubsmith init` starts a project with.
    pub fn starter() -> Self {
        Config {
            inputs: vec![PathBuf::from("bindings")],
            output_dir: Some(PathBuf::from("stubs")),
            jobs: Some(0),
            parse_only: Some(false),
            first_is_prefix: Some(false),
            std: Some("c++17".to_string()),
            no_cache: Some(false),
            exclude: vec!["**/test/**".to_string()],
            ..Default::default()
        }
    }

    /// Serialize to YAML, with a note above the keys that start a group.
    pub fn to_commented_yaml(&self) -> anyhow::Result<String> {
        let body = serde_yaml::to_string(self).context("serializing configuration")?;
        let mut out = String::from(
            "# stubsmith configuration\n\
             #\n\
             # Relative paths are resolved against the directory of this file.\n\
             # Command-line lists extend the ones below; single values replace them.\n",
        );
        for line in body.lines() {
            let key = line.split(':').next().unwrap_or_default();
            if let Some((_, note)) = KEY_NOTES.iter().find(|(name, _)| *name == key) {
                out.push_str("\n# ");
                out.push_str(note);
                out.push('\n');
            }
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn run_options(&self, inputs: Vec<PathBuf>) -> RunOptions {
        let cache_dir = if self.cache_enabled() {
            self.cache_dir.clone().or_else(FragmentCache::default_dir)
        } else {
            None
        };
        RunOptions {
            inputs,
            output_dir: self.output_dir.clone(),
            package_prefix: self.package_prefix.clone(),
            imports: self.imports.clone(),
            export: self.export.clone(),
            jobs: self.jobs.unwrap_or(0),
            parse_only: self.parse_only.unwrap_or(false),
            prefix: self.prefix.clone(),
            first_is_prefix: self.first_is_prefix.unwrap_or(false),
            cache_dir,
            post_format: self.post_format.clone(),
            progress: false,
        }
    }
}

fn is_hidden_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.file_name().to_string_lossy().starts_with('.')
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Validate a configuration for correctness.
pub fn validate(config: &Config) -> anyhow::Result<()> {
    config.exclusions()?;

    if config.first_is_prefix.unwrap_or(false) && config.prefix.is_none() {
        anyhow::bail!("first_is_prefix requires a prefix path");
    }
    if let Some(prefix) = &config.package_prefix {
        if prefix.is_empty() || prefix.split('.').any(str::is_empty) {
            anyhow::bail!("invalid package prefix {:?}", prefix);
        }
    }
    if let Some(command) = &config.post_format {
        if command.trim().is_empty() {
            anyhow::bail!("post_format is set but empty");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
include_dirs:
  - include
defines: [NDEBUG]
package_prefix: engine
jobs: 4
exclude:
  - "third_party/**"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.include_dirs, vec![PathBuf::from("include")]);
        assert_eq!(config.defines, vec!["NDEBUG"]);
        assert_eq!(config.package_prefix.as_deref(), Some("engine"));
        assert_eq!(config.jobs, Some(4));
        assert!(config.cache_enabled());
        validate(&config).unwrap();
    }

    #[test]
    fn test_relative_paths_follow_the_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stubsmith.yaml");
        fs::write(&path, "output_dir: stubs\ninputs: [src]\n").unwrap();

        assert_eq!(Config::discover(temp.path()), Some(path.clone()));
        let config = Config::parse_file(&path).unwrap();
        assert_eq!(config.output_dir, Some(temp.path().join("stubs")));
        assert_eq!(config.inputs, vec![temp.path().join("src")]);
    }

    #[test]
    fn test_collect_inputs_walks_sorted_and_excludes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        for file in ["b.cpp", "a.cc", "notes.txt", "third_party/x.cpp", ".git/y.cpp"] {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
        let config = Config {
            inputs: vec![root.to_path_buf()],
            exclude: vec!["third_party/**".to_string()],
            ..Default::default()
        };
        assert_eq!(
            config.collect_inputs().unwrap(),
            vec![root.join("a.cc"), root.join("b.cpp")]
        );
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let config = Config {
            exclude: vec!["[".to_string()],
            ..Default::default()
        };
        assert!(validate(&config).is_err());

        let config = Config {
            first_is_prefix: Some(true),
            ..Default::default()
        };
        assert!(validate(&config).is_err());

        let config = Config {
            package_prefix: Some("engine..core".to_string()),
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_run_options_without_cache() {
        let config = Config {
            no_cache: Some(true),
            clang: Some("clang++-17".to_string()),
            ..Default::default()
        };
        let options = config.run_options(vec![PathBuf::from("a.cpp")]);
        assert!(options.cache_dir.is_none());
        assert_eq!(options.jobs, 0);
        assert_eq!(config.clang_options().executable, "clang++-17");
    }

    #[test]
    fn test_commented_yaml_parses_back() {
        let text = Config::starter().to_commented_yaml().unwrap();
        assert!(text.starts_with("# stubsmith configuration\n"));
        assert!(text.contains("\n# Globs skipped while walking input directories\nexclude:\n"));

        let parsed: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed.inputs, vec![PathBuf::from("bindings")]);
        assert_eq!(parsed.output_dir, Some(PathBuf::from("stubs")));
        assert_eq!(parsed.std.as_deref(), Some("c++17"));
        assert_eq!(parsed.exclude, vec!["**/test/**"]);
        assert_eq!(parsed.package_prefix, None);
        assert!(parsed.cache_enabled());
        validate(&parsed).unwrap();
    }
}
