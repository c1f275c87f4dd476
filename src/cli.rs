//! Command-line interface for stubsmith.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::ast::clang::ClangProvider;
use crate::config::{self, Config, DEFAULT_CONFIG_NAMES};
use crate::pipeline::Runner;
use crate::report;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Generate Python interface stubs from C++ embedding registrations.
///
/// stubsmith reads clang's AST of every translation unit, recognizes the
/// `pyembed` registration calls in it, and writes one `.pyi` file per
/// registered module.
#[derive(Parser)]
#[command(name = "stubsmith")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log debug diagnostics (STUBSMITH_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract registrations and write stubs
    #[command(visible_alias = "gen")]
    Generate(GenerateArgs),
    /// Create a stubsmith.yaml from the commented template
    Init(InitArgs),
}

/// Arguments for the generate command.
#[derive(Args, Default)]
pub struct GenerateArgs {
    /// Translation units or directories of them
    pub inputs: Vec<PathBuf>,

    /// Configuration file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Include directory (repeatable)
    #[arg(short = 'I', long = "include")]
    pub include_dirs: Vec<PathBuf>,

    /// Preprocessor define, NAME or NAME=VALUE (repeatable)
    #[arg(short = 'D', long = "define")]
    pub defines: Vec<String>,

    /// Extra compiler argument (repeatable)
    #[arg(long = "extra-arg", allow_hyphen_values = true)]
    pub extra_args: Vec<String>,

    /// Directory for .pyi files (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Package prefix of every fully-qualified name
    #[arg(short, long)]
    pub package: Option<String>,

    /// Artifact of an earlier run to resolve against (repeatable)
    #[arg(long = "import")]
    pub imports: Vec<PathBuf>,

    /// Write the aggregate artifact here
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Worker count, 0 for all cores
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Extract and export only; write no stubs
    #[arg(long)]
    pub parse_only: bool,

    /// Precompiled prefix to parse on top of
    #[arg(long)]
    pub prefix: Option<PathBuf>,

    /// Build --prefix from the first input
    #[arg(long)]
    pub first_is_prefix: bool,

    /// clang driver to run
    #[arg(long)]
    pub clang: Option<String>,

    /// Language standard, e.g. c++20
    #[arg(long)]
    pub std: Option<String>,

    /// Fragment cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Do not read or write the fragment cache
    #[arg(long)]
    pub no_cache: bool,

    /// Command run on every written stub
    #[arg(long)]
    pub post_format: Option<String>,

    /// Glob skipped inside input directories (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

impl GenerateArgs {
    /// Overlay the command line on a configuration file: lists extend,
    /// scalars replace.
    pub fn apply(&self, config: &mut Config) {
        config.inputs.extend(self.inputs.iter().cloned());
        config.include_dirs.extend(self.include_dirs.iter().cloned());
        config.defines.extend(self.defines.iter().cloned());
        config.extra_args.extend(self.extra_args.iter().cloned());
        config.imports.extend(self.imports.iter().cloned());
        config.exclude.extend(self.exclude.iter().cloned());

        replace(&mut config.output_dir, &self.output);
        replace(&mut config.package_prefix, &self.package);
        replace(&mut config.export, &self.export);
        replace(&mut config.jobs, &self.jobs);
        replace(&mut config.prefix, &self.prefix);
        replace(&mut config.clang, &self.clang);
        replace(&mut config.std, &self.std);
        replace(&mut config.cache_dir, &self.cache_dir);
        replace(&mut config.post_format, &self.post_format);
        if self.parse_only {
            config.parse_only = Some(true);
        }
        if self.first_is_prefix {
            config.first_is_prefix = Some(true);
        }
        if self.no_cache {
            config.no_cache = Some(true);
        }
    }
}

fn replace<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        *slot = value.clone();
    }
}

/// Arguments for the init command.
#[derive(Args)]
pub struct InitArgs {
    /// Output file path
    #[arg(short, long, default_value = "stubsmith.yaml")]
    pub output: PathBuf,
}

/// The file configuration, explicit or discovered, or an empty one.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    match explicit {
        Some(path) => Config::parse_file(path),
        None => match Config::discover(Path::new(".")) {
            Some(path) => {
                tracing::debug!(config = %path.display(), "discovered configuration");
                Config::parse_file(path)
            }
            None => Ok(Config::default()),
        },
    }
}

/// Run the generate command.
pub fn run_generate(args: &GenerateArgs) -> anyhow::Result<i32> {
    let mut config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return Ok(EXIT_ERROR);
        }
    };
    args.apply(&mut config);

    if let Err(e) = config::validate(&config) {
        eprintln!("Error: invalid configuration: {}", e);
        return Ok(EXIT_ERROR);
    }

    if config.inputs.is_empty() {
        eprintln!("Error: no inputs given");
        eprintln!(
            "Pass translation units on the command line or list them in {}",
            DEFAULT_CONFIG_NAMES[0]
        );
        return Ok(EXIT_ERROR);
    }
    if let Some(missing) = config.inputs.iter().find(|p| !p.exists()) {
        eprintln!("Error: cannot access input {}", missing.display());
        return Ok(EXIT_ERROR);
    }

    let files = config.collect_inputs()?;
    if files.is_empty() {
        eprintln!("Warning: no translation units found");
        return Ok(EXIT_SUCCESS);
    }

    let mut options = config.run_options(files);
    options.progress = !args.quiet && options.output_dir.is_some();
    let provider = ClangProvider::new(config.clang_options());
    let runner = Runner::new(&provider, options);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match runner.run(&mut out) {
        Ok(summary) => {
            if !args.quiet {
                report::write_summary(&summary);
            }
            Ok(EXIT_SUCCESS)
        }
        Err(failure) => {
            report::write_failure(&failure);
            Ok(EXIT_FAILED)
        }
    }
}

/// Run the init command: write [`Config::starter`] with notes, never over
/// an existing file.
pub fn run_init(args: &InitArgs) -> anyhow::Result<i32> {
    let text = Config::starter().to_commented_yaml()?;
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&args.output) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            eprintln!("Error: {} already exists; pass --output for another path", args.output.display());
            return Ok(EXIT_ERROR);
        }
        Err(e) => return Err(e).with_context(|| format!("creating {}", args.output.display())),
    };
    file.write_all(text.as_bytes())
        .with_context(|| format!("writing {}", args.output.display()))?;

    println!(
        "Wrote {}; list your binding sources under `inputs`, then run `stubsmith generate`",
        args.output.display()
    );
    Ok(EXIT_SUCCESS)
}
