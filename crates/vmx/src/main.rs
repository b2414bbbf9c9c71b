//! `vmx`: the build driver's command-line surface (§6).
//!
//! Grounded on `cmd/sml/main.go` in `examples/original_source/` for the
//! flag set and `path:line:col: message` diagnostic reporting, and on
//! the teacher's `apps/daemon/src/main.rs` for the `tracing_subscriber`
//! init pattern (one `registry()...init()` call in `main`, nowhere
//! else) and its env-var-with-fallback style for the one setting that
//! has no natural CLI flag (`VMX_LOG`).

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmx_build::{build_pkgs, plan, select_pkgs, DirHome, Flags, Options};

/// Build, link and test packages under a source home.
#[derive(Debug, Parser)]
#[command(name = "vmx", version, about)]
struct Cli {
    /// Run package tests after a successful build.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    test: bool,

    /// Package selector: a literal path, or `path/...` for it and every
    /// sub-package.
    #[arg(long, default_value = "/...")]
    pkg: String,

    /// Filesystem root packages are read from and build artifacts are
    /// written to.
    #[arg(long)]
    home: std::path::PathBuf,

    /// Standard-library root, if imports should also resolve there.
    #[arg(long)]
    std: Option<std::path::PathBuf>,

    /// Print the build order and exit without compiling anything.
    #[arg(long, default_value_t = false)]
    plan: bool,

    /// Stop after compiling: skip linking and tests even if `--test`
    /// is set.
    #[arg(long, default_value_t = false)]
    static_only: bool,

    /// Emit one progress line per package as it's built.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_env("VMX_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let home = DirHome::new(&cli.home);
    let std_root = cli.std.as_ref().map(|p| p.to_string_lossy().into_owned());

    let paths = select_pkgs(&home, &cli.pkg).with_context(|| format!("selecting packages matching {:?}", cli.pkg))?;
    if paths.is_empty() {
        tracing::warn!(pattern = %cli.pkg, "no packages matched");
        return Ok(ExitCode::SUCCESS);
    }

    if cli.plan {
        let (order, diags) = plan(&home, std_root.as_deref(), &paths);
        if !diags.is_empty() {
            print_diagnostics(&diags);
            return Ok(ExitCode::FAILURE);
        }
        for path in &order {
            println!("{path}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let opts = Options {
        home: &home,
        std_root: std_root.clone(),
        flags: Flags {
            static_only: cli.static_only,
            verbose: cli.verbose,
            run_tests: cli.test && !cli.static_only,
        },
    };

    let report = build_pkgs(&opts, &paths);
    if !report.diagnostics.is_empty() {
        print_diagnostics(&report.diagnostics);
        return Ok(ExitCode::FAILURE);
    }

    let mut failed = false;
    for (pkg, results) in &report.test_results {
        for (name, outcome) in results {
            match outcome {
                vmx_build::TestOutcome::Passed => println!("ok   {pkg}.{name}"),
                vmx_build::TestOutcome::Failed(detail) => {
                    println!("FAIL {pkg}.{name}: {detail}");
                    failed = true;
                }
            }
        }
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// One diagnostic per line, `path:line:col: message` (§6), to stderr.
fn print_diagnostics(diags: &vmx_syms::Diagnostics) {
    for d in diags.as_slice() {
        eprintln!("{}: {}", d.pos, d.message);
    }
}
