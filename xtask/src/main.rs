//! Development tasks for the dbpool workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Development tasks for dbpool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Formatting, lints and the full test suite
    Ci,
    /// Check formatting
    Fmt,
    /// Lint every target with warnings denied
    Clippy,
    /// Run the test suite, optionally filtered by test name
    Test {
        /// Only run tests whose name contains this string
        filter: Option<String>,
    },
    /// Run the concurrency properties with many more cases
    Stress {
        /// Proptest cases per property
        #[arg(long, default_value_t = 1024)]
        cases: u32,
    },
    /// Build API documentation
    Doc {
        /// Open the docs in a browser once built
        #[arg(long)]
        open: bool,
    },
    /// Run the checkout benchmarks
    Bench,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            fmt(&sh)?;
            clippy(&sh)?;
            test(&sh, None)?;
            println!("ci: all checks passed");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test { filter } => test(&sh, filter.as_deref())?,
        Command::Stress { cases } => stress(&sh, cases)?,
        Command::Doc { open } => doc(&sh, open)?,
        Command::Bench => {
            println!("bench: dbpool-testing/checkout");
            cmd!(sh, "cargo bench -p dbpool-testing --bench checkout").run()?;
        }
    }

    Ok(())
}

/// xtask lives one level below the workspace root.
fn workspace_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .context("xtask manifest has no parent directory")
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("fmt: checking");
    cmd!(sh, "cargo fmt --all -- --check")
        .run()
        .context("formatting differs; run `cargo fmt --all`")?;
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("clippy: workspace, all targets");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    Ok(())
}

fn test(sh: &Shell, filter: Option<&str>) -> Result<()> {
    println!("test: workspace");
    cmd!(sh, "cargo test --workspace {filter...}").run()?;
    Ok(())
}

fn stress(sh: &Shell, cases: u32) -> Result<()> {
    println!("stress: {cases} cases per property");
    let cases = cases.to_string();
    cmd!(sh, "cargo test --release -p dbpool-testing --test concurrency")
        .env("PROPTEST_CASES", cases)
        .run()?;
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    println!("doc: dbpool");
    let open = open.then_some("--open");
    cmd!(sh, "cargo doc -p dbpool --no-deps {open...}").run()?;
    Ok(())
}
