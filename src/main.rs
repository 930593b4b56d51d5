use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::Colorize;
use env_logger::Builder;
use linepatch::{
    apply_diff, decode_bytes, generate_reject, parse_patch, read_lines, ApplyConfig, Diff,
    DiffKind, FileDiffResult, FuzzFactor, HunkResult,
};
use log::{info, warn, Level, LevelFilter};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

// --- Main Application Entry Point ---

fn main() {
    let args = Args::parse();
    setup_logging(&args);

    if let Err(e) = run(args) {
        // Using {:?} ensures the full error chain from `anyhow` is printed.
        eprintln!("{} {:?}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Contains the primary logic of the application.
fn run(args: Args) -> Result<()> {
    // --- Argument Validation ---
    if !args.target_dir.is_dir() {
        return Err(anyhow!(
            "Target directory '{}' not found or is not a directory.",
            args.target_dir.display()
        ));
    }

    // --- Patch Parsing ---
    let raw = fs::read(&args.patch_file)
        .with_context(|| format!("Failed to read patch file '{}'", args.patch_file.display()))?;
    let decoded = decode_bytes(&raw);
    if decoded.lossy {
        warn!(
            "Patch file '{}' is not valid UTF-8; it was decoded lossily.",
            args.patch_file.display()
        );
    }
    let patch = parse_patch(&decoded.text);
    for error in &patch.errors {
        warn!("{}: {}", args.patch_file.display(), error);
    }
    if patch.is_empty() {
        info!("No file diffs found in the patch.");
        return Ok(());
    }

    let config = ApplyConfig::builder()
        .strip(args.strip)
        .fuzz(args.fuzz)
        .reverse(args.reverse)
        .ignore_whitespace(args.ignore_whitespace)
        .preserve_endings(args.preserve_endings)
        .adjust_shift(!args.no_adjust_shift)
        .build();

    info!("Found {} file diff(s) to apply.", patch.diffs.len());

    let mut success_count = 0;
    let mut fail_count = 0;

    for diff in patch.diffs.iter().filter(|d| d.enabled) {
        match apply_one(diff, &args, &config) {
            Ok(clean) => {
                if clean {
                    success_count += 1;
                } else {
                    fail_count += 1;
                }
            }
            Err(e) => {
                // A hard error (I/O, path traversal) is fatal.
                return Err(e);
            }
        }
    }

    // --- Final Summary ---
    info!("--- Summary ---");
    info!("Clean files:  {}", success_count);
    info!("With rejects: {}", fail_count);
    if args.dry_run {
        info!("DRY RUN completed. No files were modified.");
    }

    if fail_count > 0 {
        return Err(anyhow!(
            "Completed with rejected hunks in {} file(s).",
            fail_count
        ));
    }

    Ok(())
}

/// Applies one file diff. Returns `Ok(true)` when every hunk applied,
/// `Ok(false)` when some hunks were rejected, and `Err` only for hard
/// failures such as I/O errors.
fn apply_one(diff: &Diff, args: &Args, config: &ApplyConfig) -> Result<bool> {
    let Some(relative) = diff.target_path(config.strip, config.reverse) else {
        warn!("Skipping a diff with no usable file path.");
        return Ok(true);
    };
    ensure_relative(&relative)?;
    let path = args.target_dir.join(&relative);

    // An added file starts from nothing; everything else must exist.
    let creates = matches!(
        (diff.kind(), config.reverse),
        (DiffKind::Addition, false) | (DiffKind::Deletion, true)
    );
    let deletes = matches!(
        (diff.kind(), config.reverse),
        (DiffKind::Deletion, false) | (DiffKind::Addition, true)
    );

    let before_text = if creates && !path.exists() {
        String::new()
    } else {
        let raw = fs::read(&path)
            .with_context(|| format!("Failed to read target file '{}'", path.display()))?;
        let decoded = decode_bytes(&raw);
        if decoded.lossy {
            warn!(
                "Target file '{}' is not valid UTF-8; it was decoded lossily.",
                path.display()
            );
        }
        decoded.text
    };

    let target = read_lines(&before_text);
    let result = apply_diff(diff, &target, config);
    let after_text = result.after_text(config.preserve_endings);

    println!("patching file {}", relative.display());
    report_hunks(&result);

    if args.dry_run {
        let old_header = format!("a/{}", relative.display());
        let new_header = format!("b/{}", relative.display());
        let preview = similar::TextDiff::from_lines(before_text.as_str(), after_text.as_str());
        print!(
            "{}",
            preview
                .unified_diff()
                .context_radius(3)
                .header(&old_header, &new_header)
        );
    } else if deletes && after_text.is_empty() && result.all_applied() {
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove '{}'", path.display()))?;
        println!("removed file {}", relative.display());
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory '{}'", parent.display()))?;
        }
        fs::write(&path, &after_text)
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
    }

    if let Some(reject_text) = generate_reject(diff, &result, config) {
        let reject_path = reject_file_path(&path);
        if args.dry_run {
            println!(
                "{} hunk(s) would be saved to {}",
                result.rejected_hunks(diff).len(),
                reject_path.display()
            );
        } else {
            fs::write(&reject_path, &reject_text)
                .with_context(|| format!("Failed to write '{}'", reject_path.display()))?;
            println!(
                "{} hunk(s) saved to {}",
                result.rejected_hunks(diff).len(),
                reject_path.display()
            );
        }
        return Ok(false);
    }

    Ok(true)
}

/// Prints per-hunk outcomes the way `patch` narrates them.
fn report_hunks(result: &FileDiffResult) {
    for (i, hunk_result) in result.hunk_results.iter().enumerate() {
        match hunk_result {
            HunkResult::Applied { fuzz, offset, .. } if *fuzz > 0 || *offset != 0 => {
                println!(
                    "Hunk #{} succeeded with fuzz {} (offset {} lines).",
                    i + 1,
                    fuzz,
                    offset
                );
            }
            HunkResult::Applied { .. } => {}
            HunkResult::Rejected => println!("Hunk #{} FAILED.", i + 1),
            HunkResult::Skipped => println!("Hunk #{} skipped (disabled).", i + 1),
        }
    }
}

/// Rejects absolute paths and paths that climb out of the target directory.
fn ensure_relative(path: &Path) -> Result<()> {
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(anyhow!(
            "Refusing to patch '{}': the path escapes the target directory.",
            path.display()
        ));
    }
    Ok(())
}

/// `foo/bar.txt` -> `foo/bar.txt.rej`.
fn reject_file_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".rej");
    path.with_file_name(name)
}

/// Parses the `--fuzz` value: a plain integer or the word `auto`.
fn parse_fuzz(value: &str) -> std::result::Result<FuzzFactor, String> {
    if value.eq_ignore_ascii_case("auto") {
        return Ok(FuzzFactor::Auto);
    }
    value
        .parse::<usize>()
        .map(FuzzFactor::Limit)
        .map_err(|_| format!("'{}' is not a fuzz limit (expected an integer or 'auto')", value))
}

/// Defines the command-line arguments for the application.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Apply unified or context format patches to a target directory.",
    long_about = "Hunks are matched fuzzily: a hunk is tried at its stated position first, then \
at nearby offsets with a growing fuzz budget. Hunks that cannot be placed are written to \
.rej files next to their targets."
)]
struct Args {
    /// Path to the patch file.
    patch_file: PathBuf,
    /// Path to the directory the patch applies to.
    target_dir: PathBuf,
    /// Strip this many leading components from file paths in the patch.
    #[arg(short = 'p', long, default_value_t = 0)]
    strip: usize,
    /// Maximum fuzz: context lines next to a change that may mismatch.
    #[arg(
        short = 'F',
        long,
        default_value = "2",
        value_parser = parse_fuzz,
        help = "Maximum fuzz, or 'auto' to discover the smallest fuzz that fits each file."
    )]
    fuzz: FuzzFactor,
    /// Apply the patch in reverse, undoing a previous application.
    #[arg(short = 'R', long)]
    reverse: bool,
    /// Ignore all whitespace when matching context and delete lines.
    #[arg(short = 'l', long)]
    ignore_whitespace: bool,
    /// Keep each line's original delimiter instead of normalizing to the
    /// platform separator.
    #[arg(long)]
    preserve_endings: bool,
    /// Do not carry earlier hunks' offsets forward; every hunk searches
    /// from its stated position, like the traditional patch tool.
    #[arg(long)]
    no_adjust_shift: bool,
    /// If set, show what would be done, but don't modify any files.
    #[arg(
        short = 'n',
        long,
        help = "Show what would be done, but don't modify files."
    )]
    dry_run: bool,
    /// Increase logging verbosity. Can be used multiple times.
    /// -v for info, -vv for debug, -vvv for trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Sets up the global logger with a colored per-level prefix.
fn setup_logging(args: &Args) {
    let log_level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| match record.level() {
            Level::Error => writeln!(buf, "{} {}", "error:".red().bold(), record.args()),
            Level::Warn => writeln!(buf, "{} {}", "warning:".yellow().bold(), record.args()),
            Level::Info => writeln!(buf, "{}", record.args()),
            Level::Debug => writeln!(buf, "{} {}", "debug:".blue().bold(), record.args()),
            Level::Trace => writeln!(buf, "{} {}", "trace:".cyan().bold(), record.args()),
        })
        .init();
}
