use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const RUNTIME_PACKAGE: &str = "cfn_provider_lambda";
const RUNTIME_BINARY: &str = "provider_runtime";

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the custom resource provider workspace",
    long_about = "Builds and packages the provider Lambda runtime and runs the\n\
                  CI checks for the custom resource provider workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run unit tests for every crate
    Test,
    /// Run CI checks (fmt, clippy, tests, packaging)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Build the provider runtime and zip it as a Lambda `bootstrap`
    Package {
        /// Compilation target triple for the Lambda binary
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Directory receiving the zip artifact
        #[arg(long, default_value = "dist")]
        output_dir: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Build and zip the runtime for the host target
    Package,
    /// Run check + package
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn package_runtime(target: &str, profile: BuildProfile, output_dir: &Path) -> PathBuf {
    require_installed_target(target);

    step("Build provider runtime binary");

    let mut cargo_args = vec![
        "build",
        "-p",
        RUNTIME_PACKAGE,
        "--target",
        target,
        "--bin",
        RUNTIME_BINARY,
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    step("Package Lambda zip artifact");
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    fs::create_dir_all(output_dir).expect("failed to create lambda dist directory");

    let zip_path = output_dir.join(format!("{RUNTIME_BINARY}.zip"));
    package_lambda_zip(
        &target_dir.join(binary_name(RUNTIME_BINARY, target)),
        &zip_path,
    );
    verify_lambda_zip(&zip_path);

    eprintln!(
        "\nPackaged artifact:\n- {}\nDeploy it once per entrypoint and set PROVIDER_ENTRYPOINT to on_event, is_complete or on_timeout.",
        zip_path.display()
    );
    zip_path
}

fn host_target() -> String {
    let output = Command::new("rustc")
        .arg("-vV")
        .output()
        .expect("failed to execute rustc");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .find_map(|line| line.strip_prefix("host: "))
        .map(|host| host.trim().to_string())
        .expect("rustc -vV did not report a host triple")
}

/// Fails early when the requested target has no installed standard library,
/// instead of letting the build stop on an opaque `can't find crate for core`.
fn require_installed_target(target: &str) {
    let Ok(output) = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output()
    else {
        eprintln!("warning: rustup not found; skipping the `{target}` target check");
        return;
    };

    let installed = String::from_utf8_lossy(&output.stdout);
    if output.status.success() && !installed.lines().any(|line| line.trim() == target) {
        eprintln!("error: rust target `{target}` is not installed; run `rustup target add {target}`");
        exit(1);
    }
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

fn package_lambda_zip(binary_path: &Path, zip_path: &Path) {
    if !binary_path.exists() {
        panic!("expected lambda binary at '{}'", binary_path.display());
    }

    let binary = fs::read(binary_path).expect("failed to read lambda binary");
    let file = fs::File::create(zip_path).expect("failed to create lambda zip");
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .expect("failed to start bootstrap entry in lambda zip");
    zip.write_all(&binary)
        .expect("failed to write bootstrap entry");
    zip.finish().expect("failed to finish lambda zip");
}

/// Lambda's `provided` runtimes only start an executable entry named `bootstrap`.
fn verify_lambda_zip(zip_path: &Path) {
    let file = fs::File::open(zip_path).expect("failed to reopen lambda zip");
    let mut archive = ZipArchive::new(file).expect("lambda zip is not a readable archive");
    let entry = archive
        .by_name("bootstrap")
        .expect("lambda zip has no `bootstrap` entry");
    let executable = entry.unix_mode().is_some_and(|mode| mode & 0o111 != 0);
    if !executable {
        panic!("`bootstrap` in '{}' is not executable", zip_path.display());
    }
}

// ── CI jobs ────────────────────────────────────────────────────────

fn run_tests() {
    step("Test cfn_provider_core");
    run_cargo(&["test", "-p", "cfn_provider_core"]);

    step("Test cfn_provider_lambda");
    run_cargo(&["test", "-p", RUNTIME_PACKAGE]);
}

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    run_tests();
}

fn ci_package() {
    let target = host_target();
    let output_dir = Path::new("target").join("ci-dist");
    package_runtime(&target, BuildProfile::Debug, &output_dir);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test => run_tests(),
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Package => ci_package(),
                CiJob::All => {
                    ci_check();
                    ci_package();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::Package {
            target,
            profile,
            output_dir,
        } => {
            package_runtime(&target, profile, &output_dir);
        }
    }
}
