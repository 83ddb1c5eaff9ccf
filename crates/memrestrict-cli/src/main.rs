//! memrestrict CLI: run a program under a byte budget.

use clap::{Parser, Subcommand};
use memrestrict_core::config::{RestrictConfig, DEBUG_VAR, THRESHOLD_VAR};
use std::error::Error;
use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// File name of the preload library produced by `memrestrict-preload`.
const LIBRARY_NAME: &str = "libmemrestrict_preload.so";

#[derive(Parser)]
#[command(name = "memrestrict")]
#[command(about = "Enforce a hard byte budget on a program's malloc/calloc/realloc", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command with the preload library injected
    Run {
        /// Byte budget, parsed like strtol (e.g. 1048576, 0x100000)
        #[arg(short, long)]
        threshold: Option<String>,

        /// Log every allocation decision to stderr
        #[arg(short, long)]
        debug: bool,

        /// Path to the preload library (defaults to one next to this binary)
        #[arg(long)]
        library: Option<PathBuf>,

        /// Command and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<OsString>,
    },

    /// Allocate blocks until done or denied
    Stress {
        /// Number of blocks
        #[arg(long, default_value_t = 1000)]
        count: usize,

        /// Bytes per block
        #[arg(long, default_value_t = 100 * 1024)]
        size: usize,

        /// Bytes written into each block
        #[arg(long, default_value_t = 100)]
        touch: usize,
    },

    /// Print the configuration resolved from the environment
    Config,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            threshold,
            debug,
            library,
            command,
        } => match run_command(&command, threshold.as_deref(), debug, library) {
            Ok(code) => std::process::exit(code),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Stress { count, size, touch } => {
            if let Err(e) = stress(count, size, touch) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Config => {
            if let Err(e) = show_config() {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run_command(
    command: &[OsString],
    threshold: Option<&str>,
    debug: bool,
    library: Option<PathBuf>,
) -> Result<i32, Box<dyn Error>> {
    let (program, args) = command.split_first().ok_or("no command given")?;

    let library = match library {
        Some(path) => path,
        None => std::env::current_exe()?.with_file_name(LIBRARY_NAME),
    };
    if !library.exists() {
        return Err(format!("preload library not found: {}", library.display()).into());
    }

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env("LD_PRELOAD", preload_value(&library, std::env::var_os("LD_PRELOAD")));
    if let Some(threshold) = threshold {
        cmd.env(THRESHOLD_VAR, threshold);
    }
    if debug {
        cmd.env(DEBUG_VAR, "1");
    }

    let status = cmd
        .status()
        .map_err(|e| format!("failed to start {}: {}", program.to_string_lossy(), e))?;
    Ok(exit_code(status))
}

/// Put our library first, keeping whatever was already preloaded.
fn preload_value(library: &Path, existing: Option<OsString>) -> OsString {
    let mut value = library.as_os_str().to_os_string();
    if let Some(existing) = existing.filter(|v| !v.is_empty()) {
        value.push(":");
        value.push(existing);
    }
    value
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Returns whether every block was granted.
fn stress(count: usize, size: usize, touch: usize) -> Result<bool, Box<dyn Error>> {
    let mut blocks: Vec<Vec<u8>> = Vec::new();
    blocks
        .try_reserve_exact(count)
        .map_err(|e| format!("cannot reserve block table: {}", e))?;

    for i in 0..count {
        let mut block = Vec::new();
        if let Err(e) = block.try_reserve_exact(size) {
            eprintln!("malloc: {}", e);
            println!("Failed after {} allocations", i);
            return Ok(false);
        }
        // Touch some bytes so the pages are really backed.
        block.resize(touch.min(size), 0xA);
        println!("pp[{}] = {:p}", i, block.as_ptr());
        blocks.push(block);
    }

    println!(
        "Successfully allocated {} bytes",
        count.saturating_mul(size)
    );
    Ok(true)
}

fn show_config() -> Result<(), Box<dyn Error>> {
    let config = RestrictConfig::from_env();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_trailing_command() {
        let cli = Cli::try_parse_from([
            "memrestrict",
            "run",
            "--threshold",
            "0x100000",
            "--debug",
            "--",
            "ls",
            "-l",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                threshold,
                debug,
                command,
                library,
            } => {
                assert_eq!(threshold.as_deref(), Some("0x100000"));
                assert!(debug);
                assert!(library.is_none());
                assert_eq!(command, vec![OsString::from("ls"), OsString::from("-l")]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_a_command() {
        assert!(Cli::try_parse_from(["memrestrict", "run"]).is_err());
    }

    #[test]
    fn stress_defaults_match_classic_program() {
        let cli = Cli::try_parse_from(["memrestrict", "stress"]).unwrap();
        match cli.command {
            Commands::Stress { count, size, touch } => {
                assert_eq!(count, 1000);
                assert_eq!(size, 102_400);
                assert_eq!(touch, 100);
            }
            _ => panic!("expected stress"),
        }
    }

    #[test]
    fn preload_value_prepends_library() {
        let lib = Path::new("/opt/lib/libmemrestrict_preload.so");
        assert_eq!(
            preload_value(lib, None),
            OsString::from("/opt/lib/libmemrestrict_preload.so")
        );
        assert_eq!(
            preload_value(lib, Some(OsString::new())),
            OsString::from("/opt/lib/libmemrestrict_preload.so")
        );
        assert_eq!(
            preload_value(lib, Some(OsString::from("libother.so"))),
            OsString::from("/opt/lib/libmemrestrict_preload.so:libother.so")
        );
    }

    #[test]
    fn missing_library_is_an_error() {
        let err = run_command(
            &[OsString::from("true")],
            None,
            false,
            Some(PathBuf::from("/nonexistent/libmemrestrict_preload.so")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("preload library not found"));
    }

    #[test]
    fn small_stress_run_succeeds() {
        assert!(stress(4, 256, 16).unwrap());
    }

    #[test]
    fn exit_code_follows_child() {
        let status = Command::new("sh").args(["-c", "exit 3"]).status().unwrap();
        assert_eq!(exit_code(status), 3);
    }
}
