//! modsync: publish and sync game modpacks by short code
//!
//! Every command maps onto one engine operation:
//! - accounts and tokens (`user`)
//! - modpack creation and owner actions (`get-code`, `act`)
//! - incremental uploads that only store changed files (`upload`)
//! - public reads (`download`, `info`, `verify`)

mod debug_log;
mod progress;
mod upload;

use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, bail};
use tracing::{debug, error};

use modsync_core::{ErrorResponse, InfoFormat, ModpackAction, SyncEngine, SyncError};

use crate::progress::{Status, UploadProgress, print_status, print_warning};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "modsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Publish game modpacks under a short code and sync them incrementally")]
#[command(long_about = r#"
modsync stores modpacks (mods and config files) under short shareable codes.

Features:
  • Incremental  - files are content-hashed, unchanged ones are skipped
  • One download - every modpack is packaged as a single .tar.gz
  • Owner locks  - freeze a modpack while players download it

Examples:
  modsync user new steve hunter2              Register, prints a token
  modsync get-code <token> --name Skyblock    Create a modpack, prints its code
  modsync upload <code> <token> --root ~/.minecraft
  modsync download <code> pack.tar.gz
"#)]
struct Cli {
    /// Data directory holding users, modpacks and logs
    #[arg(long, env = "MODSYNC_DATA", default_value = "data", global = true)]
    data_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an account or check a password
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Create a new, empty modpack and print its code
    GetCode {
        /// Owner token
        token: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Lock, unlock or reset a modpack
    Act {
        code: String,

        /// Owner token
        token: String,

        /// lock, unlock or reset
        action: ModpackAction,
    },

    /// Upload changed files from a game directory
    Upload {
        code: String,

        /// Owner token
        token: String,

        /// Game directory the paths are relative to
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Files or directories to upload, each starting with mods/ or config/
        #[arg(default_values_t = upload::DEFAULT_PATHS.map(String::from))]
        paths: Vec<String>,
    },

    /// Save the packaged modpack archive
    Download {
        code: String,

        /// Output file, or - for stdout
        out: PathBuf,
    },

    /// Print the modpack info page
    Info {
        code: String,

        /// json or html
        #[arg(short, long, default_value_t = InfoFormat::Html)]
        format: InfoFormat,
    },

    /// Check that stored files still match the manifest
    Verify { code: String },
}

#[derive(Subcommand)]
enum UserAction {
    /// Register and print the new token
    New { nick: String, pswd: String },

    /// Check a password and print the token
    Check { nick: String, pswd: String },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.data_dir)
        .wrap_err_with(|| format!("creating {}", cli.data_dir.display()))?;
    let session = debug_log::init(&cli.data_dir, cli.verbose)?;
    debug!(log_dir = %session.log_dir.display(), "logging to file");

    match run(cli) {
        Ok(()) => Ok(()),
        Err(report) => {
            let Some(err) = report.downcast_ref::<SyncError>() else {
                return Err(report);
            };
            error!(error = %err, kind = err.kind(), "request failed");
            println!("{}", serde_json::to_string(&ErrorResponse::from(err))?);
            // exit() skips destructors; flush the file log first
            drop(session);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let engine = SyncEngine::open(&cli.data_dir)?;

    match cli.command {
        Commands::User { action } => {
            let token = match action {
                UserAction::New { nick, pswd } => engine.users().register(&nick, &pswd)?,
                UserAction::Check { nick, pswd } => engine.users().check(&nick, &pswd)?,
            };
            println!("{token}");
        }
        Commands::GetCode { token, name } => {
            let modpack = engine.create_modpack(&token, name)?;
            print_status(Status::CREATED, &format!("modpack {}", modpack.code));
            println!("{}", modpack.code);
        }
        Commands::Act {
            code,
            token,
            action,
        } => {
            println!("{}", engine.apply_action(&code, &token, action)?);
        }
        Commands::Upload {
            code,
            token,
            root,
            paths,
        } => {
            let paths: Vec<PathBuf> = paths.into_iter().map(PathBuf::from).collect();
            upload_command(&engine, &code, &token, &root, &paths)?;
        }
        Commands::Download { code, out } => {
            download_command(&engine, &code, &out)?;
        }
        Commands::Info { code, format } => {
            println!("{}", engine.render_info(&code, format)?);
        }
        Commands::Verify { code } => {
            verify_command(&engine, &code)?;
        }
    }

    Ok(())
}

fn upload_command(
    engine: &SyncEngine,
    code: &str,
    token: &str,
    root: &Path,
    paths: &[PathBuf],
) -> Result<()> {
    let progress = UploadProgress::new();
    let shown: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    print_status(
        Status::SCANNING,
        &format!("{} under {}", shown.join(", "), root.display()),
    );

    let batch = upload::collect(root, paths)?;
    if batch.files.is_empty() {
        bail!("nothing to upload under {}", root.display());
    }

    let spinner = progress.upload_spinner(batch.files.len(), batch.total_bytes);
    let result = engine.handle_upload(code, token, batch.files);
    spinner.finish_and_clear();

    let summary = result?;
    progress.finish(summary.files_changed, &summary.message(code));
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn download_command(engine: &SyncEngine, code: &str, out: &Path) -> Result<()> {
    let mut archive = engine.open_archive(code)?;

    let bytes = if out == Path::new("-") {
        let mut stdout = std::io::stdout().lock();
        let bytes = std::io::copy(&mut archive, &mut stdout)?;
        stdout.flush()?;
        bytes
    } else {
        let mut file =
            File::create(out).wrap_err_with(|| format!("creating {}", out.display()))?;
        let bytes = std::io::copy(&mut archive, &mut file)?;
        file.sync_all()?;
        bytes
    };

    print_status(
        Status::DOWNLOADED,
        &format!(
            "{} to {}",
            humansize::format_size(bytes, humansize::BINARY),
            out.display()
        ),
    );
    Ok(())
}

fn verify_command(engine: &SyncEngine, code: &str) -> Result<()> {
    let diff = engine.verify(code)?;
    if diff.is_empty() {
        print_status(Status::VERIFIED, &format!("{code} matches its manifest"));
        return Ok(());
    }

    for (label, paths) in [
        ("Untracked", &diff.added),
        ("Missing", &diff.removed),
        ("Modified", &diff.modified),
    ] {
        for path in paths {
            print_warning(label, path);
        }
    }
    println!("{}", serde_json::to_string_pretty(&diff)?);
    bail!("{} files out of sync in {code}", diff.len())
}
