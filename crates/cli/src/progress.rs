//! Cargo-style progress output for modsync
//!
//! Displays progress in the familiar cargo format:
//! ```text
//!    Scanning mods, config under /home/steve/.minecraft
//!   Uploading 214 files (312.40 MiB)...
//!    Finished 3 files with size 1.20 MiB uploaded for code aB3x-Q9rT. (1.42s)
//! ```

use std::io::Write as _;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::fmt::MakeWriter;

/// Every bar is drawn through this so log lines can suspend it
static BARS: LazyLock<MultiProgress> = LazyLock::new(MultiProgress::new);

/// Status verbs for cargo-style output (right-aligned to 12 chars)
pub struct Status;

impl Status {
    pub const SCANNING: &'static str = "Scanning";
    pub const UPLOADING: &'static str = "Uploading";
    pub const FINISHED: &'static str = "Finished";
    pub const UNCHANGED: &'static str = "Unchanged";
    pub const CREATED: &'static str = "Created";
    pub const DOWNLOADED: &'static str = "Downloaded";
    pub const VERIFIED: &'static str = "Verified";
}

/// Print a cargo-style status line
pub fn print_status(status: &str, message: &str) {
    print_styled(console::Style::new().green().bold(), status, message);
}

/// Print a status line in warning colors
pub fn print_warning(status: &str, message: &str) {
    print_styled(console::Style::new().yellow().bold(), status, message);
}

fn print_styled(style: console::Style, status: &str, message: &str) {
    BARS.suspend(|| {
        let mut term = console::Term::stderr();
        let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
    });
}

/// Format an elapsed duration the way cargo does
fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() >= 1 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}

/// Progress tracker for one upload
pub struct UploadProgress {
    start: Instant,
}

impl UploadProgress {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Spinner shown while the engine ingests (it reports no progress)
    pub fn upload_spinner(&self, files: usize, total_bytes: u64) -> ProgressBar {
        let pb = BARS.add(ProgressBar::new_spinner());
        let size_str = humansize::format_size(total_bytes, humansize::BINARY);
        let template = "{spinner:.green} {msg:>12} {prefix}";
        if let Ok(style) = ProgressStyle::default_spinner().template(template) {
            pb.set_style(style);
        }
        pb.set_message(Status::UPLOADING);
        pb.set_prefix(format!("{files} files ({size_str})..."));
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    /// Show final summary
    pub fn finish(&self, files_changed: u64, message: &str) {
        let (status, line) = summary_line(files_changed, message, self.start.elapsed());
        print_status(status, &line);
    }
}

/// Status verb and text of the final upload line
fn summary_line(files_changed: u64, message: &str, elapsed: Duration) -> (&'static str, String) {
    let elapsed_str = format_elapsed(elapsed);
    if files_changed == 0 {
        (
            Status::UNCHANGED,
            format!("every file already stored, archive kept ({elapsed_str})"),
        )
    } else {
        (Status::FINISHED, format!("{message} ({elapsed_str})"))
    }
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Console log writer that clears active bars before writing
#[derive(Debug, Clone, Copy)]
pub struct ProgressWriter;

impl std::io::Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        BARS.suspend(|| std::io::stderr().write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}
