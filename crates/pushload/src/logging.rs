//! Log setup.
//!
//! Global subscriber installation happens at most once per process,
//! whichever binary or test reaches it first.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock};

use tracing_subscriber::fmt::time::uptime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::CommonArgs;

static INIT: OnceLock<()> = OnceLock::new();
static LOG_BUFFER: OnceLock<Arc<Mutex<Vec<u8>>>> = OnceLock::new();

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Standard fmt layer output.
    Default,
    /// Compact, uptime-stamped, target-free lines.
    Human,
    /// One JSON object per line.
    Json,
}

/// Install the global subscriber per the CLI options. A second call is a
/// no-op.
pub fn init(args: &CommonArgs) -> anyhow::Result<()> {
    if INIT.set(()).is_err() {
        return Ok(());
    }
    let output = args.log_output.as_str();
    if output.eq_ignore_ascii_case("none") {
        return Ok(());
    }

    let filter = EnvFilter::try_new(&args.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match output {
        "stdout" => install(filter, args.log_format, io::stdout),
        "buffer" => {
            let buffer = LOG_BUFFER
                .get_or_init(|| Arc::new(Mutex::new(Vec::new())))
                .clone();
            install(filter, args.log_format, move || BufferWriter(buffer.clone()))
        }
        path => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("cannot open log file {path}: {e}"))?;
            install(filter, args.log_format, Mutex::new(file))
        }
    }
}

/// Captured log lines when `--log_output buffer` is active.
pub fn buffer_contents() -> Option<String> {
    let buffer = LOG_BUFFER.get()?;
    let bytes = buffer.lock().ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn install<W>(filter: EnvFilter, format: LogFormat, writer: W) -> anyhow::Result<()>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    let result = match format {
        LogFormat::Default => builder.try_init(),
        LogFormat::Human => builder.compact().with_timer(uptime()).with_target(false).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("logging setup failed: {e}"))
}

struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut bytes) = self.0.lock() {
            bytes.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
