// logging.rs - Logger setup for binaries

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Writes every record to stderr and to the run log file.
struct TeeWriter {
    file: Arc<Mutex<File>>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Ok(mut file) = self.file.lock() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Ok(mut file) = self.file.lock() {
            file.flush()?;
        }
        Ok(())
    }
}

fn builder() -> env_logger::Builder {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder
}

/// Initialise stderr logging (`RUST_LOG` overrides the `info` default).
pub fn init() {
    let _ = builder().try_init();
}

/// Initialise logging that also lands in `<log_dir>/nomenclature_log_<timestamp>.txt`.
///
/// Returns the path of the run log.
pub fn init_with_run_log(log_dir: &Path) -> Result<PathBuf, String> {
    fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log directory '{}': {}", log_dir.display(), e))?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = log_dir.join(format!("nomenclature_log_{}.txt", stamp));
    let file = File::create(&path)
        .map_err(|e| format!("Failed to create log file '{}': {}", path.display(), e))?;

    let tee = TeeWriter {
        file: Arc::new(Mutex::new(file)),
    };
    let _ = builder()
        .target(env_logger::Target::Pipe(Box::new(tee)))
        .try_init();
    Ok(path)
}
