use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Instant;

/// Upper bound on how much of the log tail a report carries.
const LOG_TAIL_BYTES: u64 = 64 * 1024;

/// Collect a diagnostic report: version, uptime, and the tail of the
/// server log. Never fails; missing pieces are noted inline.
pub fn collect_report(started: Instant, log_file: Option<&Path>) -> String {
    let mut report = String::new();
    report.push_str(&format!("pyty {}\n", env!("CARGO_PKG_VERSION")));
    report.push_str(&format!("generated: {}\n", jiff::Timestamp::now()));
    report.push_str(&format!("uptime: {:?}\n", started.elapsed()));
    match log_file {
        Some(path) => {
            report.push_str(&format!("log: {}\n\n", path.display()));
            match log_tail(path) {
                Ok(tail) => report.push_str(&tail),
                Err(e) => report.push_str(&format!("(could not read log: {e})\n")),
            }
        }
        None => report.push_str("log: none configured\n"),
    }
    report
}

fn log_tail(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    if len > LOG_TAIL_BYTES {
        file.seek(SeekFrom::End(-(LOG_TAIL_BYTES as i64)))?;
    }
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
