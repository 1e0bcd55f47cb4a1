use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::OffsetDateTime;

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl AsRef<Path>, market: &str) -> std::io::Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            path: dir.as_ref().join(format!("{market}_Server.log")),
        })
    }

    //An operation never fails because its audit line could not be written
    pub fn record(&self, operation: &str, params: &str, success: bool) {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let timestamp = OffsetDateTime::now_utc()
            .format(&format)
            .unwrap_or_default();
        let status = if success {
            "Successfully Completed"
        } else {
            "Failed"
        };
        let line = format!("[{timestamp}] {operation} | Params: {params} | Status: {status}\n");
        let written = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(err) = written {
            log::warn!("audit write to {} failed: {err}", self.path.display());
        }
    }
}
