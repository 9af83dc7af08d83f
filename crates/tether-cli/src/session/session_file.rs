use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;

use tether::models::message::Message;
use tether::store::ThreadId;

pub fn ensure_session_dir() -> Result<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("could not determine home directory"))?;
    let session_dir = home_dir.join(".config").join("tether").join("sessions");

    if !session_dir.exists() {
        fs::create_dir_all(&session_dir)?;
    }

    Ok(session_dir)
}

/// Path of the jsonl recording for this session; unnamed sessions get a
/// fresh thread id.
pub fn session_file_path(name: Option<String>) -> Result<PathBuf> {
    let name = name.unwrap_or_else(|| ThreadId::new().to_string());
    Ok(ensure_session_dir()?.join(format!("{}.jsonl", name)))
}

/// Write the full message history, one JSON message per line. Called after
/// every append so the file always reflects the committed thread.
pub fn persist_messages(session_file: &Path, messages: &[Message]) -> Result<()> {
    let file = File::create(session_file)?;
    let mut writer = std::io::BufWriter::new(file);

    for message in messages {
        serde_json::to_writer(&mut writer, &message)?;
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}
