use std::path::PathBuf;

use crate::db::DB_FILENAME;
use crate::error::{PercError, Result};
use crate::settings::{load_settings, save_settings, shellexpand_path};

pub fn run(path: &str) -> Result<()> {
    let resolved = PathBuf::from(shellexpand_path(path));
    let db_path = resolved.join(DB_FILENAME);

    if !db_path.exists() {
        return Err(PercError::Settings(format!(
            "No database found at {}\nRun `perc init --data-dir {}` to create one.",
            db_path.display(),
            resolved.display()
        )));
    }

    let mut settings = load_settings();
    settings.data_dir = resolved.to_string_lossy().to_string();
    // a session belongs to the database it was opened on
    settings.session_token = None;
    save_settings(&settings)?;

    println!("Switched to {}", resolved.display());
    Ok(())
}
