use std::path::PathBuf;

use crate::db::{get_connection, init_db, DB_FILENAME};
use crate::error::Result;
use crate::settings::{load_settings, save_settings, shellexpand_path};

pub fn run(data_dir: Option<String>, json: bool) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }

    let resolved = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&resolved)?;
    std::fs::create_dir_all(resolved.join("imports"))?;
    std::fs::create_dir_all(resolved.join("backups"))?;

    let db_path = resolved.join(DB_FILENAME);
    let conn = get_connection(&db_path)?;
    init_db(&conn)?;
    save_settings(&settings)?;
    log::info!("database ready at {}", db_path.display());

    if json {
        return super::print_json(&serde_json::json!({ "data_dir": settings.data_dir }));
    }
    println!("Initialized perc at {}", resolved.display());
    println!("Next: `perc admin add <username>` to create the first administrator.");
    Ok(())
}
