use anyhow::Result;

use kvtree::{Config, SqliteStore, derive_db_path};

pub(crate) fn cmd_new(name: &str, config: &Config) -> Result<()> {
    let path = derive_db_path(name);
    let store = SqliteStore::create(&path, &config.store)?;
    drop(store);
    println!("created kvtree database at {}", path.display());
    Ok(())
}
