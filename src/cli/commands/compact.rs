use std::path::Path;

use anyhow::Result;

use kvtree::Config;

use super::util::open_root;

pub(crate) fn cmd_compact(store: &Path, config: &Config) -> Result<()> {
    let root = open_root(store, config)?;
    if root.manager().store().compact()? {
        println!("compacted {}", store.display());
    } else {
        println!("nothing to compact");
    }
    Ok(())
}
