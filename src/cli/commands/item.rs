use std::path::Path;

use anyhow::{Result, anyhow};

use kvtree::Config;

use super::util::{open_root, parse_cli_value, parse_json_value, resolve_dictionary, split_item_path};

pub(crate) fn cmd_put(store: &Path, config: &Config, path: &str, value: &str, json: bool) -> Result<()> {
    let (dirs, name) = split_item_path(path)?;
    let value = if json {
        parse_json_value(value)?
    } else {
        parse_cli_value(value)
    };
    let root = open_root(store, config)?;
    let dict = resolve_dictionary(&root, &dirs)?;
    dict.put_item(name, value)?;
    println!("stored item `{path}`");
    Ok(())
}

pub(crate) fn cmd_get(store: &Path, config: &Config, path: &str) -> Result<()> {
    let (dirs, name) = split_item_path(path)?;
    let root = open_root(store, config)?;
    let dict = resolve_dictionary(&root, &dirs)?;
    let value = dict
        .get_item(name)?
        .ok_or_else(|| anyhow!("item `{path}` not found"))?;
    println!("{value}");
    Ok(())
}

pub(crate) fn cmd_rm(store: &Path, config: &Config, path: &str) -> Result<()> {
    let (dirs, name) = split_item_path(path)?;
    let root = open_root(store, config)?;
    let dict = resolve_dictionary(&root, &dirs)?;
    if dict.get_item(name)?.is_none() {
        println!("item `{path}` not present");
        return Ok(());
    }
    dict.remove_item(name)?;
    println!("removed item `{path}`");
    Ok(())
}
