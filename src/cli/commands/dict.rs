use std::path::Path;

use anyhow::{Result, bail};
use serde_json::Map;

use kvtree::{Children, Config, Dictionary};

use super::util::{open_root, resolve_dictionary, split_path};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ListFilter {
    All,
    Items,
    Dictionaries,
}

impl ListFilter {
    pub(crate) fn from_flags(items: bool, dicts: bool) -> Self {
        match (items, dicts) {
            (true, false) => ListFilter::Items,
            (false, true) => ListFilter::Dictionaries,
            _ => ListFilter::All,
        }
    }
}

pub(crate) fn cmd_mkdir(store: &Path, config: &Config, path: &str) -> Result<()> {
    let segments = split_path(path);
    if segments.is_empty() {
        bail!("specify at least one dictionary name");
    }
    let mut current = open_root(store, config)?;
    for (depth, segment) in segments.iter().enumerate() {
        current = current.create_child_dictionary(segment)?;
        println!("{} -> {}", segments[..=depth].join("/"), current.id());
    }
    Ok(())
}

pub(crate) fn cmd_rmdir(store: &Path, config: &Config, path: &str) -> Result<()> {
    let mut segments = split_path(path);
    let Some(name) = segments.pop() else {
        bail!("the root dictionary cannot be removed");
    };
    let root = open_root(store, config)?;
    let parent = resolve_dictionary(&root, &segments)?;
    match parent.remove_child_dictionary_with_stats(name)? {
        Some(stats) => println!(
            "removed `{path}`: {} dictionaries, {} entries in {} batches",
            stats.dictionaries, stats.entries, stats.batches
        ),
        None => bail!("dictionary `{path}` not found"),
    }
    Ok(())
}

pub(crate) fn cmd_ls(
    store: &Path,
    config: &Config,
    path: Option<&str>,
    filter: ListFilter,
    from: Option<&str>,
) -> Result<()> {
    let root = open_root(store, config)?;
    let dict = resolve_dictionary(&root, &split_path(path.unwrap_or("")))?;
    let mut printed = 0usize;

    if filter != ListFilter::Items {
        let mut children = dict.dictionaries()?;
        if let Some(from) = from {
            children.seek(from)?;
        }
        for entry in children {
            let (name, child) = entry?;
            println!("{name}/ -> {}", child.id());
            printed += 1;
        }
    }
    if filter != ListFilter::Dictionaries {
        let mut items = dict.items()?;
        if let Some(from) = from {
            items.seek(from)?;
        }
        for entry in items {
            let (name, value) = entry?;
            println!("{name} = {value}");
            printed += 1;
        }
    }

    if printed == 0 {
        println!("no entries");
    }
    Ok(())
}

pub(crate) fn cmd_dump(store: &Path, config: &Config, path: Option<&str>) -> Result<()> {
    let root = open_root(store, config)?;
    let dict = resolve_dictionary(&root, &split_path(path.unwrap_or("")))?;
    let json = dump_json(&dict)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Child dictionaries appear under `name/` so they never clash with an item
/// of the same name. Walks with an explicit stack so deep trees cannot
/// exhaust the call stack.
pub(crate) fn dump_json(dict: &Dictionary) -> Result<serde_json::Value> {
    let mut stack = vec![DumpFrame::open(None, dict)?];
    loop {
        let Some(frame) = stack.last_mut() else {
            bail!("dump stack emptied before the root was finished");
        };
        if let Some(entry) = frame.children.next() {
            let (name, child) = entry?;
            let next = DumpFrame::open(Some(format!("{name}/")), &child)?;
            stack.push(next);
            continue;
        }
        let Some(done) = stack.pop() else {
            continue;
        };
        let value = serde_json::Value::Object(done.entries);
        match (stack.last_mut(), done.key) {
            (Some(parent), Some(key)) => {
                parent.entries.insert(key, value);
            }
            _ => return Ok(value),
        }
    }
}

struct DumpFrame {
    key: Option<String>,
    entries: Map<String, serde_json::Value>,
    children: Children,
}

impl DumpFrame {
    fn open(key: Option<String>, dict: &Dictionary) -> Result<Self> {
        let mut entries = Map::new();
        for entry in dict.items()? {
            let (name, value) = entry?;
            entries.insert(name, serde_json::to_value(&value)?);
        }
        Ok(Self {
            key,
            entries,
            children: dict.dictionaries()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use kvtree::{ManagerConfig, MemStore, Namespace, Value};

    #[test]
    fn flags_pick_a_filter() {
        assert_eq!(ListFilter::from_flags(false, false), ListFilter::All);
        assert_eq!(ListFilter::from_flags(true, false), ListFilter::Items);
        assert_eq!(ListFilter::from_flags(false, true), ListFilter::Dictionaries);
    }

    #[test]
    fn dump_nests_dictionaries() -> Result<()> {
        let root = Namespace::open_store(Arc::new(MemStore::new()), ManagerConfig::default())?
            .into_dictionary()
            .expect("root handle");
        let a = root.create_child_dictionary("a")?;
        a.put_item("x", "1")?;
        a.create_child_dictionary("b")?.put_item("n", 2)?;
        root.put_item("a", Value::Null)?;

        let json = dump_json(&root)?;
        assert_eq!(
            json,
            serde_json::json!({
                "a/": { "b/": { "n": 2 }, "x": "1" },
                "a": null,
            })
        );
        Ok(())
    }

    #[test]
    fn dump_handles_deep_chains() -> Result<()> {
        let root = Namespace::open_store(Arc::new(MemStore::new()), ManagerConfig::default())?
            .into_dictionary()
            .expect("root handle");
        let depth = 3_000;
        let mut current = root.clone();
        for _ in 0..depth {
            current = current.create_child_dictionary("n")?;
        }
        current.put_item("leaf", true)?;

        // unwrapped one level at a time; dropping the whole tree would recurse
        let mut level = dump_json(&root)?;
        for _ in 0..depth {
            let serde_json::Value::Object(mut map) = level else {
                panic!("expected a nested dictionary object");
            };
            assert_eq!(map.len(), 1);
            level = map.remove("n/").expect("nested dictionary");
        }
        assert_eq!(level, serde_json::json!({ "leaf": true }));
        Ok(())
    }
}
