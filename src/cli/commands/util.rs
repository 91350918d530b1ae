use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use tracing_subscriber::EnvFilter;

use kvtree::{Config, Dictionary, DictionaryManager, SqliteStore, Value};

pub(crate) fn require_store_path(path: Option<&Path>) -> Result<&Path> {
    match path {
        Some(p) => Ok(p),
        None => bail!("specify --db PATH for this command"),
    }
}

/// `RUST_LOG` wins unless `-v` asks for debug output.
pub(crate) fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub(crate) fn load_config(path: Option<&Path>, batch_size: Option<usize>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(size) = batch_size {
        config.manager.remove_batch_size = size;
        config.manager.validate()?;
    }
    Ok(config)
}

pub(crate) fn open_root(store: &Path, config: &Config) -> Result<Dictionary> {
    let backend = SqliteStore::open(store, &config.store)
        .with_context(|| format!("opening {}", store.display()))?;
    let manager = DictionaryManager::open(Arc::new(backend), config.manager.clone())?;
    Ok(manager.root())
}

/// Dictionary names of a `/`-separated path; empty segments are ignored.
pub(crate) fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

/// Splits `PATH/NAME` into the dictionary path and the final name.
pub(crate) fn split_item_path(path: &str) -> Result<(Vec<&str>, &str)> {
    let mut segments = split_path(path);
    let name = segments
        .pop()
        .ok_or_else(|| anyhow!("expected PATH/NAME, got `{path}`"))?;
    Ok((segments, name))
}

pub(crate) fn resolve_dictionary(root: &Dictionary, segments: &[&str]) -> Result<Dictionary> {
    let mut current = root.clone();
    for (depth, segment) in segments.iter().enumerate() {
        current = current.get_child_dictionary(segment)?.ok_or_else(|| {
            anyhow!("dictionary `{}` not found", segments[..=depth].join("/"))
        })?;
    }
    Ok(current)
}

pub(crate) fn parse_cli_value(token: &str) -> Value {
    if token == "~" || token.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(b) = token.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(i) = token.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = token.parse::<f64>() {
        return Value::Float(f);
    }
    Value::Text(token.to_string())
}

pub(crate) fn parse_json_value(token: &str) -> Result<Value> {
    let json: serde_json::Value =
        serde_json::from_str(token).with_context(|| format!("invalid JSON value `{token}`"))?;
    Ok(Value::from(json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvtree::{ManagerConfig, MemStore, Namespace};

    #[test]
    fn paths_split_on_slashes() {
        assert_eq!(split_path("/a//b/"), vec!["a", "b"]);
        assert!(split_path("").is_empty());
        let (dirs, name) = split_item_path("a/b/x").unwrap();
        assert_eq!(dirs, vec!["a", "b"]);
        assert_eq!(name, "x");
        assert!(split_item_path("/").is_err());
    }

    #[test]
    fn cli_values_are_typed() {
        assert_eq!(parse_cli_value("~"), Value::Null);
        assert_eq!(parse_cli_value("true"), Value::Bool(true));
        assert_eq!(parse_cli_value("-7"), Value::Int(-7));
        assert_eq!(parse_cli_value("1.5"), Value::Float(1.5));
        assert_eq!(parse_cli_value("hello"), Value::Text("hello".into()));
        assert_eq!(parse_json_value("[1, \"a\"]").unwrap(), Value::List(vec![Value::Int(1), Value::from("a")]));
        assert!(parse_json_value("{").is_err());
    }

    #[test]
    fn resolve_reports_missing_segment() {
        let root = Namespace::open_store(Arc::new(MemStore::new()), ManagerConfig::default())
            .unwrap()
            .into_dictionary()
            .unwrap();
        root.create_child_dictionary("a").unwrap();
        assert!(resolve_dictionary(&root, &["a"]).is_ok());
        let err = resolve_dictionary(&root, &["a", "b", "c"]).unwrap_err();
        assert_eq!(err.to_string(), "dictionary `a/b` not found");
    }

    #[test]
    fn batch_size_override_is_validated() {
        assert_eq!(load_config(None, Some(7)).unwrap().manager.remove_batch_size, 7);
        assert!(load_config(None, Some(0)).is_err());
    }
}
