mod compact;
mod dict;
mod item;
mod new;
mod util;

pub(crate) use compact::cmd_compact;
pub(crate) use dict::{ListFilter, cmd_dump, cmd_ls, cmd_mkdir, cmd_rmdir};
pub(crate) use item::{cmd_get, cmd_put, cmd_rm};
pub(crate) use new::cmd_new;

pub(crate) use util::{init_tracing, load_config, require_store_path};
