// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Lookup order: `./todobot.toml` > `~/.config/todobot/todobot.toml` >
//! `/etc/todobot/todobot.toml`, with `TODOBOT_*` environment overrides on top.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::TodobotConfig;

/// Name of the config file searched for in each directory.
pub const CONFIG_FILE_NAME: &str = "todobot.toml";

/// Config sections whose env vars are mapped `TODOBOT_<SECTION>_<KEY>` to
/// `<section>.<key>`.
const SECTIONS: &[&str] = &["service", "telegram", "openrouter", "sheets", "storage", "queue"];

/// Candidate config files, lowest precedence first.
pub fn config_file_candidates() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/todobot").join(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("todobot").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from(CONFIG_FILE_NAME));
    paths
}

/// Load configuration from the standard hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/todobot/todobot.toml`
/// 3. `~/.config/todobot/todobot.toml`
/// 4. `./todobot.toml`
/// 5. `TODOBOT_*` environment variables
pub fn load_config() -> Result<TodobotConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no file lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<TodobotConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(TodobotConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from one explicit file with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<TodobotConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(TodobotConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The Figment used by [`load_config`], before extraction.
pub fn build_figment() -> Figment {
    config_file_candidates()
        .into_iter()
        .fold(
            Figment::new().merge(Serialized::defaults(TodobotConfig::default())),
            |figment, path| figment.merge(Toml::file(path)),
        )
        .merge(env_provider())
}

/// Maps `TODOBOT_QUEUE_MAX_BATCH_SIZE` to `queue.max_batch_size`.
///
/// Only the first underscore after a known section name becomes a dot, so
/// keys that contain underscores survive intact.
fn env_provider() -> Env {
    Env::prefixed("TODOBOT_").map(|key| {
        let key_str = key.as_str().to_ascii_lowercase();
        SECTIONS
            .iter()
            .find_map(|section| {
                key_str
                    .strip_prefix(*section)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|rest| format!("{section}.{rest}"))
            })
            .unwrap_or(key_str)
            .into()
    })
}
