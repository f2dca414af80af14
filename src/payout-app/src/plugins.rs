// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Loading of transport backend plugins.
//!
//! A plugin is a shared object exporting
//! `extern "C" fn payout_register_backend(context: *mut c_void)`. The
//! context points at the daemon's backend registry.

use std::ffi::{c_void, OsStr};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libloading::{Library, Symbol};
use tracing::{debug, info, warn};

const PLUGIN_ENV: &str = "PAYOUTD_PLUGIN_DIRS";
const BACKEND_ENTRYPOINT: &[u8] = b"payout_register_backend";

#[cfg(windows)]
const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_SEPARATOR: char = ':';

#[cfg(windows)]
const PLUGIN_EXTENSIONS: &[&str] = &["dll"];
#[cfg(target_os = "macos")]
const PLUGIN_EXTENSIONS: &[&str] = &["dylib"];
#[cfg(all(unix, not(target_os = "macos")))]
const PLUGIN_EXTENSIONS: &[&str] = &["so"];

/// Scan the plugin directories and hand `context` to every plugin found.
///
/// The returned libraries must outlive any transport a plugin registered.
pub fn load_backend_plugins(context: NonNull<c_void>) -> Vec<Library> {
    let mut libraries = Vec::new();
    for dir in plugin_dirs(std::env::var(PLUGIN_ENV).ok().as_deref()) {
        if !dir.is_dir() {
            continue;
        }
        debug!("Scanning {:?} for plugins", dir);
        if let Err(err) = load_from_dir(&dir, context, &mut libraries) {
            warn!("Plugin scan failed for {:?}: {}", dir, err);
        }
    }
    libraries
}

fn load_from_dir(
    dir: &Path,
    context: NonNull<c_void>,
    libraries: &mut Vec<Library>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !is_plugin_file(&path) {
            continue;
        }
        // SAFETY: plugins are trusted code placed in the plugin directories
        // by the operator; the entrypoint only receives the registry pointer.
        match unsafe { Library::new(&path) } {
            Ok(lib) => match unsafe { register(&lib, context) } {
                Ok(()) => {
                    info!("Loaded plugin {:?}", path);
                    libraries.push(lib);
                }
                Err(err) => warn!("Plugin {:?} failed to register: {}", path, err),
            },
            Err(err) => warn!("Failed to load plugin {:?}: {}", path, err),
        }
    }
    Ok(())
}

unsafe fn register(lib: &Library, context: NonNull<c_void>) -> Result<(), libloading::Error> {
    let entry: Symbol<unsafe extern "C" fn(*mut c_void)> = lib.get(BACKEND_ENTRYPOINT)?;
    entry(context.as_ptr());
    Ok(())
}

/// Directories from the environment value, then `./plugins`, then the
/// per-user config directory.
fn plugin_dirs(env_value: Option<&str>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = env_value
        .unwrap_or_default()
        .split(PATH_SEPARATOR)
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
        .collect();
    paths.push(PathBuf::from("plugins"));
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("payoutd").join("plugins"));
    }
    paths
}

fn is_plugin_file(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| PLUGIN_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}
