//! One-time, process-wide media framework setup.
//!
//! Search paths must be in the environment before the framework initialises,
//! so this runs exactly once and before the first graph is built.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Once;

static MEDIA_INIT: Once = Once::new();

/// Point the media framework at a private plugin directory (if any) and
/// initialise it. Later calls are no-ops, whatever their argument.
pub fn init_media_framework(plugin_dir: Option<&Path>) {
    MEDIA_INIT.call_once(|| {
        if let Some(dir) = plugin_dir {
            apply_plugin_env(dir);
        }
        init_backend();
    });
}

fn apply_plugin_env(plugin_dir: &Path) {
    if !plugin_dir.is_dir() {
        log::warn!(
            "plugin directory {} does not exist, using system plugins",
            plugin_dir.display()
        );
        return;
    }
    let bin_dir = plugin_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| plugin_dir.to_path_buf());

    env::set_var("GST_PLUGIN_PATH", plugin_dir);
    env::set_var("GST_PLUGIN_SYSTEM_PATH", plugin_dir);

    let scanner = bin_dir.join("gst-plugin-scanner");
    if scanner.exists() {
        env::set_var("GST_PLUGIN_SCANNER", &scanner);
    }

    match prepend_path(&bin_dir) {
        Ok(path) => env::set_var("PATH", path),
        Err(e) => log::warn!("failed to extend PATH with {}: {}", bin_dir.display(), e),
    }
    log::info!("media plugins from {}", plugin_dir.display());
}

fn prepend_path(dir: &Path) -> Result<std::ffi::OsString, env::JoinPathsError> {
    let mut paths: Vec<PathBuf> = vec![dir.to_path_buf()];
    if let Some(existing) = env::var_os("PATH") {
        paths.extend(env::split_paths(&existing));
    }
    env::join_paths(paths)
}

#[cfg(feature = "rtsp-gstreamer")]
fn init_backend() {
    match gstreamer::init() {
        Ok(()) => {
            let (major, minor, micro, _) = gstreamer::version();
            log::info!("GStreamer {major}.{minor}.{micro} initialized");
        }
        Err(e) => log::error!("failed to initialize GStreamer: {e}"),
    }
}

#[cfg(not(feature = "rtsp-gstreamer"))]
fn init_backend() {
    log::debug!("built without rtsp-gstreamer; only stub:// streams are available");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_puts_dir_first() {
        let joined = prepend_path(Path::new("/opt/media/bin")).unwrap();
        let first = env::split_paths(&joined).next().unwrap();
        assert_eq!(first, PathBuf::from("/opt/media/bin"));
    }
}
