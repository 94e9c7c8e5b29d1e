//! Device-relative path mangling.
//!
//! The catalog stores paths the way the device library does: colon-
//! separated, rooted at the mount point (e.g.
//! `:iPod_Control:Music:F00:song.mp3`). Everything that touches the
//! filesystem has to demangle back to a real path under the device
//! root, and everything that writes a new entry has to mangle the other
//! way; a symmetric mangler is required so copying in and verifying
//! later agree on the same on-disk location.

use std::path::{Path, PathBuf};

/// Turn a path relative to the device root into its mangled,
/// colon-separated on-device form, e.g. `Music/F00/song.mp3` ->
/// `:Music:F00:song.mp3`.
pub fn mangle(relative: &Path) -> String {
    let slash_form = relative.to_string_lossy().replace('\\', "/");
    let mangled = slash_form.replace('/', ":");
    if mangled.starts_with(':') {
        mangled
    } else {
        format!(":{mangled}")
    }
}

/// Resolve a catalog track's mangled `ipod_path` to an absolute
/// filesystem path under `device_root`.
pub fn resolve(device_root: &Path, ipod_path: &str) -> PathBuf {
    let relative = ipod_path.trim_start_matches(':').replace(':', "/");
    device_root.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangle_then_resolve_round_trips() {
        let relative = Path::new("iPod_Control/Music/F00/song.mp3");
        let mangled = mangle(relative);
        assert_eq!(mangled, ":iPod_Control:Music:F00:song.mp3");

        let resolved = resolve(Path::new("/mnt/ipod"), &mangled);
        assert_eq!(resolved, PathBuf::from("/mnt/ipod/iPod_Control/Music/F00/song.mp3"));
    }

    #[test]
    fn mangle_normalizes_backslashes() {
        let relative = Path::new("iPod_Control\\Music\\F00\\song.mp3");
        assert_eq!(mangle(relative), ":iPod_Control:Music:F00:song.mp3");
    }
}
