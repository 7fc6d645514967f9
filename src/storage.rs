//! On-disk bundle store.
//!
//! Layout, one directory per device under a base directory:
//!
//! ```text
//! <base>/<device>/certificate.pem
//! <base>/<device>/private.key
//! <base>/<device>/public.key
//! <base>/<device>/metadata.json
//! <base>/<device>/thing_name.txt
//! ```
//!
//! Writes are staged in a hidden sibling directory and renamed into place, so
//! a reader sees the previous complete bundle, no bundle, or the new complete
//! bundle. `load` still checks every file and cross-checks them against
//! `metadata.json` before trusting anything.

use crate::{
    bundle::{BundleDocument, CredentialBundle},
    error::StoreError,
};

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const CERTIFICATE_FILE: &str = "certificate.pem";
pub const PRIVATE_KEY_FILE: &str = "private.key";
pub const PUBLIC_KEY_FILE:  &str = "public.key";
pub const METADATA_FILE:    &str = "metadata.json";
pub const MARKER_FILE:      &str = "thing_name.txt";

pub const BUNDLE_FILES: [&str; 5] = [
    CERTIFICATE_FILE,
    PRIVATE_KEY_FILE,
    PUBLIC_KEY_FILE,
    METADATA_FILE,
    MARKER_FILE,
];

/// A device name doubles as a directory name, so it has to be exactly one
/// plain path component. Leading dots are reserved for staging directories.
pub fn validate_device_name(name: &str) -> Result<(), StoreError> {
    let bad = name.trim().is_empty()
        || name != name.trim()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidDeviceName(name.to_owned()));
    }
    Ok(())
}

pub fn device_dir(base_dir: &Path, device_name: &str) -> PathBuf {
    base_dir.join(device_name)
}

pub fn exists(base_dir: &Path, device_name: &str) -> bool {
    device_dir(base_dir, device_name).is_dir()
}

/// Writes `bundle` under `base_dir/device_name`, replacing whatever was there.
pub fn persist(
    base_dir: &Path,
    device_name: &str,
    bundle: &CredentialBundle,
) -> Result<PathBuf, StoreError> {
    validate_device_name(device_name)?;
    if bundle.device_name != device_name {
        return Err(StoreError::InvalidDeviceName(format!(
            "{device_name} (bundle belongs to {})",
            bundle.device_name
        )));
    }
    let io_err = |source: io::Error| StoreError::Io {
        device: device_name.to_owned(),
        source,
    };

    fs::create_dir_all(base_dir).map_err(io_err)?;

    let target = device_dir(base_dir, device_name);
    let staging = base_dir.join(format!(".{device_name}.staging-{}", Uuid::new_v4().simple()));
    fs::create_dir(&staging).map_err(io_err)?;

    let result = write_bundle_files(&staging, bundle)
        .and_then(|()| swap_into_place(base_dir, &staging, &target, device_name));

    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(device = device_name, error = %cleanup, "could not remove staging dir");
            }
        }
        return Err(io_err(e));
    }

    info!(device = device_name, path = %target.display(), "bundle persisted");
    Ok(target)
}

fn write_bundle_files(dir: &Path, bundle: &CredentialBundle) -> io::Result<()> {
    let metadata = serde_json::to_string_pretty(&bundle.to_document())
        .map_err(io::Error::other)?;

    write_file(dir, CERTIFICATE_FILE, bundle.certificate_pem.as_bytes(), 0o644)?;
    write_file(dir, PRIVATE_KEY_FILE, bundle.private_key.expose().as_bytes(), 0o600)?;
    write_file(dir, PUBLIC_KEY_FILE,  bundle.public_key.as_bytes(), 0o644)?;
    write_file(dir, MARKER_FILE,      bundle.device_name.as_bytes(), 0o644)?;
    // metadata goes last; it carries the private key too
    write_file(dir, METADATA_FILE,    metadata.as_bytes(), 0o600)?;

    sync_dir(dir)
}

fn write_file(dir: &Path, name: &str, contents: &[u8], mode: u32) -> io::Result<()> {
    let path = dir.join(name);
    let mut file = File::create_new(&path)?;
    set_permissions(&path, mode)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn swap_into_place(
    base_dir: &Path,
    staging: &Path,
    target: &Path,
    device_name: &str,
) -> io::Result<()> {
    let retired = if target.exists() {
        let retired = base_dir.join(format!(".{device_name}.retired-{}", Uuid::new_v4().simple()));
        fs::rename(target, &retired)?;
        debug!(device = device_name, "previous bundle moved aside");
        Some(retired)
    } else {
        None
    };

    if let Err(e) = fs::rename(staging, target) {
        if let Some(retired) = &retired {
            // put the old bundle back rather than leave nothing behind
            if let Err(restore) = fs::rename(retired, target) {
                error!(
                    device = device_name,
                    retired = %retired.display(),
                    error = %restore,
                    "could not restore previous bundle"
                );
            }
        }
        return Err(e);
    }
    sync_dir(base_dir)?;

    if let Some(retired) = retired {
        if let Err(e) = fs::remove_dir_all(&retired) {
            warn!(device = device_name, error = %e, "could not remove replaced bundle");
        }
    }
    sweep_stale(base_dir, device_name);
    Ok(())
}

/// Removes staging and retired directories an earlier crashed write left
/// behind for `device_name`. Only called once a complete bundle is in place.
fn sweep_stale(base_dir: &Path, device_name: &str) {
    let staging = format!(".{device_name}.staging-");
    let retired = format!(".{device_name}.retired-");

    let entries = match fs::read_dir(base_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(device = device_name, error = %e, "could not scan for stale bundle dirs");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&staging) && !name.starts_with(&retired) {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => debug!(device = device_name, dir = name, "removed stale bundle dir"),
            Err(e) => warn!(device = device_name, dir = name, error = %e, "could not remove stale bundle dir"),
        }
    }
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Reads and verifies the bundle of `device_name`. Nothing is defaulted: a
/// missing file is `BundleNotFound`, any inconsistency is `BundleCorrupt`.
pub fn load(base_dir: &Path, device_name: &str) -> Result<CredentialBundle, StoreError> {
    validate_device_name(device_name)?;
    let dir = device_dir(base_dir, device_name);
    let not_found = |reason: String| StoreError::BundleNotFound {
        device: device_name.to_owned(),
        reason,
    };
    let corrupt = |reason: String| StoreError::BundleCorrupt {
        device: device_name.to_owned(),
        reason,
    };

    if !dir.is_dir() {
        return Err(not_found(format!("no directory at `{}`", dir.display())));
    }

    // check presence of everything before parsing anything
    if let Some(missing) = BUNDLE_FILES.iter().find(|f| !dir.join(f).is_file()) {
        return Err(not_found(format!("`{missing}` is missing")));
    }

    let read = |name: &str| -> Result<String, StoreError> {
        fs::read_to_string(dir.join(name)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound    => not_found(format!("`{name}` is missing")),
            io::ErrorKind::InvalidData => corrupt(format!("`{name}` is not UTF-8")),
            _ => StoreError::Io { device: device_name.to_owned(), source: e },
        })
    };

    let marker = read(MARKER_FILE)?;
    if marker != device_name {
        return Err(corrupt(format!("`{MARKER_FILE}` names `{marker}`")));
    }

    let doc: BundleDocument = serde_json::from_str(&read(METADATA_FILE)?)
        .map_err(|e| corrupt(format!("`{METADATA_FILE}`: {e}")))?;
    if let Some(thing) = doc.thing_name.as_deref() {
        if thing != device_name {
            return Err(corrupt(format!("`{METADATA_FILE}` names `{thing}`")));
        }
    }
    let bundle = CredentialBundle::from_document(doc, device_name)
        .map_err(|e| corrupt(format!("`{METADATA_FILE}`: {e}")))?;

    let siblings = [
        (CERTIFICATE_FILE, bundle.certificate_pem.as_str()),
        (PRIVATE_KEY_FILE, bundle.private_key.expose()),
        (PUBLIC_KEY_FILE,  bundle.public_key.as_str()),
    ];
    for (name, expected) in siblings {
        if read(name)? != expected {
            return Err(corrupt(format!("`{name}` does not match `{METADATA_FILE}`")));
        }
    }

    debug!(device = device_name, topic = %bundle.telemetry_topic, "bundle loaded");
    Ok(bundle)
}
