//! Where mutated documents are written.
//!
//! Macro-enabled workbooks are never overwritten in place by default. Mutations land in a
//! macro-free sidecar at `<original>.data.xlsx` instead. Writing the original requires both the
//! caller's `force_overwrite` flag and the `ALLOW_XLSM_OVERWRITE` environment switch.

use std::path::{Path, PathBuf};

use rowbook_fs::{atomic_write, is_at_least_as_new, sibling_path_with_suffix};
use rowbook_xlsx::{strip_macros, XlsxPackage};

use crate::error::{Result, StoreError};
use crate::handle::WorkbookHandle;

pub const SIDECAR_SUFFIX: &str = ".data.xlsx";

/// Second key of the in-place override for macro-enabled workbooks.
pub const OVERRIDE_ENV: &str = "ALLOW_XLSM_OVERWRITE";

pub fn sidecar_path(path: &Path) -> PathBuf {
    sibling_path_with_suffix(path, SIDECAR_SUFFIX)
}

/// The sidecar of `path`, if it exists and was modified no earlier than `path`.
pub fn fresh_sidecar(path: &Path) -> Option<PathBuf> {
    let sidecar = sidecar_path(path);
    match is_at_least_as_new(&sidecar, path) {
        Ok(true) => Some(sidecar),
        Ok(false) => None,
        Err(err) => {
            log::warn!("cannot compare {} with its sidecar: {err}", path.display());
            None
        }
    }
}

/// Anything but unset, empty, `0`, `false`, `no` and `off` turns the switch on.
pub fn env_switch_enabled(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => false,
        Some(v) => !matches!(
            v.to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
    }
}

pub fn override_switch() -> bool {
    env_switch_enabled(std::env::var(OVERRIDE_ENV).ok().as_deref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    InPlace,
    Sidecar,
}

pub fn choose_target(has_macros: bool, force_overwrite: bool, env_switch: bool) -> WriteTarget {
    if !has_macros {
        return WriteTarget::InPlace;
    }
    match (force_overwrite, env_switch) {
        (true, true) => WriteTarget::InPlace,
        (true, false) => {
            log::warn!("in-place overwrite requested without {OVERRIDE_ENV}; writing a sidecar");
            WriteTarget::Sidecar
        }
        _ => WriteTarget::Sidecar,
    }
}

/// Resolved destination of one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    pub original: PathBuf,
    pub target: PathBuf,
    /// The package comes from a macro-enabled original and must be stripped before writing.
    pub strip_macros: bool,
}

impl WritePlan {
    pub fn is_sidecar(&self) -> bool {
        self.target != self.original
    }
}

/// Decide where a mutation of `path` lands and open the document it starts from.
///
/// Sidecar writes build on a fresh sidecar when there is one, so successive edits accumulate;
/// otherwise on the original. In-place writes always start from the original.
pub fn open_for_write(path: &Path, force_overwrite: bool) -> Result<(WritePlan, WorkbookHandle)> {
    let original = WorkbookHandle::open(path)?;
    match choose_target(original.has_macros, force_overwrite, override_switch()) {
        WriteTarget::InPlace => {
            if original.has_macros {
                log::warn!("overwriting macro-enabled workbook {} in place", path.display());
            }
            let plan = WritePlan {
                original: path.to_path_buf(),
                target: path.to_path_buf(),
                strip_macros: false,
            };
            Ok((plan, original))
        }
        WriteTarget::Sidecar => {
            let target = sidecar_path(path);
            let plan = WritePlan {
                original: path.to_path_buf(),
                target: target.clone(),
                strip_macros: true,
            };
            match fresh_sidecar(path) {
                Some(sidecar) => {
                    log::debug!("continuing from sidecar {}", sidecar.display());
                    Ok((plan, WorkbookHandle::open(&sidecar)?))
                }
                None => Ok((plan, original)),
            }
        }
    }
}

/// Serialize `package` and atomically write it to `target`.
pub fn write_package(package: &XlsxPackage, target: &Path) -> Result<()> {
    atomic_write(target, |file| package.write_to(file))
        .map_err(|err| StoreError::write_failure(format!("{}: {err}", target.display())))
}

/// Write a mutated package according to `plan` and return the path written.
pub fn persist(mut package: XlsxPackage, plan: &WritePlan) -> Result<PathBuf> {
    if plan.strip_macros {
        let report = strip_macros(&mut package).map_err(StoreError::write_failure)?;
        if !report.removed_parts.is_empty() {
            log::debug!("stripped {:?} for {}", report.removed_parts, plan.target.display());
        }
    }
    write_package(&package, &plan.target)?;
    log::info!("wrote {}", plan.target.display());
    Ok(plan.target.clone())
}

/// Path of a macro-free copy of `path` suitable for downstream processing.
///
/// A macro-free workbook is its own working copy, whatever sits next to it. Otherwise the
/// sidecar is reused when it is at least as new as the original, and regenerated when absent or
/// stale.
pub fn ensure_working_copy(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let handle = WorkbookHandle::open(path)?;
    if !handle.has_macros {
        return Ok(path.to_path_buf());
    }
    if let Some(sidecar) = fresh_sidecar(path) {
        log::debug!("reusing working copy {}", sidecar.display());
        return Ok(sidecar);
    }

    let plan = WritePlan {
        original: path.to_path_buf(),
        target: sidecar_path(path),
        strip_macros: true,
    };
    log::info!("creating working copy of {}", path.display());
    persist(handle.package, &plan)
}
