//! File I/O utilities for geometries and reaction directories.
//!
//! This module writes XYZ geometries and provides the file-system primitives
//! the orchestrators rely on:
//!
//! - [`write_xyz`]: XYZ output with 6-decimal fixed precision
//! - [`place_atomically`]: copy-then-rename into a shared directory
//! - [`copy_dir_recursive`]: result collection

use crate::geometry::Geometry;
use std::fs;
use std::io::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Renders a geometry in XYZ format.
///
/// Line 1 is the atom count, line 2 the comment, followed by one
/// `<element> <x> <y> <z>` row per atom with 6 decimals.
///
/// # Examples
///
/// ```
/// use opents::geometry::Geometry;
/// use opents::io::format_xyz;
///
/// let geom = Geometry::new(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 0.74, 0.0, 0.0]);
/// let text = format_xyz(&geom, "hydrogen");
/// assert_eq!(text.lines().nth(1), Some("hydrogen"));
/// assert_eq!(text.lines().nth(3), Some("H 0.740000 0.000000 0.000000"));
/// ```
pub fn format_xyz(geom: &Geometry, comment: &str) -> String {
    let mut content = format!("{}\n{}\n", geom.num_atoms, comment);

    for i in 0..geom.num_atoms {
        let coords = geom.get_atom_coords(i);
        content.push_str(&format!(
            "{} {:.6} {:.6} {:.6}\n",
            geom.elements[i], coords[0], coords[1], coords[2]
        ));
    }

    content
}

/// Writes a molecular geometry to an XYZ file.
///
/// # Arguments
///
/// * `geom` - The molecular geometry to write
/// * `comment` - Free text for the comment line
/// * `path` - The path to the output XYZ file
pub fn write_xyz(geom: &Geometry, comment: &str, path: &Path) -> Result<()> {
    fs::write(path, format_xyz(geom, comment))
}

/// Copies `source` into `dir/name` so that readers never see a partial file.
///
/// The content is first copied to a hidden temporary sibling in `dir`, then
/// renamed over the target. Renaming within one directory is atomic, and an
/// existing target is replaced, so repeated calls for the same name are safe.
/// Concurrent callers must use distinct names.
///
/// # Returns
///
/// The path of the placed file.
pub fn place_atomically(source: &Path, dir: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let target = dir.join(name);
    let temp = dir.join(format!(
        ".{}.{}.{}.tmp",
        name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = fs::copy(source, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&temp, &target) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    Ok(target)
}

/// Recursively copies a directory tree, overwriting existing files.
pub fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target)?;
        }
    }
    Ok(())
}
