//! Post-processing handoff: moving finished files into the library layout.
//!
//! The core hands finished rips to a [`LibraryHandoff`]; the default
//! implementation organizes files on the local filesystem the way media
//! servers expect them (`Movie (Year)/Movie (Year).mkv`,
//! `Series/Season 01/Series - S01E01.mkv`).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::info;

lazy_static! {
    static ref BAD_CHARS_RE: Regex = Regex::new(r#"[<>"|?*]"#).unwrap();
    static ref SPACES_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Sanitize a title for use as a folder or file name.
///
/// Colons are common in movie titles but invalid on several filesystems.
pub fn sanitize_folder_name(name: &str) -> String {
    let name = name.replace(':', " -");
    let name = BAD_CHARS_RE.replace_all(&name, "");
    SPACES_RE.replace_all(name.trim(), " ").to_string()
}

/// Destination for finished and review-bound files.
pub trait LibraryHandoff: Send + Sync {
    /// Move movie files into the movies library. Returns the destination
    /// directory.
    fn finalize_movie(&self, title: &str, year: Option<i32>, files: &[PathBuf]) -> Result<PathBuf>;

    /// Move episode files into the TV library, numbered in file order.
    fn finalize_tv(&self, series: &str, season: u32, files: &[PathBuf]) -> Result<PathBuf>;

    /// Park files in the review area for manual identification.
    fn move_to_review(&self, job_id: &str, disc_label: &str, files: &[PathBuf]) -> Result<PathBuf>;
}

/// Filesystem-backed library layout.
pub struct FsLibrary {
    movies_root: PathBuf,
    tv_root: PathBuf,
    review_root: PathBuf,
}

impl FsLibrary {
    pub fn new(movies_root: PathBuf, tv_root: PathBuf, review_root: PathBuf) -> Self {
        Self {
            movies_root,
            tv_root,
            review_root,
        }
    }
}

impl LibraryHandoff for FsLibrary {
    fn finalize_movie(&self, title: &str, year: Option<i32>, files: &[PathBuf]) -> Result<PathBuf> {
        if files.is_empty() {
            bail!("no files to move for '{title}'");
        }
        let folder = match year {
            Some(year) => sanitize_folder_name(&format!("{title} ({year})")),
            None => sanitize_folder_name(title),
        };
        let dest_dir = self.movies_root.join(&folder);
        std::fs::create_dir_all(&dest_dir)
            .with_context(|| format!("creating {:?}", dest_dir))?;

        for (i, file) in files.iter().enumerate() {
            let file_name = if files.len() > 1 {
                format!("{folder} - Part {}.mkv", i + 1)
            } else {
                format!("{folder}.mkv")
            };
            move_file(file, &dest_dir.join(file_name))?;
        }
        cleanup_source_dir(files);
        info!("moved {} file(s) to {:?}", files.len(), dest_dir);
        Ok(dest_dir)
    }

    fn finalize_tv(&self, series: &str, season: u32, files: &[PathBuf]) -> Result<PathBuf> {
        if files.is_empty() {
            bail!("no episode files to move for '{series}'");
        }
        let series_name = sanitize_folder_name(series);
        let dest_dir = self
            .tv_root
            .join(&series_name)
            .join(format!("Season {season:02}"));
        std::fs::create_dir_all(&dest_dir)
            .with_context(|| format!("creating {:?}", dest_dir))?;

        for (i, file) in files.iter().enumerate() {
            let file_name = format!("{series_name} - S{season:02}E{:02}.mkv", i + 1);
            move_file(file, &dest_dir.join(file_name))?;
        }
        cleanup_source_dir(files);
        info!("organized {} episode(s) into {:?}", files.len(), dest_dir);
        Ok(dest_dir)
    }

    fn move_to_review(&self, job_id: &str, disc_label: &str, files: &[PathBuf]) -> Result<PathBuf> {
        if files.is_empty() {
            bail!("no files to park for review");
        }
        let folder = sanitize_folder_name(&format!("{job_id}_{disc_label}"));
        let dest_dir = self.review_root.join(folder);
        std::fs::create_dir_all(&dest_dir)
            .with_context(|| format!("creating {:?}", dest_dir))?;

        for file in files {
            let file_name = file
                .file_name()
                .with_context(|| format!("file without name: {:?}", file))?;
            move_file(file, &dest_dir.join(file_name))?;
        }
        cleanup_source_dir(files);
        info!("parked {} file(s) for review in {:?}", files.len(), dest_dir);
        Ok(dest_dir)
    }
}

/// Rename, falling back to copy+delete for cross-device moves.
fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if src == dest {
        return Ok(());
    }
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dest)
                .with_context(|| format!("copying {:?} to {:?}", src, dest))?;
            std::fs::remove_file(src).with_context(|| format!("removing {:?}", src))?;
            Ok(())
        }
    }
}

/// Remove the now-empty source directory. Non-empty directories stay.
fn cleanup_source_dir(files: &[PathBuf]) {
    if let Some(dir) = files.first().and_then(|f| f.parent()) {
        let _ = std::fs::remove_dir(dir);
    }
}
