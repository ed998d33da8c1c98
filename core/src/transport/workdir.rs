// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Work-directory policy (spec §4.A): per-evaluation directories into
//! which template files are populated and in which the driver runs.

use crate::error::CoreResult;
use crate::model::EvalId;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Work-directory configuration (spec §4.A, spec §6 `work-directory`,
/// `directory-tag`, `directory-save`).
#[derive(Debug, Clone)]
pub struct WorkDirectoryPolicy {
    pub root: PathBuf,
    pub create: bool,
    pub tag: bool,
    pub save: bool,
    pub template_files: Vec<PathBuf>,
}

impl Default for WorkDirectoryPolicy {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            create: false,
            tag: false,
            save: true,
            template_files: Vec::new(),
        }
    }
}

impl WorkDirectoryPolicy {
    /// The work directory path for one evaluation, tagged if configured.
    #[must_use]
    pub fn path_for(&self, eval_id: EvalId) -> PathBuf {
        if self.tag {
            self.root.join(format!("workdir.{eval_id}"))
        } else {
            self.root.clone()
        }
    }

    /// Creates the directory (if configured to) and copies every
    /// template file/directory into it.
    pub fn prepare(&self, dir: &Path) -> CoreResult<()> {
        if !self.create {
            return Ok(());
        }
        std::fs::create_dir_all(dir)?;
        for template in &self.template_files {
            let dest = dir.join(template.file_name().unwrap_or_default());
            if template.is_dir() {
                copy_dir_recursive(template, &dest)?;
            } else {
                std::fs::copy(template, &dest)?;
            }
        }
        debug!(dir = %dir.display(), "prepared work directory");
        Ok(())
    }

    /// Removes the directory after completion, unless it was not
    /// created for this evaluation or the `save` policy keeps it (spec
    /// §4.A: "removed only after files are retained or tagged per the
    /// save policy").
    pub fn cleanup(&self, dir: &Path) {
        if !self.create || self.save {
            return;
        }
        if std::fs::remove_dir_all(dir).is_ok() {
            debug!(dir = %dir.display(), "removed work directory");
        }
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> CoreResult<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dest = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_path_includes_eval_id() {
        let policy = WorkDirectoryPolicy {
            tag: true,
            root: PathBuf::from("/tmp/runs"),
            ..WorkDirectoryPolicy::default()
        };
        assert_eq!(policy.path_for(7), PathBuf::from("/tmp/runs/workdir.7"));
    }

    #[test]
    fn prepare_and_cleanup_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let policy = WorkDirectoryPolicy {
            root: tmp.path().join("work"),
            create: true,
            save: false,
            ..WorkDirectoryPolicy::default()
        };
        let dir = policy.path_for(1);
        policy.prepare(&dir).unwrap();
        assert!(dir.exists());
        policy.cleanup(&dir);
        assert!(!dir.exists());
    }
}
