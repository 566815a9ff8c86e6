//! Local collaborators: the applicant profile file and the resume directory.

use std::path::{Path, PathBuf};

use anyhow::Context;

use jobrelay_browser::UserProfile;

pub async fn load_profile(path: &Path) -> anyhow::Result<UserProfile> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading profile {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing profile {}", path.display()))
}

/// Resumes are files in one directory, addressed by their stem
/// (`<resume_id>.pdf`, `<resume_id>.docx`, ...).
#[derive(Debug, Clone)]
pub struct LocalResumeStore {
    dir: PathBuf,
}

const EXTENSIONS: &[&str] = &["pdf", "docx", "doc"];

impl LocalResumeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of `resume_id`, or the default resume when no id is given.
    /// `None` when nothing matching exists on disk.
    pub fn resolve(&self, resume_id: Option<&str>) -> Option<PathBuf> {
        match resume_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                // Ids are file stems; anything path-like is rejected.
                if id.contains(['/', '\\']) || id.contains("..") {
                    return None;
                }
                let exact = self.dir.join(id);
                if exact.is_file() {
                    return Some(exact);
                }
                EXTENSIONS
                    .iter()
                    .map(|ext| self.dir.join(format!("{id}.{ext}")))
                    .find(|p| p.is_file())
            }
            None => self.default_resume(),
        }
    }

    /// First resume in the directory by file name.
    fn default_resume(&self) -> Option<PathBuf> {
        let mut found: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        found.sort();
        found.into_iter().next()
    }
}
