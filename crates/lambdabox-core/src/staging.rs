//! Ephemeral code staging
//!
//! Writes a function's source to a fresh file that a sandbox can bind-mount or
//! a host interpreter can run. The file belongs to exactly one execution
//! attempt and is deleted when the `EphemeralCodeFile` is dropped, unless the
//! staging configuration asks to keep it.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempPath};

use crate::config::StagingConfig;
use crate::errors::EngineError;
use crate::types::Language;

#[derive(Debug)]
pub struct EphemeralCodeFile {
    path: PathBuf,
    language: Language,
    // Dropping this deletes the file; `None` once the file has been kept.
    temp_path: Option<TempPath>,
}

impl EphemeralCodeFile {
    /// Stage `code` as `temp_<uuid>.<ext>` under the configured directory.
    pub fn stage(
        code: &str,
        language: Language,
        config: &StagingConfig,
    ) -> Result<Self, EngineError> {
        let directory = config.directory();
        let suffix = format!(".{}", language.extension());
        let mut file = Builder::new()
            .prefix("temp_")
            .suffix(&suffix)
            .tempfile_in(&directory)
            .map_err(|e| {
                EngineError::Staging(format!(
                    "Failed to create staging file in {}: {}",
                    directory.display(),
                    e
                ))
            })?;

        file.write_all(code.as_bytes())?;
        file.flush()?;

        // Sandboxed interpreters may run as an unprivileged user
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))?;
        }

        let temp_path = file.into_temp_path();
        let path = temp_path.to_path_buf();

        let temp_path = if config.keep_files {
            // Persist the file and hand ownership of it back to the filesystem
            temp_path
                .keep()
                .map_err(|e| EngineError::Staging(format!("Failed to keep staging file: {}", e)))?;
            None
        } else {
            Some(temp_path)
        };

        log::debug!("Staged {} source at {}", language, path.display());
        Ok(Self {
            path,
            language,
            temp_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Extension of the staged file, used to derive the in-sandbox path.
    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_else(|| self.language.extension())
    }

    /// Whether the file is removed when this value is dropped.
    pub fn is_ephemeral(&self) -> bool {
        self.temp_path.is_some()
    }

    /// Copy pointing at the same file that never deletes it.
    ///
    /// The file itself still lives only as long as the original.
    pub fn detached_copy(&self) -> Self {
        Self {
            path: self.path.clone(),
            language: self.language,
            temp_path: None,
        }
    }
}
