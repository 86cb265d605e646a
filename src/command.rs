//! Command resolution
//!
//! Turns an argument vector into a [`CommandSpec`] with an absolute program
//! path. Nothing is started here.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Resolves an executable name to an absolute path
pub trait PathResolver: Send + Sync {
    fn resolve(&self, program: &str) -> Option<PathBuf>;
}

/// Looks programs up on `$PATH`
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchPath;

impl PathResolver for SearchPath {
    fn resolve(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Everything needed to exec a child on a pty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Absolute path of the executable
    pub program: PathBuf,
    /// `argv[0]` as given by the caller
    pub arg0: String,
    /// Remaining arguments
    pub args: Vec<String>,
    /// Working directory of the child; inherits the parent's when `None`
    pub cwd: Option<PathBuf>,
    /// `KEY=VALUE` entries; the parent environment is inherited when empty
    pub env: Vec<String>,
}

impl CommandSpec {
    /// Resolve `argv[0]` and bind the rest of `argv` as arguments
    pub fn build<S: AsRef<str>>(argv: &[S], resolver: &dyn PathResolver) -> Result<Self> {
        let (first, rest) = argv.split_first().ok_or(Error::InvalidCommand)?;
        let arg0 = first.as_ref();
        if arg0.is_empty() {
            return Err(Error::InvalidCommand);
        }

        let program = resolver
            .resolve(arg0)
            .ok_or_else(|| Error::PathResolutionFailed {
                program: arg0.to_string(),
            })?;

        Ok(Self {
            program,
            arg0: arg0.to_string(),
            args: rest.iter().map(|a| a.as_ref().to_string()).collect(),
            cwd: None,
            env: Vec::new(),
        })
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    /// Full argument vector as seen by the child
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.arg0.as_str()).chain(self.args.iter().map(String::as_str))
    }
}
