//! Native compiler invocation.

use lln_runtime::BuildError;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Something that turns the generated C source into a loadable library.
pub trait NativeCompiler {
    fn program(&self) -> &str;

    /// Program and flags as recorded in the build marker. An artifact built
    /// with a different invocation is rebuilt.
    fn invocation(&self) -> String {
        self.program().to_string()
    }

    /// Compile `source` into a shared library at `output`.
    fn compile(&self, source: &Path, output: &Path) -> Result<(), BuildError>;
}

/// A `cc`-compatible driver (`cc`, `gcc`, `clang`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcCompiler {
    program: String,
    flags: Vec<String>,
}

impl CcCompiler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            flags: Vec::new(),
        }
    }

    /// Extra flags passed before the required ones.
    pub fn with_flags(mut self, flags: impl IntoIterator<Item = String>) -> Self {
        self.flags.extend(flags);
        self
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    fn command(&self, source: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.flags)
            .arg("-fPIC")
            .arg("-shared")
            .arg("-o")
            .arg(output)
            .arg(source);
        cmd
    }
}

impl Default for CcCompiler {
    fn default() -> Self {
        Self::new("cc")
    }
}

impl NativeCompiler for CcCompiler {
    fn program(&self) -> &str {
        &self.program
    }

    fn invocation(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.flags.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn compile(&self, source: &Path, output: &Path) -> Result<(), BuildError> {
        let mut cmd = self.command(source, output);
        debug!("Running compiler: {:?}", cmd);

        let result = cmd.output().map_err(|source| BuildError::CompilerUnavailable {
            program: self.program.clone(),
            source,
        })?;

        if !result.status.success() {
            return Err(BuildError::CompilerFailed {
                program: self.program.clone(),
                status: result.status.to_string(),
                stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }

        info!("Compiled {} with {}", source.display(), self.program);
        Ok(())
    }
}
