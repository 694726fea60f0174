//! External command-line tools (`gdaldem`, `pdal`)
//!
//! A tool invocation has exactly three outcomes: success, the executable is
//! not installed ([`LidarError::ToolNotFound`]), or it ran and failed
//! ([`LidarError::ToolFailed`], carrying its stderr).

use crate::types::{LidarError, LidarResult};
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::process::{Command, Output};

/// Longest stderr excerpt kept in a [`LidarError::ToolFailed`]
const STDERR_EXCERPT: usize = 2000;

/// Run `program` with `args`, capturing its output
pub fn run_tool<I, S>(program: &str, args: I) -> LidarResult<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    log::debug!("Running {} {:?}", program, args);

    let output = match Command::new(program).args(&args).output() {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(LidarError::ToolNotFound(program.to_string()));
        }
        Err(e) => return Err(LidarError::Io(e)),
    };

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
        Err(LidarError::ToolFailed {
            tool: program.to_string(),
            status: output.status.to_string(),
            stderr,
        })
    }
}
