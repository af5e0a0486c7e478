//! Runs the configured build command inside the synchronized tree

use serde::Serialize;
use std::path::Path;
use tokio::process::Command;
use tracing::{error, info};

use crate::error::BuildError;

/// Maximum size for captured build output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    pub exit_code: Option<i32>,
    pub output: String,
    pub output_truncated: bool,
}

/// Run `command` through `sh -c` with `dir` as working directory.
///
/// stdout and stderr are captured and concatenated. A non-zero exit is
/// returned as [`BuildError::NonZeroExit`] carrying the captured output.
/// Output past [`MAX_OUTPUT_SIZE`] is cut and flagged in `output_truncated`.
pub async fn run_build(command: &str, dir: &Path) -> Result<BuildOutput, BuildError> {
    info!("Running (cwd = '{}'): {}", dir.display(), command);
    let result = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| {
            error!("build command failed to start: {}", e);
            BuildError::Spawn(e)
        })?;

    let mut output = String::from_utf8_lossy(&result.stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(&result.stderr));
    let output_truncated = truncate_output(&mut output);

    let build_output = BuildOutput {
        exit_code: result.status.code(),
        output,
        output_truncated,
    };

    if !result.status.success() {
        error!(
            "build command failed ({:?}):\n{}",
            build_output.exit_code, build_output.output
        );
        return Err(BuildError::NonZeroExit(build_output));
    }

    info!("build output:\n{}", build_output.output);
    Ok(build_output)
}

/// Cut `output` to [`MAX_OUTPUT_SIZE`] on a char boundary. Returns whether it was cut.
fn truncate_output(output: &mut String) -> bool {
    if output.len() <= MAX_OUTPUT_SIZE {
        return false;
    }
    let mut end = MAX_OUTPUT_SIZE;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    output.truncate(end);
    output.push_str("\n... (output truncated)");
    true
}
