//! Install collaborator
//!
//! Verification and installation live outside this tool. Once a package is
//! arriving, the configured command is run through `sh -c` with the package
//! path as its final argument.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::{error, info};

/// Run `command <package>`; returns whether it exited successfully
pub async fn run_install(command: &str, package: &Path) -> Result<bool> {
    info!("Installing {} with: {}", package.display(), command);

    // "$@" keeps the package path a single argument whatever it contains
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("{} \"$@\"", command))
        .arg("sideload-install")
        .arg(package)
        .status()
        .await
        .with_context(|| format!("Failed to run install command: {}", command))?;

    if status.success() {
        info!("Install command completed");
        Ok(true)
    } else {
        error!("Install command failed with {}", status);
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_package_path_passed_as_argument() {
        let dir = TempDir::new().unwrap();
        let package = dir.path().join("package with spaces.zip");
        std::fs::write(&package, b"PK").unwrap();

        assert!(run_install("test -f", &package).await.unwrap());
        assert!(!run_install("test -d", &package).await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_command() {
        assert!(!run_install("false", Path::new("/sideload/package.zip")).await.unwrap());
    }
}
