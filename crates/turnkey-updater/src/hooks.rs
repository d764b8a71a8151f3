//! Update hooks and dependency installation.

use crate::error::{UpdateError, UpdateResult};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

async fn run(mut command: Command, label: String) -> UpdateResult<()> {
    let output = command
        .output()
        .await
        .map_err(|e| UpdateError::Hook {
            command: label.clone(),
            status: "spawn failed".to_string(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(UpdateError::Hook {
            command: label,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    debug!(
        command = %label,
        stdout = %String::from_utf8_lossy(&output.stdout).trim(),
        "command completed"
    );
    Ok(())
}

/// Run a shell hook with its package directory as working directory.
pub async fn run_script(script: &Path, workdir: &Path) -> UpdateResult<()> {
    info!(script = %script.display(), "running update hook");
    let mut command = Command::new("sh");
    command.arg(script).current_dir(workdir).kill_on_drop(true);
    run(command, script.display().to_string()).await
}

/// Run the dependency installer with `manifest` appended.
pub async fn install_dependencies(installer: &[String], manifest: &Path) -> UpdateResult<()> {
    let Some((program, args)) = installer.split_first() else {
        return Err(UpdateError::Hook {
            command: "dependency installer".to_string(),
            status: "not configured".to_string(),
            stderr: String::new(),
        });
    };
    info!(manifest = %manifest.display(), %program, "installing dependencies");
    let mut command = Command::new(program);
    command.args(args).arg(manifest).kill_on_drop(true);
    run(command, program.clone()).await
}

/// Mark every `*.sh` below `root` executable.
#[cfg(unix)]
pub fn make_scripts_executable(root: &Path) -> UpdateResult<()> {
    use std::os::unix::fs::PermissionsExt;

    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.map_err(UpdateError::archive)?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "sh") {
            std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(0o755))
                .map_err(|e| UpdateError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn make_scripts_executable(_root: &Path) -> UpdateResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_success_and_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hook.sh");
        std::fs::write(&script, "echo done > marker\n").unwrap();

        run_script(&script, dir.path()).await.unwrap();
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_script_failure_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hook.sh");
        std::fs::write(&script, "echo broken >&2\nexit 3\n").unwrap();

        let err = run_script(&script, dir.path()).await.unwrap_err();
        match err {
            UpdateError::Hook { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_installer_receives_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("requirements.txt");
        std::fs::write(&manifest, "requests\n").unwrap();

        let installer = vec!["test".to_string(), "-f".to_string()];
        install_dependencies(&installer, &manifest).await.unwrap();

        let missing = dir.path().join("missing.txt");
        assert!(install_dependencies(&installer, &missing).await.is_err());
        assert!(install_dependencies(&[], &manifest).await.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_scripts_made_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        let script = dir.path().join("bin/start.sh");
        let data = dir.path().join("data.txt");
        std::fs::write(&script, "true").unwrap();
        std::fs::write(&data, "x").unwrap();

        make_scripts_executable(dir.path()).unwrap();
        assert_eq!(std::fs::metadata(&script).unwrap().permissions().mode() & 0o777, 0o755);
        assert_ne!(std::fs::metadata(&data).unwrap().permissions().mode() & 0o111, 0o111);
    }
}
