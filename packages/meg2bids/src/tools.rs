//! External tool invocations.
//!
//! Both tools are blocking child processes; the pipeline waits for each to
//! finish and checks its exit status before proceeding. A non-zero exit is
//! fatal for the current subject.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{ConvertError, Result};

fn run_checked(tool: &str, command: &mut Command) -> Result<()> {
    log::info!("running {:?}", command);
    let output = command.output().map_err(|e| ConvertError::ExternalTool {
        tool: tool.to_string(),
        message: format!("failed to execute: {}", e),
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        log::error!("{} failed with status {}: {}", tool, output.status, stderr);
        return Err(ConvertError::ExternalTool {
            tool: tool.to_string(),
            message: format!("exited with {}. stderr: {}", output.status, stderr.trim()),
        });
    }
    Ok(())
}

/// Wrapper around the EEG electrode-location fixer.
///
/// Digitised electrode positions are not always copied correctly into the
/// acquisition file on the VectorView system; the fixer repairs them in
/// place, which is why it only ever runs against a staged copy.
#[derive(Debug, Clone)]
pub struct EegLocationFixer {
    command: PathBuf,
}

impl EegLocationFixer {
    pub fn new<P: Into<PathBuf>>(command: P) -> Self {
        EegLocationFixer {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &Path {
        &self.command
    }

    pub fn is_available(&self) -> bool {
        self.command.exists()
    }

    /// Repair the electrode locations of `file` in place.
    pub fn fix(&self, file: &Path) -> Result<()> {
        run_checked(
            "EEG location fixer",
            Command::new(&self.command)
                .arg("--file")
                .arg(file)
                .arg("--fix"),
        )
    }
}

/// Wrapper around the DICOM-to-NIfTI converter (dcm2niix).
#[derive(Debug, Clone)]
pub struct DicomConverter {
    command: String,
}

impl DicomConverter {
    pub fn new<S: Into<String>>(command: S) -> Self {
        DicomConverter {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether the converter can be spawned at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.command)
            .arg("-h")
            .output()
            .is_ok()
    }

    /// Convert a DICOM series into a merged, compressed NIfTI volume named
    /// `<stem>.nii.gz` inside `out_dir`. Returns the produced file path.
    pub fn convert(&self, dcm_dir: &Path, out_dir: &Path, stem: &str) -> Result<PathBuf> {
        run_checked(
            "dcm2niix",
            Command::new(&self.command)
                .arg("-o")
                .arg(out_dir)
                .arg("-f")
                .arg(stem)
                .arg("-m")
                .arg("y")
                .arg("-z")
                .arg("y")
                .arg(dcm_dir),
        )?;

        let produced = out_dir.join(format!("{}.nii.gz", stem));
        if !produced.exists() {
            return Err(ConvertError::ExternalTool {
                tool: "dcm2niix".to_string(),
                message: format!("expected output not produced: {}", produced.display()),
            });
        }
        Ok(produced)
    }
}
