//! Subject dictionary: loading, validation, empty-room handling.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};

/// Reserved run label marking an empty-room (baseline noise) recording.
pub const EMPTYROOM_RUN: &str = "emptyroom";

/// One physical raw recording belonging to a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFileDescriptor {
    /// Filename inside the subject's raw (or empty-room) directory.
    pub file: String,
    /// Run label; [`EMPTYROOM_RUN`] is reserved for the baseline recording.
    pub run: String,
    /// Task label.
    pub task: String,
}

/// One participant's entry in the subject dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRecord {
    /// BIDS identifier; `null` means the subject is skipped entirely.
    pub bids_id: Option<String>,
    /// Identifier in the MEG lab's source bookkeeping.
    pub meg_id: String,
    /// Directory holding the subject's raw MEG recordings.
    pub meg_raw_dir: PathBuf,
    /// Directory holding the empty-room recording, if one was taken.
    pub meg_emptyroom_dir: Option<PathBuf>,
    /// Recordings to convert, in acquisition order.
    pub meg_raw_files: Vec<RawFileDescriptor>,
    /// Channels to mark bad after the write; may be empty.
    pub meg_bad_channels: Vec<String>,
    /// Structural scan identifier, if an MRI was acquired.
    #[serde(default)]
    pub mri_id: Option<String>,
    /// Acquisition date of the structural scan.
    #[serde(default)]
    pub mri_date: Option<String>,
    /// DICOM directory of the structural scan.
    #[serde(default)]
    pub mri_dcm_dir: Option<PathBuf>,
}

/// Subject dictionary keyed by an arbitrary subject label.
pub type SubjectInfo = BTreeMap<String, SubjectRecord>;

/// Load the subject dictionary from a JSON object file.
pub fn load_subject_info<P: AsRef<Path>>(path: P) -> Result<SubjectInfo> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConvertError::Config(format!(
            "cannot read subject info file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        ConvertError::Config(format!(
            "malformed subject info file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Validate every subject record before any conversion begins.
///
/// Identifiers must be non-empty, file lists non-empty, and every referenced
/// directory must exist. The first violation aborts with an error naming the
/// subject and field.
pub fn check_subject_info(subject_info: &SubjectInfo) -> Result<()> {
    log::info!("checking subject info ({} subjects)", subject_info.len());
    for (sub_id, info) in subject_info {
        if let Some(bids_id) = &info.bids_id {
            if bids_id.is_empty() {
                return Err(ConvertError::subject(
                    sub_id,
                    "bids_id must be specified as a non-empty string or null",
                ));
            }
        }
        if info.meg_id.is_empty() {
            return Err(ConvertError::subject(
                sub_id,
                "meg_id must be specified as a non-empty string",
            ));
        }
        if !info.meg_raw_dir.exists() {
            return Err(ConvertError::subject(
                sub_id,
                format!(
                    "MEG raw data directory not found: {}",
                    info.meg_raw_dir.display()
                ),
            ));
        }
        if let Some(er_dir) = &info.meg_emptyroom_dir {
            if !er_dir.exists() {
                return Err(ConvertError::subject(
                    sub_id,
                    format!("MEG emptyroom directory not found: {}", er_dir.display()),
                ));
            }
        }
        if info.meg_raw_files.is_empty() {
            return Err(ConvertError::subject(
                sub_id,
                "meg_raw_files must be a non-empty list",
            ));
        }
        if let Some(dcm_dir) = &info.mri_dcm_dir {
            if !dcm_dir.exists() {
                return Err(ConvertError::subject(
                    sub_id,
                    format!("MRI dicom directory not found: {}", dcm_dir.display()),
                ));
            }
        }
    }
    log::info!("subject info is OK");
    Ok(())
}

/// Extract the empty-room recording from a subject's file list.
///
/// Zero matches is fine (proceed without a baseline); exactly one is held
/// out; more than one is a hard error naming the subject.
pub fn split_empty_room(
    subject: &str,
    files: &[RawFileDescriptor],
) -> Result<(Vec<RawFileDescriptor>, Option<RawFileDescriptor>)> {
    let (emptyroom, rest): (Vec<RawFileDescriptor>, Vec<RawFileDescriptor>) = files
        .iter()
        .cloned()
        .partition(|f| f.run == EMPTYROOM_RUN);

    match emptyroom.len() {
        0 => {
            log::info!(
                "no emptyroom file found for {}, proceeding without one",
                subject
            );
            Ok((rest, None))
        }
        1 => Ok((rest, emptyroom.into_iter().next())),
        n => Err(ConvertError::subject(
            subject,
            format!("{} emptyroom files found, expected at most one", n),
        )),
    }
}
