//! Project settings.
//!
//! [`Settings`] is the single immutable configuration value threaded through
//! every pipeline component. It is loaded once per run from a JSON file and
//! validated up front; nothing downstream re-reads global state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};
use crate::trigger::TriggerChannelSet;

/// The MEG acquisition system the data was recorded on.
///
/// The two systems differ in their calibration/cross-talk files and in
/// whether EEG electrode locations need to be repaired after acquisition
/// (`vectorview` only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MegSystem {
    Triux,
    VectorView,
}

impl std::fmt::Display for MegSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MegSystem::Triux => write!(f, "triux"),
            MegSystem::VectorView => write!(f, "vectorview"),
        }
    }
}

fn default_audio_latency() -> f64 {
    0.028
}

fn default_visual_latency() -> f64 {
    0.034
}

fn default_line_freq() -> f64 {
    50.0
}

fn default_auditory_prefix() -> String {
    "spoken_".to_string()
}

fn default_visual_prefix() -> String {
    "written_".to_string()
}

fn default_dcm2niix_cmd() -> String {
    "dcm2niix".to_string()
}

/// Complete pipeline configuration, deserialized from `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Project root directory; must exist.
    pub project_root: PathBuf,
    /// Data root directory.
    pub data_root: PathBuf,
    /// Output root of the standardized dataset. Purged before conversion
    /// unless existing folders are kept.
    pub bids_raw_root: PathBuf,
    /// Scratch root for staged copies and intermediate conversions. Purged
    /// after the run unless retention is requested.
    pub sourcedata_root: PathBuf,
    /// Path to the event dictionary JSON file (event name → integer code).
    pub event_info_path: PathBuf,
    /// Path to the subject dictionary JSON file.
    pub subject_info_path: PathBuf,
    /// MEG hardware system the data was acquired on.
    pub meg_system: MegSystem,
    /// Trigger channel configuration, either a flat list of bit lines or a
    /// `{stim, resp}` mapping.
    pub event_channels: TriggerChannelSet,
    /// Whether to shift event onsets by the fixed stimulus delivery
    /// latencies.
    pub adjust_event_times: bool,
    /// Audio stimulus delivery latency in seconds.
    #[serde(default = "default_audio_latency")]
    pub audio_latency_sec: f64,
    /// Visual stimulus delivery latency in seconds.
    #[serde(default = "default_visual_latency")]
    pub visual_latency_sec: f64,
    /// Event names whose onsets get the audio latency shift. Required when
    /// `adjust_event_times` is set; may be empty.
    #[serde(default)]
    pub auditory_event_names: Option<Vec<String>>,
    /// Event names whose onsets get the visual latency shift. Required when
    /// `adjust_event_times` is set; may be empty.
    #[serde(default)]
    pub visual_event_names: Option<Vec<String>>,
    /// Event-name prefix denoting auditory events, used to derive the
    /// auditory code set when no explicit name list is given.
    #[serde(default = "default_auditory_prefix")]
    pub auditory_event_prefix: String,
    /// Event-name prefix denoting visual events.
    #[serde(default = "default_visual_prefix")]
    pub visual_event_prefix: String,
    /// Whether to convert structural MRI scans for subjects that have one.
    pub convert_mri: bool,
    /// Fine-calibration file for the Triux system.
    pub cal_file_path_triux: PathBuf,
    /// Cross-talk file for the Triux system.
    pub ct_file_path_triux: PathBuf,
    /// Fine-calibration file for the VectorView system.
    pub cal_file_path_vectorview: PathBuf,
    /// Cross-talk file for the VectorView system.
    pub ct_file_path_vectorview: PathBuf,
    /// Power line frequency in Hz, recorded in every written entry.
    #[serde(default = "default_line_freq")]
    pub line_freq: f64,
    /// Path to the EEG location fixer executable. Required for the
    /// VectorView system.
    #[serde(default)]
    pub check_eeg_cmd: Option<PathBuf>,
    /// DICOM-to-NIfTI converter command, resolved via `$PATH` by default.
    #[serde(default = "default_dcm2niix_cmd")]
    pub dcm2niix_cmd: String,
}

impl Settings {
    /// Load settings from a JSON file and validate them.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConvertError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let settings: Settings = serde_json::from_str(&content).map_err(|e| {
            ConvertError::Config(format!("malformed config file {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check every invariant that can be checked without touching the data.
    ///
    /// Fails fast with the offending field name; the run must abort before
    /// any conversion starts.
    pub fn validate(&self) -> Result<()> {
        if !self.project_root.exists() {
            return Err(ConvertError::Config(format!(
                "project folder not found, check the project_root setting: {}",
                self.project_root.display()
            )));
        }
        if self.audio_latency_sec < 0.0 {
            return Err(ConvertError::Config(
                "audio_latency_sec must be non-negative".to_string(),
            ));
        }
        if self.visual_latency_sec < 0.0 {
            return Err(ConvertError::Config(
                "visual_latency_sec must be non-negative".to_string(),
            ));
        }
        if self.line_freq <= 0.0 {
            return Err(ConvertError::Config(
                "line_freq must be positive".to_string(),
            ));
        }
        if self.adjust_event_times {
            if self.auditory_event_names.is_none() {
                return Err(ConvertError::Config(
                    "auditory_event_names is required when adjust_event_times is set"
                        .to_string(),
                ));
            }
            if self.visual_event_names.is_none() {
                return Err(ConvertError::Config(
                    "visual_event_names is required when adjust_event_times is set".to_string(),
                ));
            }
        }
        if self.meg_system == MegSystem::VectorView && self.check_eeg_cmd.is_none() {
            return Err(ConvertError::Config(
                "check_eeg_cmd is required for the vectorview system".to_string(),
            ));
        }
        self.event_channels.validate()?;
        Ok(())
    }

    /// Fine-calibration file for the configured system.
    pub fn cal_file_path(&self) -> &Path {
        match self.meg_system {
            MegSystem::Triux => &self.cal_file_path_triux,
            MegSystem::VectorView => &self.cal_file_path_vectorview,
        }
    }

    /// Cross-talk file for the configured system.
    pub fn ct_file_path(&self) -> &Path {
        match self.meg_system {
            MegSystem::Triux => &self.ct_file_path_triux,
            MegSystem::VectorView => &self.ct_file_path_vectorview,
        }
    }
}
