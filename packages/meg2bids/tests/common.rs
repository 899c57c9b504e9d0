//! Shared fixtures for the pipeline integration tests.
#![allow(dead_code)]

use meg2bids::{
    DatasetWriter, EventDictionary, MatrixReader, MegSystem, RawRecording, Result, Settings,
    TriggerChannelSet, TriggerEvent, WriteRequest,
};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Build an in-memory recording with 5 V pulses at the given
/// (row, start, length) positions.
pub fn recording_with_pulses(
    channels: &[&str],
    n_samples: usize,
    sfreq: f64,
    pulses: &[(usize, usize, usize)],
) -> RawRecording {
    let mut data = Array2::zeros((channels.len(), n_samples));
    for &(row, start, len) in pulses {
        for t in start..start + len {
            data[[row, t]] = 5.0;
        }
    }
    RawRecording {
        path: PathBuf::from("synthetic"),
        channel_names: channels.iter().map(|s| s.to_string()).collect(),
        sfreq,
        first_samp: 0,
        has_eeg: false,
        line_freq: None,
        data,
    }
}

/// Write a recording in the staged matrix format and return the manifest
/// path.
pub fn write_recording(dir: &Path, name: &str, recording: &RawRecording) -> PathBuf {
    let manifest = dir.join(name);
    MatrixReader::write(&manifest, recording).unwrap();
    manifest
}

/// A project directory with settings pointing into it.
pub struct Project {
    pub dir: tempfile::TempDir,
    pub settings: Settings,
}

impl Project {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root().join("raw")
    }

    pub fn emptyroom_dir(&self) -> PathBuf {
        self.root().join("emptyroom")
    }

    pub fn write_subject_info(&self, subjects: &serde_json::Value) {
        std::fs::write(
            &self.settings.subject_info_path,
            serde_json::to_string_pretty(subjects).unwrap(),
        )
        .unwrap();
    }
}

/// Create a project with the default event dictionary, dummy calibration
/// files, and raw/emptyroom directories.
pub fn project(event_channels: TriggerChannelSet) -> Project {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    std::fs::create_dir_all(root.join("raw")).unwrap();
    std::fs::create_dir_all(root.join("emptyroom")).unwrap();
    std::fs::create_dir_all(root.join("calibration")).unwrap();
    std::fs::write(root.join("calibration/sss_cal.dat"), "cal").unwrap();
    std::fs::write(root.join("calibration/ct_sparse.fif"), "ct").unwrap();

    let event_info = serde_json::json!({
        "spoken_word": 1,
        "spoken_noise": 2,
        "written_word": 4,
        "fixation": 8,
        "button_press": 256
    });
    std::fs::write(
        root.join("event_info.json"),
        serde_json::to_string_pretty(&event_info).unwrap(),
    )
    .unwrap();

    let settings = Settings {
        project_root: root.clone(),
        data_root: root.join("data"),
        bids_raw_root: root.join("data/rawdata"),
        sourcedata_root: root.join("data/sourcedata"),
        event_info_path: root.join("event_info.json"),
        subject_info_path: root.join("subject_info.json"),
        meg_system: MegSystem::Triux,
        event_channels,
        adjust_event_times: true,
        audio_latency_sec: 0.028,
        visual_latency_sec: 0.034,
        auditory_event_names: Some(vec!["spoken_word".into(), "spoken_noise".into()]),
        visual_event_names: Some(vec!["written_word".into()]),
        auditory_event_prefix: "spoken_".into(),
        visual_event_prefix: "written_".into(),
        convert_mri: false,
        cal_file_path_triux: root.join("calibration/sss_cal.dat"),
        ct_file_path_triux: root.join("calibration/ct_sparse.fif"),
        cal_file_path_vectorview: root.join("calibration/sss_cal.dat"),
        ct_file_path_vectorview: root.join("calibration/ct_sparse.fif"),
        line_freq: 50.0,
        check_eeg_cmd: None,
        dcm2niix_cmd: "dcm2niix".into(),
    };

    Project { dir, settings }
}

pub fn load_event_dictionary(project: &Project) -> EventDictionary {
    EventDictionary::load(&project.settings.event_info_path).unwrap()
}

/// One captured `write_raw` call.
#[derive(Debug, Clone)]
pub struct CapturedWrite {
    pub subject: String,
    pub run: String,
    pub task: String,
    pub events: Vec<TriggerEvent>,
    pub sfreq: f64,
    pub had_empty_room: bool,
}

/// Dataset writer that records every call instead of touching the disk.
#[derive(Debug, Default)]
pub struct CapturingWriter {
    pub raw_writes: Mutex<Vec<CapturedWrite>>,
    pub calibrations: Mutex<Vec<String>>,
    pub crosstalks: Mutex<Vec<String>>,
    pub bad_channel_calls: Mutex<Vec<(String, Vec<String>)>>,
    pub anat_writes: Mutex<Vec<(String, PathBuf)>>,
}

impl CapturingWriter {
    pub fn total_calls(&self) -> usize {
        self.raw_writes.lock().unwrap().len()
            + self.calibrations.lock().unwrap().len()
            + self.crosstalks.lock().unwrap().len()
            + self.bad_channel_calls.lock().unwrap().len()
            + self.anat_writes.lock().unwrap().len()
    }
}

impl DatasetWriter for CapturingWriter {
    fn write_raw(&self, request: &WriteRequest<'_>) -> Result<()> {
        self.raw_writes.lock().unwrap().push(CapturedWrite {
            subject: request.subject.to_string(),
            run: request.run.to_string(),
            task: request.task.to_string(),
            events: request.events.to_vec(),
            sfreq: request.recording.sfreq,
            had_empty_room: request.empty_room.is_some(),
        });
        Ok(())
    }

    fn write_calibration(&self, subject: &str, _cal_file: &Path) -> Result<()> {
        self.calibrations.lock().unwrap().push(subject.to_string());
        Ok(())
    }

    fn write_crosstalk(&self, subject: &str, _ct_file: &Path) -> Result<()> {
        self.crosstalks.lock().unwrap().push(subject.to_string());
        Ok(())
    }

    fn mark_bad_channels(
        &self,
        subject: &str,
        _run: &str,
        _task: &str,
        channels: &[String],
    ) -> Result<()> {
        self.bad_channel_calls
            .lock()
            .unwrap()
            .push((subject.to_string(), channels.to_vec()));
        Ok(())
    }

    fn write_anat(&self, subject: &str, image: &Path) -> Result<()> {
        self.anat_writes
            .lock()
            .unwrap()
            .push((subject.to_string(), image.to_path_buf()));
        Ok(())
    }
}

/// Standard single-subject entry pointing at `run1_raw.meg`.
pub fn subject_json(project: &Project, bids_id: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "subj1": {
            "bids_id": bids_id,
            "meg_id": "meg23_104",
            "meg_raw_dir": project.raw_dir(),
            "meg_emptyroom_dir": null,
            "meg_raw_files": [
                {"file": "run1_raw.meg", "run": "01", "task": "listen"}
            ],
            "meg_bad_channels": [],
            "mri_id": null,
            "mri_date": null,
            "mri_dcm_dir": null
        }
    })
}

/// Parse a subject dictionary JSON value into records.
pub fn subjects_from_json(value: &serde_json::Value) -> BTreeMap<String, meg2bids::SubjectRecord> {
    serde_json::from_value(value.clone()).unwrap()
}
