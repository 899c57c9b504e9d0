//! Standardized dataset output boundary.
//!
//! The full BIDS vocabulary is an external contract; the pipeline only
//! depends on the narrow [`DatasetWriter`] trait. [`BidsTreeWriter`] is the
//! bundled implementation: it lays out the `sub-<id>/meg` naming scheme,
//! emits the events and channel-status tables, and copies recording payloads
//! opaquely.

use serde_json::json;
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};
use crate::events::{EventDictionary, TriggerEvent};
use crate::recording::RawRecording;

/// Everything the delegated write step needs for one recording.
#[derive(Debug)]
pub struct WriteRequest<'a> {
    /// BIDS subject identifier (without the `sub-` prefix).
    pub subject: &'a str,
    pub run: &'a str,
    pub task: &'a str,
    pub recording: &'a RawRecording,
    pub events: &'a [TriggerEvent],
    pub event_dictionary: &'a EventDictionary,
    /// Held-out baseline recording, written alongside the entry.
    pub empty_room: Option<&'a RawRecording>,
    /// Power line frequency stamped in the sidecar.
    pub line_freq: f64,
    /// Re-runs replace existing entries when set.
    pub overwrite: bool,
}

/// Writer side of the standardized-dataset boundary.
pub trait DatasetWriter {
    fn write_raw(&self, request: &WriteRequest<'_>) -> Result<()>;
    fn write_calibration(&self, subject: &str, cal_file: &Path) -> Result<()>;
    fn write_crosstalk(&self, subject: &str, ct_file: &Path) -> Result<()>;
    fn mark_bad_channels(
        &self,
        subject: &str,
        run: &str,
        task: &str,
        channels: &[String],
    ) -> Result<()>;
    fn write_anat(&self, subject: &str, image: &Path) -> Result<()>;
}

/// Filesystem dataset writer rooted at the raw-data output directory.
#[derive(Debug, Clone)]
pub struct BidsTreeWriter {
    root: PathBuf,
}

fn channel_type(name: &str) -> &'static str {
    if name.starts_with("STI") {
        "stim"
    } else if name.starts_with("EEG") {
        "eeg"
    } else {
        "meg"
    }
}

impl BidsTreeWriter {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        BidsTreeWriter { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn meg_dir(&self, subject: &str) -> PathBuf {
        self.root.join(format!("sub-{}", subject)).join("meg")
    }

    fn entry_base(&self, subject: &str, task: &str, run: &str) -> PathBuf {
        self.meg_dir(subject)
            .join(format!("sub-{}_task-{}_run-{}", subject, task, run))
    }

    /// Copy a recording payload under a new base name, carrying the sample
    /// matrix of staged recordings along with the manifest.
    fn copy_payload(src: &Path, dest_base: &Path) -> Result<()> {
        let ext = match src.extension().and_then(|e| e.to_str()) {
            // A bare .json payload would collide with the *_meg.json sidecar.
            Some("json") | None => "meg",
            Some(other) => other,
        };
        std::fs::copy(src, dest_base.with_extension(ext))?;
        let side = src.with_extension("dat");
        if ext != "dat" && side.exists() {
            std::fs::copy(&side, dest_base.with_extension("dat"))?;
        }
        Ok(())
    }

    fn write_events_tsv(path: &Path, request: &WriteRequest<'_>) -> Result<()> {
        let raw = request.recording;
        let mut tsv = String::from("onset\tduration\tsample\ttrial_type\tvalue\n");
        for event in request.events {
            let onset = (event.sample - raw.first_samp) as f64 / raw.sfreq;
            let trial_type = request
                .event_dictionary
                .name(event.code)
                .unwrap_or("n/a");
            tsv.push_str(&format!(
                "{:.6}\t0.0\t{}\t{}\t{}\n",
                onset, event.sample, trial_type, event.code
            ));
        }
        std::fs::write(path, tsv)?;
        Ok(())
    }

    fn write_channels_tsv(path: &Path, raw: &RawRecording) -> Result<()> {
        let mut tsv = String::from("name\ttype\tstatus\n");
        for name in &raw.channel_names {
            tsv.push_str(&format!("{}\t{}\tgood\n", name, channel_type(name)));
        }
        std::fs::write(path, tsv)?;
        Ok(())
    }
}

impl DatasetWriter for BidsTreeWriter {
    fn write_raw(&self, request: &WriteRequest<'_>) -> Result<()> {
        let base = self.entry_base(request.subject, request.task, request.run);
        let meg_dir = self.meg_dir(request.subject);
        std::fs::create_dir_all(&meg_dir)?;

        let sidecar_path = base.with_file_name(format!(
            "{}_meg.json",
            base.file_name().unwrap_or_default().to_string_lossy()
        ));
        if sidecar_path.exists() && !request.overwrite {
            return Err(ConvertError::Config(format!(
                "dataset entry already exists and overwrite is disabled: {}",
                sidecar_path.display()
            )));
        }

        let raw = request.recording;
        let raw_base = meg_dir.join(format!(
            "sub-{}_task-{}_run-{}_meg",
            request.subject, request.task, request.run
        ));
        Self::copy_payload(&raw.path, &raw_base)?;

        let empty_room_entry = match request.empty_room {
            Some(er) => {
                let er_base = meg_dir.join(format!(
                    "sub-{}_task-emptyroom_meg",
                    request.subject
                ));
                Self::copy_payload(&er.path, &er_base)?;
                Some(format!("sub-{}_task-emptyroom_meg", request.subject))
            }
            None => None,
        };

        let sidecar = json!({
            "TaskName": request.task,
            "SamplingFrequency": raw.sfreq,
            "PowerLineFrequency": request.line_freq,
            "AssociatedEmptyRoom": empty_room_entry,
        });
        std::fs::write(&sidecar_path, serde_json::to_string_pretty(&sidecar)?)?;

        Self::write_events_tsv(
            &base.with_file_name(format!(
                "{}_events.tsv",
                base.file_name().unwrap_or_default().to_string_lossy()
            )),
            request,
        )?;
        Self::write_channels_tsv(
            &base.with_file_name(format!(
                "{}_channels.tsv",
                base.file_name().unwrap_or_default().to_string_lossy()
            )),
            raw,
        )?;
        Ok(())
    }

    fn write_calibration(&self, subject: &str, cal_file: &Path) -> Result<()> {
        let meg_dir = self.meg_dir(subject);
        std::fs::create_dir_all(&meg_dir)?;
        std::fs::copy(
            cal_file,
            meg_dir.join(format!("sub-{}_acq-calibration_meg.dat", subject)),
        )?;
        Ok(())
    }

    fn write_crosstalk(&self, subject: &str, ct_file: &Path) -> Result<()> {
        let meg_dir = self.meg_dir(subject);
        std::fs::create_dir_all(&meg_dir)?;
        std::fs::copy(
            ct_file,
            meg_dir.join(format!("sub-{}_acq-crosstalk_meg.fif", subject)),
        )?;
        Ok(())
    }

    fn mark_bad_channels(
        &self,
        subject: &str,
        run: &str,
        task: &str,
        channels: &[String],
    ) -> Result<()> {
        let path = self.entry_base(subject, task, run).with_file_name(format!(
            "sub-{}_task-{}_run-{}_channels.tsv",
            subject, task, run
        ));
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ConvertError::subject(
                subject,
                format!("cannot mark bad channels, {} unreadable: {}", path.display(), e),
            )
        })?;

        let mut lines: Vec<String> = Vec::new();
        let mut marked = 0usize;
        for line in content.lines() {
            let mut fields: Vec<&str> = line.split('\t').collect();
            if fields.len() == 3 && channels.iter().any(|ch| ch == fields[0]) {
                fields[2] = "bad";
                marked += 1;
            }
            lines.push(fields.join("\t"));
        }
        if marked != channels.len() {
            return Err(ConvertError::subject(
                subject,
                format!(
                    "only {} of {} bad channels found in {}",
                    marked,
                    channels.len(),
                    path.display()
                ),
            ));
        }
        std::fs::write(&path, lines.join("\n") + "\n")?;
        Ok(())
    }

    fn write_anat(&self, subject: &str, image: &Path) -> Result<()> {
        let anat_dir = self.root.join(format!("sub-{}", subject)).join("anat");
        std::fs::create_dir_all(&anat_dir)?;
        let file_name = image.file_name().ok_or_else(|| {
            ConvertError::Config(format!("invalid anat image path: {}", image.display()))
        })?;
        std::fs::copy(image, anat_dir.join(file_name))?;
        Ok(())
    }
}
