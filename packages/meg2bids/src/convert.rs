//! Per-subject conversion driver and the top-level run loop.
//!
//! Strictly sequential: subjects one after the other, recordings within a
//! subject one after the other. Within one subject the first unrecoverable
//! error ends that subject's remaining steps; the run loop records the
//! failure and moves on to the next subject.

use serde::Serialize;

use crate::bids::{DatasetWriter, WriteRequest};
use crate::config::{MegSystem, Settings};
use crate::error::{ConvertError, Result};
use crate::events::{
    adjust_event_times, event_value_counts, EventDictionary, LatencyCorrection,
};
use crate::recording::RawReader;
use crate::subjects::{check_subject_info, load_subject_info, split_empty_room, SubjectRecord};
use crate::tools::{DicomConverter, EegLocationFixer};

/// Folder retention switches of the top-level run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertOptions {
    /// Keep existing output folders instead of purging them first.
    pub keep_existing_folders: bool,
    /// Keep the scratch sourcedata folder after the run.
    pub keep_source_data: bool,
}

/// Outcome of one subject that failed.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectFailure {
    pub subject: String,
    pub error: String,
}

/// Summary of a whole conversion run.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub started_at: String,
    pub converted: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<SubjectFailure>,
}

impl ConversionReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Convert one subject's recordings (and optionally their structural scan).
///
/// Step order per recording: EEG-location repair (gated), trigger decoding,
/// event-time correction (gated, applied exactly once), delegated write,
/// bad-channel annotation. The empty-room recording is held out first and
/// passed to every write; the structural conversion runs last and its
/// failure does not undo MEG output already written.
pub fn convert_subject(
    settings: &Settings,
    subject_label: &str,
    record: &SubjectRecord,
    event_dictionary: &EventDictionary,
    reader: &dyn RawReader,
    writer: &dyn DatasetWriter,
) -> Result<()> {
    let bids_id = record.bids_id.as_deref().ok_or_else(|| {
        ConvertError::subject(subject_label, "cannot convert a subject without a bids_id")
    })?;
    log::info!(
        "converting {} (bids id {}, meg id {})",
        subject_label,
        bids_id,
        record.meg_id
    );

    // Resolve the empty-room situation before anything is written; more than
    // one baseline recording is fatal for the subject.
    let (raw_files, emptyroom) = split_empty_room(subject_label, &record.meg_raw_files)?;

    let sourcedata_dir = settings.sourcedata_root.join(format!("sub-{}", bids_id));
    std::fs::create_dir_all(&sourcedata_dir)?;

    // Calibration and cross-talk files for the configured system are part of
    // every subject's dataset entry.
    writer.write_calibration(bids_id, settings.cal_file_path())?;
    writer.write_crosstalk(bids_id, settings.ct_file_path())?;

    let raw_er = match &emptyroom {
        Some(er_info) => {
            let er_dir = record.meg_emptyroom_dir.as_ref().ok_or_else(|| {
                ConvertError::subject(
                    subject_label,
                    "emptyroom recording listed but meg_emptyroom_dir is null",
                )
            })?;
            let mut raw = reader.read_raw(&er_dir.join(&er_info.file))?;
            raw.line_freq = Some(settings.line_freq);
            Some(raw)
        }
        None => None,
    };

    let correction = if settings.adjust_event_times {
        Some(LatencyCorrection::from_settings(settings, event_dictionary)?)
    } else {
        None
    };

    for file_info in &raw_files {
        let raw_path = record.meg_raw_dir.join(&file_info.file);
        let mut raw = reader.read_raw(&raw_path)?;

        match settings.meg_system {
            MegSystem::Triux => {
                // Triux acquisitions store EEG locations correctly.
                log::info!("meg system is triux, no EEG location fix needed");
            }
            MegSystem::VectorView => {
                if raw.has_eeg {
                    log::info!("checking and fixing EEG locations");
                    let fixer_cmd = settings.check_eeg_cmd.as_ref().ok_or_else(|| {
                        ConvertError::Config("check_eeg_cmd is not configured".to_string())
                    })?;
                    // The fixer mutates its input, so it only ever sees a
                    // staged copy of the recording.
                    let staged = reader.stage(&raw_path, &sourcedata_dir)?;
                    EegLocationFixer::new(fixer_cmd).fix(&staged)?;
                    raw = reader.read_raw(&staged)?;
                } else {
                    log::info!("no EEG channels found, skipping EEG location check");
                }
            }
        }
        raw.line_freq = Some(settings.line_freq);

        let mut events =
            crate::trigger::events_from_trigger_channels(&raw, &settings.event_channels)?;
        log::info!(
            "{} run {}: trigger value counts {:?}",
            file_info.file,
            file_info.run,
            event_value_counts(&events)
        );

        if let Some(correction) = &correction {
            log::info!("adjusting event times for auditory and visual latencies");
            adjust_event_times(&mut events, correction, raw.sfreq);
        }

        writer.write_raw(&WriteRequest {
            subject: bids_id,
            run: &file_info.run,
            task: &file_info.task,
            recording: &raw,
            events: &events,
            event_dictionary,
            empty_room: raw_er.as_ref(),
            line_freq: settings.line_freq,
            overwrite: true,
        })?;

        if !record.meg_bad_channels.is_empty() {
            writer.mark_bad_channels(
                bids_id,
                &file_info.run,
                &file_info.task,
                &record.meg_bad_channels,
            )?;
        }
    }

    if settings.convert_mri {
        match &record.mri_dcm_dir {
            None => {
                log::info!("no MRI dicom directory provided, skipping structural conversion");
            }
            Some(dcm_dir) => {
                log::info!("converting structural MRI data");
                let converter = DicomConverter::new(settings.dcm2niix_cmd.clone());
                let stem = format!("sub-{}_T1w", bids_id);
                let nifti = converter.convert(dcm_dir, &sourcedata_dir, &stem)?;
                writer.write_anat(bids_id, &nifti)?;
            }
        }
    }

    Ok(())
}

fn purge_dir(dir: &std::path::Path) -> Result<()> {
    if dir.exists() {
        log::info!("purging {}", dir.display());
        std::fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Run the whole conversion: validate everything, then convert each subject
/// in turn.
///
/// A failing subject does not stop the loop; its error is recorded in the
/// report and the next subject is attempted. Validation failures abort
/// before any subject starts.
pub fn run_conversion(
    settings: &Settings,
    reader: &dyn RawReader,
    writer: &dyn DatasetWriter,
    options: ConvertOptions,
) -> Result<ConversionReport> {
    settings.validate()?;

    if !options.keep_existing_folders {
        purge_dir(&settings.bids_raw_root)?;
        purge_dir(&settings.sourcedata_root)?;
    }
    std::fs::create_dir_all(&settings.sourcedata_root)?;

    let event_dictionary = EventDictionary::load(&settings.event_info_path)?;
    let subject_info = load_subject_info(&settings.subject_info_path)?;
    check_subject_info(&subject_info)?;

    let mut report = ConversionReport {
        started_at: chrono::Utc::now().to_rfc3339(),
        converted: Vec::new(),
        skipped: Vec::new(),
        failed: Vec::new(),
    };

    for (subject_label, record) in &subject_info {
        if record.bids_id.is_none() {
            log::info!("subject {} has no bids_id, skipping", subject_label);
            report.skipped.push(subject_label.clone());
            continue;
        }
        match convert_subject(
            settings,
            subject_label,
            record,
            &event_dictionary,
            reader,
            writer,
        ) {
            Ok(()) => {
                log::info!("finished subject {}", subject_label);
                report.converted.push(subject_label.clone());
            }
            Err(e) => {
                log::error!("subject {} failed: {}", subject_label, e);
                report.failed.push(SubjectFailure {
                    subject: subject_label.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    if !options.keep_source_data {
        purge_dir(&settings.sourcedata_root)?;
    }

    log::info!(
        "conversion finished: {} converted, {} skipped, {} failed",
        report.converted.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(report)
}
