//! End-to-end tests of the per-subject driver and the run loop.

mod common;

use common::*;
use meg2bids::{
    convert_subject, run_conversion, BidsTreeWriter, ConvertOptions, MatrixReader,
    TriggerChannelSet,
};

fn lines(names: &[&str]) -> TriggerChannelSet {
    TriggerChannelSet::Lines(names.iter().map(|s| s.to_string()).collect())
}

#[test]
fn test_end_to_end_conversion_with_bids_tree() {
    let project = project(lines(&["STI001", "STI002", "STI003"]));

    // spoken_word (1) at 1000, written_word (4) at 2000, spoken_noise (2) at 3000.
    let raw = recording_with_pulses(
        &["STI001", "STI002", "STI003", "MEG0111"],
        5000,
        1000.0,
        &[(0, 1000, 50), (2, 2000, 50), (1, 3000, 50)],
    );
    write_recording(&project.raw_dir(), "run1_raw.meg", &raw);

    let er = recording_with_pulses(&["STI001", "STI002", "STI003", "MEG0111"], 1000, 1000.0, &[]);
    write_recording(&project.emptyroom_dir(), "er_raw.meg", &er);

    let mut subjects = subject_json(&project, Some("01"));
    subjects["subj1"]["meg_emptyroom_dir"] =
        serde_json::json!(project.emptyroom_dir());
    subjects["subj1"]["meg_raw_files"] = serde_json::json!([
        {"file": "run1_raw.meg", "run": "01", "task": "listen"},
        {"file": "er_raw.meg", "run": "emptyroom", "task": "listen"}
    ]);
    subjects["subj1"]["meg_bad_channels"] = serde_json::json!(["MEG0111"]);
    project.write_subject_info(&subjects);

    let reader = MatrixReader::new();
    let writer = BidsTreeWriter::new(&project.settings.bids_raw_root);
    let report = run_conversion(
        &project.settings,
        &reader,
        &writer,
        ConvertOptions::default(),
    )
    .unwrap();

    assert!(report.all_succeeded());
    assert_eq!(report.converted, vec!["subj1"]);

    let meg_dir = project.settings.bids_raw_root.join("sub-01/meg");
    assert!(meg_dir.join("sub-01_task-listen_run-01_meg.json").exists());
    assert!(meg_dir.join("sub-01_task-listen_run-01_meg.meg").exists());
    assert!(meg_dir.join("sub-01_acq-calibration_meg.dat").exists());
    assert!(meg_dir.join("sub-01_acq-crosstalk_meg.fif").exists());
    assert!(meg_dir.join("sub-01_task-emptyroom_meg.meg").exists());

    // Latency correction: auditory +28, visual +34 samples at 1000 Hz.
    let events_tsv =
        std::fs::read_to_string(meg_dir.join("sub-01_task-listen_run-01_events.tsv")).unwrap();
    assert!(events_tsv.contains("1.028000\t0.0\t1028\tspoken_word\t1"));
    assert!(events_tsv.contains("2.034000\t0.0\t2034\twritten_word\t4"));
    assert!(events_tsv.contains("3.028000\t0.0\t3028\tspoken_noise\t2"));

    let channels_tsv =
        std::fs::read_to_string(meg_dir.join("sub-01_task-listen_run-01_channels.tsv")).unwrap();
    assert!(channels_tsv.contains("MEG0111\tmeg\tbad"));

    // Scratch data purged by default.
    assert!(!project.settings.sourcedata_root.exists());
}

#[test]
fn test_correction_applied_exactly_once() {
    let project = project(lines(&["STI001"]));

    let raw = recording_with_pulses(&["STI001"], 2000, 1000.0, &[(0, 500, 50)]);
    write_recording(&project.raw_dir(), "run1_raw.meg", &raw);
    project.write_subject_info(&subject_json(&project, Some("01")));

    let subjects = subjects_from_json(&subject_json(&project, Some("01")));
    let dictionary = load_event_dictionary(&project);
    let writer = CapturingWriter::default();

    convert_subject(
        &project.settings,
        "subj1",
        &subjects["subj1"],
        &dictionary,
        &MatrixReader::new(),
        &writer,
    )
    .unwrap();

    let writes = writer.raw_writes.lock().unwrap();
    assert_eq!(writes.len(), 1);
    // spoken_word onset 500 shifted by exactly 28 samples, not 56: the
    // driver runs the correction once per event array.
    assert_eq!(writes[0].events.len(), 1);
    assert_eq!(writes[0].events[0].sample, 528);
}

#[test]
fn test_correction_skipped_when_disabled() {
    let mut project = project(lines(&["STI001"]));
    project.settings.adjust_event_times = false;

    let raw = recording_with_pulses(&["STI001"], 2000, 1000.0, &[(0, 500, 50)]);
    write_recording(&project.raw_dir(), "run1_raw.meg", &raw);

    let subjects = subjects_from_json(&subject_json(&project, Some("01")));
    let dictionary = load_event_dictionary(&project);
    let writer = CapturingWriter::default();

    convert_subject(
        &project.settings,
        "subj1",
        &subjects["subj1"],
        &dictionary,
        &MatrixReader::new(),
        &writer,
    )
    .unwrap();

    let writes = writer.raw_writes.lock().unwrap();
    assert_eq!(writes[0].events[0].sample, 500);
}

#[test]
fn test_multiple_emptyroom_files_fatal_and_nothing_written() {
    let project = project(lines(&["STI001"]));

    let raw = recording_with_pulses(&["STI001"], 1000, 1000.0, &[]);
    write_recording(&project.raw_dir(), "run1_raw.meg", &raw);
    write_recording(&project.emptyroom_dir(), "er1_raw.meg", &raw);
    write_recording(&project.emptyroom_dir(), "er2_raw.meg", &raw);

    let mut subjects = subject_json(&project, Some("01"));
    subjects["subj1"]["meg_emptyroom_dir"] = serde_json::json!(project.emptyroom_dir());
    subjects["subj1"]["meg_raw_files"] = serde_json::json!([
        {"file": "run1_raw.meg", "run": "01", "task": "listen"},
        {"file": "er1_raw.meg", "run": "emptyroom", "task": "listen"},
        {"file": "er2_raw.meg", "run": "emptyroom", "task": "listen"}
    ]);

    let records = subjects_from_json(&subjects);
    let dictionary = load_event_dictionary(&project);
    let writer = CapturingWriter::default();

    let err = convert_subject(
        &project.settings,
        "subj1",
        &records["subj1"],
        &dictionary,
        &MatrixReader::new(),
        &writer,
    )
    .unwrap_err()
    .to_string();

    assert!(err.contains("subj1"));
    assert!(err.contains("emptyroom"));
    assert_eq!(writer.total_calls(), 0);
}

#[test]
fn test_failing_subject_does_not_stop_the_loop() {
    let project = project(lines(&["STI001"]));

    // subj1's recording has neither the configured line nor STI101.
    let broken = recording_with_pulses(&["MEG0111"], 1000, 1000.0, &[]);
    write_recording(&project.raw_dir(), "broken_raw.meg", &broken);
    let good = recording_with_pulses(&["STI001"], 1000, 1000.0, &[(0, 100, 50)]);
    write_recording(&project.raw_dir(), "good_raw.meg", &good);

    let subjects = serde_json::json!({
        "subj1": {
            "bids_id": "01",
            "meg_id": "meg23_104",
            "meg_raw_dir": project.raw_dir(),
            "meg_emptyroom_dir": null,
            "meg_raw_files": [{"file": "broken_raw.meg", "run": "01", "task": "listen"}],
            "meg_bad_channels": []
        },
        "subj2": {
            "bids_id": "02",
            "meg_id": "meg23_105",
            "meg_raw_dir": project.raw_dir(),
            "meg_emptyroom_dir": null,
            "meg_raw_files": [{"file": "good_raw.meg", "run": "01", "task": "listen"}],
            "meg_bad_channels": []
        }
    });
    project.write_subject_info(&subjects);

    let reader = MatrixReader::new();
    let writer = BidsTreeWriter::new(&project.settings.bids_raw_root);
    let report = run_conversion(
        &project.settings,
        &reader,
        &writer,
        ConvertOptions::default(),
    )
    .unwrap();

    assert_eq!(report.converted, vec!["subj2"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].subject, "subj1");
    assert!(project
        .settings
        .bids_raw_root
        .join("sub-02/meg/sub-02_task-listen_run-01_events.tsv")
        .exists());
}

#[test]
fn test_subject_without_bids_id_is_skipped() {
    let project = project(lines(&["STI001"]));
    let raw = recording_with_pulses(&["STI001"], 1000, 1000.0, &[]);
    write_recording(&project.raw_dir(), "run1_raw.meg", &raw);
    project.write_subject_info(&subject_json(&project, None));

    let reader = MatrixReader::new();
    let writer = BidsTreeWriter::new(&project.settings.bids_raw_root);
    let report = run_conversion(
        &project.settings,
        &reader,
        &writer,
        ConvertOptions::default(),
    )
    .unwrap();

    assert_eq!(report.skipped, vec!["subj1"]);
    assert!(report.converted.is_empty());
    assert!(report.all_succeeded());
}

#[test]
fn test_keep_source_data_retains_scratch_dir() {
    let project = project(lines(&["STI001"]));
    let raw = recording_with_pulses(&["STI001"], 1000, 1000.0, &[(0, 100, 50)]);
    write_recording(&project.raw_dir(), "run1_raw.meg", &raw);
    project.write_subject_info(&subject_json(&project, Some("01")));

    let reader = MatrixReader::new();
    let writer = BidsTreeWriter::new(&project.settings.bids_raw_root);
    run_conversion(
        &project.settings,
        &reader,
        &writer,
        ConvertOptions {
            keep_existing_folders: false,
            keep_source_data: true,
        },
    )
    .unwrap();

    assert!(project.settings.sourcedata_root.join("sub-01").exists());
}

#[cfg(unix)]
mod external_tools {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(path: &std::path::Path, body: &str) {
        std::fs::write(path, body).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_vectorview_fixer_runs_on_staged_copy_only() {
        let mut project = project(lines(&["STI001"]));
        let log_path = project.root().join("fixer_invocations.log");
        let fixer = project.root().join("fake_fixer");
        write_script(
            &fixer,
            &format!("#!/bin/sh\necho \"$@\" >> {}\nexit 0\n", log_path.display()),
        );
        project.settings.meg_system = meg2bids::MegSystem::VectorView;
        project.settings.check_eeg_cmd = Some(fixer);

        let mut raw = recording_with_pulses(&["STI001"], 1000, 1000.0, &[(0, 100, 50)]);
        raw.has_eeg = true;
        let original = write_recording(&project.raw_dir(), "run1_raw.meg", &raw);
        let original_bytes = std::fs::read(&original).unwrap();

        let subjects = subjects_from_json(&subject_json(&project, Some("01")));
        let dictionary = load_event_dictionary(&project);
        let writer = CapturingWriter::default();

        convert_subject(
            &project.settings,
            "subj1",
            &subjects["subj1"],
            &dictionary,
            &MatrixReader::new(),
            &writer,
        )
        .unwrap();

        let staged = project
            .settings
            .sourcedata_root
            .join("sub-01/run1_raw.meg");
        let logged = std::fs::read_to_string(&log_path).unwrap();
        assert!(logged.contains(staged.to_str().unwrap()));
        assert!(!logged.contains(original.to_str().unwrap()));
        // The original recording is never mutated in place.
        assert_eq!(std::fs::read(&original).unwrap(), original_bytes);
    }

    #[test]
    fn test_triux_never_invokes_fixer() {
        let mut project = project(lines(&["STI001"]));
        let fixer = project.root().join("fake_fixer");
        write_script(&fixer, "#!/bin/sh\nexit 1\n"); // would fail if invoked
        project.settings.check_eeg_cmd = Some(fixer);

        let mut raw = recording_with_pulses(&["STI001"], 1000, 1000.0, &[(0, 100, 50)]);
        raw.has_eeg = true;
        write_recording(&project.raw_dir(), "run1_raw.meg", &raw);

        let subjects = subjects_from_json(&subject_json(&project, Some("01")));
        let dictionary = load_event_dictionary(&project);
        let writer = CapturingWriter::default();

        convert_subject(
            &project.settings,
            "subj1",
            &subjects["subj1"],
            &dictionary,
            &MatrixReader::new(),
            &writer,
        )
        .unwrap();
    }

    #[test]
    fn test_structural_conversion_delegates_to_dcm2niix() {
        let mut project = project(lines(&["STI001"]));
        let converter = project.root().join("fake_dcm2niix");
        // Mimics `dcm2niix -o <dir> -f <stem> -m y -z y <dcm_dir>`.
        write_script(&converter, "#!/bin/sh\ntouch \"$2/$4.nii.gz\"\nexit 0\n");
        project.settings.convert_mri = true;
        project.settings.dcm2niix_cmd = converter.display().to_string();

        let raw = recording_with_pulses(&["STI001"], 1000, 1000.0, &[(0, 100, 50)]);
        write_recording(&project.raw_dir(), "run1_raw.meg", &raw);
        let dcm_dir = project.root().join("dicom");
        std::fs::create_dir_all(&dcm_dir).unwrap();

        let mut subjects = subject_json(&project, Some("01"));
        subjects["subj1"]["mri_id"] = serde_json::json!("mri23_88");
        subjects["subj1"]["mri_dcm_dir"] = serde_json::json!(dcm_dir);
        let records = subjects_from_json(&subjects);
        let dictionary = load_event_dictionary(&project);
        let writer = CapturingWriter::default();

        convert_subject(
            &project.settings,
            "subj1",
            &records["subj1"],
            &dictionary,
            &MatrixReader::new(),
            &writer,
        )
        .unwrap();

        let anat = writer.anat_writes.lock().unwrap();
        assert_eq!(anat.len(), 1);
        assert_eq!(anat[0].0, "01");
        assert!(anat[0].1.ends_with("sub-01_T1w.nii.gz"));
    }

    #[test]
    fn test_fixer_failure_aborts_subject_before_write() {
        let mut project = project(lines(&["STI001"]));
        let fixer = project.root().join("failing_fixer");
        write_script(&fixer, "#!/bin/sh\nexit 2\n");
        project.settings.meg_system = meg2bids::MegSystem::VectorView;
        project.settings.check_eeg_cmd = Some(fixer);

        let mut raw = recording_with_pulses(&["STI001"], 1000, 1000.0, &[(0, 100, 50)]);
        raw.has_eeg = true;
        write_recording(&project.raw_dir(), "run1_raw.meg", &raw);

        let subjects = subjects_from_json(&subject_json(&project, Some("01")));
        let dictionary = load_event_dictionary(&project);
        let writer = CapturingWriter::default();

        let err = convert_subject(
            &project.settings,
            "subj1",
            &subjects["subj1"],
            &dictionary,
            &MatrixReader::new(),
            &writer,
        )
        .unwrap_err();

        assert!(matches!(err, meg2bids::ConvertError::ExternalTool { .. }));
        assert!(writer.raw_writes.lock().unwrap().is_empty());
    }
}
