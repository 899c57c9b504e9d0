//! Raw recording boundary.
//!
//! Proprietary acquisition formats are read by external integrations; the
//! pipeline only needs channel names, the sampling rate, the first-sample
//! offset and per-channel data, which is what [`RawRecording`] carries.
//! [`MatrixReader`] handles the staged interchange format used by the bundled
//! tooling and the test suite: a JSON manifest next to a little-endian `f64`
//! sample matrix.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};

/// In-memory view of one raw recording.
#[derive(Debug, Clone)]
pub struct RawRecording {
    /// Path the recording was read from.
    pub path: PathBuf,
    /// Channel names, in data row order.
    pub channel_names: Vec<String>,
    /// Sampling rate in Hz.
    pub sfreq: f64,
    /// Index of the first stored sample on the acquisition clock.
    pub first_samp: i64,
    /// Whether the recording contains EEG channels.
    pub has_eeg: bool,
    /// Power line frequency stamped on the recording, if known.
    pub line_freq: Option<f64>,
    /// Sample data, channels × time.
    pub data: Array2<f64>,
}

impl RawRecording {
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channel_names.iter().position(|ch| ch == name)
    }

    /// Copy out the rows for the named channels, in the order given.
    pub fn channel_data(&self, names: &[String]) -> Result<Array2<f64>> {
        let mut out = Array2::zeros((names.len(), self.n_samples()));
        for (i, name) in names.iter().enumerate() {
            let idx = self.channel_index(name).ok_or_else(|| {
                ConvertError::DecodeAmbiguity(format!(
                    "channel {} not present in recording {}",
                    name,
                    self.path.display()
                ))
            })?;
            out.row_mut(i).assign(&self.data.row(idx));
        }
        Ok(out)
    }
}

/// Reader side of the raw-format boundary.
pub trait RawReader {
    fn read_raw(&self, path: &Path) -> Result<RawRecording>;

    /// Copy a recording into `dest_dir` so external tools can mutate it
    /// without touching the original. Returns the staged path.
    ///
    /// The default implementation copies the single file at `path`; readers
    /// of multi-file formats override this to carry their side files along.
    fn stage(&self, path: &Path, dest_dir: &Path) -> Result<PathBuf> {
        let file_name = path.file_name().ok_or_else(|| {
            ConvertError::Config(format!("invalid recording path: {}", path.display()))
        })?;
        let dest = dest_dir.join(file_name);
        std::fs::copy(path, &dest)?;
        Ok(dest)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MatrixManifest {
    channel_names: Vec<String>,
    sfreq: f64,
    #[serde(default)]
    first_samp: i64,
    #[serde(default)]
    has_eeg: bool,
    #[serde(default)]
    line_freq: Option<f64>,
    /// Sample matrix file, relative to the manifest.
    data_file: String,
}

/// Reader for the staged matrix format: a JSON manifest (`.meg` by
/// convention) plus a row-major little-endian `f64` matrix (channels × time).
#[derive(Debug, Default, Clone)]
pub struct MatrixReader;

impl MatrixReader {
    pub fn new() -> Self {
        MatrixReader
    }

    /// Write a recording in the staged matrix format. The manifest goes to
    /// `path` and the sample matrix to the sibling `.dat` file it points at.
    pub fn write(path: &Path, recording: &RawRecording) -> Result<()> {
        let data_file = path.with_extension("dat");
        let manifest = MatrixManifest {
            channel_names: recording.channel_names.clone(),
            sfreq: recording.sfreq,
            first_samp: recording.first_samp,
            has_eeg: recording.has_eeg,
            line_freq: recording.line_freq,
            data_file: data_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&manifest)?)?;

        let mut writer = BufWriter::new(std::fs::File::create(&data_file)?);
        for &v in recording.data.iter() {
            writer.write_f64::<LittleEndian>(v)?;
        }
        Ok(())
    }
}

impl RawReader for MatrixReader {
    fn read_raw(&self, path: &Path) -> Result<RawRecording> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConvertError::Config(format!(
                "cannot read recording manifest {}: {}",
                path.display(),
                e
            ))
        })?;
        let manifest: MatrixManifest = serde_json::from_str(&content).map_err(|e| {
            ConvertError::Config(format!(
                "malformed recording manifest {}: {}",
                path.display(),
                e
            ))
        })?;

        let n_channels = manifest.channel_names.len();
        if n_channels == 0 {
            return Err(ConvertError::Config(format!(
                "recording manifest {} lists no channels",
                path.display()
            )));
        }
        if manifest.sfreq <= 0.0 {
            return Err(ConvertError::Config(format!(
                "recording manifest {} has non-positive sfreq",
                path.display()
            )));
        }

        let data_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&manifest.data_file);
        let n_bytes = std::fs::metadata(&data_path)?.len() as usize;
        if n_bytes % (8 * n_channels) != 0 {
            return Err(ConvertError::Config(format!(
                "sample matrix {} is not a whole number of {}-channel frames",
                data_path.display(),
                n_channels
            )));
        }
        let n_samples = n_bytes / 8 / n_channels;

        let mut reader = BufReader::new(std::fs::File::open(&data_path)?);
        let mut values = vec![0.0f64; n_channels * n_samples];
        reader.read_f64_into::<LittleEndian>(&mut values)?;
        let data = Array2::from_shape_vec((n_channels, n_samples), values)
            .expect("shape checked against byte length");

        Ok(RawRecording {
            path: path.to_path_buf(),
            channel_names: manifest.channel_names,
            sfreq: manifest.sfreq,
            first_samp: manifest.first_samp,
            has_eeg: manifest.has_eeg,
            line_freq: manifest.line_freq,
            data,
        })
    }

    fn stage(&self, path: &Path, dest_dir: &Path) -> Result<PathBuf> {
        // Carry the sample matrix along with the manifest.
        let file_name = path.file_name().ok_or_else(|| {
            ConvertError::Config(format!("invalid recording path: {}", path.display()))
        })?;
        let dest = dest_dir.join(file_name);
        std::fs::copy(path, &dest)?;

        let data_file = path.with_extension("dat");
        if data_file.exists() {
            std::fs::copy(&data_file, dest.with_extension("dat"))?;
        }
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_recording() -> RawRecording {
        let data = Array2::from_shape_vec(
            (2, 4),
            vec![0.0, 5.0, 5.0, 0.0, 1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        RawRecording {
            path: "unused".into(),
            channel_names: vec!["STI001".into(), "STI002".into()],
            sfreq: 1000.0,
            first_samp: 120,
            has_eeg: true,
            line_freq: Some(50.0),
            data,
        }
    }

    #[test]
    fn test_matrix_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = tmp.path().join("run1_raw.meg");
        let original = sample_recording();
        MatrixReader::write(&manifest, &original).unwrap();

        let read = MatrixReader::new().read_raw(&manifest).unwrap();
        assert_eq!(read.channel_names, original.channel_names);
        assert_eq!(read.sfreq, 1000.0);
        assert_eq!(read.first_samp, 120);
        assert!(read.has_eeg);
        assert_eq!(read.line_freq, Some(50.0));
        assert_eq!(read.data, original.data);
    }

    #[test]
    fn test_channel_data_preserves_requested_order() {
        let rec = sample_recording();
        let picked = rec
            .channel_data(&["STI002".to_string(), "STI001".to_string()])
            .unwrap();
        assert_eq!(picked[[0, 0]], 1.0);
        assert_eq!(picked[[1, 1]], 5.0);
    }

    #[test]
    fn test_channel_data_unknown_channel() {
        let rec = sample_recording();
        let err = rec.channel_data(&["STI016".to_string()]).unwrap_err();
        assert!(matches!(err, ConvertError::DecodeAmbiguity(_)));
    }

    #[test]
    fn test_stage_copies_manifest_and_matrix() {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tmp.path().join("raw");
        let dest_dir = tmp.path().join("staged");
        std::fs::create_dir_all(&src_dir).unwrap();
        std::fs::create_dir_all(&dest_dir).unwrap();

        let manifest = src_dir.join("run1_raw.meg");
        MatrixReader::write(&manifest, &sample_recording()).unwrap();

        let reader = MatrixReader::new();
        let staged = reader.stage(&manifest, &dest_dir).unwrap();
        assert!(staged.exists());
        assert!(staged.with_extension("dat").exists());

        let read = reader.read_raw(&staged).unwrap();
        assert_eq!(read.n_samples(), 4);
    }

    #[test]
    fn test_truncated_matrix_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = tmp.path().join("run1_raw.meg");
        MatrixReader::write(&manifest, &sample_recording()).unwrap();

        // Chop the data file mid-frame.
        let data_file = manifest.with_extension("dat");
        let bytes = std::fs::read(&data_file).unwrap();
        std::fs::write(&data_file, &bytes[..bytes.len() - 4]).unwrap();

        assert!(MatrixReader::new().read_raw(&manifest).is_err());
    }
}
