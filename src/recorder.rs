use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::info;

use crate::drivers::AcquisitionError;
use crate::types::{MeasurementRecord, MeasurementType};

/// Receives each finished measurement.
pub trait Persistence: Send + Sync {
    fn save(&self, record: MeasurementRecord) -> Result<(), AcquisitionError>;
}

/// Writes each measurement to `<dir>/<CV|CA>_<yy_MM_dd>_<n>.json`.
pub struct JsonFileRecorder {
    dir: PathBuf,
    // serializes index selection so two saves never pick the same name
    naming: Mutex<()>,
}

impl JsonFileRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            naming: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Saves `record` and returns the path written.
    pub fn write(&self, record: &MeasurementRecord) -> Result<PathBuf, AcquisitionError> {
        let _naming = self.naming.lock().unwrap_or_else(PoisonError::into_inner);
        fs::create_dir_all(&self.dir)?;
        let kind = record.measurement_type();
        let index = self.next_index(kind)?;
        let date = chrono::Local::now().format("%y_%m_%d");
        let path = self.dir.join(format!("{}_{}_{}.json", kind.tag(), date, index));
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut writer, record)?;
        writer.flush()?;
        info!("💾 {} samples saved to {}", record.len(), path.display());
        Ok(path)
    }

    // existing result files of this type, plus one
    fn next_index(&self, kind: MeasurementType) -> Result<usize, AcquisitionError> {
        let mut count = 0;
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(kind.tag()) && name.ends_with(".json") {
                count += 1;
            }
        }
        Ok(count + 1)
    }
}

impl Persistence for JsonFileRecorder {
    fn save(&self, record: MeasurementRecord) -> Result<(), AcquisitionError> {
        self.write(&record).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaSample, CvSample};

    #[test]
    fn numbers_files_per_measurement_type() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonFileRecorder::new(dir.path());
        let cv = MeasurementRecord::Cv(vec![CvSample {
            pwm: 0.0,
            raw_value: 1.0,
            filtered_value: 0.5,
        }]);
        let ca = MeasurementRecord::Ca(Vec::new());
        let first = recorder.write(&cv).unwrap();
        let second = recorder.write(&cv).unwrap();
        let other = recorder.write(&ca).unwrap();
        let name = |p: &PathBuf| p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name(&first).starts_with("CV_") && name(&first).ends_with("_1.json"));
        assert!(name(&second).ends_with("_2.json"));
        assert!(name(&other).starts_with("CA_") && name(&other).ends_with("_1.json"));
    }

    #[test]
    fn file_holds_plain_sample_array() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonFileRecorder::new(dir.path().join("results"));
        let ca = MeasurementRecord::Ca(vec![CaSample {
            time: 0.1,
            raw_value: 2.0,
            filtered_value: 1.75,
        }]);
        let path = recorder.write(&ca).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([{"time": 0.1, "valCalRaw": 2.0, "valCalFiltered": 1.75}])
        );
    }
}
