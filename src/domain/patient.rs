use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CareError, Result};

/// One bedside observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsSample {
    pub timestamp: DateTime<Utc>,
    pub heart_rate: f64,
    #[serde(alias = "blood_pressure_systolic")]
    pub bp_systolic: f64,
    #[serde(alias = "blood_pressure_diastolic")]
    pub bp_diastolic: f64,
    #[serde(alias = "oxygen_saturation")]
    pub spo2: f64,
    pub respiratory_rate: f64,
    pub temperature: f64,
    /// Glasgow coma scale, 3..=15
    #[serde(alias = "glasgow_coma_scale")]
    pub consciousness: u8,
}

impl VitalsSample {
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, f64, f64, f64); 6] = [
            ("heart_rate", self.heart_rate, 0.0, 300.0),
            ("bp_systolic", self.bp_systolic, 0.0, 300.0),
            ("bp_diastolic", self.bp_diastolic, 0.0, 200.0),
            ("spo2", self.spo2, 0.0, 100.0),
            ("respiratory_rate", self.respiratory_rate, 0.0, 60.0),
            ("temperature", self.temperature, 30.0, 45.0),
        ];
        for (name, value, lo, hi) in checks {
            if !value.is_finite() || value < lo || value > hi {
                return Err(CareError::Validation(format!(
                    "{name} {value} outside [{lo}, {hi}]"
                )));
            }
        }
        if !(3..=15).contains(&self.consciousness) {
            return Err(CareError::Validation(format!(
                "consciousness {} outside [3, 15]",
                self.consciousness
            )));
        }
        Ok(())
    }
}

/// A care subject. Vitals are append-only and ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub location: Option<String>,
    #[serde(default)]
    pub history_tags: Vec<String>,
    #[serde(default)]
    pub vitals: Vec<VitalsSample>,
    pub arrived_at: DateTime<Utc>,
}

impl Patient {
    pub fn new(id: impl Into<String>, location: Option<String>, arrived_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            location,
            history_tags: Vec::new(),
            vitals: Vec::new(),
            arrived_at,
        }
    }

    pub fn with_history(mut self, tags: Vec<String>) -> Self {
        self.history_tags = tags;
        self
    }

    pub fn latest_vitals(&self) -> Option<&VitalsSample> {
        self.vitals.last()
    }

    pub fn previous_vitals(&self) -> Option<&VitalsSample> {
        self.vitals.iter().rev().nth(1)
    }

    /// Append a sample. Returns `Ok(false)` when the sample is an exact
    /// repeat of the latest one (redelivered stimulus).
    pub fn append_vitals(&mut self, sample: VitalsSample) -> Result<bool> {
        sample.validate()?;
        if let Some(last) = self.vitals.last() {
            if *last == sample {
                return Ok(false);
            }
            if sample.timestamp <= last.timestamp {
                return Err(CareError::InvalidStimulus(format!(
                    "vitals for {} at {} not after latest sample at {}",
                    self.id, sample.timestamp, last.timestamp
                )));
            }
        }
        self.vitals.push(sample);
        Ok(true)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_append_vitals_enforces_strict_ordering() {
        let mut patient = Patient::new("p1", Some("ED".into()), at(0));
        assert!(patient.append_vitals(normal_vitals(5)).unwrap());
        assert!(patient.append_vitals(normal_vitals(10)).unwrap());

        let err = patient.append_vitals(normal_vitals(7)).unwrap_err();
        assert!(matches!(err, CareError::InvalidStimulus(_)));

        let mut same_time = normal_vitals(10);
        same_time.heart_rate = 90.0;
        assert!(patient.append_vitals(same_time).is_err());
        assert_eq!(patient.vitals.len(), 2);
    }

    #[test]
    fn test_duplicate_sample_is_noop() {
        let mut patient = Patient::new("p1", None, at(0));
        patient.append_vitals(normal_vitals(5)).unwrap();
        assert!(!patient.append_vitals(normal_vitals(5)).unwrap());
        assert_eq!(patient.vitals.len(), 1);
    }

    #[test]
    fn test_previous_vitals() {
        let mut patient = Patient::new("p1", None, at(0));
        assert!(patient.previous_vitals().is_none());
        patient.append_vitals(normal_vitals(1)).unwrap();
        assert!(patient.previous_vitals().is_none());
        patient.append_vitals(normal_vitals(2)).unwrap();
        assert_eq!(patient.previous_vitals().unwrap().timestamp, at(1));
        assert_eq!(patient.latest_vitals().unwrap().timestamp, at(2));
    }

    #[test]
    fn test_sample_validation() {
        let mut sample = normal_vitals(0);
        sample.consciousness = 2;
        assert!(sample.validate().is_err());
        let mut sample = normal_vitals(0);
        sample.spo2 = f64::NAN;
        assert!(sample.validate().is_err());
    }
}
