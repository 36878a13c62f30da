//! Applying external stimuli to the State Store

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::HospitalConfig;
use crate::domain::{Patient, Stimulus, UnitCensus};
use crate::error::{CareError, Result};
use crate::store::{write_with_retry, RetryPolicy, StateKey, StateStore, StateValue, Update};

const INGEST_WRITER: &str = "ingest";

/// Write each configured unit's starting census unless one is already stored
pub async fn seed_census(
    store: &dyn StateStore,
    hospital: &HospitalConfig,
    retry: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut seeded = 0;
    for unit in &hospital.units {
        let key = StateKey::Census(unit.id.clone());
        let outcome = write_with_retry(store, &key, INGEST_WRITER, retry, |current| {
            Ok::<_, CareError>(match current {
                Some(_) => Update::Skip,
                None => Update::Write(StateValue::Census(UnitCensus::from_config(unit, now))),
            })
        })
        .await?;
        if outcome.written {
            seeded += 1;
        }
    }
    if seeded > 0 {
        info!("Seeded census for {} unit(s)", seeded);
    }
    Ok(seeded)
}

/// Apply `stimulus` at event time `now`. Returns false when the stimulus
/// changed nothing (a re-delivered vitals sample).
pub async fn apply_stimulus(
    store: &dyn StateStore,
    retry: &RetryPolicy,
    stimulus: &Stimulus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let outcome = match stimulus {
        Stimulus::Arrival {
            patient_id,
            arrival,
            at,
        } => {
            if let Some(sample) = &arrival.vitals {
                sample.validate()?;
            }
            let key = StateKey::Patient(patient_id.clone());
            write_with_retry(store, &key, INGEST_WRITER, retry, |current| {
                let mut patient = match current {
                    Some(value) => value.as_patient(&key)?.clone(),
                    None => Patient::new(patient_id.clone(), None, *at),
                };
                if arrival.location.is_some() {
                    patient.location = arrival.location.clone();
                }
                for tag in &arrival.history_tags {
                    if !patient.history_tags.contains(tag) {
                        patient.history_tags.push(tag.clone());
                    }
                }
                if let Some(sample) = &arrival.vitals {
                    patient.append_vitals(sample.clone())?;
                }
                Ok::<_, CareError>(Update::Write(StateValue::Patient(patient)))
            })
            .await?
        }

        Stimulus::Vitals { patient_id, sample } => {
            sample.validate()?;
            let key = StateKey::Patient(patient_id.clone());
            write_with_retry(store, &key, INGEST_WRITER, retry, |current| {
                let Some(value) = current else {
                    return Err(CareError::InvalidStimulus(format!(
                        "vitals for unknown patient {patient_id}"
                    )));
                };
                let mut patient = value.as_patient(&key)?.clone();
                if !patient.append_vitals(sample.clone())? {
                    debug!("Duplicate vitals for {} at {}", patient_id, sample.timestamp);
                    return Ok(Update::Skip);
                }
                Ok(Update::Write(StateValue::Patient(patient)))
            })
            .await?
        }

        Stimulus::Bed(change) => {
            let key = StateKey::Census(change.unit_id.clone());
            write_with_retry(store, &key, INGEST_WRITER, retry, |current| {
                let mut census = census_for(&key, current)?;
                census.apply_bed_change(change, now)?;
                Ok::<_, CareError>(Update::Write(StateValue::Census(census)))
            })
            .await?
        }

        Stimulus::Shift(change) => {
            let key = StateKey::Census(change.unit_id.clone());
            write_with_retry(store, &key, INGEST_WRITER, retry, |current| {
                let mut census = census_for(&key, current)?;
                census.apply_shift(change, now)?;
                Ok::<_, CareError>(Update::Write(StateValue::Census(census)))
            })
            .await?
        }
    };

    Ok(outcome.written)
}

fn census_for(key: &StateKey, current: Option<&StateValue>) -> Result<UnitCensus> {
    match current {
        Some(value) => Ok(value.as_census(key)?.clone()),
        None => Err(CareError::InvalidStimulus(format!("unknown unit {}", key.id()))),
    }
}
