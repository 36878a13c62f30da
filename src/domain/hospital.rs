use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::UnitConfig;
use crate::error::{CareError, Result};

/// Bed lifecycle states tracked per unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BedState {
    Available,
    Occupied,
    Reserved,
    Cleaning,
    Maintenance,
}

impl BedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BedState::Available => "available",
            BedState::Occupied => "occupied",
            BedState::Reserved => "reserved",
            BedState::Cleaning => "cleaning",
            BedState::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for BedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One bed moving between states in a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BedChange {
    pub unit_id: String,
    pub from: BedState,
    pub to: BedState,
    /// When the bed is expected back in service (cleaning, planned discharge)
    #[serde(default)]
    pub expected_available_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftAction {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftChange {
    pub unit_id: String,
    pub action: ShiftAction,
    #[serde(default = "default_shift_count")]
    pub count: u32,
}

fn default_shift_count() -> u32 {
    1
}

/// Bed and staff counters for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCensus {
    pub unit_id: String,
    pub total_beds: u32,
    pub available: u32,
    pub occupied: u32,
    pub reserved: u32,
    pub cleaning: u32,
    pub maintenance: u32,
    pub staff_on_duty: u32,
    /// Expected bed releases, earliest first
    #[serde(default)]
    pub expected_releases: Vec<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UnitCensus {
    pub fn from_config(unit: &UnitConfig, now: DateTime<Utc>) -> Self {
        let occupied = unit.occupied_beds.min(unit.total_beds);
        Self {
            unit_id: unit.id.clone(),
            total_beds: unit.total_beds,
            available: unit.total_beds - occupied,
            occupied,
            reserved: 0,
            cleaning: 0,
            maintenance: 0,
            staff_on_duty: unit.staff_on_duty,
            expected_releases: Vec::new(),
            updated_at: now,
        }
    }

    pub fn count(&self, state: BedState) -> u32 {
        match state {
            BedState::Available => self.available,
            BedState::Occupied => self.occupied,
            BedState::Reserved => self.reserved,
            BedState::Cleaning => self.cleaning,
            BedState::Maintenance => self.maintenance,
        }
    }

    fn counter_mut(&mut self, state: BedState) -> &mut u32 {
        match state {
            BedState::Available => &mut self.available,
            BedState::Occupied => &mut self.occupied,
            BedState::Reserved => &mut self.reserved,
            BedState::Cleaning => &mut self.cleaning,
            BedState::Maintenance => &mut self.maintenance,
        }
    }

    pub fn occupancy_rate(&self) -> f64 {
        if self.total_beds == 0 {
            return 1.0;
        }
        f64::from(self.occupied) / f64::from(self.total_beds)
    }

    pub fn earliest_release(&self) -> Option<DateTime<Utc>> {
        self.expected_releases.first().copied()
    }

    pub fn apply_bed_change(&mut self, change: &BedChange, now: DateTime<Utc>) -> Result<()> {
        if change.from == change.to {
            return Err(CareError::InvalidStimulus(format!(
                "bed change in {} does not change state ({})",
                self.unit_id, change.from
            )));
        }
        if self.count(change.from) == 0 {
            return Err(CareError::InvalidStimulus(format!(
                "no {} bed in {} to move to {}",
                change.from, self.unit_id, change.to
            )));
        }
        *self.counter_mut(change.from) -= 1;
        *self.counter_mut(change.to) += 1;

        if change.to == BedState::Available && !self.expected_releases.is_empty() {
            self.expected_releases.remove(0);
        }
        if let Some(at) = change.expected_available_at {
            if change.to != BedState::Available {
                let pos = self.expected_releases.partition_point(|t| *t <= at);
                self.expected_releases.insert(pos, at);
            }
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn apply_shift(&mut self, change: &ShiftChange, now: DateTime<Utc>) -> Result<()> {
        match change.action {
            ShiftAction::Start => {
                self.staff_on_duty =
                    self.staff_on_duty.checked_add(change.count).ok_or_else(|| {
                        CareError::Validation(format!(
                            "{} starting shift in {} overflows staff count {}",
                            change.count, self.unit_id, self.staff_on_duty
                        ))
                    })?;
            }
            ShiftAction::End => {
                self.staff_on_duty =
                    self.staff_on_duty.checked_sub(change.count).ok_or_else(|| {
                        CareError::InvalidStimulus(format!(
                            "{} ending shift in {} but only {} on duty",
                            change.count, self.unit_id, self.staff_on_duty
                        ))
                    })?;
            }
        }
        self.updated_at = now;
        Ok(())
    }
}
