use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One exercise inside a workout log, as edited by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseEntry {
    pub exercise_id: String,
    pub sets: u32,
    pub reps: Vec<u32>,
    pub weights: Vec<f64>,
    pub completed: Vec<bool>,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bodyweight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    #[error("exercise #{index} has an empty exercise id")]
    MissingExerciseId { index: usize },
    #[error(
        "exercise '{exercise_id}' declares {sets} sets but has {reps} reps, {weights} weights, {completed} completion flags"
    )]
    SetCountMismatch {
        exercise_id: String,
        sets: u32,
        reps: usize,
        weights: usize,
        completed: usize,
    },
    #[error("exercise '{exercise_id}' has an invalid weight {value}")]
    InvalidWeight { exercise_id: String, value: f64 },
    #[error("exercise '{exercise_id}' has an invalid bodyweight {value}")]
    InvalidBodyweight { exercise_id: String, value: f64 },
}

impl ExerciseEntry {
    pub fn new(exercise_id: impl Into<String>, sets: u32) -> Self {
        let len = sets as usize;
        Self {
            exercise_id: exercise_id.into(),
            sets,
            reps: vec![0; len],
            weights: vec![0.0; len],
            completed: vec![false; len],
            notes: String::new(),
            bodyweight: None,
        }
    }

    pub fn validate(&self, index: usize) -> Result<(), BatchError> {
        if self.exercise_id.trim().is_empty() {
            return Err(BatchError::MissingExerciseId { index });
        }

        let sets = self.sets as usize;
        if self.reps.len() != sets || self.weights.len() != sets || self.completed.len() != sets
        {
            return Err(BatchError::SetCountMismatch {
                exercise_id: self.exercise_id.clone(),
                sets: self.sets,
                reps: self.reps.len(),
                weights: self.weights.len(),
                completed: self.completed.len(),
            });
        }

        if let Some(value) = self
            .weights
            .iter()
            .copied()
            .find(|weight| !weight.is_finite() || *weight < 0.0)
        {
            return Err(BatchError::InvalidWeight {
                exercise_id: self.exercise_id.clone(),
                value,
            });
        }

        if let Some(value) = self.bodyweight {
            if !value.is_finite() || value <= 0.0 {
                return Err(BatchError::InvalidBodyweight {
                    exercise_id: self.exercise_id.clone(),
                    value,
                });
            }
        }

        Ok(())
    }

    pub fn completed_sets(&self) -> usize {
        self.completed.iter().filter(|done| **done).count()
    }
}

pub fn validate_batch(batch: &[ExerciseEntry]) -> Result<(), BatchError> {
    batch
        .iter()
        .enumerate()
        .try_for_each(|(index, entry)| entry.validate(index))
}

#[cfg(test)]
mod tests {
    use super::{validate_batch, BatchError, ExerciseEntry};

    fn squat() -> ExerciseEntry {
        ExerciseEntry {
            exercise_id: "squat".to_string(),
            sets: 3,
            reps: vec![5, 5, 5],
            weights: vec![100.0, 100.0, 102.5],
            completed: vec![true, true, false],
            notes: "belt on last set".to_string(),
            bodyweight: None,
        }
    }

    #[test]
    fn accepts_consistent_entries() {
        let entry = squat();
        assert!(entry.validate(0).is_ok());
        assert_eq!(entry.completed_sets(), 2);
        assert!(ExerciseEntry::new("pullup", 4).validate(0).is_ok());
    }

    #[test]
    fn rejects_set_count_mismatch() {
        let mut entry = squat();
        entry.completed.pop();
        let err = validate_batch(&[entry]).expect_err("mismatch should be rejected");
        assert!(matches!(err, BatchError::SetCountMismatch { sets: 3, completed: 2, .. }));
    }

    #[test]
    fn rejects_missing_id_and_bad_numbers() {
        let mut unnamed = squat();
        unnamed.exercise_id = "  ".to_string();
        assert_eq!(
            validate_batch(&[squat(), unnamed]),
            Err(BatchError::MissingExerciseId { index: 1 })
        );

        let mut negative = squat();
        negative.weights[1] = -5.0;
        assert!(matches!(
            validate_batch(&[negative]),
            Err(BatchError::InvalidWeight { .. })
        ));

        let mut bodyweight = squat();
        bodyweight.bodyweight = Some(f64::NAN);
        assert!(matches!(
            validate_batch(&[bodyweight]),
            Err(BatchError::InvalidBodyweight { .. })
        ));
    }

    #[test]
    fn bodyweight_is_optional_in_json() {
        let parsed: ExerciseEntry = serde_json::from_str(
            r#"{"exercise_id":"dip","sets":1,"reps":[8],"weights":[0.0],"completed":[true]}"#,
        )
        .expect("entry should parse");
        assert_eq!(parsed.notes, "");
        assert_eq!(parsed.bodyweight, None);
        assert!(parsed.validate(0).is_ok());
    }
}
