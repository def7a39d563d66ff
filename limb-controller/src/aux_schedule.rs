use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AuxScheduleError {
    #[error("got {times} sample times for {values} aux values")]
    LengthMismatch { times: usize, values: usize },
    #[error("aux sample times must be finite and non decreasing")]
    UnorderedTimes,
    #[error("aux values must all have the same length")]
    InconsistentValueLength,
}

/// Step function of aux values over time.
///
/// Lookups hold the value of the latest sample at or before the requested time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxSchedule {
    times: Vec<f64>,
    values: Vec<Vec<f64>>,
}

impl AuxSchedule {
    /// Schedule without any samples
    pub fn new() -> AuxSchedule {
        AuxSchedule::default()
    }

    /// Schedule holding `value` from `time` on
    pub fn single(time: f64, value: Vec<f64>) -> AuxSchedule {
        AuxSchedule {
            times: vec![time],
            values: vec![value],
        }
    }

    pub fn from_samples(
        times: Vec<f64>,
        values: Vec<Vec<f64>>,
    ) -> Result<AuxSchedule, AuxScheduleError> {
        if times.len() != values.len() {
            return Err(AuxScheduleError::LengthMismatch {
                times: times.len(),
                values: values.len(),
            });
        }
        if times.iter().any(|time| !time.is_finite())
            || times.windows(2).any(|pair| pair[1] < pair[0])
        {
            return Err(AuxScheduleError::UnorderedTimes);
        }
        if let Some(first) = values.first() {
            if values.iter().any(|value| value.len() != first.len()) {
                return Err(AuxScheduleError::InconsistentValueLength);
            }
        }
        Ok(AuxSchedule { times, values })
    }

    pub fn clear(&mut self) {
        self.times.clear();
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    /// Zero order hold lookup.
    ///
    /// Returns an empty slice if there are no samples and the first value
    /// if `time` precedes every sample.
    pub fn get_aux(&self, time: f64) -> &[f64] {
        if self.values.is_empty() {
            return &[];
        }
        let after = self.times.partition_point(|&sample| sample <= time);
        &self.values[after.saturating_sub(1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_samples() -> AuxSchedule {
        AuxSchedule::from_samples(vec![0.0, 5.0], vec![vec![1.0], vec![2.0]]).unwrap()
    }

    #[test]
    fn empty_schedule_returns_empty_aux() {
        assert!(AuxSchedule::new().get_aux(1.0).is_empty());
    }

    #[test]
    fn holds_previous_sample() {
        let schedule = two_samples();
        assert_eq!(schedule.get_aux(0.0), &[1.0]);
        assert_eq!(schedule.get_aux(2.0), &[1.0]);
        assert_eq!(schedule.get_aux(5.0), &[2.0]);
        assert_eq!(schedule.get_aux(100.0), &[2.0]);
    }

    #[test]
    fn time_before_first_sample_uses_first_value() {
        assert_eq!(two_samples().get_aux(-1.0), &[1.0]);
    }

    #[test]
    fn single_sample() {
        let schedule = AuxSchedule::single(3.0, vec![0.5, 0.25]);
        assert_eq!(schedule.get_aux(0.0), &[0.5, 0.25]);
        assert_eq!(schedule.get_aux(4.0), &[0.5, 0.25]);
    }

    #[test]
    fn clear_removes_samples() {
        let mut schedule = two_samples();
        schedule.clear();
        assert!(schedule.is_empty());
        assert!(schedule.get_aux(0.0).is_empty());
    }

    #[test]
    fn rejects_bad_samples() {
        assert_eq!(
            AuxSchedule::from_samples(vec![0.0], vec![]),
            Err(AuxScheduleError::LengthMismatch {
                times: 1,
                values: 0
            })
        );
        assert_eq!(
            AuxSchedule::from_samples(vec![1.0, 0.0], vec![vec![1.0], vec![2.0]]),
            Err(AuxScheduleError::UnorderedTimes)
        );
        assert_eq!(
            AuxSchedule::from_samples(vec![0.0, 1.0], vec![vec![1.0], vec![2.0, 3.0]]),
            Err(AuxScheduleError::InconsistentValueLength)
        );
    }
}
