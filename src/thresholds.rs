//! Threshold evaluation over one cycle's readings

use crate::types::Readings;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reading strictly above its configured maximum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub name: String,
    pub value: f64,
    pub threshold: f64,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, value = {}, threshold = {}",
            self.name,
            format_value(self.value),
            format_value(self.threshold)
        )
    }
}

/// Vacuum pressures live around 1e-10, so very small and very large
/// magnitudes are written in exponent form.
pub fn format_value(value: f64) -> String {
    let magnitude = value.abs();
    if value != 0.0 && value.is_finite() && !(1e-3..1e6).contains(&magnitude) {
        format!("{value:e}")
    } else {
        format!("{value}")
    }
}

/// Per-channel maxima, iterated in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    limits: Vec<(String, f64)>,
}

impl ThresholdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum for `name`. Re-inserting a name keeps its original
    /// position and replaces the value.
    pub fn insert(&mut self, name: impl Into<String>, threshold: f64) {
        let name = name.into();
        match self.limits.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = threshold,
            None => self.limits.push((name, threshold)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.limits
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.limits.iter().map(|(n, t)| (n.as_str(), *t))
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ThresholdSet {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, threshold) in iter {
            set.insert(name, threshold);
        }
        set
    }
}

/// Compare readings against thresholds.
///
/// Emits one violation per threshold whose reading is strictly greater,
/// in threshold order. Readings without a threshold are ignored, and NaN
/// never violates (the caller reports it as a read error instead).
pub fn evaluate(readings: &Readings, thresholds: &ThresholdSet) -> Vec<Violation> {
    thresholds
        .iter()
        .filter_map(|(name, threshold)| {
            let value = *readings.get(name)?;
            (value > threshold).then(|| Violation {
                name: name.to_string(),
                value,
                threshold,
            })
        })
        .collect()
}

/// Human-readable list used in alert text: `a, value = 2, threshold = 1; b, ...; `
pub fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{v}; "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(pairs: &[(&str, f64)]) -> Readings {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn nan_never_violates() {
        let r = readings(&[("a", f64::NAN), ("b", 5.0)]);
        let t: ThresholdSet = [("a", 1.0), ("b", 1.0)].into_iter().collect();

        let violations = evaluate(&r, &t);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].name, "b");
        assert_eq!(violations[0].value, 5.0);
        assert_eq!(violations[0].threshold, 1.0);
    }

    #[test]
    fn comparison_is_strict() {
        let r = readings(&[("a", 1.0)]);
        let t: ThresholdSet = [("a", 1.0)].into_iter().collect();
        assert!(evaluate(&r, &t).is_empty());
    }

    #[test]
    fn follows_threshold_insertion_order() {
        let r = readings(&[("alpha", 10.0), ("zeta", 10.0), ("mid", 10.0)]);
        let t: ThresholdSet = [("zeta", 1.0), ("alpha", 1.0), ("mid", 1.0)]
            .into_iter()
            .collect();

        let names: Vec<_> = evaluate(&r, &t).into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn unthresholded_and_missing_names_are_skipped() {
        let r = readings(&[("free", 1e9)]);
        let t: ThresholdSet = [("absent", 0.0)].into_iter().collect();
        assert!(evaluate(&r, &t).is_empty());
    }

    #[test]
    fn reinsert_keeps_position() {
        let mut t = ThresholdSet::new();
        t.insert("a", 1.0);
        t.insert("b", 2.0);
        t.insert("a", 3.0);
        let order: Vec<_> = t.iter().collect();
        assert_eq!(order, vec![("a", 3.0), ("b", 2.0)]);
        assert_eq!(t.get("a"), Some(3.0));
    }

    #[test]
    fn values_switch_to_exponent_form_outside_normal_range() {
        assert_eq!(format_value(5.0), "5");
        assert_eq!(format_value(0.25), "0.25");
        assert_eq!(format_value(2e-8), "2e-8");
        assert_eq!(format_value(0.0), "0");
    }

    #[test]
    fn describe_lists_every_violation() {
        let v = vec![Violation {
            name: "main_pressure_in_torr".into(),
            value: 2e-10,
            threshold: 1e-10,
        }];
        assert_eq!(
            describe(&v),
            "main_pressure_in_torr, value = 2e-10, threshold = 1e-10; "
        );
    }
}
