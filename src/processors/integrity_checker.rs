use crate::models::{FactWeatherRow, StarSchema};
use crate::utils::constants::{
    MAX_VALID_PRESSURE_HPA, MAX_VALID_TEMP_C, MIN_VALID_PRESSURE_HPA, MIN_VALID_TEMP_C,
};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub total_facts: usize,
    pub valid_facts: usize,
    pub suspect_facts: usize,
    pub missing_value_facts: usize,
    /// Facts whose time or location key has no dimension row.
    pub orphan_facts: usize,
    /// Dimension rows no fact refers to.
    pub unreferenced_times: usize,
    pub unreferenced_locations: usize,
    pub violations: Vec<FactViolation>,
}

impl IntegrityReport {
    pub fn is_referentially_sound(&self) -> bool {
        self.orphan_facts == 0 && self.unreferenced_times == 0 && self.unreferenced_locations == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FactViolation {
    pub time_id: i64,
    pub location_id: i64,
    pub violation_type: ViolationType,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationType {
    TemperatureOutOfRange,
    MinGreaterThanMax,
    PressureOutOfRange,
    NegativePrecipitation,
    CloudCoverOutOfRange,
    OrphanKey,
}

/// Checks a projected star schema before it is loaded. Findings are
/// reported, never fatal.
pub struct IntegrityChecker {
    max_reported_violations: usize,
}

impl IntegrityChecker {
    pub fn new() -> Self {
        Self {
            max_reported_violations: 1000,
        }
    }

    pub fn check_integrity(&self, star: &StarSchema) -> IntegrityReport {
        let mut report = IntegrityReport {
            total_facts: star.facts.len(),
            ..Default::default()
        };

        let time_ids: HashSet<i64> = star.dim_time.iter().map(|t| t.time_id).collect();
        let location_ids: HashSet<i64> = star.dim_location.iter().map(|l| l.location_id).collect();
        let mut used_times = HashSet::new();
        let mut used_locations = HashSet::new();

        for fact in &star.facts {
            used_times.insert(fact.time_id);
            used_locations.insert(fact.location_id);

            if !time_ids.contains(&fact.time_id) || !location_ids.contains(&fact.location_id) {
                report.orphan_facts += 1;
                self.push(
                    &mut report,
                    fact,
                    ViolationType::OrphanKey,
                    "fact key has no dimension row".to_string(),
                );
            }

            if has_missing_value(fact) {
                report.missing_value_facts += 1;
            }

            if self.check_ranges(fact, &mut report) {
                report.suspect_facts += 1;
            } else {
                report.valid_facts += 1;
            }
        }

        report.unreferenced_times = time_ids.difference(&used_times).count();
        report.unreferenced_locations = location_ids.difference(&used_locations).count();
        report
    }

    /// Physical plausibility checks; returns true when anything was flagged.
    fn check_ranges(&self, fact: &FactWeatherRow, report: &mut IntegrityReport) -> bool {
        let mut flagged = false;

        let temps = [
            (fact.temperature_c, "temperature"),
            (fact.dewpoint_c, "dewpoint"),
            (fact.max_temp_c, "max temperature"),
            (fact.min_temp_c, "min temperature"),
        ];
        for (temp, name) in temps {
            if temp.is_finite() && !(MIN_VALID_TEMP_C..=MAX_VALID_TEMP_C).contains(&temp) {
                flagged = true;
                self.push(
                    report,
                    fact,
                    ViolationType::TemperatureOutOfRange,
                    format!(
                        "{} {} is outside valid range [{}, {}]",
                        name, temp, MIN_VALID_TEMP_C, MAX_VALID_TEMP_C
                    ),
                );
            }
        }

        if fact.min_temp_c > fact.max_temp_c {
            flagged = true;
            self.push(
                report,
                fact,
                ViolationType::MinGreaterThanMax,
                format!("min {} > max {}", fact.min_temp_c, fact.max_temp_c),
            );
        }

        if fact.pressure_hpa.is_finite()
            && !(MIN_VALID_PRESSURE_HPA..=MAX_VALID_PRESSURE_HPA).contains(&fact.pressure_hpa)
        {
            flagged = true;
            self.push(
                report,
                fact,
                ViolationType::PressureOutOfRange,
                format!("pressure {} hPa", fact.pressure_hpa),
            );
        }

        if fact.precipitation_mm < 0.0 {
            flagged = true;
            self.push(
                report,
                fact,
                ViolationType::NegativePrecipitation,
                format!("precipitation {} mm", fact.precipitation_mm),
            );
        }

        if fact.cloud_cover.is_finite() && !(0.0..=1.0).contains(&fact.cloud_cover) {
            flagged = true;
            self.push(
                report,
                fact,
                ViolationType::CloudCoverOutOfRange,
                format!("cloud cover {}", fact.cloud_cover),
            );
        }

        flagged
    }

    fn push(
        &self,
        report: &mut IntegrityReport,
        fact: &FactWeatherRow,
        violation_type: ViolationType,
        details: String,
    ) {
        if report.violations.len() < self.max_reported_violations {
            report.violations.push(FactViolation {
                time_id: fact.time_id,
                location_id: fact.location_id,
                violation_type,
                details,
            });
        }
    }

    /// Generate a summary report
    pub fn generate_summary(&self, report: &IntegrityReport) -> String {
        let pct = |n: usize| {
            if report.total_facts == 0 {
                0.0
            } else {
                100.0 * n as f64 / report.total_facts as f64
            }
        };

        let mut summary = String::new();
        summary.push_str("=== Integrity Check Report ===\n");
        summary.push_str(&format!("Total Facts: {}\n", report.total_facts));
        summary.push_str(&format!(
            "Valid Facts: {} ({:.1}%)\n",
            report.valid_facts,
            pct(report.valid_facts)
        ));
        summary.push_str(&format!(
            "Suspect Facts: {} ({:.1}%)\n",
            report.suspect_facts,
            pct(report.suspect_facts)
        ));
        summary.push_str(&format!(
            "Facts With Missing Values: {}\n",
            report.missing_value_facts
        ));
        summary.push_str(&format!(
            "Orphan Facts: {}\nUnreferenced Dimension Rows: {} time, {} location\n",
            report.orphan_facts, report.unreferenced_times, report.unreferenced_locations
        ));
        summary.push_str(&format!("\nViolations: {}\n", report.violations.len()));

        if !report.violations.is_empty() {
            summary.push_str("\nTop 10 Violations:\n");
            for (i, violation) in report.violations.iter().take(10).enumerate() {
                summary.push_str(&format!(
                    "  {}. time {} location {}: {}\n",
                    i + 1,
                    violation.time_id,
                    violation.location_id,
                    violation.details
                ));
            }
        }

        summary
    }
}

impl Default for IntegrityChecker {
    fn default() -> Self {
        Self::new()
    }
}

fn has_missing_value(fact: &FactWeatherRow) -> bool {
    [
        fact.temperature_c,
        fact.dewpoint_c,
        fact.max_temp_c,
        fact.min_temp_c,
        fact.pressure_hpa,
        fact.wind_speed_ms,
    ]
    .iter()
    .any(|v| v.is_nan())
        || [fact.precipitation_mm, fact.cloud_cover, fact.solar_radiation]
            .iter()
            .any(|v| v.is_nan())
}
