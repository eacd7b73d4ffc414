// CRUCIBLE REGRESSION THRESHOLDS
// MAXIMUM ALLOWED NANOSECONDS PER (BITNESS, SIZE LABEL). THE TABLES ARE
// VERSIONED CONFIGURATION, NOT COMPUTED. LABELS ABSENT FROM A TABLE ARE
// NOT VALIDATED -- ALLOW-LIST POLICY, NOT A COMPLETENESS CHECK.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::parser::LatencySeries;

// WORD SIZE THE BENCHMARK BINARY WAS COMPILED FOR
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bitness {
    #[serde(rename = "32")]
    Bits32,
    #[serde(rename = "64")]
    Bits64,
}

impl Bitness {
    pub fn word(self) -> u32 {
        match self {
            Bitness::Bits32 => 32,
            Bitness::Bits64 => 64,
        }
    }

    pub fn from_word(word: u32) -> Option<Self> {
        match word {
            32 => Some(Bitness::Bits32),
            64 => Some(Bitness::Bits64),
            _ => None,
        }
    }
}

impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.word())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdTable {
    limits: BTreeMap<Bitness, BTreeMap<String, i64>>,
}

impl ThresholdTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bits: Bitness, label: &str, max_ns: i64) {
        self.limits
            .entry(bits)
            .or_default()
            .insert(label.to_string(), max_ns);
    }

    pub fn limit(&self, bits: Bitness, label: &str) -> Option<i64> {
        self.limits.get(&bits).and_then(|m| m.get(label)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.values().all(|m| m.is_empty())
    }

    // EXTERNAL TABLE OVERRIDE: {"32": {"4": 150000, ...}, "64": {...}}
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading threshold table {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("parsing threshold table {}", path.display()))
    }
}

// ONE MEASUREMENT AT OR OVER ITS LIMIT
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub label:    String,
    pub observed: i64,
    pub limit:    i64,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ns for {} is not under the threshold {} ns",
            self.observed, self.label, self.limit
        )
    }
}

// STRICT LESS-THAN GATE: A VALUE EXACTLY AT ITS LIMIT IS A VIOLATION.
// COLLECTS EVERY VIOLATION -- THE CALLER REPORTS THEM TOGETHER.
pub fn validate(series: &LatencySeries, bits: Bitness, table: &ThresholdTable) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (label, ns) in series.iter() {
        if let Some(limit) = table.limit(bits, label) {
            if *ns >= limit {
                violations.push(Violation {
                    label: label.clone(),
                    observed: *ns,
                    limit,
                });
            }
        }
    }
    violations
}

// SHIPPED TABLES. VALUES CARRY OVER FROM THE ORIGINAL GATE CONFIGURATION
// FOR THE BINDER AND HWBINDER ROUNDTRIP FAMILIES.

const SIZE_LABELS: [&str; 15] = [
    "4", "8", "16", "32", "64", "128", "256", "512", "1024", "2k", "4k", "8k", "16k", "32k",
    "64k",
];

const BINDER_NS: [i64; 15] = [
    150000, 150000, 150000, 150000, 150000, 150000, 150000, 150000, 150000, 200000, 300000,
    400000, 600000, 800000, 1000000,
];

const HWBINDER_32_NS: [i64; 15] = [
    100000, 100000, 100000, 100000, 100000, 100000, 100000, 100000, 100000, 100000, 100000,
    110000, 120000, 140000, 170000,
];

const HWBINDER_64_NS: [i64; 15] = [
    100000, 100000, 100000, 100000, 100000, 100000, 100000, 100000, 100000, 100000, 100000,
    110000, 120000, 150000, 200000,
];

fn table_from(rows: &[(Bitness, &[i64; 15])]) -> ThresholdTable {
    let mut table = ThresholdTable::empty();
    for (bits, limits) in rows {
        for (label, max_ns) in SIZE_LABELS.iter().zip(limits.iter()) {
            table.insert(*bits, label, *max_ns);
        }
    }
    table
}

// BINDER ROUNDTRIP: SAME LIMITS FOR BOTH WORD SIZES
pub fn binder_thresholds() -> ThresholdTable {
    table_from(&[(Bitness::Bits32, &BINDER_NS), (Bitness::Bits64, &BINDER_NS)])
}

// HWBINDER ROUNDTRIP: 64-BIT GETS MORE HEADROOM AT THE LARGE SIZES
pub fn hwbinder_thresholds() -> ThresholdTable {
    table_from(&[
        (Bitness::Bits32, &HWBINDER_32_NS),
        (Bitness::Bits64, &HWBINDER_64_NS),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(points: &[(&str, i64)]) -> LatencySeries {
        let mut s = LatencySeries::default();
        for (label, ns) in points {
            s.push(label.to_string(), *ns).unwrap();
        }
        s
    }

    #[test]
    fn value_at_threshold_is_violation() {
        let s = series(&[("4", 150000)]);
        let v = validate(&s, Bitness::Bits32, &binder_thresholds());
        assert_eq!(
            v,
            vec![Violation {
                label: "4".to_string(),
                observed: 150000,
                limit: 150000
            }]
        );
    }

    #[test]
    fn value_below_threshold_passes() {
        let s = series(&[("4", 149999)]);
        assert!(validate(&s, Bitness::Bits32, &binder_thresholds()).is_empty());
    }

    #[test]
    fn absent_label_never_violates() {
        let s = series(&[("128k", 999999999), ("warmup", 5)]);
        assert!(validate(&s, Bitness::Bits32, &binder_thresholds()).is_empty());
        assert!(validate(&s, Bitness::Bits64, &hwbinder_thresholds()).is_empty());
    }

    #[test]
    fn all_violations_collected() {
        let s = series(&[("4", 150000), ("8", 1000), ("2k", 250000)]);
        let v = validate(&s, Bitness::Bits32, &binder_thresholds());
        let labels: Vec<&str> = v.iter().map(|x| x.label.as_str()).collect();
        assert_eq!(labels, vec!["4", "2k"]);
    }

    #[test]
    fn hwbinder_tables_diverge_at_large_sizes() {
        let t = hwbinder_thresholds();
        assert_eq!(t.limit(Bitness::Bits32, "64k"), Some(170000));
        assert_eq!(t.limit(Bitness::Bits64, "64k"), Some(200000));
        assert_eq!(t.limit(Bitness::Bits32, "4"), t.limit(Bitness::Bits64, "4"));
    }

    #[test]
    fn table_round_trips_through_json() {
        let json = r#"{"32": {"4": 150000}, "64": {"4": 170000}}"#;
        let t: ThresholdTable = serde_json::from_str(json).unwrap();
        assert_eq!(t.limit(Bitness::Bits32, "4"), Some(150000));
        assert_eq!(t.limit(Bitness::Bits64, "4"), Some(170000));
        assert_eq!(t.limit(Bitness::Bits64, "8"), None);
    }

    #[test]
    fn empty_table_validates_nothing() {
        let s = series(&[("4", i64::MAX)]);
        assert!(validate(&s, Bitness::Bits32, &ThresholdTable::empty()).is_empty());
    }
}
