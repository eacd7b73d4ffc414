// CRUCIBLE OUTPUT PARSER
// TWO ENCODINGS COME OFF THE DEVICE: GOOGLE-BENCHMARK STYLE PREFIXED
// LINES (`BM_sendVec_binder/4  150000 ns`) AND A SINGLE JSON BLOB WITH
// PER-PAIR SAMPLE ARRAYS. PARSING IS TOTAL OVER WELL-FORMED INPUT --
// ANYTHING UNPARSABLE FAILS AND NAMES THE OFFENDING FRAGMENT.

use regex::Regex;
use serde_json::Value;

use crate::error::{BenchError, Result};

// STATUS SENTINEL THE STRUCTURED ENCODING MUST CARRY: THE SCHEDULER
// HONORED PRIORITY INHERITANCE. WITHOUT IT THE NUMBERS ARE MEANINGLESS.
pub const INHERITANCE_FIELD: &str = "inheritance";
pub const INHERITANCE_PASS: &str = "PASS";

// ORDERED (LABEL, NANOSECONDS) MEASUREMENTS.
// INSERTION ORDER = ORDER OF APPEARANCE IN THE RAW OUTPUT.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LatencySeries {
    points: Vec<(String, i64)>,
}

impl LatencySeries {
    // DUPLICATE LABELS MEAN THE BENCHMARK EMITTED THE SAME CASE TWICE --
    // A PARSE ANOMALY, NOT A MEASUREMENT
    pub fn push(&mut self, label: String, ns: i64) -> Result<()> {
        if self.points.iter().any(|(l, _)| *l == label) {
            return Err(BenchError::MalformedOutput(format!(
                "duplicate label `{label}`"
            )));
        }
        self.points.push((label, ns));
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, i64)> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.points.iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn values(&self) -> Vec<i64> {
        self.points.iter().map(|(_, v)| *v).collect()
    }
}

// PREFIXED-LINE ENCODING. LINES WITHOUT THE FAMILY PREFIX ARE LOG NOISE,
// NOT ERRORS. LABEL = FIRST TOKEN MINUS PREFIX, VALUE = THE NEXT TOKEN
// PARSED AS INTEGER NANOSECONDS. TRAILING UNIT TOKENS ARE IGNORED.
pub fn parse_prefixed_lines(lines: &[String], prefix: &str) -> Result<LatencySeries> {
    let mut series = LatencySeries::default();
    for line in lines {
        if !line.starts_with(prefix) {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| BenchError::MalformedOutput(format!("blank benchmark line `{line}`")))?;
        let value = tokens.next().ok_or_else(|| {
            BenchError::MalformedOutput(format!("no value field in line `{line}`"))
        })?;
        let ns: i64 = value.parse().map_err(|_| {
            BenchError::MalformedOutput(format!(
                "bad nanosecond value `{value}` in line `{line}`"
            ))
        })?;
        let label = name.strip_prefix(prefix).unwrap_or(name).to_string();
        series.push(label, ns)?;
    }
    Ok(series)
}

// ONE SERIES PER CPU PAIR: `fifo_<i>_data` CARRIES THE SAMPLES FOR PAIR i
#[derive(Clone, Debug, PartialEq)]
pub struct PairSeries {
    pub pair:    u32,
    pub samples: Vec<i64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LatencyReport {
    pub pairs: Vec<PairSeries>,
}

// STRUCTURED ENCODING: ONE JSON OBJECT. THE INHERITANCE SENTINEL GATES
// EVERYTHING -- ABSENT OR NOT "PASS" MEANS THE PLATFORM GUARANTEE THE
// BENCHMARK DEPENDS ON DID NOT HOLD. UNKNOWN FIELDS ARE IGNORED.
pub fn parse_latency_report(raw: &str) -> Result<LatencyReport> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| BenchError::MalformedOutput(format!("invalid json: {e}")))?;
    let map = value
        .as_object()
        .ok_or_else(|| BenchError::MalformedOutput("json root is not an object".to_string()))?;

    match map.get(INHERITANCE_FIELD).and_then(Value::as_str) {
        Some(INHERITANCE_PASS) => {}
        other => {
            return Err(BenchError::InvariantViolation(format!(
                "scheduler priority inheritance not honored ({INHERITANCE_FIELD}={other:?})"
            )));
        }
    }

    let field = Regex::new(r"^fifo_(\d+)_data$").expect("pair field regex");
    let mut pairs = Vec::new();
    for (key, val) in map {
        let Some(caps) = field.captures(key) else {
            continue;
        };
        let pair: u32 = caps[1].parse().map_err(|_| {
            BenchError::MalformedOutput(format!("pair index out of range in `{key}`"))
        })?;
        let arr = val.as_array().ok_or_else(|| {
            BenchError::MalformedOutput(format!("field `{key}` is not an array"))
        })?;
        let mut samples = Vec::with_capacity(arr.len());
        for v in arr {
            samples.push(v.as_i64().ok_or_else(|| {
                BenchError::MalformedOutput(format!("non-integer sample {v} in `{key}`"))
            })?);
        }
        pairs.push(PairSeries { pair, samples });
    }

    // serde_json KEEPS OBJECT KEYS SORTED LEXICALLY (fifo_10 BEFORE fifo_2)
    pairs.sort_by_key(|p| p.pair);
    Ok(LatencyReport { pairs })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn prefixed_lines_extract_in_order() {
        let input = lines(&[
            "BM_sendVec_binder/4 150000 ns",
            "other line",
            "BM_sendVec_binder/2k 180000 ns",
        ]);
        let series = parse_prefixed_lines(&input, "BM_sendVec_binder/").unwrap();
        assert_eq!(
            series.iter().cloned().collect::<Vec<_>>(),
            vec![("4".to_string(), 150000), ("2k".to_string(), 180000)]
        );
    }

    #[test]
    fn prefixed_lines_ignore_non_matching() {
        let input = lines(&["noise", "", "BM_other/4 99 ns"]);
        let series = parse_prefixed_lines(&input, "BM_sendVec_binder/").unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn prefixed_lines_ignore_trailing_unit_tokens() {
        let input = lines(&["BM_sendVec_binderize/64k 170001 ns 171000 ns 5000"]);
        let series = parse_prefixed_lines(&input, "BM_sendVec_binderize/").unwrap();
        assert_eq!(series.values(), vec![170001]);
        assert_eq!(series.labels(), vec!["64k"]);
    }

    #[test]
    fn prefixed_lines_bad_value_names_the_line() {
        let input = lines(&["BM_sendVec_binder/4 fast ns"]);
        match parse_prefixed_lines(&input, "BM_sendVec_binder/") {
            Err(BenchError::MalformedOutput(msg)) => {
                assert!(msg.contains("fast"), "missing fragment in `{msg}`");
            }
            other => panic!("expected malformed output, got {other:?}"),
        }
    }

    #[test]
    fn prefixed_lines_missing_value_is_error() {
        let input = lines(&["BM_sendVec_binder/4"]);
        assert!(matches!(
            parse_prefixed_lines(&input, "BM_sendVec_binder/"),
            Err(BenchError::MalformedOutput(_))
        ));
    }

    #[test]
    fn duplicate_label_is_parse_anomaly() {
        let input = lines(&[
            "BM_sendVec_binder/4 150000 ns",
            "BM_sendVec_binder/4 150001 ns",
        ]);
        assert!(matches!(
            parse_prefixed_lines(&input, "BM_sendVec_binder/"),
            Err(BenchError::MalformedOutput(_))
        ));
    }

    #[test]
    fn latency_report_parses_pairs() {
        let report =
            parse_latency_report(r#"{"inheritance":"PASS","fifo_0_data":[1,2,3]}"#).unwrap();
        assert_eq!(
            report.pairs,
            vec![PairSeries {
                pair: 0,
                samples: vec![1, 2, 3]
            }]
        );
    }

    #[test]
    fn latency_report_orders_pairs_numerically() {
        let report = parse_latency_report(
            r#"{"inheritance":"PASS","fifo_10_data":[10],"fifo_2_data":[2],"fifo_0_data":[0]}"#,
        )
        .unwrap();
        let order: Vec<u32> = report.pairs.iter().map(|p| p.pair).collect();
        assert_eq!(order, vec![0, 2, 10]);
    }

    #[test]
    fn latency_report_ignores_unknown_fields() {
        let report = parse_latency_report(
            r#"{"inheritance":"PASS","ALL_AVG":12.5,"fifo_0_data":[7]}"#,
        )
        .unwrap();
        assert_eq!(report.pairs.len(), 1);
    }

    #[test]
    fn missing_sentinel_is_invariant_violation() {
        assert!(matches!(
            parse_latency_report(r#"{"fifo_0_data":[1]}"#),
            Err(BenchError::InvariantViolation(_))
        ));
    }

    #[test]
    fn failed_sentinel_is_invariant_violation() {
        assert!(matches!(
            parse_latency_report(r#"{"inheritance":"FAIL","fifo_0_data":[1]}"#),
            Err(BenchError::InvariantViolation(_))
        ));
    }

    #[test]
    fn non_integer_sample_names_the_field() {
        match parse_latency_report(r#"{"inheritance":"PASS","fifo_0_data":[1,"x"]}"#) {
            Err(BenchError::MalformedOutput(msg)) => {
                assert!(msg.contains("fifo_0_data"), "missing field in `{msg}`");
            }
            other => panic!("expected malformed output, got {other:?}"),
        }
    }

    #[test]
    fn invalid_json_is_malformed_output() {
        assert!(matches!(
            parse_latency_report("not json"),
            Err(BenchError::MalformedOutput(_))
        ));
    }
}
