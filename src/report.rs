// CRUCIBLE RESULT REPORTING
// EVERY PARSED SERIES GOES TO THE PROFILING SINK UNCONDITIONALLY -- A
// REGRESSION THAT FAILS THE GATE STILL BELONGS IN THE HISTORICAL DATA.
// SINK FAILURES ARE PRINTED AND SWALLOWED: LOCAL TEST SIGNAL NEVER
// DEPENDS ON SINK AVAILABILITY.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;

use crate::parser::LatencySeries;

pub trait ProfilingSink {
    fn add_labeled_vector(
        &mut self,
        name: &str,
        labels: &[String],
        values: &[i64],
        x_axis: &str,
        y_axis: &str,
        options: &[String],
    ) -> anyhow::Result<()>;

    fn add_unlabeled_vector(
        &mut self,
        name: &str,
        values: &[i64],
        x_axis: &str,
        y_axis: &str,
        options: &[String],
    ) -> anyhow::Result<()>;
}

pub struct Reporter {
    sink: Box<dyn ProfilingSink>,
}

impl Reporter {
    pub fn new(sink: Box<dyn ProfilingSink>) -> Self {
        Self { sink }
    }

    pub fn upload_labeled(
        &mut self,
        name: &str,
        series: &LatencySeries,
        x_axis: &str,
        y_axis: &str,
        options: &[String],
    ) {
        let labels = series.labels();
        let values = series.values();
        if let Err(e) = self
            .sink
            .add_labeled_vector(name, &labels, &values, x_axis, y_axis, options)
        {
            eprintln!("PROFILING UPLOAD FAILED FOR {name}: {e}");
        }
    }

    pub fn upload_unlabeled(
        &mut self,
        name: &str,
        values: &[i64],
        x_axis: &str,
        y_axis: &str,
        options: &[String],
    ) {
        if let Err(e) = self
            .sink
            .add_unlabeled_vector(name, values, x_axis, y_axis, options)
        {
            eprintln!("PROFILING UPLOAD FAILED FOR {name}: {e}");
        }
    }
}

// LOCAL SINK: ONE JSON RECORD PER UPLOAD, APPEND-ONLY, INSPECTABLE WITH
// ANY JSONL TOOLING
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn append<T: Serialize>(&self, record: &T) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        serde_json::to_writer(&mut file, record)?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

#[derive(Serialize)]
struct SinkRecord<'a> {
    ts_ns:   u64,
    name:    &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels:  Option<&'a [String]>,
    values:  &'a [i64],
    x_axis:  &'a str,
    y_axis:  &'a str,
    options: &'a [String],
}

impl ProfilingSink for JsonlSink {
    fn add_labeled_vector(
        &mut self,
        name: &str,
        labels: &[String],
        values: &[i64],
        x_axis: &str,
        y_axis: &str,
        options: &[String],
    ) -> anyhow::Result<()> {
        self.append(&SinkRecord {
            ts_ns: now_ns(),
            name,
            labels: Some(labels),
            values,
            x_axis,
            y_axis,
            options,
        })
    }

    fn add_unlabeled_vector(
        &mut self,
        name: &str,
        values: &[i64],
        x_axis: &str,
        y_axis: &str,
        options: &[String],
    ) -> anyhow::Result<()> {
        self.append(&SinkRecord {
            ts_ns: now_ns(),
            name,
            labels: None,
            values,
            x_axis,
            y_axis,
            options,
        })
    }
}

// DISCARDS EVERYTHING -- FOR RUNS WITH NO SINK CONFIGURED
pub struct NullSink;

impl ProfilingSink for NullSink {
    fn add_labeled_vector(
        &mut self,
        _name: &str,
        _labels: &[String],
        _values: &[i64],
        _x_axis: &str,
        _y_axis: &str,
        _options: &[String],
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn add_unlabeled_vector(
        &mut self,
        _name: &str,
        _values: &[i64],
        _x_axis: &str,
        _y_axis: &str,
        _options: &[String],
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::LatencySeries;

    struct FailingSink;

    impl ProfilingSink for FailingSink {
        fn add_labeled_vector(
            &mut self,
            _name: &str,
            _labels: &[String],
            _values: &[i64],
            _x_axis: &str,
            _y_axis: &str,
            _options: &[String],
        ) -> anyhow::Result<()> {
            anyhow::bail!("sink offline")
        }

        fn add_unlabeled_vector(
            &mut self,
            _name: &str,
            _values: &[i64],
            _x_axis: &str,
            _y_axis: &str,
            _options: &[String],
        ) -> anyhow::Result<()> {
            anyhow::bail!("sink offline")
        }
    }

    #[test]
    fn sink_failure_never_escalates() {
        let mut series = LatencySeries::default();
        series.push("4".to_string(), 100).unwrap();
        let mut reporter = Reporter::new(Box::new(FailingSink));
        // MUST NOT PANIC OR PROPAGATE
        reporter.upload_labeled("s", &series, "x", "y", &[]);
        reporter.upload_unlabeled("s", &[1, 2], "x", "y", &[]);
    }

    #[test]
    fn now_ns_is_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }
}
