//! Plain-text trace readers.
//!
//! Each reader is a lazy, finite, non-restartable iterator over records of a
//! comma-delimited file. Re-open the source to replay it. Blank lines and
//! lines starting with `#` are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use crate::error::{SimError, SimResult};
use crate::types::SimTime;

/// One customer from an arrival trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalRecord {
    pub inter_arrival: SimTime,
    pub service: SimTime,
}

/// One VM lifetime from a provisioning schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProvisionRecord {
    pub provision_at: SimTime,
    pub deprovision_at: SimTime,
}

/// Line-oriented reader shared by the typed traces.
struct RowReader<R> {
    source_name: String,
    lines: Lines<R>,
    line_no: usize,
}

impl<R: BufRead> RowReader<R> {
    fn new(source_name: String, reader: R) -> Self {
        Self {
            source_name,
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Next non-empty row, parsed into `columns` floats.
    fn next_row(&mut self, columns: usize) -> Option<SimResult<Vec<f64>>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(SimError::Io(e))),
            };
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Some(self.parse(trimmed, columns));
        }
    }

    fn parse(&self, line: &str, columns: usize) -> SimResult<Vec<f64>> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < columns {
            return Err(self.error(format!(
                "expected {columns} column(s), found {}",
                fields.len()
            )));
        }
        fields[..columns]
            .iter()
            .map(|f| {
                f.parse::<f64>()
                    .map_err(|e| self.error(format!("invalid number {f:?}: {e}")))
            })
            .collect()
    }

    fn error(&self, message: String) -> SimError {
        SimError::Trace {
            source_name: self.source_name.clone(),
            line: self.line_no,
            message,
        }
    }
}

fn open(path: &Path) -> SimResult<(String, BufReader<File>)> {
    let file = File::open(path)?;
    Ok((path.display().to_string(), BufReader::new(file)))
}

/// `inter_arrival,service` pairs.
pub struct ArrivalTrace<R> {
    rows: RowReader<R>,
}

impl ArrivalTrace<BufReader<File>> {
    pub fn open(path: &Path) -> SimResult<Self> {
        let (name, reader) = open(path)?;
        Ok(Self::from_reader(name, reader))
    }
}

impl<R: BufRead> ArrivalTrace<R> {
    pub fn from_reader(source_name: impl Into<String>, reader: R) -> Self {
        Self {
            rows: RowReader::new(source_name.into(), reader),
        }
    }
}

impl<R: BufRead> Iterator for ArrivalTrace<R> {
    type Item = SimResult<ArrivalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next_row(2)?;
        Some(row.map(|v| ArrivalRecord {
            inter_arrival: v[0],
            service: v[1],
        }))
    }
}

/// Single-column values: five-minute counts, reserve values, predictions.
pub struct ValueTrace<R> {
    rows: RowReader<R>,
}

impl ValueTrace<BufReader<File>> {
    pub fn open(path: &Path) -> SimResult<Self> {
        let (name, reader) = open(path)?;
        Ok(Self::from_reader(name, reader))
    }
}

impl<R: BufRead> ValueTrace<R> {
    pub fn from_reader(source_name: impl Into<String>, reader: R) -> Self {
        Self {
            rows: RowReader::new(source_name.into(), reader),
        }
    }
}

impl<R: BufRead> Iterator for ValueTrace<R> {
    type Item = SimResult<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next_row(1)?;
        Some(row.map(|v| v[0]))
    }
}

/// `provision_time,deprovision_time` pairs, ordered by provision time.
pub struct ProvisionTrace<R> {
    rows: RowReader<R>,
}

impl ProvisionTrace<BufReader<File>> {
    pub fn open(path: &Path) -> SimResult<Self> {
        let (name, reader) = open(path)?;
        Ok(Self::from_reader(name, reader))
    }
}

impl<R: BufRead> ProvisionTrace<R> {
    pub fn from_reader(source_name: impl Into<String>, reader: R) -> Self {
        Self {
            rows: RowReader::new(source_name.into(), reader),
        }
    }
}

impl<R: BufRead> Iterator for ProvisionTrace<R> {
    type Item = SimResult<ProvisionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next_row(2)?;
        Some(row.and_then(|v| {
            if v[1] < v[0] {
                return Err(self.rows.error(format!(
                    "deprovision time {} precedes provision time {}",
                    v[1], v[0]
                )));
            }
            Ok(ProvisionRecord {
                provision_at: v[0],
                deprovision_at: v[1],
            })
        }))
    }
}

/// Read a whole single-column file into memory.
pub fn read_values(path: &Path) -> SimResult<Vec<f64>> {
    ValueTrace::open(path)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn arrival_trace_parses_pairs_and_skips_comments() {
        let data = "# inter,service\n1.5,10\n\n0.25, 3.0\n";
        let records: Vec<_> = ArrivalTrace::from_reader("mem", Cursor::new(data))
            .collect::<SimResult<_>>()
            .unwrap();
        assert_eq!(
            records,
            vec![
                ArrivalRecord { inter_arrival: 1.5, service: 10.0 },
                ArrivalRecord { inter_arrival: 0.25, service: 3.0 },
            ]
        );
    }

    #[test]
    fn malformed_line_reports_position() {
        let data = "1,2\nfoo,3\n";
        let mut trace = ArrivalTrace::from_reader("arrivals.csv", Cursor::new(data));
        assert!(trace.next().unwrap().is_ok());
        match trace.next().unwrap() {
            Err(SimError::Trace { source_name, line, .. }) => {
                assert_eq!(source_name, "arrivals.csv");
                assert_eq!(line, 2);
            }
            other => panic!("expected trace error, got {other:?}"),
        }
    }

    #[test]
    fn value_trace_is_finite() {
        let mut trace = ValueTrace::from_reader("mem", Cursor::new("4\n7\n"));
        assert_eq!(trace.next().unwrap().unwrap(), 4.0);
        assert_eq!(trace.next().unwrap().unwrap(), 7.0);
        assert!(trace.next().is_none());
    }

    #[test]
    fn provision_trace_rejects_inverted_pairs() {
        let mut trace = ProvisionTrace::from_reader("mem", Cursor::new("10,5\n"));
        assert!(trace.next().unwrap().is_err());
    }

    #[test]
    fn read_values_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.txt");
        std::fs::write(&path, "1\n2\n3\n").unwrap();
        assert_eq!(read_values(&path).unwrap(), vec![1.0, 2.0, 3.0]);
    }
}
