//! CSV wire formats: decimation rows and inversion output.
//!
//! Hand-formatted lines with a configurable single-character separator.
//! Floats are written with `{}`, which round-trips f64 exactly; reading is
//! header-indexed so column order in foreign files does not matter.

use std::io::{BufRead, Write};

use pti_core::types::{DecimatedRow, PtiError, Result, DETECTORS};
use pti_core::InversionOutput;

/// Decimation CSV column names, in wire order.
pub const DECIMATION_COLUMNS: [&str; 9] =
    ["DC1", "DC2", "DC3", "X1", "Y1", "X2", "Y2", "X3", "Y3"];

// ---------------------------------------------------------------------------
// Decimation writer
// ---------------------------------------------------------------------------

/// Streaming writer for decimated rows, one row per block.
pub struct DecimationWriter<W: Write> {
    out: W,
    delimiter: char,
}

impl<W: Write> DecimationWriter<W> {
    pub fn new(out: W, delimiter: char) -> Self {
        DecimationWriter { out, delimiter }
    }

    /// Write the header line. Skipped when resuming an interrupted run.
    pub fn write_header(&mut self) -> Result<()> {
        let line = DECIMATION_COLUMNS.join(&self.delimiter.to_string());
        writeln!(self.out, "{line}")?;
        Ok(())
    }

    pub fn write_row(&mut self, row: &DecimatedRow) -> Result<()> {
        let d = self.delimiter;
        writeln!(
            self.out,
            "{}{d}{}{d}{}{d}{}{d}{}{d}{}{d}{}{d}{}{d}{}",
            row.dc[0],
            row.dc[1],
            row.dc[2],
            row.x[0],
            row.y[0],
            row.x[1],
            row.y[1],
            row.x[2],
            row.y[2],
        )?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Decimation reader
// ---------------------------------------------------------------------------

/// Read decimated rows from a CSV stream, locating columns by header name.
pub fn read_decimation<R: BufRead>(reader: R, delimiter: char) -> Result<Vec<DecimatedRow>> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(line) => line?,
        None => {
            return Err(PtiError::MalformedRecord {
                line: 1,
                reason: "empty file".into(),
            })
        }
    };
    let names: Vec<&str> = header.split(delimiter).map(str::trim).collect();
    let mut indices = [0usize; 9];
    for (slot, column) in DECIMATION_COLUMNS.iter().enumerate() {
        indices[slot] = names
            .iter()
            .position(|name| name == column)
            .ok_or_else(|| PtiError::MissingColumn(column.to_string()))?;
    }

    let mut rows = Vec::new();
    for (number, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(delimiter).map(str::trim).collect();
        let mut values = [0.0f64; 9];
        for (slot, &index) in indices.iter().enumerate() {
            let field = fields.get(index).ok_or_else(|| PtiError::MalformedRecord {
                line: number + 2,
                reason: format!("missing field {}", DECIMATION_COLUMNS[slot]),
            })?;
            values[slot] = field.parse().map_err(|_| PtiError::MalformedRecord {
                line: number + 2,
                reason: format!("unparsable {}: {field:?}", DECIMATION_COLUMNS[slot]),
            })?;
        }
        rows.push(DecimatedRow {
            dc: [values[0], values[1], values[2]],
            x: [values[3], values[5], values[7]],
            y: [values[4], values[6], values[8]],
        });
    }
    Ok(rows)
}

/// Split rows into the three DC sweeps for phase-scan calibration.
pub fn dc_sweeps(rows: &[DecimatedRow]) -> [Vec<f64>; DETECTORS] {
    std::array::from_fn(|d| rows.iter().map(|row| row.dc[d]).collect())
}

// ---------------------------------------------------------------------------
// Inversion writer
// ---------------------------------------------------------------------------

/// Write the inversion output; verbose runs carry the per-channel series.
pub fn write_inversion<W: Write>(
    mut out: W,
    output: &InversionOutput,
    delimiter: char,
) -> Result<()> {
    let mut columns = vec!["PTI Signal".to_string(), "Interferometric Phase".to_string()];
    if output.channels.is_some() {
        for d in 1..=DETECTORS {
            columns.push(format!("Root Mean Square {d}"));
            columns.push(format!("Response Phase {d}"));
            columns.push(format!("Demodulated Signal {d}"));
        }
    }
    writeln!(out, "{}", columns.join(&delimiter.to_string()))?;

    for i in 0..output.pti_signal.len() {
        let mut fields = vec![
            output.pti_signal[i].to_string(),
            output.interferometric_phase[i].to_string(),
        ];
        if let Some(series) = &output.channels {
            for channel in series {
                fields.push(channel[i].root_mean_square.to_string());
                fields.push(channel[i].response_phase.to_string());
                fields.push(channel[i].demodulated.to_string());
            }
        }
        writeln!(out, "{}", fields.join(&delimiter.to_string()))?;
    }
    out.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pti_core::inversion::ChannelDemod;
    use std::io::Cursor;

    fn sample_row() -> DecimatedRow {
        DecimatedRow {
            dc: [0.5, 0.25, 0.125],
            x: [1e-3, -2e-3, 3.333e-4],
            y: [0.1, 0.2, -0.3],
        }
    }

    #[test]
    fn test_header_is_exact() {
        let mut buffer = Vec::new();
        DecimationWriter::new(&mut buffer, ',').write_header().unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "DC1,DC2,DC3,X1,Y1,X2,Y2,X3,Y3\n"
        );
    }

    #[test]
    fn test_row_roundtrip_exact() {
        let mut buffer = Vec::new();
        let original = DecimatedRow {
            dc: [0.1 + 0.2, 1.0 / 3.0, f64::MIN_POSITIVE],
            x: [std::f64::consts::PI, -0.0, 1e300],
            y: [0.5f64.sin(), 2.0f64.sqrt(), -1e-308],
        };
        {
            let mut writer = DecimationWriter::new(&mut buffer, ',');
            writer.write_header().unwrap();
            writer.write_row(&original).unwrap();
        }
        let rows = read_decimation(Cursor::new(buffer), ',').unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], original, "float formatting must round-trip f64");
    }

    #[test]
    fn test_alternate_delimiter() {
        let mut buffer = Vec::new();
        {
            let mut writer = DecimationWriter::new(&mut buffer, '\t');
            writer.write_header().unwrap();
            writer.write_row(&sample_row()).unwrap();
        }
        let rows = read_decimation(Cursor::new(buffer), '\t').unwrap();
        assert_eq!(rows[0], sample_row());
    }

    #[test]
    fn test_read_reordered_columns() {
        let text = "X1,Y1,DC1,DC2,DC3,X2,Y2,X3,Y3\n1,2,3,4,5,6,7,8,9\n";
        let rows = read_decimation(Cursor::new(text), ',').unwrap();
        assert_eq!(rows[0].x[0], 1.0);
        assert_eq!(rows[0].y[0], 2.0);
        assert_eq!(rows[0].dc, [3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_read_missing_column() {
        let text = "DC1,DC2,DC3,X1,Y1,X2,Y2,X3\n";
        match read_decimation(Cursor::new(text), ',') {
            Err(PtiError::MissingColumn(column)) => assert_eq!(column, "Y3"),
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }

    #[test]
    fn test_read_unparsable_field() {
        let text = "DC1,DC2,DC3,X1,Y1,X2,Y2,X3,Y3\n1,2,3,4,oops,6,7,8,9\n";
        match read_decimation(Cursor::new(text), ',') {
            Err(PtiError::MalformedRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn test_read_skips_blank_lines() {
        let text = "DC1,DC2,DC3,X1,Y1,X2,Y2,X3,Y3\n1,2,3,4,5,6,7,8,9\n\n";
        assert_eq!(read_decimation(Cursor::new(text), ',').unwrap().len(), 1);
    }

    #[test]
    fn test_dc_sweeps_transpose() {
        let rows = vec![
            DecimatedRow {
                dc: [1.0, 2.0, 3.0],
                x: [0.0; 3],
                y: [0.0; 3],
            },
            DecimatedRow {
                dc: [4.0, 5.0, 6.0],
                x: [0.0; 3],
                y: [0.0; 3],
            },
        ];
        let sweeps = dc_sweeps(&rows);
        assert_eq!(sweeps[0], vec![1.0, 4.0]);
        assert_eq!(sweeps[2], vec![3.0, 6.0]);
    }

    #[test]
    fn test_inversion_output_plain() {
        let output = InversionOutput {
            interferometric_phase: vec![0.5, -0.25],
            pti_signal: vec![1e-6, f64::NAN],
            channels: None,
            tallies: Default::default(),
        };
        let mut buffer = Vec::new();
        write_inversion(&mut buffer, &output, ',').unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("PTI Signal,Interferometric Phase"));
        assert_eq!(lines.next(), Some("0.000001,0.5"));
        assert_eq!(lines.next(), Some("NaN,-0.25"));
    }

    #[test]
    fn test_inversion_output_verbose_columns() {
        let demod = ChannelDemod {
            root_mean_square: 1.0,
            response_phase: 0.5,
            demodulated: 0.25,
        };
        let output = InversionOutput {
            interferometric_phase: vec![0.0],
            pti_signal: vec![0.0],
            channels: Some(std::array::from_fn(|_| vec![demod])),
            tallies: Default::default(),
        };
        let mut buffer = Vec::new();
        write_inversion(&mut buffer, &output, ',').unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header.split(',').count(), 2 + 9);
        assert!(header.contains("Root Mean Square 1"));
        assert!(header.contains("Demodulated Signal 3"));
    }
}
