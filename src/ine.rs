//! Text I/O of H-polyhedra in the cdd `.ine` format.
//!
//! The format stores `{ x : b - A x >= 0 }` row by row as `[b, -A]`:
//!
//! ```text
//! * optional comments
//! H-representation
//! begin
//!  4 3 real
//!  5 -1  0
//!  5  1  0
//!  5  0 -1
//!  5  0  1
//! end
//! ```
//!
//! The header line gives the number of rows `m` and the number of columns `d + 1`.
//! Only the plain H-representation subset is supported (no `linearity` lines).
//!
//! # Examples
//!
//! ```
//! use cis_rs::polyhedron::HPolyhedron;
//!
//! let p = HPolyhedron::symmetric_box(&[5.0, 5.0]).unwrap();
//! let text = p.to_ine();
//! let q = HPolyhedron::from_ine(&text).unwrap();
//! assert_eq!(p, q);
//! ```

use nalgebra::{DMatrix, DVector};

use crate::error::{CisError, Result};
use crate::polyhedron::HPolyhedron;

impl HPolyhedron {
    /// Renders the polyhedron in cdd `.ine` format.
    pub fn to_ine(&self) -> String {
        let rows: String = self
            .a()
            .row_iter()
            .zip(self.b().iter())
            .map(|(row, bound)| {
                let coefficients: String = row.iter().map(|&c| format!(" {}", -c)).collect();
                format!(" {}{}\n", bound, coefficients)
            })
            .collect();
        format!(
            "H-representation\nbegin\n {} {} real\n{}end\n",
            self.num_constraints(),
            self.dim() + 1,
            rows
        )
    }

    /// Parses a polyhedron from cdd `.ine` text.
    pub fn from_ine(text: &str) -> Result<HPolyhedron> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('*'));

        // Preamble up to `begin`.
        let mut last_line = 0;
        loop {
            let Some((number, line)) = lines.next() else {
                return Err(parse_error(last_line, "missing 'begin'"));
            };
            last_line = number;
            if line == "begin" {
                break;
            }
            if line.starts_with("V-representation") {
                return Err(parse_error(number, "V-representation is not supported"));
            }
            if line.starts_with("linearity") {
                return Err(parse_error(number, "linearity lines are not supported"));
            }
        }

        let Some((number, header)) = lines.next() else {
            return Err(parse_error(last_line, "missing size header"));
        };
        let fields: Vec<&str> = header.split_whitespace().collect();
        let &[rows, cols, kind] = fields.as_slice() else {
            return Err(parse_error(number, "expected '<rows> <columns> <number type>'"));
        };
        let rows: usize = rows
            .parse()
            .map_err(|_| parse_error(number, "invalid row count"))?;
        let cols: usize = cols
            .parse()
            .map_err(|_| parse_error(number, "invalid column count"))?;
        if cols == 0 {
            return Err(parse_error(number, "column count must include the bound column"));
        }
        if kind != "real" && kind != "integer" {
            return Err(parse_error(number, &format!("unsupported number type '{}'", kind)));
        }
        last_line = number;

        let dim = cols - 1;
        let mut a = DMatrix::zeros(rows, dim);
        let mut b = DVector::zeros(rows);
        for i in 0..rows {
            let Some((number, line)) = lines.next() else {
                return Err(parse_error(last_line, &format!("expected {} rows, found {}", rows, i)));
            };
            last_line = number;
            let values = line
                .split_whitespace()
                .map(|token| {
                    token
                        .parse::<f64>()
                        .map_err(|_| parse_error(number, &format!("invalid number '{}'", token)))
                })
                .collect::<Result<Vec<f64>>>()?;
            if values.len() != cols {
                return Err(parse_error(
                    number,
                    &format!("expected {} entries, found {}", cols, values.len()),
                ));
            }
            b[i] = values[0];
            for j in 0..dim {
                a[(i, j)] = -values[j + 1];
            }
        }

        match lines.next() {
            Some((_, "end")) => HPolyhedron::new(a, b),
            Some((number, _)) => Err(parse_error(number, "expected 'end'")),
            None => Err(parse_error(last_line, "missing 'end'")),
        }
    }
}

fn parse_error(line: usize, message: &str) -> CisError {
    CisError::Parse {
        line,
        message: message.to_string(),
    }
}
