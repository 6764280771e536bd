//! Data record parsing.

use crate::error::{MalformedReason, MalformedRecord};
use std::time::Duration;

const FIELD_DELIMITER: char = ',';

/// One validated measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Seconds since the started marker.
    pub elapsed_seconds: f64,
    /// Commanded actuator angle (u).
    pub input_value: i64,
    /// Measured plant response (v).
    pub output_value: f64,
}

impl Sample {
    /// Attaches an elapsed time to a parsed `(input, output)` pair.
    pub fn new(elapsed: Duration, input_value: i64, output_value: f64) -> Self {
        Self {
            elapsed_seconds: elapsed.as_secs_f64(),
            input_value,
            output_value,
        }
    }
}

/// Parses `<integer>,<real>` into `(input, output)`.
///
/// Fields are trimmed before parsing. Exactly two fields are required.
pub fn parse_record(line: &str) -> Result<(i64, f64), MalformedRecord> {
    let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if fields.len() != 2 {
        return Err(MalformedRecord::new(
            line,
            MalformedReason::FieldCount(fields.len()),
        ));
    }

    let input = fields[0]
        .trim()
        .parse::<i64>()
        .map_err(|e| MalformedRecord::new(line, MalformedReason::Input(e)))?;
    let output = fields[1]
        .trim()
        .parse::<f64>()
        .map_err(|e| MalformedRecord::new(line, MalformedReason::Output(e)))?;

    Ok((input, output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_and_real() {
        assert_eq!(parse_record("10,123.45"), Ok((10, 123.45)));
        assert_eq!(parse_record("-45,0.5"), Ok((-45, 0.5)));
        assert_eq!(parse_record("90, 12"), Ok((90, 12.0)));
    }

    #[test]
    fn rejects_wrong_field_count() {
        for line in ["10", "10,20,30", "a,b,c,d"] {
            let err = parse_record(line).unwrap_err();
            assert!(err.is_shape_error(), "{line}");
            assert_eq!(err.raw, line);
        }
        let err = parse_record("1,2,3").unwrap_err();
        assert_eq!(err.reason, MalformedReason::FieldCount(3));
    }

    #[test]
    fn rejects_non_integer_input() {
        let err = parse_record("10.5,3.0").unwrap_err();
        assert!(matches!(err.reason, MalformedReason::Input(_)));
        assert_eq!(err.raw, "10.5,3.0");
    }

    #[test]
    fn rejects_non_numeric_output() {
        let err = parse_record("10,abc").unwrap_err();
        assert!(matches!(err.reason, MalformedReason::Output(_)));
        assert!(!err.is_shape_error());
    }

    #[test]
    fn rejects_empty_fields() {
        assert!(matches!(
            parse_record(",1.0").unwrap_err().reason,
            MalformedReason::Input(_)
        ));
        assert!(matches!(
            parse_record("1,").unwrap_err().reason,
            MalformedReason::Output(_)
        ));
    }

    #[test]
    fn sample_converts_elapsed_to_seconds() {
        let sample = Sample::new(Duration::from_millis(2500), 30, 7.25);
        assert_eq!(sample.elapsed_seconds, 2.5);
        assert_eq!(sample.input_value, 30);
    }
}
