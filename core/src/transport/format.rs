// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Driver protocol file formats (spec §6): parameter file written by
//! the core, results file produced by the driver.
//!
//! Deterministic text format. The header carries variable count,
//! active-set vector, evaluation id and driver id; value records are
//! grouped by variable kind, each with tag/label/value (spec §6).

use crate::error::{CoreError, CoreResult};
use crate::model::{ActiveSet, ParamResponsePair, Response};
use std::io::Write;

const FAIL_SENTINEL: &str = "fail";
const BATCH_SENTINEL_PREFIX: &str = "#";

/// Writes the parameter file for one request (spec §6 "Parameter file
/// is a deterministic serialization of a ParamResponsePair request
/// portion").
pub fn write_parameters<W: Write>(mut out: W, pair: &ParamResponsePair, driver_index: usize, verbatim: bool) -> CoreResult<()> {
    if verbatim {
        writeln!(out, "# parameter file for evaluation {}", pair.eval_id)?;
    }
    writeln!(out, "eval_id {}", pair.eval_id)?;
    writeln!(out, "driver_id {driver_index}")?;
    writeln!(
        out,
        "active_set {}",
        pair.active_set
            .request_vector
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    )?;
    writeln!(
        out,
        "derivative_variables {}",
        pair.active_set
            .derivative_variables
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    )?;

    writeln!(out, "continuous {}", pair.variables.continuous.len())?;
    for (label, value) in pair.variables.continuous.labels.iter().zip(pair.variables.continuous.values.iter()) {
        writeln!(out, "{label} {value}")?;
    }

    writeln!(out, "discrete_int {}", pair.variables.discrete_int.len())?;
    for (label, value) in pair
        .variables
        .discrete_int
        .labels
        .iter()
        .zip(pair.variables.discrete_int.values.iter())
    {
        writeln!(out, "{label} {value}")?;
    }

    writeln!(out, "discrete_real {}", pair.variables.discrete_real.len())?;
    for (label, value) in pair
        .variables
        .discrete_real
        .labels
        .iter()
        .zip(pair.variables.discrete_real.values.iter())
    {
        writeln!(out, "{label} {value}")?;
    }

    writeln!(out, "discrete_string {}", pair.variables.discrete_string.len())?;
    for (label, value) in pair
        .variables
        .discrete_string
        .labels
        .iter()
        .zip(pair.variables.discrete_string.values.iter())
    {
        writeln!(out, "{label} {value}")?;
    }

    Ok(())
}

/// Parses one evaluation's results block (spec §6: values, gradient
/// rows, Hessian blocks, a leading `fail` sentinel on failure).
///
/// When `verbatim`, trailing lines after the last requested element are
/// tolerated rather than treated as a structural error.
pub fn parse_results(text: &str, eval_id: i64, active_set: &ActiveSet, num_deriv_vars: usize, verbatim: bool) -> CoreResult<Response> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    if let Some(first) = lines.clone().next() {
        if first == FAIL_SENTINEL {
            return Err(CoreError::EvaluationFailure {
                eval_id,
                message: "results file carried the fail sentinel".into(),
            });
        }
    }

    let num_functions = active_set.request_vector.len();
    let mut response = Response::new_shaped(
        (0..num_functions).map(|i| format!("response_fn_{i}")).collect(),
        num_deriv_vars,
        active_set.clone(),
    );

    for (fn_idx, bits) in active_set.request_vector.iter().enumerate() {
        if bits & crate::model::active_set::VALUE != 0 {
            let line = lines.next().ok_or_else(|| missing_element(eval_id, fn_idx, "value"))?;
            let value: f64 = line
                .parse()
                .map_err(|_| CoreError::InvalidResponse { eval_id, message: format!("malformed value for function {fn_idx}") })?;
            response.function_values[fn_idx] = value;
        }
        if bits & crate::model::active_set::GRADIENT != 0 {
            let line = lines.next().ok_or_else(|| missing_element(eval_id, fn_idx, "gradient"))?;
            let row = parse_row(line, num_deriv_vars, eval_id, "gradient")?;
            response.function_gradients[fn_idx] = row;
        }
        if bits & crate::model::active_set::HESSIAN != 0 {
            let mut rows = Vec::with_capacity(num_deriv_vars);
            for _ in 0..num_deriv_vars {
                let line = lines.next().ok_or_else(|| missing_element(eval_id, fn_idx, "hessian"))?;
                rows.push(parse_row(line, num_deriv_vars, eval_id, "hessian")?);
            }
            response.function_hessians[fn_idx] = rows;
        }
    }

    if !verbatim {
        if let Some(extra) = lines.next() {
            return Err(CoreError::InvalidResponse {
                eval_id,
                message: format!("unexpected trailing content in results file: {extra:?}"),
            });
        }
    }

    Ok(response)
}

fn parse_row(line: &str, expected_len: usize, eval_id: i64, kind: &str) -> CoreResult<Vec<f64>> {
    let row: Vec<f64> = line
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| CoreError::InvalidResponse { eval_id, message: format!("malformed {kind} row") })?;
    if row.len() != expected_len {
        return Err(CoreError::InvalidResponse {
            eval_id,
            message: format!("{kind} row has {} entries, expected {expected_len}", row.len()),
        });
    }
    Ok(row)
}

fn missing_element(eval_id: i64, fn_idx: usize, kind: &str) -> CoreError {
    CoreError::InvalidResponse {
        eval_id,
        message: format!("missing requested {kind} for function {fn_idx}"),
    }
}

/// Splits a concatenated batch results file into per-evaluation blocks,
/// delimited by a line beginning with `#` (spec §4.A batch variant,
/// spec §6: "sentinel line beginning with `#`").
#[must_use]
pub fn split_batch_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.starts_with(BATCH_SENTINEL_PREFIX) {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActiveSet, ParamResponsePair, Variables};

    #[test]
    fn write_then_parse_values_only_round_trips() {
        let pair = ParamResponsePair::new_request(1, "sim", Variables::from_continuous(vec![1.0, 2.0]), ActiveSet::values_only(2));
        let mut buf = Vec::new();
        write_parameters(&mut buf, &pair, 0, false).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("eval_id 1"));

        let response = parse_results("1.5\n2.5\n", 1, &ActiveSet::values_only(2), 0, false).unwrap();
        assert_eq!(response.function_values, vec![1.5, 2.5]);
    }

    #[test]
    fn fail_sentinel_is_reported_as_evaluation_failure() {
        let err = parse_results("fail\n", 1, &ActiveSet::values_only(1), 0, false).unwrap_err();
        assert!(matches!(err, CoreError::EvaluationFailure { .. }));
    }

    #[test]
    fn missing_requested_value_is_invalid_response() {
        let err = parse_results("", 1, &ActiveSet::values_only(1), 0, false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidResponse { .. }));
    }

    #[test]
    fn verbatim_allows_trailing_free_form_text() {
        let response = parse_results("1.0\nnotes: looks fine\n", 1, &ActiveSet::values_only(1), 0, true).unwrap();
        assert_eq!(response.function_values, vec![1.0]);
    }

    #[test]
    fn batch_blocks_split_on_sentinel() {
        let text = "#eval 1\n1.0\n#eval 2\n2.0\n";
        let blocks = split_batch_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].trim(), "1.0");
        assert_eq!(blocks[1].trim(), "2.0");
    }
}
