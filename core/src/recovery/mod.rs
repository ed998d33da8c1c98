// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Failure Recovery (component C, spec §4.C): converts a driver-
//! reported evaluation failure into a recovered response, a retried
//! evaluation, or an aborted run.

use crate::cache::EvaluationCache;
use crate::error::{CoreError, CoreResult};
use crate::model::{ParamResponsePair, Response, Variables};
use crate::transport::TransportOutcome;
use tracing::{info, warn};

/// How far apart two continuous points must be before continuation
/// recovery considers the target reached (spec §4.C: "equals the
/// target within a fixed tolerance").
const CONTINUATION_TARGET_TOLERANCE: f64 = 1e-9;

/// The `fail-action` mode parameterizing the state machine (spec
/// §4.C, spec §6 `failure-capture`).
#[derive(Debug, Clone)]
pub enum FailureMode {
    /// Log the failure and propagate an interface error.
    Abort,
    /// Re-invoke the driver up to `limit` additional times.
    Retry { limit: usize },
    /// Substitute a user-specified recovery vector for function values;
    /// gradients and Hessians are not recovered.
    Recover { values: Vec<f64> },
    /// Step-halving continuation from the nearest cached success.
    Continuation { step_halving_limit: usize },
}

/// Runs the failure-recovery state machine for one failed evaluation.
///
/// `evaluate` re-invokes the transport driver at a (possibly different)
/// point; `retry` and `continuation` call it one or more times.
///
/// # Errors
///
/// Returns [`CoreError::EvaluationFailure`] when retries are exhausted,
/// [`CoreError::InterfaceError`] when recovery/continuation
/// preconditions are violated or continuation's step-halving budget is
/// exhausted, or whatever fatal error `evaluate` itself returns.
pub fn recover(
    mode: &FailureMode,
    pair: &ParamResponsePair,
    cache: &EvaluationCache,
    evaluate: &mut dyn FnMut(&Variables) -> CoreResult<TransportOutcome>,
) -> CoreResult<Response> {
    match mode {
        FailureMode::Abort => {
            warn!(eval_id = pair.eval_id, "evaluation failed; fail-action is abort");
            Err(CoreError::InterfaceError(format!(
                "evaluation {} failed and fail-action is abort",
                pair.eval_id
            )))
        }
        FailureMode::Retry { limit } => retry(pair, *limit, evaluate),
        FailureMode::Recover { values } => substitute(pair, values),
        FailureMode::Continuation { step_halving_limit } => {
            continuation(pair, cache, *step_halving_limit, evaluate)
        }
    }
}

fn retry(
    pair: &ParamResponsePair,
    limit: usize,
    evaluate: &mut dyn FnMut(&Variables) -> CoreResult<TransportOutcome>,
) -> CoreResult<Response> {
    for attempt in 1..=limit {
        warn!(eval_id = pair.eval_id, attempt, limit, "retrying failed evaluation");
        match evaluate(&pair.variables)? {
            TransportOutcome::Ok(response) => return Ok(response),
            TransportOutcome::EvalFailure(_) | TransportOutcome::InvalidResponse(_) => continue,
        }
    }
    Err(CoreError::EvaluationFailure {
        eval_id: pair.eval_id,
        message: format!("retry limit ({limit}) exhausted"),
    })
}

fn substitute(pair: &ParamResponsePair, recovery_values: &[f64]) -> CoreResult<Response> {
    let num_functions = pair.response.function_values.len();
    if recovery_values.len() != num_functions {
        return Err(CoreError::InterfaceError(format!(
            "recovery-values length {} does not match {num_functions} functions",
            recovery_values.len()
        )));
    }
    let mut response = pair.response.clone();
    response.reset_values();
    response.function_values = recovery_values.to_vec();
    info!(eval_id = pair.eval_id, "substituted recovery values for failed evaluation");
    Ok(response)
}

fn continuation(
    pair: &ParamResponsePair,
    cache: &EvaluationCache,
    step_halving_limit: usize,
    evaluate: &mut dyn FnMut(&Variables) -> CoreResult<TransportOutcome>,
) -> CoreResult<Response> {
    let source = cache.nearest(&pair.interface_id, &pair.variables).ok_or_else(|| {
        CoreError::InterfaceError("continuation recovery requires at least one successful cached evaluation".into())
    })?;

    let target = pair.variables.clone();
    let mut current = source.variables.clone();
    let mut last_response = source.response.clone();
    let mut fraction = 0.5_f64;
    let mut remaining_halvings = step_halving_limit;

    loop {
        if current.continuous_l2_distance(&target) <= CONTINUATION_TARGET_TOLERANCE {
            return Ok(last_response);
        }

        let mut trial = current.interpolate_continuous(&target, fraction);
        trial.clamp_to_bounds();

        match evaluate(&trial)? {
            TransportOutcome::Ok(response) => {
                info!(eval_id = pair.eval_id, fraction, "continuation trial succeeded");
                current = trial;
                last_response = response;
                fraction = 0.5;
            }
            TransportOutcome::EvalFailure(_) | TransportOutcome::InvalidResponse(_) => {
                if remaining_halvings == 0 {
                    return Err(CoreError::InterfaceError(
                        "continuation recovery exhausted its step-halving limit".into(),
                    ));
                }
                remaining_halvings -= 1;
                fraction /= 2.0;
                warn!(eval_id = pair.eval_id, fraction, "continuation trial failed; halving step");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActiveSet;

    fn successful_pair(id: i64, x: f64, value: f64) -> ParamResponsePair {
        let mut p = ParamResponsePair::new_request(id, "sim", Variables::from_continuous(vec![x]), ActiveSet::values_only(1));
        p.response.function_values[0] = value;
        p
    }

    #[test]
    fn retry_invokes_driver_at_most_limit_plus_one_times() {
        let pair = successful_pair(1, 1.0, 0.0);
        let cache = EvaluationCache::new();
        let mut invocations = 0;
        let mut evaluate = |_vars: &Variables| -> CoreResult<TransportOutcome> {
            invocations += 1;
            Ok(TransportOutcome::EvalFailure("deterministic failure".into()))
        };
        let err = recover(&FailureMode::Retry { limit: 2 }, &pair, &cache, &mut evaluate).unwrap_err();
        assert!(matches!(err, CoreError::EvaluationFailure { .. }));
        // The initial failed call is invocation 1 (made by the caller, not
        // counted here); recovery performs exactly `limit` further calls.
        assert_eq!(invocations, 2);
    }

    #[test]
    fn recover_mode_substitutes_values_only() {
        let mut pair = successful_pair(1, 1.0, 0.0);
        pair.response.function_gradients = vec![vec![9.0]];
        let cache = EvaluationCache::new();
        let mut evaluate = |_: &Variables| -> CoreResult<TransportOutcome> { unreachable!("recover mode must not evaluate") };
        let response = recover(&FailureMode::Recover { values: vec![42.0] }, &pair, &cache, &mut evaluate).unwrap();
        assert_eq!(response.function_values, vec![42.0]);
    }

    #[test]
    fn recover_mode_rejects_wrong_length_vector() {
        let pair = successful_pair(1, 1.0, 0.0);
        let cache = EvaluationCache::new();
        let mut evaluate = |_: &Variables| -> CoreResult<TransportOutcome> { unreachable!() };
        let err = recover(&FailureMode::Recover { values: vec![1.0, 2.0] }, &pair, &cache, &mut evaluate).unwrap_err();
        assert!(matches!(err, CoreError::InterfaceError(_)));
    }

    #[test]
    fn continuation_reaches_target_by_halving() {
        let mut cache = EvaluationCache::new();
        cache.insert(successful_pair(1, 0.0, 0.0));
        let target_pair = successful_pair(2, 1.0, 0.0);

        let mut evaluate = |vars: &Variables| -> CoreResult<TransportOutcome> {
            let mut response = Response::new_shaped(vec!["f".into()], 0, ActiveSet::values_only(1));
            response.function_values[0] = vars.continuous.values[0];
            Ok(TransportOutcome::Ok(response))
        };

        let response = recover(
            &FailureMode::Continuation { step_halving_limit: 4 },
            &target_pair,
            &cache,
            &mut evaluate,
        )
        .unwrap();
        assert!((response.function_values[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn continuation_without_prior_success_is_an_error() {
        let cache = EvaluationCache::new();
        let pair = successful_pair(1, 1.0, 0.0);
        let mut evaluate = |_: &Variables| -> CoreResult<TransportOutcome> { unreachable!() };
        let err = recover(&FailureMode::Continuation { step_halving_limit: 1 }, &pair, &cache, &mut evaluate).unwrap_err();
        assert!(matches!(err, CoreError::InterfaceError(_)));
    }
}
