//! Reusable routing policies

use crate::engine::config::RunConfig;
use crate::engine::graph::node::Next;
use crate::engine::state::FlowState;

/// Router for a verdict-then-retry loop.
///
/// Reads a boolean verdict field and a retry counter from state. A satisfied
/// verdict ends the branch. Otherwise the branch retries while the counter
/// is still at or under the limit, and ends gracefully once the counter
/// passes it. The limit counts allowed retries beyond the first attempt, so
/// a limit of N visits the retry node N + 1 times in total.
///
/// The limit is looked up in the run configuration under `limit_key`,
/// falling back to `default_limit`.
pub fn bounded_retry(
    verdict_key: impl Into<String>,
    counter_key: impl Into<String>,
    limit_key: impl Into<String>,
    default_limit: i64,
    retry_node: impl Into<String>,
) -> impl Fn(&FlowState, &RunConfig) -> Next + Send + Sync + 'static {
    let verdict_key = verdict_key.into();
    let counter_key = counter_key.into();
    let limit_key = limit_key.into();
    let retry_node = retry_node.into();

    move |state, config| {
        if state.get_bool(&verdict_key).unwrap_or(false) {
            return Next::End;
        }
        let taken = state.get_i64(&counter_key).unwrap_or(0);
        let limit = config.limit_or(&limit_key, default_limit);
        if taken <= limit {
            Next::single(retry_node.clone())
        } else {
            Next::End
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reflection_router() -> impl Fn(&FlowState, &RunConfig) -> Next {
        bounded_retry(
            "is_satisfactory",
            "reflection_steps_taken",
            "max_reflection_steps",
            1,
            "research_person",
        )
    }

    fn state(satisfied: bool, taken: i64) -> FlowState {
        let mut state = FlowState::empty();
        state.update("is_satisfactory", json!(satisfied));
        state.update("reflection_steps_taken", json!(taken));
        state
    }

    #[test]
    fn test_satisfied_ends_regardless_of_counter() {
        let router = reflection_router();
        assert_eq!(router(&state(true, 0), &RunConfig::new()), Next::End);
        assert_eq!(router(&state(true, 99), &RunConfig::new()), Next::End);
    }

    #[test]
    fn test_retry_boundary_is_inclusive() {
        let router = reflection_router();
        let config = RunConfig::new().with("max_reflection_steps", 2);

        // counter at the limit still retries; one past it stops
        assert_eq!(
            router(&state(false, 2), &config),
            Next::single("research_person")
        );
        assert_eq!(router(&state(false, 3), &config), Next::End);
    }

    #[test]
    fn test_default_limit_applies_without_config() {
        let router = reflection_router();
        assert_eq!(
            router(&state(false, 1), &RunConfig::new()),
            Next::single("research_person")
        );
        assert_eq!(router(&state(false, 2), &RunConfig::new()), Next::End);
    }
}
