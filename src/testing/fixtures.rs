//! Pre-built plans for tests.

use crate::plan::TestPlan;

/// A local-backend plan with explicit stage rates and the given policy.
///
/// The workload echoes its target rate as throughput, which the mock
/// backend ignores in favour of its scripted output.
pub fn local_plan(rates: &[f64], min_improvement: f64, steps: usize, mode: &str) -> TestPlan {
    let mut text = format!(
        r#"
[plan]
name = "fixture-plan"

[workload]
command = ["sh", "-c", "echo throughput={{rate}}"]

[plateau]
min_improvement_percent = {min_improvement:?}
consecutive_steps_required = {steps}

[execution]
mode = "{mode}"
backend = "local"
"#
    );
    for rate in rates {
        text.push_str(&format!(
            "\n[[stages]]\ntarget_rate = {rate:?}\nduration_secs = 5\n"
        ));
    }
    match TestPlan::from_toml_str(&text) {
        Ok(plan) => plan,
        Err(e) => panic!("fixture plan is invalid: {e}\n{text}"),
    }
}

/// Same as [`local_plan`] with plateau detection disabled.
pub fn local_plan_without_plateau(rates: &[f64], mode: &str) -> TestPlan {
    let mut plan = local_plan(rates, 10.0, 2, mode);
    plan.plateau.enabled = false;
    plan
}
