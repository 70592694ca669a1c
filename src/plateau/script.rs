//! Shell rendition of the plateau check for remotely executed batch jobs.
//!
//! The function emitted here is generated from a [`PlateauPolicy`] so the
//! remote check and [`is_plateaued`](super::is_plateaued) share one source of
//! truth: the same baseline index, the same zero-baseline guard, the same
//! formula order and a strict `>` comparison. Neither side rounds; the
//! threshold is written with Rust's shortest round-trip float formatting so
//! awk parses back the exact double the native check compares against.

use super::types::PlateauPolicy;

/// Name of the generated shell function.
pub const PLATEAU_FUNCTION_NAME: &str = "labramp_is_plateaued";

/// Renders a POSIX `sh` function that prints `yes` or `no`.
///
/// The function takes the throughput history as positional arguments,
/// oldest first:
///
/// ```text
/// labramp_is_plateaued 100 102 103   # prints "yes" for a {10%, 2} policy
/// ```
#[must_use]
pub fn render_plateau_function(policy: &PlateauPolicy) -> String {
    format!(
        r#"{name}() {{
  printf '%s\n' "$@" | awk -v min="{min}" -v steps="{steps}" '
    NF {{ n++; h[n] = $1 + 0 }}
    END {{
      m = min + 0
      k = steps + 0
      if (n < k + 1) {{ print "no"; exit }}
      base = h[n - k]
      for (i = n - k + 1; i <= n; i++) {{
        imp = 0
        if (base > 0) imp = ((h[i] - base) / base) * 100
        if (imp > m) {{ print "no"; exit }}
      }}
      print "yes"
    }}'
}}
"#,
        name = PLATEAU_FUNCTION_NAME,
        min = policy.min_improvement_percent(),
        steps = policy.consecutive_steps_required(),
    )
}
