/// Classification for retry policy.
///
/// Used by the retry controller to decide whether a failed fetch attempt
/// is worth repeating.
///
/// # Behavior Summary
///
/// | Class | Retry? | Counts against `max_retries`? |
/// |-------|--------|-------------------------------|
/// | `Never` | No | No |
/// | `WithBackoff` | Yes, after an exponential delay | Yes |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - malformed request, authorization failure, or any other
    /// error unrelated to throttling. Retrying won't help.
    Never,

    /// Retry after an exponentially growing delay.
    ///
    /// Used for throttle signals (HTTP 429, "rate limited" responses). The
    /// attempt budget is bounded, so a provider that keeps throttling
    /// eventually surfaces `ExhaustedRetries`.
    WithBackoff,
}
