//! Reference `IntegrationShell` implementations, registered into the
//! `FactoryRegistry` at binary startup under the type names `"vlogs"` and
//! `"promq"`.

pub mod promq;
pub mod vlogs;

use std::time::Duration;

use crate::error::ToolError;

/// Shared window parsing for the three log-oriented tool shapes: rejects a
/// window under 15 minutes, defaults to 60.
pub fn parse_window_minutes(minutes: Option<u64>) -> Result<Duration, ToolError> {
    let minutes = minutes.unwrap_or(60);
    if minutes < 15 {
        return Err(ToolError::WindowTooSmall);
    }
    Ok(Duration::from_secs(minutes * 60))
}

/// Rejects a filter string that begins with a wildcard marker.
pub fn reject_leading_wildcard(value: &str) -> Result<(), ToolError> {
    if value.starts_with('*') {
        return Err(ToolError::LeadingWildcardRejected);
    }
    Ok(())
}
