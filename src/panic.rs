//! Panic payload formatting and reporting.
//!
//! Panics inside event-loop attachments and user callbacks are caught at the
//! boundary of the affected unit of work and reported here before the unit
//! is discarded.

use std::{any::Any, fmt};

use log::error;

/// Wrapper that formats a panic payload when logged or displayed.
///
/// The payload is downcast to `String` or `&'static str` if possible and falls
/// back to `Debug` formatting otherwise.
///
/// ```
/// use forwardline::panic::format_panic;
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert_eq!(
///     format_panic(Box::new(String::from("boom"))).to_string(),
///     "boom"
/// );
/// assert!(format_panic(Box::new(5_u32)).to_string().contains("Any"));
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// Create a [`PanicMessage`] for the given payload.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }

/// Log a caught panic through both `log` and `tracing`.
///
/// `site` names the boundary that caught it (`"attachment"`, `"callback"`)
/// and `subject` identifies the affected unit.
pub(crate) fn report_panic(
    site: &'static str,
    subject: &dyn fmt::Display,
    panic: Box<dyn Any + Send>,
) {
    let message = format_panic(panic);
    error!("{site} panicked: subject={subject}, panic={message}");
    tracing::error!(site, subject = %subject, panic = %message, "panic caught");
}
