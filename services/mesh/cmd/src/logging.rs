use std::fmt;
use std::io::IsTerminal;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[90m";

/// Width of the `halo-<component>` column
const SOURCE_WIDTH: usize = 16;

#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! component_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

/// Stderr log line: `HH:MM:SS.mmm halo-<component> LEVEL message`.
///
/// Events without a `component` field are attributed to the crate that
/// emitted them, so `halo_session` shows up as `halo-session`.
pub struct HaloLogFormatter {
    prefix: String,
    color_enabled: bool,
}

impl HaloLogFormatter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            color_enabled: is_terminal(),
        }
    }

    fn source(&self, component: Option<&str>, target: &str) -> String {
        let name = match component {
            Some(comp) => format!("{}-{}", self.prefix, comp),
            None => {
                let krate = target.split("::").next().unwrap_or(target);
                krate.replace('_', "-")
            }
        };

        if name.chars().count() > SOURCE_WIDTH {
            let truncated: String = name.chars().take(SOURCE_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = SOURCE_WIDTH)
        }
    }

    /// Label and ANSI color for a level; the color is empty without a tty
    fn level_style(&self, level: &Level) -> (&'static str, &'static str) {
        let (label, color) = match *level {
            Level::ERROR => ("ERROR", "\x1b[91m"),
            Level::WARN => ("WARN ", "\x1b[93m"),
            Level::INFO => ("INFO ", "\x1b[32m"),
            Level::DEBUG => ("DEBUG", DIM),
            Level::TRACE => ("TRACE", DIM),
        };
        (label, if self.color_enabled { color } else { "" })
    }
}

impl<S, N> FormatEvent<S, N> for HaloLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let (label, color) = self.level_style(metadata.level());
        let (dim, reset) = if self.color_enabled { (DIM, RESET) } else { ("", "") };

        writeln!(
            writer,
            "{}{}{} {} {}{}{} {}",
            dim,
            chrono::Local::now().format("%H:%M:%S%.3f"),
            reset,
            self.source(visitor.component.as_deref(), metadata.target()),
            color,
            label,
            reset,
            visitor.message
        )
    }
}

/// Pulls the message and component out of an event
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "component" => {
                self.component = Some(format!("{:?}", value).trim_matches('"').to_string())
            }
            _ => {}
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            _ => {}
        }
    }
}

/// Colors only when stderr is an interactive, non-dumb terminal
fn is_terminal() -> bool {
    std::env::var("TERM").map_or(false, |term| term != "dumb") && std::io::stderr().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter() -> HaloLogFormatter {
        HaloLogFormatter {
            prefix: "halo".to_string(),
            color_enabled: false,
        }
    }

    #[test]
    fn test_source_column() {
        let f = formatter();
        assert_eq!(f.source(Some("cli"), "halo").trim_end(), "halo-cli");
        assert_eq!(
            f.source(None, "halo_session::session").trim_end(),
            "halo-session"
        );
        assert_eq!(f.source(None, "halo").len(), SOURCE_WIDTH);

        let long = f.source(Some("a-very-long-component"), "halo");
        assert_eq!(long.chars().count(), SOURCE_WIDTH);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn test_level_without_color() {
        let f = formatter();
        assert_eq!(f.level_style(&Level::WARN), ("WARN ", ""));
        assert_eq!(f.level_style(&Level::ERROR), ("ERROR", ""));
    }
}
