//! Terminal color policy shared by the workspace binaries.
//!
//! An explicit `always`/`never` wins. In `auto` mode `NO_COLOR` and `EMACS`
//! switch colors off, otherwise the target stream must be a TTY.

use std::env;
use std::fmt;
use std::str::FromStr;

/// When to emit ANSI colors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorWhen {
    /// Enable colors only when output is a TTY.
    #[default]
    Auto,

    /// Always enable colors.
    Always,

    /// Never enable colors.
    Never,
}

/// Environment variables that turn colors off in `auto` mode.
const DISABLING_VARS: [&str; 2] = ["NO_COLOR", "EMACS"];

fn env_disables_color() -> bool {
    // ---
    DISABLING_VARS.iter().any(|var| env::var_os(var).is_some())
}

impl ColorWhen {
    // ---
    /// Returns whether ANSI color should be used for the given stream.
    pub fn should_color(self, stream: atty::Stream) -> bool {
        // ---
        match self {
            ColorWhen::Always => true,
            ColorWhen::Never => false,
            ColorWhen::Auto => !env_disables_color() && atty::is(stream),
        }
    }

    /// Log output goes to stderr.
    pub fn should_color_stderr(self) -> bool {
        // ---
        self.should_color(atty::Stream::Stderr)
    }
}

impl fmt::Display for ColorWhen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let name = match self {
            ColorWhen::Auto => "auto",
            ColorWhen::Always => "always",
            ColorWhen::Never => "never",
        };
        f.write_str(name)
    }
}

impl FromStr for ColorWhen {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ColorWhen::Auto),
            "always" => Ok(ColorWhen::Always),
            "never" => Ok(ColorWhen::Never),
            other => Err(format!(
                "invalid color choice '{other}' (expected auto, always or never)"
            )),
        }
    }
}
