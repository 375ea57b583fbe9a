use owo_colors::Style;
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

/// How terminal output is colored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Always,
    Never,
    Auto,
}

impl ColorMode {
    /// `NO_COLOR` wins, then `SONICSTORE_COLOR=always|never|auto`
    pub fn from_env() -> Self {
        if std::env::var_os("NO_COLOR").is_some() {
            return ColorMode::Never;
        }
        match std::env::var("SONICSTORE_COLOR").as_deref() {
            Ok("always") => ColorMode::Always,
            Ok("never") => ColorMode::Never,
            _ => ColorMode::Auto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Theme {
    pub header: Style,
    pub success: Style,
    pub error: Style,
    pub info: Style,
    pub dim: Style,
    pub muted: Style,
}

impl Theme {
    pub fn detect() -> Self {
        match ColorMode::from_env() {
            ColorMode::Always => Self::colored(),
            ColorMode::Never => Self::plain(),
            ColorMode::Auto if console::Term::stdout().is_term() => Self::colored(),
            ColorMode::Auto => Self::plain(),
        }
    }

    pub fn colored() -> Self {
        Self {
            header: Style::new().cyan().bold(),
            success: Style::new().green().bold(),
            error: Style::new().red().bold(),
            info: Style::new().blue(),
            dim: Style::new().white().dimmed(),
            muted: Style::new().bright_black(),
        }
    }

    pub fn plain() -> Self {
        Self {
            header: Style::new(),
            success: Style::new(),
            error: Style::new(),
            info: Style::new(),
            dim: Style::new(),
            muted: Style::new(),
        }
    }
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::detect)
}
