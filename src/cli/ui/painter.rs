use owo_colors::{OwoColorize, Style};

#[derive(Debug, Clone, Copy)]
enum Tone {
    Success,
    Warning,
    Muted,
    Value,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Self::Success => Style::new().bold().green(),
            Self::Warning => Style::new().bold().yellow(),
            Self::Muted => Style::new().dimmed(),
            Self::Value => Style::new().bold(),
        }
    }
}

/// Colours report text when stdout is a terminal.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn success(&self, text: impl AsRef<str>) -> String {
        self.paint(text.as_ref(), Tone::Success)
    }

    pub(crate) fn warning(&self, text: impl AsRef<str>) -> String {
        self.paint(text.as_ref(), Tone::Warning)
    }

    pub(crate) fn muted(&self, text: impl AsRef<str>) -> String {
        self.paint(text.as_ref(), Tone::Muted)
    }

    pub(crate) fn value(&self, text: impl AsRef<str>) -> String {
        self.paint(text.as_ref(), Tone::Value)
    }

    fn paint(&self, text: &str, tone: Tone) -> String {
        if self.use_colour {
            text.style(tone.style()).to_string()
        } else {
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn plain_painter_leaves_text_alone(
        #[values(Tone::Success, Tone::Warning, Tone::Muted, Tone::Value)] tone: Tone,
    ) {
        assert_eq!("REC01.wav", Painter::new(false).paint("REC01.wav", tone));
    }

    #[rstest]
    fn colour_painter_wraps_text_in_escapes(
        #[values(Tone::Success, Tone::Warning, Tone::Muted, Tone::Value)] tone: Tone,
    ) {
        let painted = Painter::new(true).paint("REC01.wav", tone);
        assert!(painted.starts_with('\u{1b}'));
        assert!(painted.contains("REC01.wav"));
    }
}
