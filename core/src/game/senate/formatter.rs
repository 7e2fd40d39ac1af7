#[derive(Debug, Clone)]
pub(crate) struct NarrativeText {
    template: String,
    placeholders: Vec<Placeholder>,
}

#[derive(Debug, Clone)]
struct Placeholder {
    token: String,
    value: String,
}

impl NarrativeText {
    pub(crate) fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            placeholders: Vec::new(),
        }
    }

    pub(crate) fn with(mut self, token: impl Into<String>, value: impl ToString) -> Self {
        self.placeholders.push(Placeholder {
            token: token.into(),
            value: value.to_string(),
        });
        self
    }

    /// Unknown placeholders are left in place.
    pub(crate) fn render(&self) -> String {
        self.placeholders
            .iter()
            .fold(self.template.clone(), |text, placeholder| {
                text.replace(&placeholder.token, &placeholder.value)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_every_occurrence() {
        let text = NarrativeText::new(
            "{senator} demands an answer. {senator} waits until {season} {year}.",
        )
        .with("{senator}", "Sulla")
        .with("{season}", "Winter")
        .with("{year}", 667);
        assert_eq!(
            text.render(),
            "Sulla demands an answer. Sulla waits until Winter 667."
        );
    }

    #[test]
    fn keeps_unknown_tokens() {
        let text = NarrativeText::new("{senator} eyes the {treasury}").with("{senator}", "Crassus");
        assert_eq!(text.render(), "Crassus eyes the {treasury}");
    }
}
