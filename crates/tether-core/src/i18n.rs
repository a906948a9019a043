//! Display-string catalogs.
//!
//! A [`Translator`] is built once at startup and passed to whatever needs
//! display strings. Catalogs are TOML tables of `id = "template"` embedded
//! in the binary; templates use `{name}` placeholders.
//!
//! Lookup falls back to English, then to the message id itself.

use std::collections::HashMap;

use tracing::warn;

const EN_CATALOG: &str = include_str!("../locales/en.toml");
const FR_CATALOG: &str = include_str!("../locales/fr.toml");

/// Supported display locales.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Fr,
}

impl Locale {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Fr => "fr",
        }
    }

    /// Parse a locale tag such as `fr`, `fr-CA` or `fr_FR.UTF-8`.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let lang = normalized.split(['-', '_', '.']).next().unwrap_or("");
        match lang {
            "en" => Some(Self::En),
            "fr" => Some(Self::Fr),
            _ => None,
        }
    }

    /// Locale from `LC_ALL`, `LC_MESSAGES` or `LANG`, in that order.
    pub fn from_env() -> Self {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.trim().is_empty())
            .and_then(|value| Self::parse(&value))
            .unwrap_or_default()
    }

    fn catalog_source(self) -> &'static str {
        match self {
            Self::En => EN_CATALOG,
            Self::Fr => FR_CATALOG,
        }
    }
}

/// Message catalog for one locale with English fallback.
#[derive(Debug, Clone)]
pub struct Translator {
    locale: Locale,
    messages: HashMap<String, String>,
    fallback: HashMap<String, String>,
}

impl Translator {
    pub fn new(locale: Locale) -> Self {
        let fallback = load_catalog(Locale::En);
        let messages = if locale == Locale::En {
            fallback.clone()
        } else {
            load_catalog(locale)
        };

        Self {
            locale,
            messages,
            fallback,
        }
    }

    /// Translator for the locale of the environment.
    pub fn from_env() -> Self {
        Self::new(Locale::from_env())
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Look up `id` and substitute `{name}` placeholders from `args`.
    pub fn translate(&self, id: &str, args: &[(&str, &str)]) -> String {
        let template = self
            .messages
            .get(id)
            .or_else(|| self.fallback.get(id))
            .map(String::as_str)
            .unwrap_or(id);

        args.iter().fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
    }
}

fn load_catalog(locale: Locale) -> HashMap<String, String> {
    match toml::from_str(locale.catalog_source()) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(locale = locale.as_str(), error = %e, "Message catalog is invalid");
            HashMap::new()
        }
    }
}
