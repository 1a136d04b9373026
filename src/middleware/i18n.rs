// src/middleware/i18n.rs

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

const DEFAULT_LANG: &str = "en";

// Extrator de idioma: usado só para escolher o texto das mensagens de erro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale(pub String);

impl Locale {
    pub fn is_portuguese(&self) -> bool {
        self.0 == "pt"
    }

    /// "pt-BR, en;q=0.8" -> "pt"
    pub fn from_header(header_str: &str) -> Self {
        let lang = accept_language::parse(header_str)
            .first() // Pega o idioma de maior prioridade
            .map(|tag| tag.split('-').next().unwrap_or(tag).to_lowercase())
            .unwrap_or_else(|| DEFAULT_LANG.to_string());
        Locale(lang)
    }
}

impl Default for Locale {
    fn default() -> Self {
        Locale(DEFAULT_LANG.to_string())
    }
}

impl<S> FromRequestParts<S> for Locale
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let locale = parts
            .headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|header_value| header_value.to_str().ok())
            .map(Locale::from_header)
            .unwrap_or_default();

        Ok(locale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_subtag_is_used() {
        assert_eq!(Locale::from_header("pt-BR,pt;q=0.9,en;q=0.8"), Locale("pt".into()));
        assert_eq!(Locale::from_header("en-US"), Locale("en".into()));
        assert!(Locale::from_header("pt-PT").is_portuguese());
    }

    #[test]
    fn test_empty_header_falls_back_to_default() {
        assert_eq!(Locale::from_header(""), Locale::default());
    }
}
