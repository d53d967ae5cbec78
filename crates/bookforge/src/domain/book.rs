use serde::{Deserialize, Serialize};

/// Upper bound on pages per book. Keeps the per-page stage bounded.
pub const MAX_PAGE_COUNT: u32 = 32;

/// Input parameters of a book, stored as JSON on the book row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookParams {
    pub child_name: String,
    pub child_age: u8,
    pub theme: String,
    pub art_style: String,
    pub page_count: u32,
    /// Free-form description used to keep the main character consistent.
    #[serde(default)]
    pub character_description: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl BookParams {
    /// Checks the parameters a submission must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.child_name.trim().is_empty() {
            return Err("child_name must not be empty".to_string());
        }
        if self.theme.trim().is_empty() {
            return Err("theme must not be empty".to_string());
        }
        if self.page_count == 0 || self.page_count > MAX_PAGE_COUNT {
            return Err(format!(
                "page_count must be between 1 and {}, got {}",
                MAX_PAGE_COUNT, self.page_count
            ));
        }
        Ok(())
    }

    /// Title used when the story generator did not provide one.
    pub fn fallback_title(&self) -> String {
        format!("{} and the {}", self.child_name.trim(), self.theme.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BookParams {
        BookParams {
            child_name: "Mia".to_string(),
            child_age: 5,
            theme: "Moon Garden".to_string(),
            art_style: "watercolor".to_string(),
            page_count: 3,
            character_description: None,
            language: "en".to_string(),
        }
    }

    #[test]
    fn test_valid_params() {
        assert!(params().validate().is_ok());
    }

    #[test]
    fn test_page_count_bounds() {
        let mut p = params();
        p.page_count = 0;
        assert!(p.validate().is_err());
        p.page_count = MAX_PAGE_COUNT + 1;
        assert!(p.validate().unwrap_err().contains("page_count"));
        p.page_count = MAX_PAGE_COUNT;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut p = params();
        p.child_name = "   ".to_string();
        assert!(p.validate().unwrap_err().contains("child_name"));
    }

    #[test]
    fn test_language_defaults_to_english() {
        let json = r#"{
            "child_name": "Leo",
            "child_age": 7,
            "theme": "Pirates",
            "art_style": "comic",
            "page_count": 4
        }"#;
        let p: BookParams = serde_json::from_str(json).unwrap();
        assert_eq!(p.language, "en");
        assert!(p.character_description.is_none());
    }

    #[test]
    fn test_fallback_title() {
        assert_eq!(params().fallback_title(), "Mia and the Moon Garden");
    }
}
