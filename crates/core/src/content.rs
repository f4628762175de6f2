//! Structured page content
//!
//! A page body is an ordered list of tagged section variants. Parsing is
//! strict for known section types and lenient for unknown ones: an unknown
//! `type` is preserved verbatim and the renderer emits a visible comment
//! for it.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    #[serde(default)]
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl Default for Alignment {
    fn default() -> Self {
        Self::Center
    }
}

impl Alignment {
    pub fn as_css(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Center => "center",
            Self::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CtaVariant {
    Primary,
    Secondary,
    Outline,
}

impl Default for CtaVariant {
    fn default() -> Self {
        Self::Primary
    }
}

impl CtaVariant {
    pub fn as_class(&self) -> &'static str {
        match self {
            Self::Primary => "btn-primary",
            Self::Secondary => "btn-secondary",
            Self::Outline => "btn-outline",
        }
    }
}

/// Grid columns are constrained to 2, 3 or 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Columns {
    Two,
    Three,
    Four,
}

impl Default for Columns {
    fn default() -> Self {
        Self::Three
    }
}

impl Columns {
    pub fn count(&self) -> u8 {
        match self {
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
        }
    }
}

impl TryFrom<u8> for Columns {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            4 => Ok(Self::Four),
            other => Err(format!("columns must be 2, 3 or 4, got {other}")),
        }
    }
}

impl From<Columns> for u8 {
    fn from(c: Columns) -> u8 {
        c.count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroSection {
    pub heading: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subheading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_image: Option<String>,
    #[serde(default)]
    pub alignment: Alignment,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    pub body: String,
    #[serde(default)]
    pub alignment: Alignment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureItem {
    pub icon: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default)]
    pub columns: Columns,
    #[serde(default)]
    pub items: Vec<FeatureItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardItem {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default)]
    pub columns: Columns,
    #[serde(default)]
    pub items: Vec<CardItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSection {
    pub src: String,
    pub alt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default)]
    pub full_width: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaSection {
    pub heading: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub button_text: String,
    pub button_link: String,
    #[serde(default)]
    pub variant: CtaVariant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Hero(HeroSection),
    Text(TextSection),
    Features(FeaturesSection),
    Cards(CardsSection),
    Image(ImageSection),
    Cta(CtaSection),
    /// Preserved verbatim; the renderer emits a visible comment.
    Unknown { kind: String, raw: Value },
}

impl Section {
    pub fn kind(&self) -> &str {
        match self {
            Self::Hero(_) => "hero",
            Self::Text(_) => "text",
            Self::Features(_) => "features",
            Self::Cards(_) => "cards",
            Self::Image(_) => "image",
            Self::Cta(_) => "cta",
            Self::Unknown { kind, .. } => kind,
        }
    }
}

impl Serialize for Section {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        fn with_tag<T: Serialize, S: Serializer>(
            tag: &str,
            inner: &T,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            let mut value = serde_json::to_value(inner).map_err(serde::ser::Error::custom)?;
            if let Value::Object(map) = &mut value {
                map.insert("type".to_string(), Value::String(tag.to_string()));
            }
            value.serialize(serializer)
        }

        match self {
            Self::Hero(s) => with_tag("hero", s, serializer),
            Self::Text(s) => with_tag("text", s, serializer),
            Self::Features(s) => with_tag("features", s, serializer),
            Self::Cards(s) => with_tag("cards", s, serializer),
            Self::Image(s) => with_tag("image", s, serializer),
            Self::Cta(s) => with_tag("cta", s, serializer),
            Self::Unknown { raw, .. } => raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Section {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::custom("section is missing a `type` tag"))?
            .to_string();

        fn parse<T, E>(value: &Value) -> Result<T, E>
        where
            T: for<'a> Deserialize<'a>,
            E: DeError,
        {
            let mut body = value.clone();
            if let Value::Object(map) = &mut body {
                map.remove("type");
            }
            serde_json::from_value(body).map_err(E::custom)
        }

        Ok(match kind.as_str() {
            "hero" => Self::Hero(parse(&value)?),
            "text" => Self::Text(parse(&value)?),
            "features" => Self::Features(parse(&value)?),
            "cards" => Self::Cards(parse(&value)?),
            "image" => Self::Image(parse(&value)?),
            "cta" => Self::Cta(parse(&value)?),
            _ => Self::Unknown { kind, raw: value },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_sections() {
        let content: PageContent = serde_json::from_value(json!({
            "sections": [
                {"type": "hero", "heading": "Welcome", "alignment": "left"},
                {"type": "text", "body": "Hello"},
                {"type": "features", "columns": 3, "items": [
                    {"icon": "rocket", "title": "Fast", "description": "Very"}
                ]},
                {"type": "cta", "heading": "Go", "buttonText": "Start", "buttonLink": "/start"}
            ]
        }))
        .unwrap();
        assert_eq!(content.sections.len(), 4);
        assert!(matches!(&content.sections[0], Section::Hero(h) if h.alignment == Alignment::Left));
        assert!(matches!(&content.sections[2], Section::Features(f) if f.columns.count() == 3));
    }

    #[test]
    fn unknown_section_is_preserved() {
        let content: PageContent = serde_json::from_value(json!({
            "sections": [{"type": "carousel", "slides": [1, 2]}]
        }))
        .unwrap();
        assert!(matches!(&content.sections[0], Section::Unknown { kind, .. } if kind == "carousel"));
        // Round trip keeps the payload byte-for-byte.
        let back = serde_json::to_value(&content).unwrap();
        assert_eq!(back["sections"][0]["slides"], json!([1, 2]));
    }

    #[test]
    fn rejects_invalid_columns() {
        let result: Result<FeaturesSection, _> =
            serde_json::from_value(json!({"columns": 5, "items": []}));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_type_tag() {
        let result: Result<Section, _> = serde_json::from_value(json!({"heading": "x"}));
        assert!(result.is_err());
    }

    #[test]
    fn round_trips_known_sections() {
        let original = Section::Cta(CtaSection {
            heading: "Ship it".to_string(),
            description: Some("Today".to_string()),
            button_text: "Go".to_string(),
            button_link: "/go".to_string(),
            variant: CtaVariant::Outline,
        });
        let json = serde_json::to_value(&original).unwrap();
        assert_eq!(json["type"], "cta");
        let back: Section = serde_json::from_value(json).unwrap();
        assert_eq!(original, back);
    }
}
