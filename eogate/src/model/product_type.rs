//! Product type catalog entries.

use serde::{Deserialize, Serialize};

/// A class of Earth-observation data, independent of any provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductType {
    /// Unique, stable identifier (e.g. `S2_MSI_L1C`).
    #[serde(alias = "ID")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "abstract", alias = "abstract_text")]
    pub abstract_text: String,
    #[serde(default, alias = "platformSerialIdentifier")]
    pub platform: String,
    #[serde(default)]
    pub instrument: String,
    #[serde(default, alias = "processingLevel")]
    pub processing_level: String,
    #[serde(default)]
    pub license: String,
    #[serde(default, alias = "missionStartDate")]
    pub mission_start: Option<String>,
    #[serde(default, alias = "missionEndDate")]
    pub mission_end: Option<String>,
    #[serde(default, deserialize_with = "keywords::deserialize")]
    pub keywords: Vec<String>,
}

impl ProductType {
    /// Creates a product type with only its identifier set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            abstract_text: String::new(),
            platform: String::new(),
            instrument: String::new(),
            processing_level: String::new(),
            license: String::new(),
            mission_start: None,
            mission_end: None,
            keywords: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Fills empty descriptive fields from `other`.
    ///
    /// Never overwrites a value already present. Returns `true` when anything
    /// changed.
    pub fn enrich(&mut self, other: &ProductType) -> bool {
        let mut changed = false;
        for (mine, theirs) in [
            (&mut self.title, &other.title),
            (&mut self.abstract_text, &other.abstract_text),
            (&mut self.platform, &other.platform),
            (&mut self.instrument, &other.instrument),
            (&mut self.processing_level, &other.processing_level),
            (&mut self.license, &other.license),
        ] {
            if mine.is_empty() && !theirs.is_empty() {
                *mine = theirs.clone();
                changed = true;
            }
        }
        for (mine, theirs) in [
            (&mut self.mission_start, &other.mission_start),
            (&mut self.mission_end, &other.mission_end),
        ] {
            if mine.is_none() && theirs.is_some() {
                *mine = theirs.clone();
                changed = true;
            }
        }
        for keyword in &other.keywords {
            if !self.keywords.contains(keyword) {
                self.keywords.push(keyword.clone());
                changed = true;
            }
        }
        changed
    }
}

mod keywords {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Keywords {
        List(Vec<String>),
        Csv(String),
    }

    /// Accepts either a list or a comma separated string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        Ok(match Option::<Keywords>::deserialize(deserializer)? {
            Some(Keywords::List(list)) => list,
            Some(Keywords::Csv(text)) => text
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            None => Vec::new(),
        })
    }
}
