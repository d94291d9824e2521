//! Feature taxonomy shared by the catalog, the selector and requests

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A capability a model/provider pair may offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Chat,
    Vision,
    WebSearch,
    Image,
    Audio,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Chat => "chat",
            Feature::Vision => "vision",
            Feature::WebSearch => "web_search",
            Feature::Image => "image",
            Feature::Audio => "audio",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered set of features
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeSet<Feature>);

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chat() -> Self {
        Self::from_iter([Feature::Chat])
    }

    pub fn with(mut self, feature: Feature) -> Self {
        self.0.insert(feature);
        self
    }

    pub fn insert(&mut self, feature: Feature) -> bool {
        self.0.insert(feature)
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }

    /// True when every feature in `required` is present here
    pub fn is_superset(&self, required: &FeatureSet) -> bool {
        self.0.is_superset(&required.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Feature> for FeatureSet {
    fn extend<I: IntoIterator<Item = Feature>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Feature::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superset() {
        let offered = FeatureSet::chat().with(Feature::Vision).with(Feature::WebSearch);
        let required = FeatureSet::chat().with(Feature::Vision);
        assert!(offered.is_superset(&required));
        assert!(!required.is_superset(&offered));
        assert!(offered.is_superset(&FeatureSet::new()));
    }

    #[test]
    fn test_display_is_sorted() {
        let set: FeatureSet = [Feature::WebSearch, Feature::Chat].into_iter().collect();
        assert_eq!(set.to_string(), "[chat, web_search]");
    }

    #[test]
    fn test_serde_snake_case() {
        let set = FeatureSet::chat().with(Feature::WebSearch);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["chat","web_search"]"#);
    }
}
