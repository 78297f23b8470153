//! Area to candidate-label table.

use serde::Deserialize;

/// One coarse subject grouping and the labels valid inside it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Area {
    /// Area key as stored in records (e.g. `ciencias-humanas`).
    pub name: String,
    /// Human-readable name used in prompts.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Candidate labels, in preference order.
    pub labels: Vec<String>,
}

impl Area {
    /// Creates an area.
    #[must_use]
    pub fn new(name: &str, display_name: &str, labels: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            display_name: Some(display_name.to_string()),
            labels: labels.iter().map(ToString::to_string).collect(),
        }
    }

    /// Name shown in prompts.
    #[must_use]
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// The only candidate, when the area has exactly one.
    #[must_use]
    pub fn sole_label(&self) -> Option<&str> {
        match self.labels.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// Whether `label` is a candidate of this area.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Labels known to the extractor, in two tiers.
///
/// The record's own area is searched exhaustively before any label from
/// another area is considered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary<'a> {
    own: Vec<&'a str>,
    others: Vec<&'a str>,
}

impl<'a> Vocabulary<'a> {
    /// Creates a vocabulary from explicit tiers.
    #[must_use]
    pub fn new(own: &[&'a str], others: &[&'a str]) -> Self {
        Self {
            own: own.to_vec(),
            others: others.to_vec(),
        }
    }

    /// Candidates of the record's area.
    #[must_use]
    pub fn own(&self) -> &[&'a str] {
        &self.own
    }

    /// Labels of every other area.
    #[must_use]
    pub fn others(&self) -> &[&'a str] {
        &self.others
    }

    /// Whether `label` is in either tier.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.own.iter().chain(&self.others).any(|l| *l == label)
    }

    /// Number of labels across both tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.own.len() + self.others.len()
    }

    /// Whether both tiers are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.own.is_empty() && self.others.is_empty()
    }
}

/// Ordered table of areas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaCatalog {
    areas: Vec<Area>,
}

impl AreaCatalog {
    /// Creates a catalog from areas. Later duplicates of a name are ignored.
    #[must_use]
    pub fn new(areas: Vec<Area>) -> Self {
        let mut unique: Vec<Area> = Vec::with_capacity(areas.len());
        for area in areas {
            if !unique.iter().any(|a| a.name == area.name) {
                unique.push(area);
            }
        }
        Self { areas: unique }
    }

    /// The ENEM areas.
    #[must_use]
    pub fn enem() -> Self {
        Self::new(vec![
            Area::new(
                "ciencias-humanas",
                "Ciências Humanas e suas Tecnologias",
                &["historia", "geografia", "filosofia", "sociologia"],
            ),
            Area::new(
                "ciencias-natureza",
                "Ciências da Natureza e suas Tecnologias",
                &["biologia", "quimica", "fisica"],
            ),
            Area::new(
                "linguagens",
                "Linguagens, Códigos e suas Tecnologias",
                &["portugues", "literatura", "artes", "ingles", "espanhol"],
            ),
            Area::new(
                "matematica",
                "Matemática e suas Tecnologias",
                &["matematica"],
            ),
        ])
    }

    /// Looks up an area by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Area> {
        self.areas.iter().find(|a| a.name == name)
    }

    /// Whether `name` is a known area.
    #[must_use]
    pub fn is_area(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether `label` is a valid label for `area`.
    #[must_use]
    pub fn is_valid(&self, area: &str, label: &str) -> bool {
        self.get(area).is_some_and(|a| a.contains(label))
    }

    /// Every known label, split into `area`'s candidates and the labels of
    /// all other areas.
    #[must_use]
    pub fn vocabulary_for(&self, area: &str) -> Vocabulary<'_> {
        let own: Vec<&str> = self
            .get(area)
            .map(|a| a.labels.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let mut others: Vec<&str> = Vec::new();
        for candidate in self
            .areas
            .iter()
            .filter(|a| a.name != area)
            .flat_map(|a| a.labels.iter())
        {
            if !own.contains(&candidate.as_str()) && !others.contains(&candidate.as_str()) {
                others.push(candidate);
            }
        }
        Vocabulary { own, others }
    }

    /// All areas in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Area> {
        self.areas.iter()
    }

    /// Number of areas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.areas.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }
}

impl Default for AreaCatalog {
    fn default() -> Self {
        Self::enem()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enem_table() {
        let catalog = AreaCatalog::enem();
        assert_eq!(catalog.len(), 4);
        assert!(catalog.is_valid("ciencias-natureza", "fisica"));
        assert!(!catalog.is_valid("ciencias-natureza", "historia"));
        assert!(!catalog.is_valid("desconhecida", "historia"));
        assert_eq!(
            catalog.get("matematica").and_then(Area::sole_label),
            Some("matematica")
        );
        assert_eq!(catalog.get("linguagens").and_then(Area::sole_label), None);
    }

    #[test]
    fn test_vocabulary_splits_own_area_from_others() {
        let catalog = AreaCatalog::enem();
        let vocabulary = catalog.vocabulary_for("ciencias-natureza");
        assert_eq!(vocabulary.own(), &["biologia", "quimica", "fisica"]);
        assert!(!vocabulary.others().contains(&"fisica"));
        assert!(vocabulary.contains("historia"));
        assert_eq!(vocabulary.len(), 13);

        let unknown = catalog.vocabulary_for("astronomia");
        assert!(unknown.own().is_empty());
        assert_eq!(unknown.others().len(), 13);
    }

    #[test]
    fn test_duplicate_area_names_ignored() {
        let catalog = AreaCatalog::new(vec![
            Area::new("a", "A", &["x"]),
            Area::new("a", "A2", &["y"]),
        ]);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.is_valid("a", "x"));
    }
}
