use std::collections::BTreeSet;

use serde::Serialize;

use crate::model::{Category, PoiType, Status};

/// Single-value-or-all facet.
///
/// Toggling the pinned value returns the facet to `All`; toggling any other
/// value pins that value instead. There is no multi-select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet<T> {
    All,
    Pinned(T),
}

impl<T> Default for Facet<T> {
    fn default() -> Self {
        Facet::All
    }
}

impl<T: Copy + PartialEq> Facet<T> {
    pub fn toggle(&mut self, value: T) {
        *self = match *self {
            Facet::Pinned(current) if current == value => Facet::All,
            _ => Facet::Pinned(value),
        };
    }

    pub fn matches(&self, value: T) -> bool {
        match self {
            Facet::All => true,
            Facet::Pinned(pinned) => *pinned == value,
        }
    }

    pub fn pinned(&self) -> Option<T> {
        match self {
            Facet::All => None,
            Facet::Pinned(v) => Some(*v),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Facet::All)
    }
}

/// Active map filters. Each data kind keys on the fields its read uses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FilterSet {
    pub categories: Facet<Category>,
    pub statuses: Facet<Status>,
    pub poi_types: BTreeSet<PoiType>,
}

impl FilterSet {
    /// Serialises the set with fields in a fixed order:
    /// `c=<category|all>|s=<status|all>|p=<sorted poi types>`.
    pub fn canonical(&self) -> String {
        format!("{}|{}", self.canonical_facets(), self.canonical_poi_types())
    }

    /// `c=<category|all>|s=<status|all>`
    pub fn canonical_facets(&self) -> String {
        format!(
            "c={}|s={}",
            self.categories.pinned().map_or("all", |c| c.as_str()),
            self.statuses.pinned().map_or("all", |s| s.as_str()),
        )
    }

    /// `p=` followed by the enabled layers, sorted and comma separated.
    pub fn canonical_poi_types(&self) -> String {
        let mut out = String::from("p=");
        for (i, poi) in self.poi_types.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(poi.as_str());
        }
        out
    }

    pub fn matches(&self, category: Category, status: Status) -> bool {
        self.categories.matches(category) && self.statuses.matches(status)
    }

    /// Neither case facet is pinned.
    pub fn is_unfiltered(&self) -> bool {
        self.categories.is_all() && self.statuses.is_all()
    }

    pub fn enabled_poi_types(&self) -> Vec<PoiType> {
        self.poi_types.iter().copied().collect()
    }
}

/// One user action on the filter bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterToggle {
    Category(Category),
    Status(Status),
    PoiType(PoiType),
    AllCategories,
    AllStatuses,
}

/// Owns the filter set of one map screen.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    set: FilterSet,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poi_types(poi_types: impl IntoIterator<Item = PoiType>) -> Self {
        Self {
            set: FilterSet {
                poi_types: poi_types.into_iter().collect(),
                ..FilterSet::default()
            },
        }
    }

    pub fn current(&self) -> &FilterSet {
        &self.set
    }

    pub fn apply(&mut self, toggle: FilterToggle) {
        match toggle {
            FilterToggle::Category(c) => self.toggle_category(c),
            FilterToggle::Status(s) => self.toggle_status(s),
            FilterToggle::PoiType(p) => self.toggle_poi_type(p),
            FilterToggle::AllCategories => self.select_all_categories(),
            FilterToggle::AllStatuses => self.select_all_statuses(),
        }
    }

    pub fn toggle_category(&mut self, category: Category) {
        self.set.categories.toggle(category);
    }

    pub fn toggle_status(&mut self, status: Status) {
        self.set.statuses.toggle(status);
    }

    /// POI layers are an independent on/off set, not a facet.
    pub fn toggle_poi_type(&mut self, poi_type: PoiType) {
        if !self.set.poi_types.remove(&poi_type) {
            self.set.poi_types.insert(poi_type);
        }
    }

    pub fn select_all_categories(&mut self) {
        self.set.categories = Facet::All;
    }

    pub fn select_all_statuses(&mut self) {
        self.set.statuses = Facet::All;
    }

    /// Returns both case facets to `All`. POI layer toggles are kept.
    pub fn reset(&mut self) {
        self.set.categories = Facet::All;
        self.set.statuses = Facet::All;
    }
}

#[cfg(test)]
mod tests {
    use super::{Facet, FilterState, FilterToggle};
    use crate::model::{Category, PoiType, Status};

    #[test]
    fn toggling_same_value_twice_returns_to_all() {
        let mut f = FilterState::new();
        f.toggle_category(Category::Stray);
        assert_eq!(f.current().categories, Facet::Pinned(Category::Stray));
        f.toggle_category(Category::Stray);
        assert_eq!(f.current().categories, Facet::All);
    }

    #[test]
    fn toggling_other_value_repins() {
        let mut f = FilterState::new();
        f.toggle_status(Status::Pending);
        f.toggle_status(Status::Resolved);
        assert_eq!(f.current().statuses, Facet::Pinned(Status::Resolved));
    }

    #[test]
    fn reset_clears_facets_but_keeps_poi_layers() {
        let mut f = FilterState::with_poi_types([PoiType::VetClinic]);
        f.apply(FilterToggle::Category(Category::Abuse));
        f.apply(FilterToggle::Status(Status::Verified));
        f.reset();
        assert!(f.current().is_unfiltered());
        assert!(f.current().poi_types.contains(&PoiType::VetClinic));
    }

    #[test]
    fn select_all_unpins_one_facet_only() {
        let mut f = FilterState::new();
        f.apply(FilterToggle::Category(Category::Wildlife));
        f.apply(FilterToggle::Status(Status::Pending));
        f.apply(FilterToggle::AllCategories);
        assert_eq!(f.current().categories, Facet::All);
        assert_eq!(f.current().statuses, Facet::Pinned(Status::Pending));

        f.apply(FilterToggle::AllStatuses);
        assert!(f.current().is_unfiltered());
        // Already `All`: stays `All` rather than toggling.
        f.apply(FilterToggle::AllStatuses);
        assert_eq!(f.current().statuses, Facet::All);
    }

    #[test]
    fn poi_toggle_is_set_membership() {
        let mut f = FilterState::new();
        f.toggle_poi_type(PoiType::AnimalShelter);
        f.toggle_poi_type(PoiType::VetClinic);
        f.toggle_poi_type(PoiType::AnimalShelter);
        assert_eq!(f.current().enabled_poi_types(), vec![PoiType::VetClinic]);
    }

    #[test]
    fn canonical_form_has_fixed_field_order() {
        let mut f = FilterState::with_poi_types([PoiType::VetClinic, PoiType::AnimalShelter]);
        assert_eq!(f.current().canonical(), "c=all|s=all|p=animal_shelter,vet_clinic");
        f.toggle_category(Category::Stray);
        f.toggle_status(Status::InProgress);
        assert_eq!(
            f.current().canonical(),
            "c=stray|s=in_progress|p=animal_shelter,vet_clinic"
        );
    }

    #[test]
    fn matches_respects_pinned_facets() {
        let mut f = FilterState::new();
        assert!(f.current().matches(Category::Wildlife, Status::Archived));
        f.toggle_category(Category::Injured);
        assert!(f.current().matches(Category::Injured, Status::Pending));
        assert!(!f.current().matches(Category::Stray, Status::Pending));
    }
}
