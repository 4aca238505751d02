//! Search filters sent by the listing pages.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::backend::Filter;
use crate::geo;
use crate::listing::Listing;

/// Which kind of listing to return.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Ladies,
    Clubs,
    #[default]
    All,
}

/// Requested result order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Tier and distance priority.
    #[default]
    Relevance,
    Rating,
    PriceLow,
    PriceHigh,
    Newest,
    Loves,
}

/// Optional constraints on a listing search.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
#[validate(schema(function = "validate_ranges"))]
pub struct SearchFilters {
    /// Matched as a substring of the listing location. A known city also
    /// becomes the reference point for distances.
    #[validate(length(max = 100, message = "Location is too long."))]
    pub location: Option<String>,
    pub category: Category,
    #[validate(range(
        min = 0.0,
        max = 500.0,
        message = "Radius must be between 0 and 500 km."
    ))]
    pub radius_km: Option<f64>,
    pub require_verified: bool,
    pub require_fan_posts: bool,
    pub visit_types: Vec<String>,
    pub services: Vec<String>,
    #[validate(range(min = 18, max = 99, message = "Age must be between 18 and 99."))]
    pub age_min: Option<u32>,
    #[validate(range(min = 18, max = 99, message = "Age must be between 18 and 99."))]
    pub age_max: Option<u32>,
    pub height_min: Option<u32>,
    pub height_max: Option<u32>,
    pub weight_min: Option<u32>,
    pub weight_max: Option<u32>,
    pub cup_size: Option<String>,
    pub body_size: Option<String>,
    pub descent: Option<String>,
    pub languages: Vec<String>,
    pub ethnicity: Option<String>,
    pub body_type: Option<String>,
    #[validate(range(min = 0.0, message = "Price must be positive."))]
    pub price_min: Option<f64>,
    #[validate(range(min = 0.0, message = "Price must be positive."))]
    pub price_max: Option<f64>,
    /// Rating floor.
    #[validate(range(min = 0.0, max = 5.0, message = "Rating must be between 0 and 5."))]
    pub rating: Option<f64>,
    pub sort_by: SortBy,
    /// Number of results wanted, overrides the configured default.
    #[validate(range(min = 1, max = 100, message = "Count must be between 1 and 100."))]
    pub target_count: Option<usize>,
}

fn validate_ranges(filters: &SearchFilters) -> Result<(), ValidationError> {
    fn inverted<T: PartialOrd>(min: Option<T>, max: Option<T>) -> bool {
        matches!((min, max), (Some(min), Some(max)) if min > max)
    }

    if inverted(filters.age_min, filters.age_max)
        || inverted(filters.height_min, filters.height_max)
        || inverted(filters.weight_min, filters.weight_max)
        || inverted(filters.price_min, filters.price_max)
    {
        return Err(ValidationError::new("range")
            .with_message("Minimum must not exceed maximum.".into()));
    }

    Ok(())
}

impl SearchFilters {
    /// Service names to look up in the services table, one group per
    /// filter. A listing must offer a term of every group.
    pub fn service_groups(&self) -> Vec<Vec<&str>> {
        [&self.visit_types, &self.services]
            .into_iter()
            .map(|terms| {
                terms
                    .iter()
                    .map(|term| term.trim())
                    .filter(|term| !term.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|terms| !terms.is_empty())
            .collect()
    }

    /// Predicates evaluated by the backend.
    ///
    /// Location is left out so the same predicates can be reused for
    /// distance bands around the reference city. Rating, verification and
    /// price are applied after ranking.
    pub fn attribute_filters(&self) -> Vec<Filter> {
        let mut filters = Vec::new();

        match self.category {
            Category::Ladies => filters.push(Filter::eq("is_club", false)),
            Category::Clubs => filters.push(Filter::eq("is_club", true)),
            Category::All => {},
        }

        let ranges = [
            ("age", self.age_min, self.age_max),
            ("height", self.height_min, self.height_max),
            ("weight", self.weight_min, self.weight_max),
        ];
        for (column, min, max) in ranges {
            if let Some(min) = min {
                filters.push(Filter::gte(column, min));
            }
            if let Some(max) = max {
                filters.push(Filter::lte(column, max));
            }
        }

        let exact = [
            ("cup_size", &self.cup_size),
            ("body_size", &self.body_size),
            ("descent", &self.descent),
            ("ethnicity", &self.ethnicity),
            ("body_type", &self.body_type),
        ];
        for (column, value) in exact {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                filters.push(Filter::eq(column, value));
            }
        }

        if !self.languages.is_empty() {
            filters.push(Filter::Overlaps(
                "languages".into(),
                self.languages.iter().map(|l| l.clone().into()).collect(),
            ));
        }

        filters
    }

    /// Location substring predicate, if any. A known city matches under
    /// any of its names.
    pub fn location_filter(&self) -> Option<Filter> {
        let location = self
            .location
            .as_deref()
            .map(str::trim)
            .filter(|location| !location.is_empty())?;

        let Some(city) = geo::find_city(location) else {
            return Some(Filter::contains("location", location));
        };

        let mut places = vec![location];
        places.extend(
            city.names()
                .map(|name| -> &str { name })
                .filter(|name| name.to_lowercase() != location.to_lowercase()),
        );

        Some(Filter::Or(
            places
                .into_iter()
                .map(|place| Filter::contains("location", place))
                .collect(),
        ))
    }

    /// Whether the listing price lies within the requested bounds. Listings
    /// without a readable price only pass when no bound is set.
    pub fn accepts_price(&self, listing: &Listing) -> bool {
        if self.price_min.is_none() && self.price_max.is_none() {
            return true;
        }

        listing.price_value().is_some_and(|price| {
            self.price_min.is_none_or(|min| price >= min)
                && self.price_max.is_none_or(|max| price <= max)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_camel_case() {
        let filters: SearchFilters = serde_json::from_value(json!({
            "location": "Zürich",
            "category": "ladies",
            "radiusKm": 25,
            "requireFanPosts": true,
            "visitTypes": ["hotel"],
            "ageMin": 21,
            "sortBy": "price_low",
        }))
        .unwrap();

        assert_eq!(filters.category, Category::Ladies);
        assert_eq!(filters.radius_km, Some(25.0));
        assert!(filters.require_fan_posts);
        assert!(!filters.require_verified);
        assert_eq!(filters.sort_by, SortBy::PriceLow);
        assert_eq!(filters.service_groups(), vec![vec!["hotel"]]);
    }

    #[test]
    fn test_validation() {
        assert!(SearchFilters::default().validate().is_ok());

        let filters = SearchFilters {
            age_min: Some(30),
            age_max: Some(25),
            ..Default::default()
        };
        assert!(filters.validate().is_err());

        let filters = SearchFilters {
            rating: Some(6.0),
            ..Default::default()
        };
        assert!(filters.validate().is_err());

        let filters = SearchFilters {
            age_min: Some(16),
            ..Default::default()
        };
        assert!(filters.validate().is_err());
    }

    #[test]
    fn test_attribute_filters() {
        let filters = SearchFilters {
            location: Some("Bern".into()),
            category: Category::Clubs,
            height_min: Some(160),
            cup_size: Some(" C ".into()),
            descent: Some("".into()),
            languages: vec!["de".into(), "fr".into()],
            ..Default::default()
        };

        assert_eq!(
            filters.attribute_filters(),
            vec![
                Filter::eq("is_club", true),
                Filter::gte("height", 160),
                Filter::eq("cup_size", "C"),
                Filter::Overlaps("languages".into(), vec![json!("de"), json!("fr")]),
            ]
        );
        assert_eq!(
            filters.location_filter(),
            Some(Filter::Or(vec![
                Filter::contains("location", "Bern"),
                Filter::contains("location", "berne"),
                Filter::contains("location", "berna"),
            ]))
        );
    }

    #[test]
    fn test_location_filter_aliases() {
        let filters = |location: &str| SearchFilters {
            location: Some(location.into()),
            ..Default::default()
        };

        assert_eq!(
            filters("zurich").location_filter(),
            Some(Filter::Or(vec![
                Filter::contains("location", "zurich"),
                Filter::contains("location", "Zürich"),
                Filter::contains("location", "zuerich"),
                Filter::contains("location", "zurigo"),
            ]))
        );
        assert_eq!(
            filters("Atlantis").location_filter(),
            Some(Filter::contains("location", "Atlantis"))
        );
        assert_eq!(filters("  ").location_filter(), None);
    }

    #[test]
    fn test_accepts_price() {
        let listing = |price: Option<&str>| Listing {
            price: price.map(Into::into),
            ..Default::default()
        };
        let filters = SearchFilters {
            price_min: Some(200.0),
            price_max: Some(400.0),
            ..Default::default()
        };

        assert!(filters.accepts_price(&listing(Some("CHF 300"))));
        assert!(!filters.accepts_price(&listing(Some("CHF 500"))));
        assert!(!filters.accepts_price(&listing(None)));
        assert!(SearchFilters::default().accepts_price(&listing(None)));
    }
}
