//! Listings as stored in the `profiles` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Table holding listings.
pub const TABLE: &str = "profiles";

/// Subscription level of a listing owner.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Tier {
    #[default]
    #[serde(rename = "FREE")]
    Free,
    #[serde(rename = "PRO")]
    Pro,
    #[serde(rename = "PRO-PLUS")]
    ProPlus,
    #[serde(rename = "ULTRA")]
    Ultra,
}

impl Tier {
    /// Priority before any distance penalty.
    pub fn base_priority(self) -> i32 {
        match self {
            Tier::Ultra => 1000,
            Tier::ProPlus => 800,
            Tier::Pro => 600,
            Tier::Free => 400,
        }
    }

    pub fn is_paid(self) -> bool {
        self != Tier::Free
    }
}

/// Deserialize `null` as the default value.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A publicly browsable profile.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub display_name: String,
    pub location: Option<String>,
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub rating: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub loves: u32,
    #[serde(default, deserialize_with = "nullable")]
    pub tier: Tier,
    #[serde(default, deserialize_with = "nullable")]
    pub verified: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub is_club: bool,
    pub description: Option<String>,
    /// Free text such as `CHF 300` or `250.-/h`.
    pub price: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub age: Option<u32>,
    pub height: Option<u32>,
    pub weight: Option<u32>,
    pub cup_size: Option<String>,
    pub body_size: Option<String>,
    pub descent: Option<String>,
    pub ethnicity: Option<String>,
    pub body_type: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub languages: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Listing {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    /// First amount found in the price text.
    pub fn price_value(&self) -> Option<f64> {
        let price = self.price.as_deref()?;
        let start = price.find(|c: char| c.is_ascii_digit())?;

        let amount: String = price[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || matches!(*c, '.' | '\'' | '’'))
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();

        amount.trim_end_matches('.').parse().ok()
    }
}

/// A listing with its computed search attributes. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedListing {
    #[serde(flatten)]
    pub listing: Listing,
    pub distance_km: Option<f64>,
    pub search_priority: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_order() {
        let tiers = [Tier::Ultra, Tier::ProPlus, Tier::Pro, Tier::Free];
        for pair in tiers.windows(2) {
            assert!(pair[0].base_priority() > pair[1].base_priority());
        }
        assert!(!Tier::Free.is_paid());
        assert!(Tier::ProPlus.is_paid());
    }

    #[test]
    fn test_deserialize_row() {
        let listing: Listing = serde_json::from_value(json!({
            "id": "42",
            "display_name": "Mila",
            "tier": "PRO-PLUS",
            "rating": null,
            "loves": 12,
            "languages": null,
            "latitude": 47.37,
            "longitude": 8.54,
            "created_at": "2024-05-01T10:00:00+00:00",
            "unknown_column": true,
        }))
        .unwrap();

        assert_eq!(listing.tier, Tier::ProPlus);
        assert_eq!(listing.rating, 0.0);
        assert_eq!(listing.loves, 12);
        assert!(listing.languages.is_empty());
        assert_eq!(listing.coordinates(), Some((47.37, 8.54)));
        assert!(listing.created_at.is_some());
    }

    #[test]
    fn test_price_value() {
        let with_price = |price: &str| Listing {
            price: Some(price.into()),
            ..Default::default()
        };

        assert_eq!(with_price("CHF 300").price_value(), Some(300.0));
        assert_eq!(with_price("250.-/h").price_value(), Some(250.0));
        assert_eq!(with_price("1'200 CHF").price_value(), Some(1200.0));
        assert_eq!(with_price("ab 99.50").price_value(), Some(99.5));
        assert_eq!(with_price("on request").price_value(), None);
        assert_eq!(Listing::default().price_value(), None);
    }
}
