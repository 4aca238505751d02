//! City page ordering.
//!
//! Unlike the search ranking this works on location text only: listings in
//! the viewer's city come first, then listings in one of its nearby cities,
//! then everything else. Paid tiers lead within each group.

use serde::Serialize;

use crate::geo::{self, City};
use crate::listing::Listing;

/// Locality group of a listing relative to the viewer's city.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    City,
    Nearby,
    Elsewhere,
}

/// Reference city of the page, known or not.
#[derive(Debug, Clone)]
pub struct Viewer {
    name: String,
    city: Option<&'static City>,
}

impl Viewer {
    pub fn new(city: &str) -> Self {
        Self {
            name: city.trim().to_lowercase(),
            city: geo::find_city(city),
        }
    }

    /// Group of a listing located at `location`.
    pub fn locality(&self, location: Option<&str>) -> Locality {
        let Some(location) = location else {
            return Locality::Elsewhere;
        };
        let location = location.to_lowercase();

        let in_city = match self.city {
            Some(city) => geo::city_in(city, &location),
            None => !self.name.is_empty() && location.contains(&self.name),
        };
        if in_city {
            return Locality::City;
        }

        let nearby = self.city.is_some_and(|city| {
            city.nearby.iter().any(|nearby| {
                location.contains(&nearby.to_lowercase())
                    || geo::find_city(nearby).is_some_and(|known| geo::city_in(known, &location))
            })
        });

        if nearby {
            Locality::Nearby
        } else {
            Locality::Elsewhere
        }
    }
}

/// A listing and its locality group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalListing {
    #[serde(flatten)]
    pub listing: Listing,
    pub locality: Locality,
}

/// Order `listings` for the page of `city`. Input order breaks ties.
pub fn tier_by_locality(listings: Vec<Listing>, city: &str) -> Vec<LocalListing> {
    let viewer = Viewer::new(city);

    let mut local: Vec<LocalListing> = listings
        .into_iter()
        .map(|listing| LocalListing {
            locality: viewer.locality(listing.location.as_deref()),
            listing,
        })
        .collect();

    local.sort_by_key(|l| (l.locality, !l.listing.tier.is_paid()));
    local
}
