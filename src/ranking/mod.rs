//! Result ranking.
//!
//! Listings are ranked by a priority blending their tier and their distance
//! to the reference city. When too few listings match the location itself,
//! wider distance bands are appended until the wanted count is reached.

pub mod locality;

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use crate::filters::SortBy;
use crate::geo;
use crate::listing::{Listing, RankedListing, Tier};

/// Distance thresholds in kilometers and their penalty, widest first.
const PENALTIES: [(f64, i32); 3] = [(50.0, 150), (20.0, 100), (5.0, 50)];

/// Distance under which a listing counts as nearby.
pub const NEARBY_KM: f64 = 5.0;

/// Penalty of the highest threshold strictly exceeded.
pub fn distance_penalty(distance_km: Option<f64>) -> i32 {
    let Some(distance) = distance_km else {
        return 0;
    };

    PENALTIES
        .iter()
        .find(|(threshold, _)| distance > *threshold)
        .map_or(0, |(_, penalty)| *penalty)
}

/// Search priority of a listing.
pub fn priority(tier: Tier, distance_km: Option<f64>) -> i32 {
    tier.base_priority() - distance_penalty(distance_km)
}

/// What excludes a listing from the results.
#[derive(Debug, Default, Clone, Copy)]
pub struct Criteria<'a> {
    /// Reference point. Unknown means no distance at all.
    pub origin: Option<(f64, f64)>,
    pub max_distance_km: Option<f64>,
    pub min_rating: Option<f64>,
    pub verified_only: bool,
    /// Authors with at least one active fan post, when required.
    pub fan_authors: Option<&'a HashSet<String>>,
}

impl Criteria<'_> {
    fn accepts(&self, ranked: &RankedListing) -> bool {
        let listing = &ranked.listing;

        // a missing distance counts as nearby.
        let within_distance = match (self.max_distance_km, ranked.distance_km) {
            (Some(max), Some(distance)) => distance <= max,
            _ => true,
        };

        within_distance
            && self.min_rating.is_none_or(|min| listing.rating >= min)
            && (!self.verified_only || listing.verified)
            && self
                .fan_authors
                .is_none_or(|authors| authors.contains(&listing.id))
    }
}

/// Attach distance and priority to a listing.
pub fn evaluate(listing: Listing, origin: Option<(f64, f64)>) -> RankedListing {
    let distance_km = origin
        .zip(listing.coordinates())
        .map(|(origin, at)| geo::haversine_km(origin, at));

    RankedListing {
        search_priority: priority(listing.tier, distance_km),
        distance_km,
        listing,
    }
}

/// Filter then rank `listings` by priority.
pub fn rank(listings: Vec<Listing>, criteria: &Criteria) -> Vec<RankedListing> {
    let mut ranked: Vec<RankedListing> = listings
        .into_iter()
        .map(|listing| evaluate(listing, criteria.origin))
        .filter(|ranked| criteria.accepts(ranked))
        .collect();

    sort_by_priority(&mut ranked);
    ranked
}

/// Stable sort on priority, then rating, then loves, all descending.
pub fn sort_by_priority(listings: &mut [RankedListing]) {
    listings.sort_by(|a, b| {
        b.search_priority
            .cmp(&a.search_priority)
            .then_with(|| descending(a.listing.rating, b.listing.rating))
            .then_with(|| b.listing.loves.cmp(&a.listing.loves))
    });
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Stable sort in the requested order.
pub fn sort(listings: &mut [RankedListing], sort_by: SortBy) {
    match sort_by {
        SortBy::Relevance => sort_by_priority(listings),
        SortBy::Rating => listings
            .sort_by(|a, b| descending(a.listing.rating, b.listing.rating)),
        SortBy::Loves => listings.sort_by(|a, b| b.listing.loves.cmp(&a.listing.loves)),
        // `None` sorts before `Some`, hence the reversed comparison.
        SortBy::Newest => {
            listings.sort_by(|a, b| b.listing.created_at.cmp(&a.listing.created_at))
        },
        SortBy::PriceLow => listings.sort_by(|a, b| {
            by_price(a, b, |x, y| x.partial_cmp(&y).unwrap_or(Ordering::Equal))
        }),
        SortBy::PriceHigh => listings.sort_by(|a, b| {
            by_price(a, b, |x, y| y.partial_cmp(&x).unwrap_or(Ordering::Equal))
        }),
    }
}

/// Compare prices, unreadable ones last.
fn by_price(
    a: &RankedListing,
    b: &RankedListing,
    order: impl Fn(f64, f64) -> Ordering,
) -> Ordering {
    match (a.listing.price_value(), b.listing.price_value()) {
        (Some(x), Some(y)) => order(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Distance band used to backfill sparse results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ring {
    /// Exclusive lower bound.
    pub min_km: f64,
    /// Inclusive upper bound.
    pub max_km: f64,
}

impl Ring {
    pub fn contains(&self, distance_km: f64) -> bool {
        distance_km > self.min_km && distance_km <= self.max_km
    }
}

/// Bands queried in order.
pub const RINGS: [Ring; 3] = [
    Ring {
        min_km: 5.0,
        max_km: 20.0,
    },
    Ring {
        min_km: 20.0,
        max_km: 50.0,
    },
    Ring {
        min_km: 50.0,
        max_km: 100.0,
    },
];

/// Accumulates primary results then band results, without duplicates and
/// without exceeding the target count.
#[derive(Debug)]
pub struct Expansion {
    results: Vec<RankedListing>,
    seen: HashSet<String>,
    target: usize,
}

impl Expansion {
    /// Start from ranked primary results.
    pub fn new(primary: Vec<RankedListing>, target: usize) -> Self {
        let mut expansion = Self {
            results: Vec::with_capacity(target),
            seen: HashSet::new(),
            target,
        };
        expansion.append(primary);
        expansion
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() >= self.target
    }

    /// Append ranked listings, skipping known ids. Returns how many were
    /// added.
    pub fn append(&mut self, listings: Vec<RankedListing>) -> usize {
        let before = self.results.len();

        for listing in listings {
            if self.is_complete() {
                break;
            }
            if self.seen.insert(listing.listing.id.clone()) {
                self.results.push(listing);
            }
        }

        self.results.len() - before
    }

    pub fn finish(self) -> Vec<RankedListing> {
        self.results
    }
}

/// Informational grouping of a final result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
    Ultra,
    Pro,
    FreeNearby,
    Expanded,
}

impl Bucket {
    /// Far listings are expanded whatever their tier.
    pub fn of(listing: &RankedListing) -> Self {
        if listing.distance_km.is_some_and(|distance| distance > NEARBY_KM) {
            return Bucket::Expanded;
        }

        match listing.listing.tier {
            Tier::Ultra => Bucket::Ultra,
            Tier::Pro | Tier::ProPlus => Bucket::Pro,
            Tier::Free => Bucket::FreeNearby,
        }
    }
}

/// Listing ids per bucket, in result order.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Buckets {
    pub ultra: Vec<String>,
    pub pro: Vec<String>,
    pub free_nearby: Vec<String>,
    pub expanded: Vec<String>,
}

/// Group `listings` into display buckets.
pub fn partition(listings: &[RankedListing]) -> Buckets {
    let mut buckets = Buckets::default();

    for listing in listings {
        let bucket = match Bucket::of(listing) {
            Bucket::Ultra => &mut buckets.ultra,
            Bucket::Pro => &mut buckets.pro,
            Bucket::FreeNearby => &mut buckets.free_nearby,
            Bucket::Expanded => &mut buckets.expanded,
        };
        bucket.push(listing.listing.id.clone());
    }

    buckets
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn listing(id: &str, tier: Tier) -> Listing {
        Listing {
            id: id.to_owned(),
            display_name: id.to_uppercase(),
            tier,
            ..Default::default()
        }
    }

    pub fn ranked(id: &str, tier: Tier, distance_km: Option<f64>) -> RankedListing {
        RankedListing {
            listing: listing(id, tier),
            distance_km,
            search_priority: priority(tier, distance_km),
        }
    }

    fn ids(listings: &[RankedListing]) -> Vec<&str> {
        listings.iter().map(|l| l.listing.id.as_str()).collect()
    }

    #[test]
    fn test_distance_penalty_steps() {
        assert_eq!(distance_penalty(None), 0);
        assert_eq!(distance_penalty(Some(0.0)), 0);
        assert_eq!(distance_penalty(Some(4.9)), 0);
        assert_eq!(distance_penalty(Some(5.0)), 0);
        assert_eq!(distance_penalty(Some(5.1)), 50);
        assert_eq!(distance_penalty(Some(20.0)), 50);
        assert_eq!(distance_penalty(Some(20.1)), 100);
        assert_eq!(distance_penalty(Some(30.0)), 100);
        assert_eq!(distance_penalty(Some(50.0)), 100);
        assert_eq!(distance_penalty(Some(50.1)), 150);
        assert_eq!(distance_penalty(Some(400.0)), 150);
    }

    #[test]
    fn test_higher_tier_wins_within_a_band() {
        let tiers = [Tier::Ultra, Tier::ProPlus, Tier::Pro, Tier::Free];

        for distance in [None, Some(1.0), Some(10.0), Some(35.0), Some(80.0)] {
            for pair in tiers.windows(2) {
                assert!(priority(pair[0], distance) > priority(pair[1], distance));
            }
        }
        assert_eq!(priority(Tier::Pro, Some(30.0)), 500);
    }

    #[test]
    fn test_rank_tie_breaks() {
        let mut a = listing("a", Tier::Pro);
        a.rating = 4.0;
        let mut b = listing("b", Tier::Pro);
        b.rating = 4.5;
        let mut c = listing("c", Tier::Pro);
        c.rating = 4.5;
        c.loves = 10;
        let d = listing("d", Tier::Ultra);

        let ranked = rank(vec![a, b, c, d], &Criteria::default());
        assert_eq!(ids(&ranked), vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn test_rank_is_stable() {
        let listings: Vec<_> = ["e", "b", "d", "a", "c"]
            .into_iter()
            .map(|id| listing(id, Tier::Free))
            .collect();

        let ranked = rank(listings, &Criteria::default());
        assert_eq!(ids(&ranked), vec!["e", "b", "d", "a", "c"]);
    }

    #[test]
    fn test_unknown_origin_is_pure_tier_order() {
        let mut far = listing("far", Tier::Ultra);
        (far.latitude, far.longitude) = (Some(46.0), Some(9.0));
        let near = listing("near", Tier::Free);

        let ranked = rank(vec![near, far], &Criteria::default());
        assert_eq!(ids(&ranked), vec!["far", "near"]);
        assert!(ranked.iter().all(|l| l.distance_km.is_none()));
        assert_eq!(ranked[0].search_priority, 1000);
    }

    #[test]
    fn test_distance_lowers_priority() {
        let zurich = geo::find_city("Zürich").unwrap();
        let bern = geo::find_city("Bern").unwrap();

        let mut local = listing("local", Tier::Pro);
        (local.latitude, local.longitude) = (Some(zurich.latitude), Some(zurich.longitude));
        let mut remote = listing("remote", Tier::Pro);
        (remote.latitude, remote.longitude) = (Some(bern.latitude), Some(bern.longitude));

        let criteria = Criteria {
            origin: Some(zurich.coordinates()),
            ..Default::default()
        };
        let ranked = rank(vec![remote, local], &criteria);

        assert_eq!(ids(&ranked), vec!["local", "remote"]);
        assert_eq!(ranked[0].search_priority, 600);
        assert_eq!(ranked[1].search_priority, 450);
    }

    #[test]
    fn test_filters_exclude() {
        let zurich = geo::find_city("Zürich").unwrap();
        let bern = geo::find_city("Bern").unwrap();

        let mut far = listing("far", Tier::Ultra);
        (far.latitude, far.longitude) = (Some(bern.latitude), Some(bern.longitude));
        far.verified = true;
        far.rating = 5.0;
        let mut unverified = listing("unverified", Tier::Pro);
        unverified.rating = 5.0;
        let mut low = listing("low", Tier::Pro);
        low.verified = true;
        low.rating = 2.0;
        let mut no_posts = listing("no-posts", Tier::Pro);
        no_posts.verified = true;
        no_posts.rating = 5.0;
        // missing coordinates are never excluded by distance.
        let mut kept = listing("kept", Tier::Free);
        kept.verified = true;
        kept.rating = 4.0;

        let authors: HashSet<String> =
            ["far", "unverified", "low", "kept"].map(String::from).into();
        let criteria = Criteria {
            origin: Some(zurich.coordinates()),
            max_distance_km: Some(50.0),
            min_rating: Some(3.0),
            verified_only: true,
            fan_authors: Some(&authors),
        };

        let ranked = rank(vec![far, unverified, low, no_posts, kept], &criteria);
        assert_eq!(ids(&ranked), vec!["kept"]);
        assert_eq!(ranked[0].distance_km, None);
    }

    #[test]
    fn test_sort_orders() {
        let mut cheap = ranked("cheap", Tier::Free, None);
        cheap.listing.price = Some("CHF 100".into());
        cheap.listing.rating = 3.0;
        let mut pricey = ranked("pricey", Tier::Free, None);
        pricey.listing.price = Some("CHF 500".into());
        pricey.listing.loves = 9;
        let mut unknown = ranked("unknown", Tier::Ultra, None);
        unknown.listing.rating = 5.0;
        unknown.listing.created_at = Some(chrono::Utc::now());

        let mut listings = vec![unknown, pricey, cheap];

        sort(&mut listings, SortBy::PriceLow);
        assert_eq!(ids(&listings), vec!["cheap", "pricey", "unknown"]);
        sort(&mut listings, SortBy::PriceHigh);
        assert_eq!(ids(&listings), vec!["pricey", "cheap", "unknown"]);
        sort(&mut listings, SortBy::Rating);
        assert_eq!(ids(&listings), vec!["unknown", "cheap", "pricey"]);
        sort(&mut listings, SortBy::Loves);
        assert_eq!(ids(&listings), vec!["pricey", "unknown", "cheap"]);
        sort(&mut listings, SortBy::Newest);
        assert_eq!(ids(&listings)[0], "unknown");
        sort(&mut listings, SortBy::Relevance);
        assert_eq!(ids(&listings)[0], "unknown");
    }

    #[test]
    fn test_ring_bounds() {
        assert!(!RINGS[0].contains(5.0));
        assert!(RINGS[0].contains(5.1));
        assert!(RINGS[0].contains(20.0));
        assert!(RINGS[1].contains(20.1));
        assert!(RINGS[2].contains(100.0));
        assert!(!RINGS[2].contains(100.1));
    }

    #[test]
    fn test_expansion_dedup_and_target() {
        let primary = vec![
            ranked("a", Tier::Ultra, Some(1.0)),
            ranked("b", Tier::Free, Some(2.0)),
        ];
        let mut expansion = Expansion::new(primary, 4);
        assert!(!expansion.is_complete());

        let added = expansion.append(vec![
            ranked("a", Tier::Ultra, Some(1.0)),
            ranked("c", Tier::Pro, Some(12.0)),
        ]);
        assert_eq!(added, 1);

        let added = expansion.append(vec![
            ranked("d", Tier::Pro, Some(30.0)),
            ranked("c", Tier::Pro, Some(12.0)),
            ranked("e", Tier::Pro, Some(40.0)),
        ]);
        assert_eq!(added, 1);
        assert!(expansion.is_complete());
        assert_eq!(expansion.append(vec![ranked("f", Tier::Ultra, Some(60.0))]), 0);

        let results = expansion.finish();
        assert_eq!(ids(&results), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_expansion_truncates_primary() {
        let primary: Vec<_> = (0..10)
            .map(|i| ranked(&i.to_string(), Tier::Free, None))
            .collect();

        let expansion = Expansion::new(primary, 3);
        assert_eq!(expansion.len(), 3);
        assert!(expansion.is_complete());
    }

    #[test]
    fn test_partition() {
        let listings = vec![
            ranked("u", Tier::Ultra, Some(1.0)),
            ranked("p", Tier::ProPlus, None),
            ranked("q", Tier::Pro, Some(5.0)),
            ranked("f", Tier::Free, None),
            ranked("x", Tier::Ultra, Some(12.0)),
            ranked("y", Tier::Free, Some(5.1)),
        ];

        assert_eq!(
            partition(&listings),
            Buckets {
                ultra: vec!["u".into()],
                pro: vec!["p".into(), "q".into()],
                free_nearby: vec!["f".into()],
                expanded: vec!["x".into(), "y".into()],
            }
        );
    }
}
