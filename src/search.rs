//! Listing search with geographic expansion.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::backend::{Filter, Query, Tables, from_rows};
use crate::error::Result;
use crate::fan_post;
use crate::filters::{SearchFilters, SortBy};
use crate::geo;
use crate::listing::{self, Listing, RankedListing};
use crate::ranking::locality::{self, LocalListing};
use crate::ranking::{self, Buckets, Criteria, Expansion, RINGS};

/// Table linking listings to the services they offer.
pub const SERVICES_TABLE: &str = "listing_services";

/// Search limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Results wanted when the request does not say.
    pub target_count: usize,
    /// Rows fetched per backend query.
    pub max_candidates: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            target_count: 20,
            max_candidates: 200,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub listings: Vec<RankedListing>,
    pub buckets: Buckets,
}

/// Ids of listings offering any of `terms`.
async fn offering(tables: &dyn Tables, terms: &[&str]) -> Result<HashSet<String>> {
    let query = Query::table(SERVICES_TABLE).columns("profile_id").filter(Filter::Or(
        terms
            .iter()
            .map(|term| Filter::contains("service_name", term))
            .collect(),
    ));

    Ok(tables
        .select(&query)
        .await?
        .into_iter()
        .filter_map(|row| row.get("profile_id")?.as_str().map(str::to_owned))
        .collect())
}

async fn candidates(
    tables: &dyn Tables,
    filters: &SearchFilters,
    predicates: Vec<Filter>,
    limit: usize,
) -> Result<Vec<Listing>> {
    let query = Query::table(listing::TABLE)
        .filters(predicates)
        .order("rating", false)
        .range(0, limit);

    let listings: Vec<Listing> = from_rows(tables.select(&query).await?)?;
    Ok(listings
        .into_iter()
        .filter(|listing| filters.accepts_price(listing))
        .collect())
}

/// Ranked listings matching `filters`.
///
/// Listings matching the location come first. When they are fewer than the
/// wanted count and the location is a known city, distance bands around it
/// are appended in order, each ranked on its own.
pub async fn search(
    tables: &dyn Tables,
    filters: &SearchFilters,
    settings: &SearchSettings,
) -> Result<SearchResults> {
    metrics::counter!("search_requests_total").increment(1);

    let target = filters.target_count.unwrap_or(settings.target_count);
    let origin = filters
        .location
        .as_deref()
        .and_then(geo::find_city)
        .map(geo::City::coordinates);

    let mut base = filters.attribute_filters();

    let mut offered: Option<HashSet<String>> = None;
    for terms in filters.service_groups() {
        let ids = offering(tables, &terms).await?;
        offered = Some(match offered {
            Some(previous) => previous.intersection(&ids).cloned().collect(),
            None => ids,
        });
    }
    if let Some(ids) = offered {
        if ids.is_empty() {
            return Ok(SearchResults::default());
        }
        base.push(Filter::is_in("id", ids));
    }

    let fan_authors = if filters.require_fan_posts {
        Some(fan_post::active_authors(tables).await?)
    } else {
        None
    };

    let criteria = Criteria {
        origin,
        max_distance_km: filters.radius_km,
        min_rating: filters.rating,
        verified_only: filters.require_verified,
        fan_authors: fan_authors.as_ref(),
    };

    let mut primary = base.clone();
    primary.extend(filters.location_filter());
    let primary = candidates(tables, filters, primary, settings.max_candidates).await?;
    let mut expansion = Expansion::new(ranking::rank(primary, &criteria), target);

    if let Some(origin) = origin {
        for ring in RINGS {
            if expansion.is_complete() {
                break;
            }
            if filters.radius_km.is_some_and(|radius| ring.min_km >= radius) {
                break;
            }

            let (min_lat, max_lat, min_lon, max_lon) = geo::bounding_box(origin, ring.max_km);
            let mut band = base.clone();
            band.extend([
                Filter::gte("latitude", min_lat),
                Filter::lte("latitude", max_lat),
                Filter::gte("longitude", min_lon),
                Filter::lte("longitude", max_lon),
            ]);

            let mut ranked = ranking::rank(
                candidates(tables, filters, band, settings.max_candidates).await?,
                &criteria,
            );
            ranked.retain(|listing| listing.distance_km.is_some_and(|d| ring.contains(d)));

            let added = expansion.append(ranked);
            metrics::counter!("search_expansion_rings_total").increment(1);
            tracing::debug!(
                min_km = ring.min_km,
                max_km = ring.max_km,
                added,
                "search expanded"
            );
        }
    }

    let mut listings = expansion.finish();
    if filters.sort_by != SortBy::Relevance {
        ranking::sort(&mut listings, filters.sort_by);
    }

    Ok(SearchResults {
        buckets: ranking::partition(&listings),
        listings,
    })
}

/// Listings of the page of `city`, grouped by locality.
pub async fn local(
    tables: &dyn Tables,
    city: &str,
    settings: &SearchSettings,
) -> Result<Vec<LocalListing>> {
    let mut places = vec![city.trim()];
    if let Some(known) = geo::find_city(city) {
        places.extend(known.names().map(|name| -> &str { name }));
        places.extend(known.nearby.iter().copied());
    }

    let query = Query::table(listing::TABLE)
        .filter(Filter::Or(
            places
                .iter()
                .filter(|place| !place.is_empty())
                .map(|place| Filter::contains("location", place))
                .collect(),
        ))
        .order("rating", false)
        .range(0, settings.max_candidates);

    let listings: Vec<Listing> = from_rows(tables.select(&query).await?)?;
    Ok(locality::tier_by_locality(listings, city))
}
