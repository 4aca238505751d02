//! Known cities and distances.

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;
/// Kilometers per degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;

/// A city listings can be searched around.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct City {
    pub name: &'static str,
    /// Alternative spellings, lowercase.
    pub aliases: &'static [&'static str],
    pub latitude: f64,
    pub longitude: f64,
    /// Cities shown right after local listings.
    pub nearby: &'static [&'static str],
}

impl City {
    pub fn coordinates(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &'static str> + use<> {
        let (name, aliases) = (self.name, self.aliases);
        std::iter::once(name).chain(aliases.iter().copied())
    }
}

pub static CITIES: &[City] = &[
    City {
        name: "Zürich",
        aliases: &["zurich", "zuerich", "zurigo"],
        latitude: 47.3769,
        longitude: 8.5417,
        nearby: &["Winterthur", "Baden", "Zug", "Uster", "Dietikon"],
    },
    City {
        name: "Genève",
        aliases: &["geneva", "genf", "geneve", "ginevra"],
        latitude: 46.2044,
        longitude: 6.1432,
        nearby: &["Lausanne", "Nyon"],
    },
    City {
        name: "Basel",
        aliases: &["bale", "bâle", "basilea"],
        latitude: 47.5596,
        longitude: 7.5886,
        nearby: &["Liestal", "Aarau", "Olten"],
    },
    City {
        name: "Bern",
        aliases: &["berne", "berna"],
        latitude: 46.948,
        longitude: 7.4474,
        nearby: &["Thun", "Biel", "Fribourg", "Solothurn"],
    },
    City {
        name: "Lausanne",
        aliases: &["losanna"],
        latitude: 46.5197,
        longitude: 6.6323,
        nearby: &["Montreux", "Vevey", "Nyon", "Yverdon"],
    },
    City {
        name: "Winterthur",
        aliases: &[],
        latitude: 47.4988,
        longitude: 8.7237,
        nearby: &["Zürich", "Frauenfeld", "Uster", "Schaffhausen"],
    },
    City {
        name: "Luzern",
        aliases: &["lucerne", "lucerna"],
        latitude: 47.0502,
        longitude: 8.3093,
        nearby: &["Zug", "Sursee", "Olten"],
    },
    City {
        name: "St. Gallen",
        aliases: &["st gallen", "sankt gallen", "saint-gall"],
        latitude: 47.4245,
        longitude: 9.3767,
        nearby: &["Wil", "Frauenfeld", "Chur"],
    },
    City {
        name: "Lugano",
        aliases: &[],
        latitude: 46.0037,
        longitude: 8.9511,
        nearby: &["Bellinzona", "Locarno"],
    },
    City {
        name: "Biel",
        aliases: &["bienne", "biel/bienne"],
        latitude: 47.1368,
        longitude: 7.2468,
        nearby: &["Bern", "Solothurn", "Neuchâtel"],
    },
    City {
        name: "Thun",
        aliases: &["thoune"],
        latitude: 46.758,
        longitude: 7.628,
        nearby: &["Bern", "Interlaken"],
    },
    City {
        name: "Fribourg",
        aliases: &["freiburg"],
        latitude: 46.8065,
        longitude: 7.1619,
        nearby: &["Bern", "Lausanne"],
    },
    City {
        name: "Schaffhausen",
        aliases: &["schaffhouse"],
        latitude: 47.6973,
        longitude: 8.6349,
        nearby: &["Winterthur", "Frauenfeld"],
    },
    City {
        name: "Chur",
        aliases: &["coire", "coira"],
        latitude: 46.8499,
        longitude: 9.5329,
        nearby: &["St. Gallen"],
    },
    City {
        name: "Neuchâtel",
        aliases: &["neuchatel", "neuenburg"],
        latitude: 46.9896,
        longitude: 6.9293,
        nearby: &["Biel", "Yverdon", "Fribourg"],
    },
    City {
        name: "Zug",
        aliases: &["zoug"],
        latitude: 47.1662,
        longitude: 8.5155,
        nearby: &["Zürich", "Luzern"],
    },
    City {
        name: "Aarau",
        aliases: &[],
        latitude: 47.3925,
        longitude: 8.0442,
        nearby: &["Olten", "Baden", "Basel"],
    },
    City {
        name: "Baden",
        aliases: &[],
        latitude: 47.4734,
        longitude: 8.3064,
        nearby: &["Zürich", "Aarau", "Dietikon"],
    },
    City {
        name: "Olten",
        aliases: &[],
        latitude: 47.3499,
        longitude: 7.9033,
        nearby: &["Aarau", "Solothurn", "Basel"],
    },
    City {
        name: "Solothurn",
        aliases: &["soleure"],
        latitude: 47.2088,
        longitude: 7.5323,
        nearby: &["Biel", "Olten", "Bern"],
    },
    City {
        name: "Montreux",
        aliases: &[],
        latitude: 46.4312,
        longitude: 6.9107,
        nearby: &["Vevey", "Lausanne"],
    },
];

/// Resolve a free-text location to a known city.
///
/// An exact name or alias wins, otherwise the first city mentioned in the
/// text. Matching ignores case.
pub fn find_city(location: &str) -> Option<&'static City> {
    let location = location.trim().to_lowercase();
    if location.is_empty() {
        return None;
    }

    CITIES
        .iter()
        .find(|city| city.names().any(|name| name.to_lowercase() == location))
        .or_else(|| CITIES.iter().find(|city| city_in(city, &location)))
}

/// Whether `text` mentions `city` under any of its names.
pub fn city_in(city: &City, text: &str) -> bool {
    let text = text.to_lowercase();
    city.names().any(|name| text.contains(&name.to_lowercase()))
}

/// Great-circle distance in kilometers.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());

    let a = ((lat2 - lat1) / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * ((lon2 - lon1) / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Latitude/longitude box containing every point within `radius_km` of
/// `center`, as `(min_lat, max_lat, min_lon, max_lon)`.
pub fn bounding_box(center: (f64, f64), radius_km: f64) -> (f64, f64, f64, f64) {
    let delta_lat = radius_km / KM_PER_DEGREE;
    let delta_lon =
        radius_km / (KM_PER_DEGREE * center.0.to_radians().cos().max(f64::EPSILON));

    (
        center.0 - delta_lat,
        center.0 + delta_lat,
        center.1 - delta_lon,
        center.1 + delta_lon,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_city() {
        assert_eq!(find_city("Zürich").map(|c| c.name), Some("Zürich"));
        assert_eq!(find_city("  zurich ").map(|c| c.name), Some("Zürich"));
        assert_eq!(find_city("GENEVA").map(|c| c.name), Some("Genève"));
        assert_eq!(find_city("Bern Zentrum").map(|c| c.name), Some("Bern"));
        assert_eq!(find_city("Atlantis"), None);
        assert_eq!(find_city(""), None);
    }

    #[test]
    fn test_nearby_cities_are_known() {
        for city in CITIES {
            for nearby in city.nearby {
                // some small towns only appear as neighbours.
                if let Some(known) = find_city(nearby) {
                    assert_ne!(known.name, city.name);
                }
            }
        }
    }

    #[test]
    fn test_haversine() {
        let zurich = find_city("Zürich").unwrap().coordinates();
        let bern = find_city("Bern").unwrap().coordinates();

        assert_eq!(haversine_km(zurich, zurich), 0.0);
        let distance = haversine_km(zurich, bern);
        assert!((94.0..98.0).contains(&distance), "{distance}");
        assert!((haversine_km(bern, zurich) - distance).abs() < 1e-9);
    }

    #[test]
    fn test_bounding_box_contains_radius() {
        let zurich = find_city("Zürich").unwrap().coordinates();
        let (min_lat, max_lat, min_lon, max_lon) = bounding_box(zurich, 20.0);

        for point in [
            (min_lat, zurich.1),
            (max_lat, zurich.1),
            (zurich.0, min_lon),
            (zurich.0, max_lon),
        ] {
            let distance = haversine_km(zurich, point);
            assert!((19.5..20.5).contains(&distance), "{distance}");
        }
    }
}
