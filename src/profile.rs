//! Profile settings of the signed-in user.
//!
//! Forms never write columns directly: they send [`ProfileUpdate`] messages,
//! reduced into one [`ProfileSettings`] which is validated then stored.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::backend::{Backend, Filter, Query, first_row, to_row};
use crate::error::{Result, ServerError};
use crate::listing::{self, nullable};
use crate::session::Session;
use crate::upload::{self, FileUpload, StoredImage};

/// Editable subset of a listing.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_coordinates"))]
pub struct ProfileSettings {
    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(min = 2, max = 50, message = "Name must be 2 to 50 characters long."))]
    pub display_name: String,
    #[validate(length(max = 100, message = "Location must be at most 100 characters long."))]
    pub location: Option<String>,
    #[validate(length(max = 2000, message = "Description must be at most 2000 characters long."))]
    pub description: Option<String>,
    #[validate(length(max = 50, message = "Price must be at most 50 characters long."))]
    pub price: Option<String>,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude is out of range."))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude is out of range."))]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 10, message = "At most 10 languages."))]
    pub languages: Vec<String>,
    #[validate(range(min = 18, max = 99, message = "Age must be between 18 and 99."))]
    pub age: Option<u32>,
    #[validate(range(min = 120, max = 220, message = "Height must be between 120 and 220 cm."))]
    pub height: Option<u32>,
    #[validate(range(min = 35, max = 200, message = "Weight must be between 35 and 200 kg."))]
    pub weight: Option<u32>,
    pub cup_size: Option<String>,
    pub body_size: Option<String>,
    pub descent: Option<String>,
    pub ethnicity: Option<String>,
    pub body_type: Option<String>,
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub gallery: Vec<String>,
}

fn validate_coordinates(settings: &ProfileSettings) -> std::result::Result<(), ValidationError> {
    if settings.latitude.is_some() != settings.longitude.is_some() {
        return Err(ValidationError::new("coordinates")
            .with_message("Latitude and longitude go together.".into()));
    }
    Ok(())
}

/// Geographic position of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One edit coming from a settings form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ProfileUpdate {
    DisplayName(String),
    Location(Option<String>),
    Description(Option<String>),
    Price(Option<String>),
    Coordinates(Option<Coordinates>),
    Languages(Vec<String>),
    Age(Option<u32>),
    Height(Option<u32>),
    Weight(Option<u32>),
    CupSize(Option<String>),
    BodySize(Option<String>),
    Descent(Option<String>),
    Ethnicity(Option<String>),
    BodyType(Option<String>),
    CoverImage(Option<String>),
    /// Reorder or prune the gallery.
    Gallery(Vec<String>),
    AddImages(Vec<String>),
}

/// Blank text means "unset".
fn text(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

impl ProfileSettings {
    pub fn apply(&mut self, update: ProfileUpdate) {
        match update {
            ProfileUpdate::DisplayName(name) => self.display_name = name.trim().to_owned(),
            ProfileUpdate::Location(location) => self.location = text(location),
            ProfileUpdate::Description(description) => self.description = text(description),
            ProfileUpdate::Price(price) => self.price = text(price),
            ProfileUpdate::Coordinates(coordinates) => {
                self.latitude = coordinates.map(|c| c.latitude);
                self.longitude = coordinates.map(|c| c.longitude);
            },
            ProfileUpdate::Languages(mut languages) => {
                languages.retain(|language| !language.trim().is_empty());
                languages.dedup();
                self.languages = languages;
            },
            ProfileUpdate::Age(age) => self.age = age,
            ProfileUpdate::Height(height) => self.height = height,
            ProfileUpdate::Weight(weight) => self.weight = weight,
            ProfileUpdate::CupSize(value) => self.cup_size = text(value),
            ProfileUpdate::BodySize(value) => self.body_size = text(value),
            ProfileUpdate::Descent(value) => self.descent = text(value),
            ProfileUpdate::Ethnicity(value) => self.ethnicity = text(value),
            ProfileUpdate::BodyType(value) => self.body_type = text(value),
            ProfileUpdate::CoverImage(url) => self.image_url = text(url),
            ProfileUpdate::Gallery(gallery) => {
                if self
                    .image_url
                    .as_ref()
                    .is_some_and(|cover| !gallery.contains(cover))
                {
                    self.image_url = gallery.first().cloned();
                }
                self.gallery = gallery;
            },
            ProfileUpdate::AddImages(urls) => {
                if self.image_url.is_none() {
                    self.image_url = urls.first().cloned();
                }
                self.gallery.extend(urls);
            },
        }
    }

    /// Apply every update in order.
    pub fn reduce(mut self, updates: impl IntoIterator<Item = ProfileUpdate>) -> Self {
        for update in updates {
            self.apply(update);
        }
        self
    }
}

/// Settings of the signed-in user.
pub async fn get(backend: &Backend, session: &Session) -> Result<ProfileSettings> {
    let query = Query::table(listing::TABLE)
        .filter(Filter::eq("id", session.user_id.as_str()))
        .range(0, 1);

    first_row(backend.tables.select(&query).await?)?.ok_or(ServerError::NotFound)
}

async fn store(
    backend: &Backend,
    session: &Session,
    settings: &ProfileSettings,
) -> Result<ProfileSettings> {
    settings.validate()?;

    let updated = backend
        .tables
        .update(
            listing::TABLE,
            &[Filter::eq("id", session.user_id.as_str())],
            to_row(settings)?,
        )
        .await?;

    first_row(updated)?.ok_or(ServerError::NotFound)
}

/// Apply `updates` to the stored settings.
pub async fn update(
    backend: &Backend,
    session: &Session,
    updates: Vec<ProfileUpdate>,
) -> Result<ProfileSettings> {
    let settings = get(backend, session).await?.reduce(updates);
    let settings = store(backend, session, &settings).await?;

    tracing::debug!(user_id = %session.user_id, "profile updated");
    Ok(settings)
}

/// Add watermarked images to the gallery.
///
/// The first image becomes the cover when the profile has none.
pub async fn upload_images(
    backend: &Backend,
    bucket: &str,
    label: &str,
    session: &Session,
    files: Vec<FileUpload>,
) -> Result<Vec<StoredImage>> {
    let settings = get(backend, session).await?;

    let stored =
        upload::upload_batch(backend.storage.clone(), bucket, &session.user_id, label, files)
            .await?;

    let urls = stored.iter().map(|image| image.url.clone()).collect();
    let settings = settings.reduce([ProfileUpdate::AddImages(urls)]);
    store(backend, session, &settings).await?;

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Tables};
    use crate::upload::tests::file;
    use serde_json::json;

    fn session() -> Session {
        Session {
            user_id: "user-1".into(),
            email: Some("mila@example.com".into()),
            access_token: "token".into(),
        }
    }

    async fn setup() -> (MemoryBackend, Backend) {
        let memory = MemoryBackend::default();
        memory
            .tables
            .insert(
                listing::TABLE,
                vec![
                    to_row(&json!({
                        "id": "user-1",
                        "display_name": "Mila",
                        "tier": "PRO",
                        "languages": null,
                    }))
                    .unwrap(),
                ],
            )
            .await
            .unwrap();

        let backend = Backend::memory(&memory);
        (memory, backend)
    }

    #[test]
    fn test_update_messages() {
        let update: ProfileUpdate =
            serde_json::from_value(json!({ "type": "display_name", "value": "Lea" })).unwrap();
        assert_eq!(update, ProfileUpdate::DisplayName("Lea".into()));

        let update: ProfileUpdate = serde_json::from_value(json!({
            "type": "coordinates",
            "value": { "latitude": 46.2, "longitude": 6.14 },
        }))
        .unwrap();
        assert!(matches!(update, ProfileUpdate::Coordinates(Some(_))));
    }

    #[test]
    fn test_reduce() {
        let settings = ProfileSettings::default().reduce([
            ProfileUpdate::DisplayName("  Mila ".into()),
            ProfileUpdate::Location(Some("Zürich".into())),
            ProfileUpdate::Price(Some("   ".into())),
            ProfileUpdate::Languages(vec!["de".into(), "de".into(), "".into(), "en".into()]),
            ProfileUpdate::Location(Some("Bern".into())),
            ProfileUpdate::AddImages(vec!["a".into(), "b".into()]),
        ]);

        assert_eq!(settings.display_name, "Mila");
        assert_eq!(settings.location.as_deref(), Some("Bern"));
        assert_eq!(settings.price, None);
        assert_eq!(settings.languages, vec!["de", "en"]);
        assert_eq!(settings.image_url.as_deref(), Some("a"));

        let settings = settings.reduce([ProfileUpdate::Gallery(vec!["b".into()])]);
        assert_eq!(settings.gallery, vec!["b"]);
        assert_eq!(settings.image_url.as_deref(), Some("b"));
    }

    #[test]
    fn test_validation() {
        let valid = ProfileSettings::default().reduce([ProfileUpdate::DisplayName("Mila".into())]);
        assert!(valid.validate().is_ok());

        let invalid = valid.clone().reduce([ProfileUpdate::Age(Some(17))]);
        assert!(invalid.validate().is_err());

        let half = ProfileSettings {
            latitude: Some(46.2),
            ..valid
        };
        assert!(half.validate().is_err());
    }

    #[tokio::test]
    async fn test_update_stores_settings() {
        let (memory, backend) = setup().await;

        let settings = update(
            &backend,
            &session(),
            vec![
                ProfileUpdate::Description(Some("Hello".into())),
                ProfileUpdate::Coordinates(Some(Coordinates {
                    latitude: 47.37,
                    longitude: 8.54,
                })),
            ],
        )
        .await
        .unwrap();

        assert_eq!(settings.description.as_deref(), Some("Hello"));
        let row = &memory.tables.rows(listing::TABLE).await[0];
        assert_eq!(row["latitude"], 47.37);
        // columns outside the settings are untouched.
        assert_eq!(row["tier"], "PRO");
    }

    #[tokio::test]
    async fn test_invalid_update_is_not_stored() {
        let (memory, backend) = setup().await;

        let result = update(&backend, &session(), vec![ProfileUpdate::DisplayName("M".into())]).await;

        assert!(matches!(result, Err(ServerError::Validation(_))));
        assert_eq!(memory.tables.rows(listing::TABLE).await[0]["display_name"], "Mila");
    }

    #[tokio::test]
    async fn test_unknown_profile() {
        let backend = Backend::memory(&MemoryBackend::default());
        assert!(matches!(get(&backend, &session()).await, Err(ServerError::NotFound)));
    }

    #[tokio::test]
    async fn test_upload_images_sets_cover() {
        let (memory, backend) = setup().await;

        let stored = upload_images(
            &backend,
            "profile-images",
            "VITRINE",
            &session(),
            vec![file("a.png", 800, 600), file("b.png", 1000, 900)],
        )
        .await
        .unwrap();

        let row = &memory.tables.rows(listing::TABLE).await[0];
        assert_eq!(row["image_url"], json!(stored[0].url));
        assert_eq!(row["gallery"].as_array().unwrap().len(), 2);
    }
}
