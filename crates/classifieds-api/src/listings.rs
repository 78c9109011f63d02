use axum::{
    Extension, Form, Json,
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use classifieds_db::DbError;
use classifieds_db::models::{CategoryRow, ListingRow, ListingValues};
use classifieds_types::api::{
    CreatedResponse, CsrfForm, ListingDetailResponse, ListingForm, MessageResponse,
    MyListingsQuery,
};
use classifieds_types::models::{Category, Listing, ListingStatus};
use classifieds_types::session::SessionUser;
use tracing::{info, warn};

use crate::csrf::require_valid_token;
use crate::error::{AppError, FieldErrors};
use crate::rate_limit::RateLimitAction;
use crate::security::{ValidListing, validate_listing};
use crate::session::CurrentSession;
use crate::state::{AppState, run_blocking};
use crate::uploads::validate_image;

const RELATED_LIMIT: u32 = 4;

/// A listing submission as read from a multipart body.
#[derive(Debug, Default)]
pub struct ListingSubmission {
    pub csrf_token: String,
    pub form: ListingForm,
    pub image: Option<UploadedFile>,
}

#[derive(Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Bytes,
}

pub async fn read_submission(mut multipart: Multipart) -> Result<ListingSubmission, AppError> {
    let mut submission = ListingSubmission::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed form data: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Malformed form data: {e}")))?;
            // Browsers send an empty part when no file was chosen.
            if !filename.is_empty() || !bytes.is_empty() {
                submission.image = Some(UploadedFile { filename, bytes });
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::Validation(format!("Malformed form data: {e}")))?;
        let form = &mut submission.form;
        match name.as_str() {
            "csrf_token" => submission.csrf_token = value,
            "title" => form.title = value,
            "description" => form.description = value,
            "category_id" => form.category_id = value,
            "price" => form.price = value,
            "location" => form.location = value,
            "contact_email" => form.contact_email = value,
            "contact_phone" => form.contact_phone = value,
            "status" => form.status = value,
            _ => {}
        }
    }

    Ok(submission)
}

fn values(listing: &ValidListing) -> ListingValues<'_> {
    ListingValues {
        category_id: listing.category_id,
        title: &listing.title,
        description: &listing.description,
        price: listing.price,
        location: &listing.location,
        contact_email: &listing.contact_email,
        contact_phone: &listing.contact_phone,
        status: listing.status.as_str(),
    }
}

fn parse_timestamp(raw: &str, id: i64) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; it is UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on listing {}: {}", raw, id, e);
            chrono::DateTime::default()
        })
}

pub fn to_listing(row: ListingRow) -> Listing {
    let status = ListingStatus::parse(&row.status).unwrap_or_else(|| {
        warn!("Unknown status '{}' on listing {}", row.status, row.id);
        ListingStatus::Inactive
    });
    Listing {
        created_at: parse_timestamp(&row.created_at, row.id),
        updated_at: parse_timestamp(&row.updated_at, row.id),
        id: row.id,
        user_id: row.user_id,
        category_id: row.category_id,
        category_name: row.category_name,
        title: row.title,
        description: row.description,
        price: row.price,
        location: row.location,
        contact_email: row.contact_email,
        contact_phone: row.contact_phone,
        image_filename: row.image_filename,
        status,
        views_count: row.views_count,
        username: row.username,
        first_name: row.first_name,
        last_name: row.last_name,
    }
}

pub fn to_category(row: CategoryRow) -> Category {
    Category {
        id: row.id,
        name: row.name,
        listing_count: row.listing_count,
    }
}

fn invalid_category() -> AppError {
    let mut fields = FieldErrors::new();
    fields.insert("category_id", "Invalid category selected".into());
    AppError::Fields(fields)
}

// -- Handlers --

pub async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>, AppError> {
    let db = state.db.clone();
    let rows = run_blocking(move || Ok(db.get_category_stats()?)).await?;
    Ok(Json(rows.into_iter().map(to_category).collect()))
}

pub async fn create_listing(
    State(state): State<AppState>,
    Extension(session): Extension<CurrentSession>,
    Extension(user): Extension<SessionUser>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let submission = read_submission(multipart).await?;

    session.read(|data| require_valid_token(data, &submission.csrf_token))?;

    // Field errors are reported before the daily quota is charged.
    let listing = validate_listing(&submission.form).map_err(AppError::Fields)?;
    let image_kind = submission
        .image
        .as_ref()
        .map(|file| validate_image(&file.filename, &file.bytes, state.config.max_upload_bytes))
        .transpose()?;

    let decision = session.update(|data| {
        state.limiter.check_and_consume(
            data,
            RateLimitAction::PostListing,
            &user.user_id.to_string(),
            state.config.rate_limits.post_listing,
        )
    });
    if !decision.is_allowed() {
        return Err(AppError::RateLimited);
    }

    let db = state.db.clone();
    let category_id = listing.category_id;
    if !run_blocking(move || Ok(db.category_is_active(category_id)?)).await? {
        return Err(invalid_category());
    }

    let image = match (image_kind, &submission.image) {
        (Some(kind), Some(file)) => Some(state.images.save(kind, &file.bytes).await?),
        _ => None,
    };

    let db = state.db.clone();
    let user_id = user.user_id;
    let stored_image = image.clone();
    let inserted = run_blocking(move || {
        Ok(db.insert_listing(user_id, &values(&listing), stored_image.as_deref())?)
    })
    .await;

    let id = match inserted {
        Ok(id) => id,
        Err(e) => {
            if let Some(name) = &image {
                state.images.delete(name).await;
            }
            return Err(e);
        }
    };

    info!("Listing {} created by user {}", id, user.user_id);
    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            message: "Ad posted successfully".into(),
            id,
        }),
    ))
}

pub async fn update_listing(
    State(state): State<AppState>,
    Extension(session): Extension<CurrentSession>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<MessageResponse>, AppError> {
    let submission = read_submission(multipart).await?;

    session.read(|data| require_valid_token(data, &submission.csrf_token))?;

    let db = state.db.clone();
    let user_id = user.user_id;
    let existing = run_blocking(move || Ok(db.get_owned_listing(id, user_id)?))
        .await?
        .ok_or(AppError::NotFound)?;

    let listing = validate_listing(&submission.form).map_err(AppError::Fields)?;
    let image_kind = submission
        .image
        .as_ref()
        .map(|file| validate_image(&file.filename, &file.bytes, state.config.max_upload_bytes))
        .transpose()?;

    let db = state.db.clone();
    let category_id = listing.category_id;
    if !run_blocking(move || Ok(db.category_is_active(category_id)?)).await? {
        return Err(invalid_category());
    }

    let new_image = match (image_kind, &submission.image) {
        (Some(kind), Some(file)) => Some(state.images.save(kind, &file.bytes).await?),
        _ => None,
    };

    let db = state.db.clone();
    let stored_image = new_image.clone();
    let updated = run_blocking(move || {
        db.update_listing(id, user_id, &values(&listing), stored_image.as_deref())
            .map_err(|e| match e {
                DbError::NotFound => AppError::NotFound,
                other => other.into(),
            })
    })
    .await;

    if let Err(e) = updated {
        if let Some(name) = &new_image {
            state.images.delete(name).await;
        }
        return Err(e);
    }

    if new_image.is_some() {
        if let Some(old) = &existing.image_filename {
            state.images.delete(old).await;
        }
    }

    info!("Listing {} updated by user {}", id, user.user_id);
    Ok(Json(MessageResponse {
        message: "Ad updated successfully".into(),
    }))
}

pub async fn delete_listing(
    State(state): State<AppState>,
    Extension(session): Extension<CurrentSession>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
    Form(form): Form<CsrfForm>,
) -> Result<Json<MessageResponse>, AppError> {
    session.read(|data| require_valid_token(data, &form.csrf_token))?;

    let db = state.db.clone();
    let user_id = user.user_id;
    let image = run_blocking(move || {
        db.delete_listing(id, user_id).map_err(|e| match e {
            DbError::NotFound => AppError::NotFound,
            other => other.into(),
        })
    })
    .await?;

    if let Some(name) = image {
        state.images.delete(&name).await;
    }

    info!("Listing {} deleted by user {}", id, user.user_id);
    Ok(Json(MessageResponse {
        message: "Ad deleted successfully".into(),
    }))
}

pub async fn my_listings(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Query(query): Query<MyListingsQuery>,
) -> Result<Json<Vec<Listing>>, AppError> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            ListingStatus::parse(raw)
                .ok_or_else(|| AppError::Validation("Invalid status filter".into()))?,
        ),
        None => None,
    };

    let db = state.db.clone();
    let user_id = user.user_id;
    let rows = run_blocking(move || {
        Ok(db.get_user_listings(user_id, status.map(|s| s.as_str()))?)
    })
    .await?;

    Ok(Json(rows.into_iter().map(to_listing).collect()))
}

/// Public detail page. Owners looking at their own ad do not bump the counter.
pub async fn view_listing(
    State(state): State<AppState>,
    Extension(session): Extension<CurrentSession>,
    Path(id): Path<i64>,
) -> Result<Json<ListingDetailResponse>, AppError> {
    let viewer = session.read(|data| data.current_user().map(|u| u.user_id));

    let db = state.db.clone();
    let (row, related) = run_blocking(move || {
        let row = db
            .get_listing(id)?
            .filter(|row| row.status == ListingStatus::Active.as_str())
            .ok_or(AppError::NotFound)?;
        if viewer != Some(row.user_id) {
            db.increment_views(id)?;
        }
        let related = db.get_related_listings(id, row.category_id, RELATED_LIMIT)?;
        Ok((row, related))
    })
    .await?;

    let mut listing = to_listing(row);
    if viewer != Some(listing.user_id) {
        listing.views_count += 1;
    }

    Ok(Json(ListingDetailResponse {
        listing,
        related: related.into_iter().map(to_listing).collect(),
    }))
}
