use axum::{
    Json,
    extract::{Query, State},
};
use classifieds_db::search::{SearchFilters, SortOrder};
use classifieds_types::api::{HomeResponse, SearchQuery, SearchResponse};

use crate::error::AppError;
use crate::listings::{to_category, to_listing};
use crate::security::{detect_sql_injection, sanitize_input};
use crate::state::{AppState, run_blocking};

pub const PER_PAGE: u32 = 12;
const FEATURED_LIMIT: u32 = 6;

fn filters_from(query: &SearchQuery) -> SearchFilters {
    let keyword = sanitize_input(&query.keyword);
    if !keyword.is_empty() {
        // Parameterized queries make this harmless; it is recorded for auditing.
        detect_sql_injection(&keyword);
    }
    SearchFilters {
        keyword,
        category_id: query.category_id.filter(|id| *id > 0),
        location: sanitize_input(&query.location),
        min_price: query.min_price.filter(|p| p.is_finite() && *p >= 0.0),
        max_price: query.max_price.filter(|p| p.is_finite() && *p >= 0.0),
        sort: query.sort.as_deref().map(SortOrder::parse).unwrap_or_default(),
    }
}

fn total_pages(total: i64) -> u32 {
    let total = u32::try_from(total.max(0)).unwrap_or(u32::MAX);
    total.div_ceil(PER_PAGE)
}

/// `GET /listings`: paginated search over active listings.
pub async fn search_listings(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    let filters = filters_from(&query);
    let page = query.page.unwrap_or(1).max(1);
    let offset = (page - 1).saturating_mul(PER_PAGE);

    let db = state.db.clone();
    let (rows, total) = run_blocking(move || {
        let total = db.count_search(&filters)?;
        let rows = db.search_listings(&filters, PER_PAGE, offset)?;
        Ok((rows, total))
    })
    .await?;

    Ok(Json(SearchResponse {
        listings: rows.into_iter().map(to_listing).collect(),
        total,
        page,
        per_page: PER_PAGE,
        total_pages: total_pages(total),
    }))
}

/// `GET /`: newest listings plus the category overview.
pub async fn home(State(state): State<AppState>) -> Result<Json<HomeResponse>, AppError> {
    let db = state.db.clone();
    let (featured, categories) = run_blocking(move || {
        Ok((
            db.get_featured_listings(FEATURED_LIMIT)?,
            db.get_category_stats()?,
        ))
    })
    .await?;

    Ok(Json(HomeResponse {
        featured: featured.into_iter().map(to_listing).collect(),
        categories: categories.into_iter().map(to_category).collect(),
    }))
}
