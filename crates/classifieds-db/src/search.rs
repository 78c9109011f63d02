use rusqlite::types::ToSql;

use crate::Database;
use crate::error::DbError;
use crate::models::ListingRow;
use crate::queries::{LISTING_SELECT, listing_from_row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    PriceLow,
    PriceHigh,
    Popular,
}

impl SortOrder {
    /// Unknown values fall back to newest-first.
    pub fn parse(value: &str) -> Self {
        match value {
            "oldest" => Self::Oldest,
            "price_low" => Self::PriceLow,
            "price_high" => Self::PriceHigh,
            "popular" => Self::Popular,
            _ => Self::Newest,
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            Self::Newest => "a.created_at DESC, a.id DESC",
            Self::Oldest => "a.created_at ASC, a.id ASC",
            Self::PriceLow => "a.price ASC, a.created_at DESC, a.id DESC",
            Self::PriceHigh => "a.price DESC, a.created_at DESC, a.id DESC",
            Self::Popular => "a.views_count DESC, a.created_at DESC, a.id DESC",
        }
    }
}

/// Filters for browsing active listings. Empty strings mean "no filter".
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub keyword: String,
    pub category_id: Option<i64>,
    pub location: String,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub sort: SortOrder,
}

impl SearchFilters {
    fn where_clause(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut sql = String::from(" WHERE a.status = 'active'");
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if !self.keyword.is_empty() {
            let pattern = format!("%{}%", self.keyword);
            sql.push_str(&format!(
                " AND (a.title LIKE ?{} OR a.description LIKE ?{})",
                params.len() + 1,
                params.len() + 1
            ));
            params.push(Box::new(pattern));
        }
        if let Some(category_id) = self.category_id {
            sql.push_str(&format!(" AND a.category_id = ?{}", params.len() + 1));
            params.push(Box::new(category_id));
        }
        if !self.location.is_empty() {
            sql.push_str(&format!(" AND a.location LIKE ?{}", params.len() + 1));
            params.push(Box::new(format!("%{}%", self.location)));
        }
        if let Some(min) = self.min_price {
            sql.push_str(&format!(" AND a.price >= ?{}", params.len() + 1));
            params.push(Box::new(min));
        }
        if let Some(max) = self.max_price {
            sql.push_str(&format!(" AND a.price <= ?{}", params.len() + 1));
            params.push(Box::new(max));
        }

        (sql, params)
    }
}

impl Database {
    pub fn search_listings(
        &self,
        filters: &SearchFilters,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ListingRow>, DbError> {
        let (where_sql, mut params) = filters.where_clause();
        let sql = format!(
            "{LISTING_SELECT}{where_sql} ORDER BY {} LIMIT ?{} OFFSET ?{}",
            filters.sort.order_by(),
            params.len() + 1,
            params.len() + 2
        );
        params.push(Box::new(limit));
        params.push(Box::new(offset));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let rows = stmt
                .query_map(refs.as_slice(), listing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_search(&self, filters: &SearchFilters) -> Result<i64, DbError> {
        let (where_sql, params) = filters.where_clause();
        let sql = format!("SELECT COUNT(*) FROM ads a{where_sql}");

        self.with_conn(|conn| {
            let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            Ok(conn.query_row(&sql, refs.as_slice(), |row| row.get(0))?)
        })
    }
}
