/// Database row types. These map directly to SQLite rows and stay
/// independent of the API models in classifieds-types.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub is_active: bool,
}

pub struct NewUserRow<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub phone: &'a str,
}

pub struct ListingRow {
    pub id: i64,
    pub user_id: i64,
    pub category_id: i64,
    pub category_name: String,
    pub title: String,
    pub description: String,
    pub price: Option<f64>,
    pub location: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub image_filename: Option<String>,
    pub status: String,
    pub views_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

/// Column values written on create and update.
pub struct ListingValues<'a> {
    pub category_id: i64,
    pub title: &'a str,
    pub description: &'a str,
    pub price: Option<f64>,
    pub location: &'a str,
    pub contact_email: &'a str,
    pub contact_phone: &'a str,
    pub status: &'a str,
}

pub struct CategoryRow {
    pub id: i64,
    pub name: String,
    pub listing_count: i64,
}
