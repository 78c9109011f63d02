use crate::Database;
use crate::error::DbError;
use crate::models::{CategoryRow, ListingRow, ListingValues, NewUserRow, UserRow};
use rusqlite::{Connection, Row};

type Result<T> = std::result::Result<T, DbError>;

/// Shared SELECT for listings joined with category and seller.
pub(crate) const LISTING_SELECT: &str = "
    SELECT a.id, a.user_id, a.category_id, c.name, a.title, a.description, a.price,
           a.location, a.contact_email, a.contact_phone, a.image_filename, a.status,
           a.views_count, a.created_at, a.updated_at, u.username, u.first_name, u.last_name
    FROM ads a
    JOIN categories c ON a.category_id = c.id
    JOIN users u ON a.user_id = u.id";

impl Database {
    // -- Users --

    /// Inserts a user and returns its id. A taken username or email surfaces
    /// as `DbError::UniqueViolation` straight from the table constraint.
    pub fn create_user(&self, user: &NewUserRow<'_>) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, password_hash, first_name, last_name, phone)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    user.username,
                    user.email,
                    user.password_hash,
                    user.first_name,
                    user.last_name,
                    user.phone,
                ),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// True when either the username or the email is already registered.
    pub fn identity_exists(&self, username: &str, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM users WHERE username = ?1 OR email = ?2 LIMIT 1",
                    (username, email),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Looks up an active user by username OR email.
    pub fn get_active_user_by_login(&self, login: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, email, password_hash, first_name, last_name, phone, is_active
                 FROM users
                 WHERE (username = ?1 OR email = ?1) AND is_active = 1",
                [login],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, email, password_hash, first_name, last_name, phone, is_active
                 FROM users WHERE id = ?1",
                [id],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn count_users(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
    }

    // -- Categories --

    /// Active categories with their number of active listings.
    pub fn get_category_stats(&self) -> Result<Vec<CategoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, COUNT(a.id)
                 FROM categories c
                 LEFT JOIN ads a ON c.id = a.category_id AND a.status = 'active'
                 WHERE c.is_active = 1
                 GROUP BY c.id
                 ORDER BY c.name",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(CategoryRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        listing_count: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn category_is_active(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM categories WHERE id = ?1 AND is_active = 1",
                    [id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Listings --

    pub fn insert_listing(
        &self,
        user_id: i64,
        values: &ListingValues<'_>,
        image_filename: Option<&str>,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO ads (user_id, category_id, title, description, price, location,
                                  contact_email, contact_phone, image_filename, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    user_id,
                    values.category_id,
                    values.title,
                    values.description,
                    values.price,
                    values.location,
                    values.contact_email,
                    values.contact_phone,
                    image_filename,
                    values.status,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Updates a listing owned by `user_id`. The image column is only touched
    /// when `image_filename` is `Some`. Fails with `NotFound` when the row is
    /// missing or owned by someone else.
    pub fn update_listing(
        &self,
        id: i64,
        user_id: i64,
        values: &ListingValues<'_>,
        image_filename: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE ads
                 SET title = ?1, description = ?2, category_id = ?3, price = ?4, location = ?5,
                     contact_email = ?6, contact_phone = ?7, status = ?8,
                     image_filename = COALESCE(?9, image_filename),
                     updated_at = datetime('now')
                 WHERE id = ?10 AND user_id = ?11",
                rusqlite::params![
                    values.title,
                    values.description,
                    values.category_id,
                    values.price,
                    values.location,
                    values.contact_email,
                    values.contact_phone,
                    values.status,
                    image_filename,
                    id,
                    user_id,
                ],
            )?;
            if changed == 0 {
                return Err(DbError::NotFound);
            }
            Ok(())
        })
    }

    /// Deletes a listing owned by `user_id` and returns the image it referenced.
    pub fn delete_listing(&self, id: i64, user_id: i64) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let image: Option<String> = tx
                .query_row(
                    "SELECT image_filename FROM ads WHERE id = ?1 AND user_id = ?2",
                    [id, user_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(DbError::NotFound)?;
            tx.execute("DELETE FROM ads WHERE id = ?1 AND user_id = ?2", [id, user_id])?;
            tx.commit()?;
            Ok(image)
        })
    }

    pub fn get_listing(&self, id: i64) -> Result<Option<ListingRow>> {
        self.with_conn(|conn| query_listing(conn, id, None))
    }

    pub fn get_owned_listing(&self, id: i64, user_id: i64) -> Result<Option<ListingRow>> {
        self.with_conn(|conn| query_listing(conn, id, Some(user_id)))
    }

    pub fn increment_views(&self, id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("UPDATE ads SET views_count = views_count + 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn get_user_listings(&self, user_id: i64, status: Option<&str>) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{LISTING_SELECT}
                 WHERE a.user_id = ?1 AND (?2 IS NULL OR a.status = ?2)
                 ORDER BY a.created_at DESC, a.id DESC"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, status], listing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Most recent active listings for the landing page.
    pub fn get_featured_listings(&self, limit: u32) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{LISTING_SELECT}
                 WHERE a.status = 'active'
                 ORDER BY a.created_at DESC, a.id DESC
                 LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map([limit], listing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Active listings in the same category, excluding `id`.
    pub fn get_related_listings(&self, id: i64, category_id: i64, limit: u32) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{LISTING_SELECT}
                 WHERE a.status = 'active' AND a.category_id = ?1 AND a.id != ?2
                 ORDER BY a.created_at DESC, a.id DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![category_id, id, limit], listing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_listings(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM ads", [], |r| r.get(0))?))
    }

    // -- Sessions --

    /// Raw JSON for a live session; expired rows read as absent.
    pub fn load_session(&self, id: &str, now: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT data FROM sessions WHERE id = ?1 AND expires_at >= ?2",
                rusqlite::params![id, now],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Upserts a session row and drops any rows that have expired.
    pub fn save_session(&self, id: &str, data: &str, expires_at: i64, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM sessions WHERE expires_at < ?1", [now])?;
            conn.execute(
                "INSERT INTO sessions (id, data, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data, expires_at = excluded.expires_at",
                rusqlite::params![id, data, expires_at],
            )?;
            Ok(())
        })
    }

    pub fn delete_session(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
            Ok(())
        })
    }
}

fn query_listing(conn: &Connection, id: i64, owner: Option<i64>) -> Result<Option<ListingRow>> {
    let mut stmt = conn.prepare(&format!(
        "{LISTING_SELECT} WHERE a.id = ?1 AND (?2 IS NULL OR a.user_id = ?2)"
    ))?;
    stmt.query_row(rusqlite::params![id, owner], listing_from_row)
        .optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        phone: row.get(6)?,
        is_active: row.get(7)?,
    })
}

pub(crate) fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<ListingRow> {
    Ok(ListingRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category_id: row.get(2)?,
        category_name: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        price: row.get(6)?,
        location: row.get(7)?,
        contact_email: row.get(8)?,
        contact_phone: row.get(9)?,
        image_filename: row.get(10)?,
        status: row.get(11)?,
        views_count: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        username: row.get(15)?,
        first_name: row.get(16)?,
        last_name: row.get(17)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
