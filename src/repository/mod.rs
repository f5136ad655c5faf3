// Repository layer — each domain lives in its own file with `impl CommunityRepository`.
//
// Callers import `crate::repository::CommunityRepository`; the split is purely
// organizational.

use sqlx::sqlite::SqlitePool;

mod audit;
mod channels;
mod messages;
mod sessions;
mod users;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct CommunityRepository {
    pub(crate) pool: SqlitePool,
}

impl CommunityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
