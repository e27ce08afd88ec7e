use crate::config::Config;
use crate::db::DbPool;
use crate::mailer::Mailer;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub mailer: Mailer,
}
