use sea_orm::{Database, DatabaseConnection, DbErr};

pub async fn establish_connection(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(database_url).await
}

/// Resolve a connection URL from an explicit path/URL or the environment.
pub fn get_database_url(database: Option<&str>) -> String {
    match database {
        Some(path) if path == ":memory:" => "sqlite::memory:".to_string(),
        Some(path) if path.contains("://") || path.starts_with("sqlite:") => path.to_string(),
        Some(path) => format!("sqlite:{}?mode=rwc", path),
        None => std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:metaload.db?mode=rwc".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_database_url() {
        assert_eq!(get_database_url(Some(":memory:")), "sqlite::memory:");
        assert_eq!(
            get_database_url(Some("graph.db")),
            "sqlite:graph.db?mode=rwc"
        );
        assert_eq!(
            get_database_url(Some("postgres://localhost/metadata")),
            "postgres://localhost/metadata"
        );
    }
}
