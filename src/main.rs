use anyhow::Result;
use kgrag::db::{migrate, Db};
use kgrag::store::SqliteGraphStore;
use kgrag::{Config, KgragError};

const EXPECTED_TABLES: [&str; 3] = ["graph_edges", "graph_nodes", "schema_migrations"];

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.store.log_level.as_str()),
    )
    .init();

    log::info!("Starting kgrag v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Database path: {}", config.db_path().display());
    log::info!("Embedding model: {}", config.embeddings.model);

    let db = Db::new(config.db_path());
    let migrations_dir = config.migrations_dir().to_path_buf();
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await?;
    log::info!("Database initialized successfully");

    verify_database_schema(&db).await?;

    let store = SqliteGraphStore::new(db);
    let (nodes, edges) = store.counts().await?;
    println!("Graph: {} node(s), {} edge(s)", nodes, edges);

    Ok(())
}

/// Verify that all expected tables exist
async fn verify_database_schema(db: &Db) -> Result<()> {
    db.with_connection(|conn| {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let missing: Vec<&str> = EXPECTED_TABLES
            .iter()
            .copied()
            .filter(|t| !tables.iter().any(|existing| existing == t))
            .collect();
        if !missing.is_empty() {
            for table in &missing {
                log::error!("Missing table: {}", table);
            }
            return Err(KgragError::Config(format!(
                "Missing tables: {}",
                missing.join(", ")
            )));
        }

        let applied = migrate::get_applied_migrations(conn)?;
        log::debug!("Applied migrations: {:?}", applied);
        Ok(())
    })
    .await?;

    log::info!("Schema verified");
    Ok(())
}
