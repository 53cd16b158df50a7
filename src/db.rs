use crate::config::AppConfig;
use crate::entities;
use crate::errors::ServiceError;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool.
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool from a raw URL with default pool sizing.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let mut opts = ConnectOptions::new(database_url.to_string());
    opts.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let pool = Database::connect(opts).await?;
    info!("Database connection established");
    Ok(pool)
}

/// Establishes a connection pool using the application configuration.
pub async fn establish_connection_from_app_config(
    config: &AppConfig,
) -> Result<DbPool, ServiceError> {
    let mut opts = ConnectOptions::new(config.database_url.clone());
    opts.max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(!config.is_production());

    let pool = Database::connect(opts).await?;
    info!(
        environment = %config.environment,
        "Database connection established"
    );
    Ok(pool)
}

/// Creates any missing tables from the entity definitions.
///
/// Production deployments own their migrations; this bootstrap covers tests
/// and embedded/SQLite use where the schema ships with the crate.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_table(db, &schema, entities::site::Entity).await?;
    create_table(db, &schema, entities::inventory_item::Entity).await?;
    create_table(db, &schema, entities::stock_lock::Entity).await?;
    create_table(db, &schema, entities::inventory_transaction::Entity).await?;
    create_table(db, &schema, entities::order::Entity).await?;
    create_table(db, &schema, entities::order_item::Entity).await?;
    create_table(db, &schema, entities::batch::Entity).await?;
    create_table(db, &schema, entities::batch_order::Entity).await?;
    create_table(db, &schema, entities::wave::Entity).await?;
    create_table(db, &schema, entities::wave_order::Entity).await?;
    create_table(db, &schema, entities::inventory_transfer::Entity).await?;
    create_table(db, &schema, entities::discrepancy::Entity).await?;
    create_table(db, &schema, entities::stock_take::Entity).await?;
    create_table(db, &schema, entities::stock_take_item::Entity).await?;

    info!("Schema bootstrap complete");
    Ok(())
}

async fn create_table<E>(
    db: &DatabaseConnection,
    schema: &Schema,
    entity: E,
) -> Result<(), ServiceError>
where
    E: EntityTrait,
{
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(db.get_database_backend().build(&stmt)).await?;
    Ok(())
}
