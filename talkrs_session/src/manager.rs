use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
    Set,
};
use talkrs_core::SessionStorage;
use talkrs_entities::conversation_contexts;
use tracing::{debug, info};

fn is_table_already_exists_error(err: &DbErr) -> bool {
    err.to_string().contains("table") && err.to_string().contains("already exists")
}

/// SQL-backed context store (`SQLite`, Postgres or `MySQL`, per the URL).
pub struct SessionManager {
    db: DatabaseConnection,
}

impl SessionManager {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        info!("Connecting to session database");

        let db = Database::connect(database_url).await?;

        let backend = db.get_database_backend();
        let schema = Schema::new(backend);
        let stmt = schema.create_table_from_entity(conversation_contexts::Entity);
        match db
            .execute_unprepared(&backend.build(&stmt).to_string())
            .await
        {
            Ok(_) => {}
            Err(e) if is_table_already_exists_error(&e) => {
                debug!("Table already exists, skipping creation");
            }
            Err(e) => return Err(e.into()),
        }

        info!("SessionManager initialized");
        Ok(Self { db })
    }

    pub async fn list_keys(&self) -> anyhow::Result<Vec<String>> {
        let rows = conversation_contexts::Entity::find().all(&self.db).await?;
        Ok(rows.into_iter().map(|row| row.key).collect())
    }
}

#[async_trait]
impl SessionStorage for SessionManager {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let row = conversation_contexts::Entity::find_by_id(key.to_owned())
            .one(&self.db)
            .await?;
        Ok(row.map(|model| model.context))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        let now = chrono::Utc::now().naive_utc();

        if let Some(model) = conversation_contexts::Entity::find_by_id(key.to_owned())
            .one(&self.db)
            .await?
        {
            conversation_contexts::Entity::update(conversation_contexts::ActiveModel {
                key: Set(model.key),
                context: Set(value),
                created_at: Set(model.created_at),
                updated_at: Set(now),
            })
            .exec(&self.db)
            .await?;
        } else {
            conversation_contexts::ActiveModel {
                key: Set(key.to_owned()),
                context: Set(value),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&self.db)
            .await?;
        }

        debug!("Stored context for {key}");
        Ok(())
    }

    async fn clear(&self, key: &str) -> anyhow::Result<()> {
        conversation_contexts::Entity::delete_by_id(key.to_owned())
            .exec(&self.db)
            .await?;

        info!("Cleared context for {key}");
        Ok(())
    }
}
