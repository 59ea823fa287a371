//! Node-config repository for database operations

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::NodeConfigRow;
use crate::db::StoreResult;

/// Node-config repository
pub struct NodeConfigRepository;

impl NodeConfigRepository {
    /// Get a config by key
    pub async fn get(pool: &DatabasePool, key: &str) -> StoreResult<Option<NodeConfigRow>> {
        Ok(
            sqlx::query_as::<_, NodeConfigRow>("SELECT * FROM node_configs WHERE key = ?")
                .bind(key)
                .fetch_optional(pool)
                .await?,
        )
    }

    /// Create a config
    pub async fn create(pool: &DatabasePool, row: &NodeConfigRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO node_configs (key, workspace, version, display_name, category, doc, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.key)
        .bind(&row.workspace)
        .bind(row.version)
        .bind(&row.display_name)
        .bind(&row.category)
        .bind(&row.doc)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Replace the content document and touch the update timestamp
    pub async fn replace_doc(pool: &DatabasePool, key: &str, doc: &str) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE node_configs SET doc = ?, updated_at = ? WHERE key = ?")
            .bind(doc)
            .bind(&now)
            .bind(key)
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseConnection;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_get_replace() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();

        let doc = json!({"identifier": "root", "tag": "div", "children": []});
        let row = NodeConfigRow::new("pump-card".to_string(), "Pump".to_string(), &doc).unwrap();
        NodeConfigRepository::create(db.pool(), &row).await.unwrap();

        let loaded = NodeConfigRepository::get(db.pool(), "pump-card")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.display_name, "Pump");

        let edited = json!({"identifier": "root", "tag": "section", "children": []});
        NodeConfigRepository::replace_doc(db.pool(), "pump-card", &edited.to_string())
            .await
            .unwrap();
        let loaded = NodeConfigRepository::get(db.pool(), "pump-card")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.document().unwrap()["tag"], "section");
    }
}
