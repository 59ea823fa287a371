//! Node repository for database operations

use crate::db::connection::DatabasePool;
use crate::db::models::NodeRow;
use crate::db::{composite_key, StoreResult};

/// Node repository for managing node documents
pub struct NodeRepository;

impl NodeRepository {
    /// List every node of a graph
    pub async fn list_by_graph(pool: &DatabasePool, graph_key: &str) -> StoreResult<Vec<NodeRow>> {
        Ok(
            sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE graph_key = ?")
                .bind(graph_key)
                .fetch_all(pool)
                .await?,
        )
    }

    /// Create a node
    pub async fn create(pool: &DatabasePool, row: &NodeRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO nodes (key, graph_key, local_key, sheet_id, doc) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&row.key)
        .bind(&row.graph_key)
        .bind(&row.local_key)
        .bind(&row.sheet_id)
        .bind(&row.doc)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Replace a node document
    pub async fn replace(pool: &DatabasePool, row: &NodeRow) -> StoreResult<()> {
        sqlx::query("UPDATE nodes SET sheet_id = ?, doc = ? WHERE key = ?")
            .bind(&row.sheet_id)
            .bind(&row.doc)
            .bind(&row.key)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Remove a node by localKey
    pub async fn remove(pool: &DatabasePool, graph_key: &str, local_key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM nodes WHERE key = ?")
            .bind(composite_key(graph_key, local_key))
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Remove every node on a sheet
    pub async fn remove_by_sheet(
        pool: &DatabasePool,
        graph_key: &str,
        sheet_id: &str,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM nodes WHERE graph_key = ? AND sheet_id = ?")
            .bind(graph_key)
            .bind(sheet_id)
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

    async fn test_pool() -> DatabaseConnection {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_create_list_remove() {
        let db = test_pool().await;
        let doc = json!({"key": "n1", "sheet": "0", "type": "pump"});
        let row = NodeRow::from_doc("g1", "n1", "0", &doc).unwrap();
        NodeRepository::create(db.pool(), &row).await.unwrap();

        let listed = NodeRepository::list_by_graph(db.pool(), "g1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].local_key, "n1");

        NodeRepository::remove(db.pool(), "g1", "n1").await.unwrap();
        assert!(NodeRepository::list_by_graph(db.pool(), "g1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_replace_updates_doc() {
        let db = test_pool().await;
        let doc = json!({"key": "n1", "sheet": "0", "position": {"x": 0}});
        let row = NodeRow::from_doc("g1", "n1", "0", &doc).unwrap();
        NodeRepository::create(db.pool(), &row).await.unwrap();

        let moved = json!({"key": "n1", "sheet": "0", "position": {"x": 500}});
        let row = NodeRow::from_doc("g1", "n1", "0", &moved).unwrap();
        NodeRepository::replace(db.pool(), &row).await.unwrap();

        let listed = NodeRepository::list_by_graph(db.pool(), "g1").await.unwrap();
        assert_eq!(listed[0].document().unwrap()["position"]["x"], 500);
    }

    #[tokio::test]
    async fn test_remove_by_sheet() {
        let db = test_pool().await;
        for (key, sheet) in [("n1", "0"), ("n2", "0"), ("n3", "1")] {
            let doc = json!({"key": key, "sheet": sheet});
            let row = NodeRow::from_doc("g1", key, sheet, &doc).unwrap();
            NodeRepository::create(db.pool(), &row).await.unwrap();
        }

        NodeRepository::remove_by_sheet(db.pool(), "g1", "0").await.unwrap();
        let listed = NodeRepository::list_by_graph(db.pool(), "g1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].sheet_id, "1");
    }
}
