use stockpile_model::{Webhook, WebhookDelivery, epoch_now};

use super::rows::{DeliveryRow, WebhookRow};
use super::{Database, exec, fetch_all, fetch_one, fetch_optional};
use crate::error::{CoreError, Result};

impl Database {
    pub async fn create_webhook(&self, webhook: &Webhook) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, name, url, events, secret, enabled, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            self.table("webhooks")
        );
        exec!(
            self,
            &sql,
            &webhook.id,
            &webhook.name,
            &webhook.url,
            serde_json::to_string(&webhook.events)?,
            webhook.secret.as_deref(),
            webhook.enabled,
            webhook.created_at,
            webhook.updated_at,
        );
        Ok(())
    }

    pub async fn update_webhook(&self, webhook: &Webhook) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET name = $2, url = $3, events = $4, secret = $5,
                           enabled = $6, updated_at = $7
             WHERE id = $1",
            self.table("webhooks")
        );
        if exec!(
            self,
            &sql,
            &webhook.id,
            &webhook.name,
            &webhook.url,
            serde_json::to_string(&webhook.events)?,
            webhook.secret.as_deref(),
            webhook.enabled,
            epoch_now(),
        ) == 0
        {
            return Err(CoreError::not_found(format!("webhook {}", webhook.id)));
        }
        Ok(())
    }

    pub async fn set_webhook_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET enabled = $2, updated_at = $3 WHERE id = $1",
            self.table("webhooks")
        );
        if exec!(self, &sql, id, enabled, epoch_now()) == 0 {
            return Err(CoreError::not_found(format!("webhook {id}")));
        }
        Ok(())
    }

    pub async fn delete_webhook(&self, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table("webhooks"));
        Ok(exec!(self, &sql, id) > 0)
    }

    pub async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", self.table("webhooks"));
        let row = fetch_optional!(self, WebhookRow, &sql, id);
        Ok(row.map(Into::into))
    }

    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        let sql = format!("SELECT * FROM {} ORDER BY created_at", self.table("webhooks"));
        let rows = fetch_all!(self, WebhookRow, &sql);
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Queue or record one delivery attempt. The outbound worker owns status
    /// updates; the core only appends.
    pub async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, webhook_id, event, status, status_code, response_body,
                             error_message, duration_ms, retry_count, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            self.table("webhook_deliveries")
        );
        exec!(
            self,
            &sql,
            &delivery.id,
            &delivery.webhook_id,
            &delivery.event,
            delivery.status.as_str(),
            delivery.status_code,
            delivery.response_body.as_deref(),
            delivery.error_message.as_deref(),
            delivery.duration_ms,
            delivery.retry_count,
            delivery.created_at,
        );
        Ok(())
    }

    pub async fn list_deliveries(&self, webhook_id: &str, limit: i64) -> Result<Vec<WebhookDelivery>> {
        let sql = format!(
            "SELECT * FROM {} WHERE webhook_id = $1 ORDER BY created_at DESC LIMIT $2",
            self.table("webhook_deliveries")
        );
        let rows = fetch_all!(self, DeliveryRow, &sql, webhook_id, limit);
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// `(total, success, failed)` for one webhook.
    pub async fn delivery_stats(&self, webhook_id: &str) -> Result<(i64, i64, i64)> {
        let sql = format!(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
             FROM {} WHERE webhook_id = $1",
            self.table("webhook_deliveries")
        );
        Ok(fetch_one!(self, (i64, i64, i64), &sql, webhook_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpile_model::DeliveryStatus;

    fn webhook(id: &str) -> Webhook {
        Webhook {
            id: id.to_string(),
            name: "ci".to_string(),
            url: "https://ci.internal/hook".to_string(),
            events: vec!["sync.completed".to_string()],
            secret: None,
            enabled: true,
            created_at: epoch_now(),
            updated_at: epoch_now(),
        }
    }

    #[tokio::test]
    async fn webhook_crud_and_event_filter() {
        let db = Database::connect_ephemeral().await.unwrap();
        db.create_webhook(&webhook("w1")).await.unwrap();

        let fetched = db.get_webhook("w1").await.unwrap().unwrap();
        assert!(fetched.wants_event("sync.completed"));
        assert!(!fetched.wants_event("file.deleted"));

        db.set_webhook_enabled("w1", false).await.unwrap();
        assert!(!db.get_webhook("w1").await.unwrap().unwrap().enabled);

        assert!(db.delete_webhook("w1").await.unwrap());
        assert!(db.get_webhook("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delivery_ledger_aggregates() {
        let db = Database::connect_ephemeral().await.unwrap();
        db.create_webhook(&webhook("w2")).await.unwrap();

        for (id, status) in [("d1", DeliveryStatus::Success), ("d2", DeliveryStatus::Failed)] {
            db.insert_delivery(&WebhookDelivery {
                id: id.to_string(),
                webhook_id: "w2".to_string(),
                event: "sync.completed".to_string(),
                status,
                status_code: Some(200),
                response_body: None,
                error_message: None,
                duration_ms: Some(12),
                retry_count: 0,
                created_at: epoch_now(),
            })
            .await
            .unwrap();
        }

        assert_eq!(db.delivery_stats("w2").await.unwrap(), (2, 1, 1));
        assert_eq!(db.list_deliveries("w2", 10).await.unwrap().len(), 2);
    }
}
