//! Durable queue over redis lists — the ready/unacked/rejected layout.
//!
//! A delivery moves ready → unacked on consume, disappears on ack, and
//! moves unacked → rejected on reject. `return_all_rejected` re-queues the
//! rejected list for retry; delivery is therefore at least once.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::Result;

/// One consumed payload awaiting ack or reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: Vec<u8>,
}

#[derive(Clone)]
pub struct DurableQueue {
    conn: ConnectionManager,
    ready_key: String,
    unacked_key: String,
    rejected_key: String,
}

impl DurableQueue {
    pub fn new(conn: ConnectionManager, name: &str) -> Self {
        DurableQueue {
            conn,
            ready_key: format!("queue:{}:ready", name),
            unacked_key: format!("queue:{}:unacked", name),
            rejected_key: format!("queue:{}:rejected", name),
        }
    }

    pub async fn enqueue(&self, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(&self.ready_key, payload).await?;
        Ok(())
    }

    /// Up to `max_batch` deliveries, blocking up to `poll_secs` for the
    /// first one. Every delivery lands on the unacked list.
    pub async fn consume_batch(&self, max_batch: usize, poll_secs: f64) -> Result<Vec<Delivery>> {
        let mut conn = self.conn.clone();
        let mut batch = Vec::new();

        let first: Option<Vec<u8>> = conn
            .brpoplpush(&self.ready_key, &self.unacked_key, poll_secs)
            .await?;
        let Some(first) = first else {
            return Ok(batch);
        };
        batch.push(Delivery { payload: first });

        while batch.len() < max_batch {
            let next: Option<Vec<u8>> = conn
                .rpoplpush(&self.ready_key, &self.unacked_key)
                .await?;
            match next {
                Some(payload) => batch.push(Delivery { payload }),
                None => break,
            }
        }

        Ok(batch)
    }

    /// Drop acknowledged deliveries from the unacked list.
    pub async fn ack(&self, deliveries: &[Delivery]) -> Result<()> {
        let mut conn = self.conn.clone();
        for delivery in deliveries {
            let _: i64 = conn
                .lrem(&self.unacked_key, -1, delivery.payload.as_slice())
                .await?;
        }
        Ok(())
    }

    /// Move rejected deliveries to the rejected list for later requeue.
    pub async fn reject(&self, deliveries: &[Delivery]) -> Result<()> {
        let mut conn = self.conn.clone();
        for delivery in deliveries {
            let _: i64 = conn
                .lrem(&self.unacked_key, -1, delivery.payload.as_slice())
                .await?;
            let _: i64 = conn
                .lpush(&self.rejected_key, delivery.payload.as_slice())
                .await?;
        }
        Ok(())
    }

    /// Re-queue everything on the rejected list; returns how many moved.
    pub async fn return_all_rejected(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut moved = 0usize;
        loop {
            let value: Option<Vec<u8>> = conn
                .rpoplpush(&self.rejected_key, &self.ready_key)
                .await?;
            if value.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }

    /// Depth of the ready list.
    pub async fn ready_len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(&self.ready_key).await?;
        Ok(len)
    }
}
