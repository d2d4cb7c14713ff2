use super::SyncStore;
use super::now_ts;
use anyhow::{Context, Result};
use diesel::prelude::*;

use crate::store::schema::queue_messages::{self, dsl as qm};

#[derive(Insertable)]
#[diesel(table_name = queue_messages)]
struct NewQueueMessageRow<'a> {
    queue: &'a str,
    payload: &'a [u8],
    created_at: i64,
}

impl SyncStore {
    /// Append a message to the tail of a queue partition.
    pub fn push_queue_message(&self, partition: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.connection()?;
        diesel::insert_into(queue_messages::table)
            .values(&NewQueueMessageRow {
                queue: partition,
                payload,
                created_at: now_ts(),
            })
            .execute(&mut conn)
            .context("Failed to push queue message")?;
        Ok(())
    }

    /// Pop the oldest message of a partition, or `None` when it is empty.
    /// Select and delete run in one transaction so two readers never hand
    /// out the same row.
    pub fn pop_queue_message(&self, partition: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection()?;

        let popped = conn
            .immediate_transaction(|conn| {
                let head = qm::queue_messages
                    .filter(qm::queue.eq(partition))
                    .order(qm::id.asc())
                    .select((qm::id, qm::payload))
                    .first::<(i64, Vec<u8>)>(conn)
                    .optional()?;

                let Some((id, payload)) = head else {
                    return Ok::<_, diesel::result::Error>(None);
                };

                diesel::delete(qm::queue_messages.filter(qm::id.eq(id))).execute(conn)?;
                Ok(Some(payload))
            })
            .context("Failed to pop queue message")?;

        Ok(popped)
    }

    pub fn queue_len(&self, partition: &str) -> Result<i64> {
        let mut conn = self.connection()?;
        qm::queue_messages
            .filter(qm::queue.eq(partition))
            .count()
            .get_result(&mut conn)
            .context("Failed to count queue messages")
    }
}
