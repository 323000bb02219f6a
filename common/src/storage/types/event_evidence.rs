use crate::{error::AppError, storage::db::SurrealDbClient, stored_object, utils::ids};

stored_object!(EventEvidence, "event_evidence", {
    event_id: String,
    quote: String,
    start_char: usize,
    end_char: usize,
    chunk_id: Option<String>
});

impl EventEvidence {
    pub fn new(
        event_id: String,
        quote: String,
        start_char: usize,
        end_char: usize,
        chunk_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ids::evidence_id(),
            created_at: now,
            updated_at: now,
            event_id,
            quote,
            start_char,
            end_char,
            chunk_id,
        }
    }

    /// Check the span against the owning revision's content length.
    pub fn validate_span(&self, content_len: usize) -> Result<(), AppError> {
        if self.start_char > self.end_char || self.end_char > content_len {
            return Err(AppError::Integrity(format!(
                "evidence span {}..{} exceeds content length {content_len}",
                self.start_char, self.end_char
            )));
        }
        Ok(())
    }

    pub async fn for_events(
        db: &SurrealDbClient,
        event_ids: &[String],
    ) -> Result<Vec<Self>, AppError> {
        if event_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = db
            .query(
                "SELECT * FROM event_evidence
                 WHERE event_id IN $ids
                 ORDER BY start_char ASC",
            )
            .bind(("ids", event_ids.to_vec()))
            .await?;

        Ok(response.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_validation_enforces_bounds() {
        let ok = EventEvidence::new("evt_1".into(), "quoted".into(), 3, 9, None);
        assert!(ok.validate_span(100).is_ok());
        assert!(ok.validate_span(9).is_ok(), "end may touch the content length");

        let beyond = EventEvidence::new("evt_1".into(), "quoted".into(), 3, 9, None);
        assert!(beyond.validate_span(8).is_err());

        let inverted = EventEvidence::new("evt_1".into(), "quoted".into(), 9, 3, None);
        assert!(inverted.validate_span(100).is_err());
    }

    #[test]
    fn evidence_ids_carry_the_prefix() {
        let row = EventEvidence::new("evt_1".into(), "q".into(), 0, 1, None);
        assert!(row.id.starts_with("evi_"));
    }
}
