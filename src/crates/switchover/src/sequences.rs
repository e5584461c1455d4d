//! Sequence synchronizer
//!
//! Logical replication does not carry sequence state, so before traffic moves
//! every green sequence has to be advanced to the value blue last issued.
//! The comparison also guards against green having generated ids on its own:
//! a green column maximum above the blue sequence value is an invariant
//! violation and is never repaired here.

use crate::db::PostgresEndpoint;
use crate::error::{Result, SwitchoverError};
use crate::models::{ColumnRef, SequenceLastValue, SequenceName, SequenceSnapshot};
use crate::pooler::DRY_RUN_PREFIX;
use futures::future::{try_join, try_join_all};
use std::sync::Arc;
use tracing::{debug, info};

/// Whether the synchronizer may write to green
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Compute and validate only
    Precheck,
    /// Validate, then `setval` every green sequence
    Apply,
}

/// A `setval` issued (or simulated) on green
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedSequence {
    pub sequence: SequenceName,
    pub value: i64,
    pub simulated: bool,
}

/// Result of one synchronization call
#[derive(Debug, Clone, Default)]
pub struct SequenceReport {
    pub snapshots: Vec<SequenceSnapshot>,
    pub applied: Vec<AppliedSequence>,
}

pub struct SequenceSynchronizer {
    blue: Arc<dyn PostgresEndpoint>,
    green: Arc<dyn PostgresEndpoint>,
    schema: String,
    dry_run: bool,
}

impl SequenceSynchronizer {
    pub fn new(
        blue: Arc<dyn PostgresEndpoint>,
        green: Arc<dyn PostgresEndpoint>,
        schema: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            blue,
            green,
            schema: schema.into(),
            dry_run,
        }
    }

    /// Read every sequence, its owning column and both column maxima
    ///
    /// Owner lookups fan out across sequences; the max queries then fan out
    /// across sequences and both sides at once. The first failing query
    /// fails the whole call.
    pub async fn snapshot(&self) -> Result<Vec<SequenceSnapshot>> {
        let last_values = self.blue.sequence_last_values(&self.schema).await?;
        debug!(schema = %self.schema, sequences = last_values.len(), "Read blue sequence values");

        let columns = try_join_all(last_values.iter().map(|row| self.owning_column(row))).await?;

        let (largest_blue, largest_green) = try_join(
            try_join_all(columns.iter().map(|c| self.blue.column_max(c))),
            try_join_all(columns.iter().map(|c| self.green.column_max(c))),
        )
        .await?;

        Ok(last_values
            .into_iter()
            .zip(columns)
            .zip(largest_blue.into_iter().zip(largest_green))
            .map(|((row, column), (largest_blue, largest_green))| SequenceSnapshot {
                sequence: row.sequence(),
                column,
                blue_last_value: row.last_value,
                largest_blue,
                largest_green,
            })
            .collect())
    }

    async fn owning_column(&self, row: &SequenceLastValue) -> Result<ColumnRef> {
        let sequence = row.sequence();
        let mut owners = self.blue.sequence_owners(&sequence).await?;

        if owners.len() != 1 {
            let found: Vec<String> = owners.iter().map(|c| c.to_string()).collect();
            return Err(SwitchoverError::SequenceInvariant(vec![format!(
                "Expected one column using sequence {} but got {}: [{}]",
                sequence,
                owners.len(),
                found.join(", ")
            )]));
        }

        Ok(owners.remove(0))
    }

    /// Snapshot, validate and (in `Apply` mode) synchronize
    pub async fn run(&self, mode: SyncMode) -> Result<SequenceReport> {
        let snapshots = self.snapshot().await?;
        validate(&snapshots)?;

        info!(
            sequences = snapshots.len(),
            "Green column largest values are lower than or equal to their blue sequence last values"
        );

        if mode == SyncMode::Precheck {
            return Ok(SequenceReport {
                snapshots,
                applied: Vec::new(),
            });
        }

        info!(dry_run = self.dry_run, "Synchronizing sequences");
        let applied = try_join_all(
            snapshots
                .iter()
                .filter_map(|s| s.blue_last_value.map(|value| (&s.sequence, value)))
                .map(|(sequence, value)| self.apply_one(sequence, value)),
        )
        .await?;

        for skipped in snapshots.iter().filter(|s| s.blue_last_value.is_none()) {
            debug!(sequence = %skipped.sequence, "Blue sequence never called, leaving green untouched");
        }

        Ok(SequenceReport { snapshots, applied })
    }

    async fn apply_one(&self, sequence: &SequenceName, value: i64) -> Result<AppliedSequence> {
        if self.dry_run {
            info!(
                sequence = %sequence,
                value = value,
                "{}Would execute on green: SELECT setval('{}', {})",
                DRY_RUN_PREFIX,
                sequence.qualified(),
                value
            );
            return Ok(AppliedSequence {
                sequence: sequence.clone(),
                value,
                simulated: true,
            });
        }

        let acknowledged = self.green.set_sequence_value(sequence, value).await?;
        info!(sequence = %sequence, value = acknowledged, "Updated sequence");

        Ok(AppliedSequence {
            sequence: sequence.clone(),
            value: acknowledged,
            simulated: false,
        })
    }
}

/// Fail with every violating sequence listed
pub fn validate(snapshots: &[SequenceSnapshot]) -> Result<()> {
    let errors: Vec<String> = snapshots.iter().filter_map(|s| s.violation()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SwitchoverError::SequenceInvariant(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::testing::FakePostgres;
    use std::time::Duration;

    fn endpoints() -> (Arc<FakePostgres>, Arc<FakePostgres>) {
        (
            Arc::new(FakePostgres::new(Role::Blue, "PG14")),
            Arc::new(FakePostgres::new(Role::Green, "PG15")),
        )
    }

    fn seed(blue: &FakePostgres, green: &FakePostgres, last: Option<i64>, green_max: Option<i64>) {
        let column = ColumnRef::new("public", "Patient", "seq");
        blue.add_sequence(SequenceLastValue::new("public", "Patient_seq", last), column.clone());
        blue.set_column_max(&column, last);
        green.set_column_max(&column, green_max);
    }

    #[tokio::test]
    async fn test_precheck_never_writes() {
        let (blue, green) = endpoints();
        seed(&blue, &green, Some(100), Some(50));

        let sync = SequenceSynchronizer::new(blue.clone(), green.clone(), "public", false);
        let report = sync.run(SyncMode::Precheck).await.unwrap();

        assert_eq!(report.snapshots.len(), 1);
        assert!(report.applied.is_empty());
        assert!(green.setval_calls().is_empty());
    }

    #[tokio::test]
    async fn test_apply_sets_green_to_blue_last_value() {
        let (blue, green) = endpoints();
        seed(&blue, &green, Some(100), Some(50));

        let sync = SequenceSynchronizer::new(blue.clone(), green.clone(), "public", false);
        let report = sync.run(SyncMode::Apply).await.unwrap();

        assert_eq!(
            green.setval_calls(),
            vec![(SequenceName::new("public", "Patient_seq"), 100)]
        );
        assert_eq!(report.applied[0].value, 100);
        assert!(!report.applied[0].simulated);
    }

    #[tokio::test]
    async fn test_green_ahead_fails_without_mutation() {
        let (blue, green) = endpoints();
        seed(&blue, &green, Some(100), Some(150));

        let sync = SequenceSynchronizer::new(blue.clone(), green.clone(), "public", false);
        let err = sync.run(SyncMode::Apply).await.unwrap_err();

        assert!(err.is_invariant_violation());
        assert!(err.to_string().contains("150 > 100"));
        assert!(green.setval_calls().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_apply_only_simulates() {
        let (blue, green) = endpoints();
        seed(&blue, &green, Some(100), Some(50));

        let sync = SequenceSynchronizer::new(blue.clone(), green.clone(), "public", true);
        let report = sync.run(SyncMode::Apply).await.unwrap();

        assert!(report.applied[0].simulated);
        assert!(green.setval_calls().is_empty());
    }

    #[tokio::test]
    async fn test_uncalled_sequence_is_skipped() {
        let (blue, green) = endpoints();
        seed(&blue, &green, None, None);

        let sync = SequenceSynchronizer::new(blue.clone(), green.clone(), "public", false);
        let report = sync.run(SyncMode::Apply).await.unwrap();

        assert!(report.applied.is_empty());
        assert!(green.setval_calls().is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_owner_fails() {
        let (blue, green) = endpoints();
        blue.add_sequence(
            SequenceLastValue::new("public", "orphan_seq", Some(1)),
            ColumnRef::new("public", "Patient", "seq"),
        );
        blue.clear_owners(&SequenceName::new("public", "orphan_seq"));

        let sync = SequenceSynchronizer::new(blue, green, "public", false);
        let err = sync.snapshot().await.unwrap_err();
        assert!(err.to_string().contains("Expected one column using sequence"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_column_max_queries_run_concurrently() {
        let (blue, green) = endpoints();
        for i in 0..6 {
            let column = ColumnRef::new("public", format!("Table{}", i), "seq");
            blue.add_sequence(
                SequenceLastValue::new("public", format!("Table{}_seq", i), Some(100)),
                column.clone(),
            );
            blue.set_column_max(&column, Some(100));
            green.set_column_max(&column, Some(50));
        }
        let delay = Duration::from_millis(500);
        blue.set_delay("column_max", delay);
        green.set_delay("column_max", delay);
        blue.set_delay("sequence_owners", delay);

        let sync = SequenceSynchronizer::new(blue, green, "public", false);
        let start = tokio::time::Instant::now();
        let snapshots = sync.snapshot().await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(snapshots.len(), 6);
        // One round of owner lookups, then one round of max queries
        assert!(elapsed >= delay * 2);
        assert!(elapsed < delay * 3, "snapshot took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_query_failure_fails_whole_call() {
        let (blue, green) = endpoints();
        seed(&blue, &green, Some(100), Some(50));
        green.fail_on("column_max");

        let sync = SequenceSynchronizer::new(blue, green, "public", false);
        assert!(sync.run(SyncMode::Precheck).await.is_err());
    }
}
