//! Append-only relational sink
//!
//! Rows are only ever inserted. The table must already exist; nothing here
//! issues DDL, so re-attaching to a populated table after a redeploy is a
//! plain append.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};

use super::transform::TransformedTrip;
use crate::config::SinkSettings;
use crate::error::Result;

/// Embedded schema migrations for the sink database
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Bind parameters per row: 19 trip columns, 2 derived, batch id, source file
const COLUMNS_PER_ROW: usize = 23;

/// Rows per INSERT statement, kept well under the 65535 bind limit
const INSERT_CHUNK_ROWS: usize = 1000;

/// Rows read from one input file
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFile {
    pub source_file: String,
    pub rows: Vec<TransformedTrip>,
}

/// One trigger cycle's worth of rows
#[derive(Debug, Clone, PartialEq)]
pub struct MicroBatch {
    pub id: i64,
    pub files: Vec<BatchFile>,
}

impl MicroBatch {
    pub fn row_count(&self) -> usize {
        self.files.iter().map(|f| f.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendSummary {
    pub rows_written: u64,
    /// Files whose rows were already in the sink
    pub files_skipped: usize,
}

/// Destination for transformed micro-batches
#[async_trait]
pub trait TripSink: Send + Sync {
    /// Append every row of `batch`, stamped with its id, as one unit
    async fn append(&self, batch: &MicroBatch) -> Result<AppendSummary>;
}

/// Postgres sink
pub struct PgTripSink {
    pool: PgPool,
    table: String,
    dedup_by_source_file: bool,
}

impl PgTripSink {
    /// Open a connection pool for the configured sink
    pub async fn connect(settings: &SinkSettings) -> Result<Self> {
        let mut options = PgConnectOptions::from_str(&settings.url)?;
        if let Some(user) = &settings.user {
            options = options.username(user);
        }
        if let Some(password) = &settings.password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .connect_with(options)
            .await?;

        info!(
            table = %settings.table,
            max_connections = settings.max_connections,
            "Connected to sink"
        );

        Ok(Self::from_pool(pool, settings))
    }

    pub fn from_pool(pool: PgPool, settings: &SinkSettings) -> Self {
        Self {
            pool,
            table: settings.table.clone(),
            dedup_by_source_file: settings.dedup_by_source_file,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        info!("Sink migrations applied");
        Ok(())
    }

    /// Claim `source_file` in the ledger; false when another batch already did
    async fn claim_file(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        source_file: &str,
        batch_id: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO ingested_files (source_file, batch_id)
            VALUES ($1, $2)
            ON CONFLICT (source_file) DO NOTHING
            "#,
        )
        .bind(source_file)
        .bind(batch_id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_rows(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        batch_id: i64,
        source_file: &str,
        rows: &[TransformedTrip],
    ) -> Result<u64> {
        let mut written = 0;

        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO ");
            query_builder.push(&self.table);
            query_builder.push(
                r#" (
                    vendor_id,
                    tpep_pickup_datetime,
                    tpep_dropoff_datetime,
                    passenger_count,
                    trip_distance,
                    pickup_longitude,
                    pickup_latitude,
                    rate_code_id,
                    store_and_fwd_flag,
                    dropoff_longitude,
                    dropoff_latitude,
                    payment_type,
                    fare_amount,
                    extra,
                    mta_tax,
                    tip_amount,
                    tolls_amount,
                    improvement_surcharge,
                    total_amount,
                    trip_length_minutes,
                    day_of_week,
                    batch_id,
                    source_file
                ) "#,
            );

            query_builder.push_values(chunk, |mut b, row| {
                let trip = &row.trip;
                b.push_bind(trip.vendor_id)
                    .push_bind(trip.pickup_datetime)
                    .push_bind(trip.dropoff_datetime)
                    .push_bind(trip.passenger_count)
                    .push_bind(trip.trip_distance)
                    .push_bind(&trip.pickup_longitude)
                    .push_bind(&trip.pickup_latitude)
                    .push_bind(trip.rate_code_id)
                    .push_bind(trip.store_and_fwd_flag)
                    .push_bind(&trip.dropoff_longitude)
                    .push_bind(&trip.dropoff_latitude)
                    .push_bind(trip.payment_type)
                    .push_bind(trip.fare_amount)
                    .push_bind(trip.extra)
                    .push_bind(trip.mta_tax)
                    .push_bind(trip.tip_amount)
                    .push_bind(trip.tolls_amount)
                    .push_bind(trip.improvement_surcharge)
                    .push_bind(trip.total_amount)
                    .push_bind(row.trip_length_minutes)
                    .push_bind(&row.day_of_week)
                    .push_bind(batch_id)
                    .push_bind(source_file);
            });

            written += query_builder.build().execute(&mut **tx).await?.rows_affected();
        }

        Ok(written)
    }
}

#[async_trait]
impl TripSink for PgTripSink {
    async fn append(&self, batch: &MicroBatch) -> Result<AppendSummary> {
        debug!(
            batch_id = batch.id,
            rows = batch.row_count(),
            binds_per_chunk = INSERT_CHUNK_ROWS * COLUMNS_PER_ROW,
            "Appending batch"
        );

        let mut tx = self.pool.begin().await?;
        let mut summary = AppendSummary::default();

        for file in &batch.files {
            if self.dedup_by_source_file && !self.claim_file(&mut tx, &file.source_file, batch.id).await? {
                info!(
                    batch_id = batch.id,
                    source_file = %file.source_file,
                    "File already ingested, skipping its rows"
                );
                summary.files_skipped += 1;
                continue;
            }

            summary.rows_written += self
                .insert_rows(&mut tx, batch.id, &file.source_file, &file.rows)
                .await?;
        }

        tx.commit().await?;

        info!(
            batch_id = batch.id,
            rows_written = summary.rows_written,
            files_skipped = summary.files_skipped,
            table = %self.table,
            "Batch appended"
        );

        Ok(summary)
    }
}
