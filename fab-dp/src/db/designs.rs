//! Design record persistence
//!
//! State and stage output always change together in a single UPDATE guarded
//! by the expected current state, so readers never observe a record whose
//! state and outputs disagree and concurrent writers lose cleanly.

use crate::models::{DesignAnalysis, DesignRecord, DesignState, ThreeDAssets};
use crate::retry::RetryPolicy;
use fab_common::events::PipelineStage;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use fab_common::{Error, Result};

/// Insert a freshly created design record
pub async fn insert_design(pool: &SqlitePool, record: &DesignRecord) -> Result<()> {
    let design_id = record.design_id.to_string();
    let state = record.state.as_str();
    let source_images = serde_json::to_string(&record.source_images)
        .map_err(|e| Error::Internal(format!("Failed to serialize source_images: {}", e)))?;
    let original_design_id = record.original_design_id.map(|id| id.to_string());
    let created_at = record.created_at.to_rfc3339();
    let updated_at = record.updated_at.to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO designs (
            design_id, owner_id, state, source_images, prompt,
            original_design_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&design_id)
    .bind(&record.owner_id)
    .bind(state)
    .bind(&source_images)
    .bind(&record.prompt)
    .bind(&original_design_id)
    .bind(&created_at)
    .bind(&updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist a mutated record in one atomic write, guarded by the state the
/// caller last observed.
///
/// Returns false when the guard missed (a concurrent writer got there
/// first); nothing is written in that case.
pub async fn update_design(
    pool: &SqlitePool,
    record: &DesignRecord,
    expected_state: DesignState,
) -> Result<bool> {
    // Prepare all data before touching the connection
    let design_id = record.design_id.to_string();
    let state = record.state.as_str();
    let source_images = serde_json::to_string(&record.source_images)
        .map_err(|e| Error::Internal(format!("Failed to serialize source_images: {}", e)))?;
    let analysis = record
        .analysis
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize analysis: {}", e)))?;
    let three_d = record
        .three_d
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize three_d: {}", e)))?;
    let failed_stage = record.failed_stage.map(|s| s.as_str());
    let updated_at = record.updated_at.to_rfc3339();
    let expected = expected_state.as_str();

    let result = RetryPolicy::db_lock()
        .run("update_design", super::is_lock_error, |_| async {
            sqlx::query(
                r#"
                UPDATE designs SET
                    state = ?,
                    source_images = ?,
                    analysis = ?,
                    three_d = ?,
                    failed_stage = ?,
                    last_error = ?,
                    updated_at = ?
                WHERE design_id = ? AND state = ?
                "#,
            )
            .bind(state)
            .bind(&source_images)
            .bind(&analysis)
            .bind(&three_d)
            .bind(failed_stage)
            .bind(&record.last_error)
            .bind(&updated_at)
            .bind(&design_id)
            .bind(expected)
            .execute(pool)
            .await
            .map_err(Error::Database)
        })
        .await
        .map_err(|e| e.into_inner())?;

    Ok(result.rows_affected() == 1)
}

/// Load a design record by id
pub async fn load_design(pool: &SqlitePool, design_id: Uuid) -> Result<Option<DesignRecord>> {
    let row = sqlx::query(
        r#"
        SELECT design_id, owner_id, state, source_images, prompt,
               original_design_id, analysis, three_d, failed_stage, last_error,
               created_at, updated_at
        FROM designs
        WHERE design_id = ?
        "#,
    )
    .bind(design_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(design_from_row).transpose()
}

/// List a user's designs, newest first
pub async fn list_designs_for_owner(
    pool: &SqlitePool,
    owner_id: &str,
) -> Result<Vec<DesignRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT design_id, owner_id, state, source_images, prompt,
               original_design_id, analysis, three_d, failed_stage, last_error,
               created_at, updated_at
        FROM designs
        WHERE owner_id = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(design_from_row).collect()
}

/// Rewind designs stranded in an in-flight state by a previous run.
///
/// Stage executions live in this process; a design left in-flight at startup
/// will never complete. Restoring the pre-stage state makes the stage
/// re-triggerable, matching cancellation semantics.
pub async fn recover_interrupted(pool: &SqlitePool) -> Result<usize> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut recovered = 0usize;

    for (in_flight, resumed) in [
        (DesignState::Analyzing, DesignState::Draft),
        (DesignState::Previewing3D, DesignState::Analyzed),
        (DesignState::ConvertingModel, DesignState::Preview3DReady),
    ] {
        let result = sqlx::query(
            "UPDATE designs SET state = ?, updated_at = ? WHERE state = ?",
        )
        .bind(resumed.as_str())
        .bind(&now)
        .bind(in_flight.as_str())
        .execute(pool)
        .await?;
        recovered += result.rows_affected() as usize;
    }

    if recovered > 0 {
        tracing::warn!(recovered, "Rewound designs interrupted by a previous run");
    }

    Ok(recovered)
}

fn design_from_row(row: sqlx::sqlite::SqliteRow) -> Result<DesignRecord> {
    let design_id: String = row.get("design_id");
    let design_id = Uuid::parse_str(&design_id)
        .map_err(|e| Error::Internal(format!("Failed to parse design_id: {}", e)))?;

    let state: String = row.get("state");
    let state: DesignState = state
        .parse()
        .map_err(|e| Error::Internal(format!("Failed to parse state: {}", e)))?;

    let source_images: String = row.get("source_images");
    let source_images: Vec<String> = serde_json::from_str(&source_images)
        .map_err(|e| Error::Internal(format!("Failed to deserialize source_images: {}", e)))?;

    let original_design_id: Option<String> = row.get("original_design_id");
    let original_design_id = original_design_id
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse original_design_id: {}", e)))?;

    let analysis: Option<String> = row.get("analysis");
    let analysis: Option<DesignAnalysis> = analysis
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize analysis: {}", e)))?;

    let three_d: Option<String> = row.get("three_d");
    let three_d: Option<ThreeDAssets> = three_d
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize three_d: {}", e)))?;

    let failed_stage: Option<String> = row.get("failed_stage");
    let failed_stage: Option<PipelineStage> = failed_stage
        .map(|s| s.parse())
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse failed_stage: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    let updated_at: String = row.get("updated_at");
    let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| Error::Internal(format!("Failed to parse updated_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    Ok(DesignRecord {
        design_id,
        owner_id: row.get("owner_id"),
        state,
        source_images,
        prompt: row.get("prompt"),
        original_design_id,
        analysis,
        three_d,
        failed_stage,
        last_error: row.get("last_error"),
        created_at,
        updated_at,
    })
}
