//! Read views and anonymous access for a freshly loaded table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use super::{qualified, quote_ident};
use crate::config::PublishConfig;
use crate::naming::{GEOMETRY_COLUMN, suffixed};

pub fn geojson_view_name(table: &str) -> String {
    view_name(table, "")
}

fn view_name(table: &str, suffix: &str) -> String {
    suffixed(&format!("v_{table}"), suffix)
}

pub fn reprojected_view_name(table: &str) -> String {
    view_name(table, "_4326")
}

pub fn policy_name(table: &str) -> String {
    suffixed(&format!("read_{table}"), "_anon")
}

pub fn reprojected_view_sql(schema: &str, table: &str) -> String {
    let geom = quote_ident(GEOMETRY_COLUMN);
    format!(
        "CREATE OR REPLACE VIEW {} AS SELECT *, ST_Transform({geom}, 4326) AS geom_4326 FROM {}",
        qualified(schema, &reprojected_view_name(table)),
        qualified(schema, table)
    )
}

pub fn policy_sql(schema: &str, table: &str, role: &str) -> String {
    format!(
        "CREATE POLICY {} ON {} FOR SELECT TO {} USING (true)",
        quote_ident(&policy_name(table)),
        qualified(schema, table),
        quote_ident(role)
    )
}

/// Applies the enabled publish steps in one transaction. Every step can be
/// re-run against an already published table.
pub async fn publish(pool: &PgPool, schema: &str, table: &str, config: &PublishConfig) -> Result<()> {
    if config.is_noop() {
        return Ok(());
    }
    let target = qualified(schema, table);
    let geojson_view = geojson_view_name(table);
    let mut tx = pool.begin().await?;

    if config.geojson_view {
        sqlx::query("SELECT public.create_geojson_view($1, $2, $3)")
            .bind(schema)
            .bind(table)
            .bind(&geojson_view)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Publish: Failed to create view {geojson_view}"))?;
        tracing::info!("{}: GeoJSON view {}", target, geojson_view);
    }

    if config.reprojected_view {
        sqlx::query(&reprojected_view_sql(schema, table))
            .execute(&mut *tx)
            .await
            .context("Publish: Failed to create EPSG:4326 view")?;
        tracing::info!("{}: view {}", target, reprojected_view_name(table));
    }

    if config.anon_policy {
        sqlx::query(&format!("ALTER TABLE {target} ENABLE ROW LEVEL SECURITY"))
            .execute(&mut *tx)
            .await
            .context("Publish: Failed to enable row level security")?;

        let policy = policy_name(table);
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM pg_policies WHERE schemaname = $1 AND tablename = $2 AND policyname = $3",
        )
        .bind(schema)
        .bind(table)
        .bind(&policy)
        .fetch_optional(&mut *tx)
        .await
        .context("Publish: Failed to look up policies")?;

        if exists.is_none() {
            sqlx::query(&policy_sql(schema, table, &config.anon_role))
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Publish: Failed to create policy {policy}"))?;
            tracing::info!("{}: policy {} for {}", target, policy, config.anon_role);
        } else {
            tracing::debug!("{}: policy {} already present", target, policy);
        }
    }

    if config.grant_view {
        let view = qualified(schema, &geojson_view);
        let found: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(&view)
            .fetch_one(&mut *tx)
            .await
            .context("Publish: Failed to look up GeoJSON view")?;

        if found.is_some() {
            sqlx::query(&format!("GRANT SELECT ON {} TO {}", view, quote_ident(&config.anon_role)))
                .execute(&mut *tx)
                .await
                .context("Publish: GRANT failed")?;
        } else {
            tracing::warn!("{}: view {} does not exist, GRANT skipped", target, geojson_view);
        }
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::MAX_IDENTIFIER_LEN;

    #[test]
    fn derived_names() {
        assert_eq!(geojson_view_name("zones"), "v_zones");
        assert_eq!(reprojected_view_name("zones"), "v_zones_4326");
        assert_eq!(policy_name("zones"), "read_zones_anon");

        let long = "z".repeat(63);
        assert_eq!(geojson_view_name(&long).len(), MAX_IDENTIFIER_LEN);
        assert!(reprojected_view_name(&long).ends_with("_4326"));
        assert!(policy_name(&long).ends_with("_anon"));
    }

    #[test]
    fn policy_targets_the_configured_role() {
        assert_eq!(
            policy_sql("ppri", "zones", "anon"),
            "CREATE POLICY \"read_zones_anon\" ON \"ppri\".\"zones\" FOR SELECT TO \"anon\" USING (true)"
        );
    }

    #[test]
    fn reprojected_view_keeps_all_columns() {
        assert_eq!(
            reprojected_view_sql("public", "zones"),
            "CREATE OR REPLACE VIEW \"public\".\"v_zones_4326\" AS SELECT *, ST_Transform(\"geom\", 4326) AS geom_4326 FROM \"public\".\"zones\""
        );
    }

    #[test]
    fn default_settings_only_touch_the_policy() {
        let config = PublishConfig::default();
        assert!(config.anon_policy);
        assert!(!config.geojson_view && !config.reprojected_view && !config.grant_view);
    }
}
