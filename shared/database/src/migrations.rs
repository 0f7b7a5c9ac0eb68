use anyhow::{Context, Result};
use sqlx::PgPool;

/// Idempotent schema statements, applied in order.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "suppliers",
        r#"
        CREATE TABLE IF NOT EXISTS suppliers (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            normalized_name VARCHAR(255) NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "products",
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id UUID PRIMARY KEY,
            standardized_name VARCHAR NOT NULL,
            standardized_unit VARCHAR NOT NULL,
            display_name VARCHAR NOT NULL,
            raw_name VARCHAR NOT NULL,
            category VARCHAR,
            unit_variants TEXT[] NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT products_standardized_key UNIQUE (standardized_name, standardized_unit)
        )
        "#,
    ),
    (
        "uploads",
        r#"
        CREATE TABLE IF NOT EXISTS uploads (
            id UUID PRIMARY KEY,
            file_url TEXT NOT NULL,
            file_name VARCHAR NOT NULL,
            mime_type VARCHAR,
            supplier_hint VARCHAR,
            supplier_id UUID REFERENCES suppliers(id),
            status VARCHAR NOT NULL DEFAULT 'pending',
            metrics JSONB,
            staged_groups JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "prices",
        r#"
        CREATE TABLE IF NOT EXISTS prices (
            id UUID PRIMARY KEY,
            product_id UUID NOT NULL REFERENCES products(id),
            supplier_id UUID NOT NULL REFERENCES suppliers(id),
            upload_id UUID REFERENCES uploads(id),
            amount DOUBLE PRECISION NOT NULL CHECK (amount >= 0),
            unit VARCHAR NOT NULL,
            valid_from TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            valid_to TIMESTAMPTZ
        )
        "#,
    ),
    (
        "prices_one_active",
        // at most one active price per (product, supplier)
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS prices_one_active_idx
            ON prices (product_id, supplier_id)
            WHERE valid_to IS NULL
        "#,
    ),
    (
        "price_history",
        r#"
        CREATE TABLE IF NOT EXISTS price_history (
            id UUID PRIMARY KEY,
            product_id UUID NOT NULL REFERENCES products(id),
            supplier_id UUID NOT NULL REFERENCES suppliers(id),
            upload_id UUID REFERENCES uploads(id),
            price DOUBLE PRECISION NOT NULL,
            unit VARCHAR NOT NULL,
            changed_from DOUBLE PRECISION,
            change_percentage DOUBLE PRECISION,
            change_reason VARCHAR NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "price_history_lookup",
        r#"
        CREATE INDEX IF NOT EXISTS price_history_pair_idx
            ON price_history (product_id, supplier_id, created_at)
        "#,
    ),
    (
        "products_category",
        r#"
        CREATE INDEX IF NOT EXISTS products_category_idx ON products (category)
        "#,
    ),
];

pub async fn run_postgres_migrations(pool: &PgPool) -> Result<()> {
    tracing::info!(count = MIGRATIONS.len(), "Running PostgreSQL migrations");

    for (name, statement) in MIGRATIONS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Migration '{}' failed", name))?;
    }

    tracing::info!("PostgreSQL migrations completed");
    Ok(())
}
