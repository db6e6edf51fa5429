//! Postgres-backed catalog.
//!
//! Reads designs with their ordered material lines and reference prices from the
//! catalog tables of `migrations/0001_inventory.sql`. Writes exist so the catalog
//! can be seeded; the inventory core itself only reads.

use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use curtainworks_catalog::{
    CatalogReader, Complexity, Design, DesignMaterialLine, MaterialColor, MaterialReference,
    MaterialType,
};
use curtainworks_core::{
    ColorId, DesignId, DomainError, DomainResult, MaterialTypeId, ReferenceId,
};

use crate::store::StoreError;
use crate::store::postgres::{map_sqlx_error, run_blocking};

#[derive(Debug, Clone)]
pub struct PostgresCatalog {
    pool: Arc<PgPool>,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self, material_type), fields(material_type_id = %material_type.id), err)]
    pub async fn insert_material_type(&self, material_type: &MaterialType) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO material_types (id, name) VALUES ($1, $2)")
            .bind(material_type.id.as_uuid())
            .bind(&material_type.name)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_material_type", e))?;
        Ok(())
    }

    #[instrument(skip(self, reference), fields(reference_id = %reference.id), err)]
    pub async fn insert_reference(&self, reference: &MaterialReference) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO material_references (id, material_type_id, code, name, unit_price)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(reference.id.as_uuid())
        .bind(reference.material_type_id.as_uuid())
        .bind(&reference.code)
        .bind(&reference.name)
        .bind(reference.unit_price)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_reference", e))?;
        Ok(())
    }

    #[instrument(skip(self, color), fields(color_id = %color.id), err)]
    pub async fn insert_color(&self, color: &MaterialColor) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO material_colors (id, reference_id, code, name) VALUES ($1, $2, $3, $4)",
        )
        .bind(color.id.as_uuid())
        .bind(color.reference_id.as_uuid())
        .bind(&color.code)
        .bind(&color.name)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_color", e))?;
        Ok(())
    }

    /// Insert a design and its lines in one transaction.
    #[instrument(skip(self, design), fields(design_id = %design.id_typed()), err)]
    pub async fn insert_design(&self, design: &Design) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO designs (id, code, name, description, labor_cost, complexity)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(design.id_typed().as_uuid())
        .bind(design.code())
        .bind(design.name())
        .bind(design.description())
        .bind(design.labor_cost())
        .bind(design.complexity().as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_design", e))?;

        for (position, line) in design.lines().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO design_material_lines (
                    design_id, position, material_type_id, quantity_per_meter,
                    reference_id, color_id, description
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(design.id_typed().as_uuid())
            .bind(position as i32)
            .bind(line.material_type_id.as_uuid())
            .bind(line.quantity_per_meter)
            .bind(line.reference_id.map(|r| *r.as_uuid()))
            .bind(line.color_id.map(|c| *c.as_uuid()))
            .bind(line.description.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_design_line", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    pub async fn get_design(&self, id: DesignId) -> Result<Option<Design>, StoreError> {
        let Some(row) = sqlx::query(
            r#"
            SELECT id, code, name, description, labor_cost, complexity
            FROM designs
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_design", e))?
        else {
            return Ok(None);
        };

        let lines = sqlx::query(
            r#"
            SELECT material_type_id, quantity_per_meter, reference_id, color_id, description
            FROM design_material_lines
            WHERE design_id = $1
            ORDER BY position
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_design_lines", e))?;

        design_from_rows(&row, &lines)
            .map(Some)
            .map_err(|e| StoreError::Integrity(format!("design {id} is invalid: {e}")))
    }

    #[instrument(skip(self), err)]
    pub async fn reference_price(
        &self,
        reference_id: ReferenceId,
    ) -> Result<Option<Decimal>, StoreError> {
        let row = sqlx::query("SELECT unit_price FROM material_references WHERE id = $1")
            .bind(reference_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("reference_price", e))?;

        row.map(|r| r.try_get::<Decimal, _>("unit_price"))
            .transpose()
            .map_err(|e| StoreError::Integrity(format!("failed to read unit_price: {e}")))
    }
}

fn design_from_rows(row: &PgRow, lines: &[PgRow]) -> Result<Design, Box<dyn std::error::Error>> {
    let complexity: String = row.try_get("complexity")?;
    let description: Option<String> = row.try_get("description")?;

    let mut design = Design::new(
        DesignId::from_uuid(row.try_get("id")?),
        row.try_get::<String, _>("code")?,
        row.try_get::<String, _>("name")?,
        row.try_get("labor_cost")?,
    )?
    .with_complexity(complexity.parse::<Complexity>()?);
    if let Some(description) = description {
        design = design.with_description(description);
    }

    for line in lines {
        let mut material_line = DesignMaterialLine::new(
            MaterialTypeId::from_uuid(line.try_get("material_type_id")?),
            line.try_get("quantity_per_meter")?,
        );
        material_line.reference_id = line
            .try_get::<Option<Uuid>, _>("reference_id")?
            .map(ReferenceId::from_uuid);
        material_line.color_id = line
            .try_get::<Option<Uuid>, _>("color_id")?
            .map(ColorId::from_uuid);
        material_line.description = line.try_get("description")?;
        design.add_line(material_line)?;
    }
    Ok(design)
}

impl CatalogReader for PostgresCatalog {
    fn get_design(&self, id: DesignId) -> DomainResult<Option<Design>> {
        run_blocking(self.get_design(id)).map_err(DomainError::from)
    }

    fn reference_price(&self, reference_id: ReferenceId) -> DomainResult<Option<Decimal>> {
        run_blocking(self.reference_price(reference_id)).map_err(DomainError::from)
    }
}
