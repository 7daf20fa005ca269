//! Catalog of reference entities: raw materials, suppliers, and animals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use shared::validate_code;

/// Catalog service for reference data
#[derive(Clone)]
pub struct CatalogService {
    db: PgPool,
}

/// Raw material with its derived reference price
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RawMaterial {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub code: String,
    pub name: String,
    pub reference_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Supplier {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub name: String,
    pub contact: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Animal {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMaterialInput {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSupplierInput {
    pub name: String,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAnimalInput {
    pub name: String,
}

impl CatalogService {
    /// Create a new CatalogService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a raw material. The reference price starts at zero and is
    /// only ever updated by the pricer.
    pub async fn create_material(
        &self,
        farm_id: Uuid,
        input: CreateMaterialInput,
    ) -> AppResult<RawMaterial> {
        let code = input.code.trim().to_uppercase();
        validate_code(&code)
            .map_err(|msg| AppError::validation("code", msg, "El código no es válido"))?;
        if input.name.trim().is_empty() {
            return Err(AppError::validation(
                "name",
                "Name is required",
                "El nombre es obligatorio",
            ));
        }

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM raw_materials WHERE farm_id = $1 AND code = $2",
        )
        .bind(farm_id)
        .bind(&code)
        .fetch_one(&self.db)
        .await?;
        if existing > 0 {
            return Err(AppError::DuplicateEntry("material code".to_string()));
        }

        let material = sqlx::query_as::<_, RawMaterial>(
            r#"
            INSERT INTO raw_materials (farm_id, code, name)
            VALUES ($1, $2, $3)
            RETURNING id, farm_id, code, name, reference_price, created_at, updated_at
            "#,
        )
        .bind(farm_id)
        .bind(&code)
        .bind(input.name.trim())
        .fetch_one(&self.db)
        .await?;

        tracing::info!(%farm_id, code = %material.code, "raw material created");
        Ok(material)
    }

    pub async fn get_material(&self, farm_id: Uuid, material_id: Uuid) -> AppResult<RawMaterial> {
        sqlx::query_as::<_, RawMaterial>(
            r#"
            SELECT id, farm_id, code, name, reference_price, created_at, updated_at
            FROM raw_materials
            WHERE id = $1 AND farm_id = $2
            "#,
        )
        .bind(material_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Raw material".to_string()))
    }

    pub async fn list_materials(&self, farm_id: Uuid) -> AppResult<Vec<RawMaterial>> {
        let materials = sqlx::query_as::<_, RawMaterial>(
            r#"
            SELECT id, farm_id, code, name, reference_price, created_at, updated_at
            FROM raw_materials
            WHERE farm_id = $1
            ORDER BY code
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        Ok(materials)
    }

    pub async fn create_supplier(
        &self,
        farm_id: Uuid,
        input: CreateSupplierInput,
    ) -> AppResult<Supplier> {
        if input.name.trim().is_empty() {
            return Err(AppError::validation(
                "name",
                "Name is required",
                "El nombre es obligatorio",
            ));
        }

        let supplier = sqlx::query_as::<_, Supplier>(
            r#"
            INSERT INTO suppliers (farm_id, name, contact)
            VALUES ($1, $2, $3)
            RETURNING id, farm_id, name, contact, created_at
            "#,
        )
        .bind(farm_id)
        .bind(input.name.trim())
        .bind(input.contact.as_deref().map(str::trim))
        .fetch_one(&self.db)
        .await?;

        Ok(supplier)
    }

    pub async fn list_suppliers(&self, farm_id: Uuid) -> AppResult<Vec<Supplier>> {
        let suppliers = sqlx::query_as::<_, Supplier>(
            r#"
            SELECT id, farm_id, name, contact, created_at
            FROM suppliers
            WHERE farm_id = $1
            ORDER BY name
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        Ok(suppliers)
    }

    pub async fn create_animal(
        &self,
        farm_id: Uuid,
        input: CreateAnimalInput,
    ) -> AppResult<Animal> {
        if input.name.trim().is_empty() {
            return Err(AppError::validation(
                "name",
                "Name is required",
                "El nombre es obligatorio",
            ));
        }

        let animal = sqlx::query_as::<_, Animal>(
            r#"
            INSERT INTO animals (farm_id, name)
            VALUES ($1, $2)
            RETURNING id, farm_id, name, created_at
            "#,
        )
        .bind(farm_id)
        .bind(input.name.trim())
        .fetch_one(&self.db)
        .await?;

        Ok(animal)
    }

    pub async fn list_animals(&self, farm_id: Uuid) -> AppResult<Vec<Animal>> {
        let animals = sqlx::query_as::<_, Animal>(
            r#"
            SELECT id, farm_id, name, created_at
            FROM animals
            WHERE farm_id = $1
            ORDER BY name
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        Ok(animals)
    }
}
