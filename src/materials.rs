use anyhow::Context;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::models::{
    CourseMaterial, MaterialCategory, MaterialStats, MaterialUpdate, MaterialsByCategory,
    NewMaterial,
};

const MATERIAL_COLUMNS: &str = "material_id, lesson_id, title, content, file_path, material_type, \
     material_category, is_public, created_at";

fn material_from_row(row: &PgRow) -> anyhow::Result<CourseMaterial> {
    let category: String = row.get("material_category");
    Ok(CourseMaterial {
        material_id: row.get("material_id"),
        lesson_id: row.get("lesson_id"),
        title: row.get("title"),
        content: row.get("content"),
        file_path: row.get("file_path"),
        material_type: row.get("material_type"),
        material_category: category.parse()?,
        is_public: row.get("is_public"),
        created_at: row.get("created_at"),
    })
}

fn materials_from_rows(rows: &[PgRow]) -> anyhow::Result<Vec<CourseMaterial>> {
    rows.iter().map(material_from_row).collect()
}

pub async fn list_materials(
    pool: &PgPool,
    lesson_id: Option<i64>,
    category: Option<MaterialCategory>,
    is_public: Option<bool>,
    skip: i64,
    limit: i64,
) -> anyhow::Result<Vec<CourseMaterial>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {MATERIAL_COLUMNS} FROM tutor.course_materials
        WHERE ($1::bigint IS NULL OR lesson_id = $1)
          AND ($2::text IS NULL OR material_category = $2)
          AND ($3::boolean IS NULL OR is_public = $3)
        ORDER BY material_id
        OFFSET $4 LIMIT $5
        "#
    ))
    .bind(lesson_id)
    .bind(category.map(MaterialCategory::as_str))
    .bind(is_public)
    .bind(skip.max(0))
    .bind(limit.clamp(1, 1000))
    .fetch_all(pool)
    .await?;

    materials_from_rows(&rows)
}

pub async fn get_material(pool: &PgPool, material_id: i64) -> anyhow::Result<Option<CourseMaterial>> {
    let row = sqlx::query(&format!(
        "SELECT {MATERIAL_COLUMNS} FROM tutor.course_materials WHERE material_id = $1"
    ))
    .bind(material_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(material_from_row).transpose()
}

pub async fn create_material(pool: &PgPool, material: &NewMaterial) -> anyhow::Result<CourseMaterial> {
    material.validate()?;

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO tutor.course_materials
        (lesson_id, title, content, file_path, material_type, material_category, is_public)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {MATERIAL_COLUMNS}
        "#
    ))
    .bind(material.lesson_id)
    .bind(&material.title)
    .bind(&material.content)
    .bind(&material.file_path)
    .bind(&material.material_type)
    .bind(material.material_category.as_str())
    .bind(material.is_public)
    .fetch_one(pool)
    .await
    .context("failed to insert course material")?;

    let created = material_from_row(&row)?;
    info!(material_id = created.material_id, lesson_id = created.lesson_id, "material created");
    Ok(created)
}

pub async fn update_material(
    pool: &PgPool,
    material_id: i64,
    update: &MaterialUpdate,
) -> anyhow::Result<Option<CourseMaterial>> {
    update.validate()?;

    let row = sqlx::query(&format!(
        r#"
        UPDATE tutor.course_materials SET
            title = COALESCE($2, title),
            content = COALESCE($3, content),
            file_path = COALESCE($4, file_path),
            material_type = COALESCE($5, material_type),
            material_category = COALESCE($6, material_category),
            is_public = COALESCE($7, is_public)
        WHERE material_id = $1
        RETURNING {MATERIAL_COLUMNS}
        "#
    ))
    .bind(material_id)
    .bind(&update.title)
    .bind(&update.content)
    .bind(&update.file_path)
    .bind(&update.material_type)
    .bind(update.material_category.map(MaterialCategory::as_str))
    .bind(update.is_public)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(material_from_row).transpose()
}

pub async fn delete_material(pool: &PgPool, material_id: i64) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM tutor.course_materials WHERE material_id = $1")
        .bind(material_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn materials_by_lesson(pool: &PgPool, lesson_id: i64) -> anyhow::Result<MaterialsByCategory> {
    let rows = sqlx::query(&format!(
        "SELECT {MATERIAL_COLUMNS} FROM tutor.course_materials WHERE lesson_id = $1 ORDER BY material_id"
    ))
    .bind(lesson_id)
    .fetch_all(pool)
    .await?;

    Ok(MaterialsByCategory::group(materials_from_rows(&rows)?))
}

/// Case-insensitive match on title or content.
pub async fn search_materials(
    pool: &PgPool,
    term: &str,
    skip: i64,
    limit: i64,
) -> anyhow::Result<Vec<CourseMaterial>> {
    let pattern = format!("%{term}%");
    let rows = sqlx::query(&format!(
        r#"
        SELECT {MATERIAL_COLUMNS} FROM tutor.course_materials
        WHERE title ILIKE $1 OR content ILIKE $1
        ORDER BY material_id
        OFFSET $2 LIMIT $3
        "#
    ))
    .bind(pattern)
    .bind(skip.max(0))
    .bind(limit.clamp(1, 1000))
    .fetch_all(pool)
    .await?;

    materials_from_rows(&rows)
}

pub async fn material_stats(pool: &PgPool) -> anyhow::Result<MaterialStats> {
    let totals = sqlx::query(
        r#"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE is_public) AS public
        FROM tutor.course_materials
        "#,
    )
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(
        r#"
        SELECT material_category, COUNT(*) AS count
        FROM tutor.course_materials
        GROUP BY material_category
        ORDER BY material_category
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut by_category = Vec::new();
    for row in rows {
        let category: MaterialCategory = row.get::<String, _>("material_category").parse()?;
        by_category.push((category, row.get::<i64, _>("count")));
    }

    let total: i64 = totals.get("total");
    let public: i64 = totals.get("public");

    Ok(MaterialStats {
        total,
        by_category,
        public,
        private: total - public,
    })
}
