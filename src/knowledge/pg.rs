//! Postgres-backed knowledge store.
//!
//! Tables carry JSONB multilingual text, a PostGIS geography point and
//! a fixed-dimension pgvector column with an HNSW index (m=16,
//! ef_construction=64). Reads go through the tiered cache facets;
//! writes invalidate the affected table's namespaces. This layer never
//! interpolates a value into SQL: table names come from
//! [`EntityKind::table`] (allow-listed) and everything else binds.

use super::store::{
    clamp_limit, clamp_offset, KnowledgeError, KnowledgeStore, NearbyEntity, Page, ScoredEntity,
    SearchFilters, MAX_EF_SEARCH,
};
use super::types::{EntityDraft, EntityKind, GeoPoint, KnowledgeEntity, MultilingualText};
use crate::cache::{QueryCache, TieredCache, VectorCache};
use crate::database::{bind_params, DatabaseError, DatabaseManager, SqlParam};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::sync::Arc;
use tracing::warn;

/// Column list shared by every entity read.
const ENTITY_COLUMNS: &str = "id, slug, name, description, category, rating, price_tier, \
     active, popularity, city_id, region_id, data, created_at, updated_at, \
     ST_Y(geom::geometry) AS lat, ST_X(geom::geometry) AS lon";

pub struct PgKnowledgeStore {
    db: Arc<DatabaseManager>,
    query_cache: QueryCache,
    vector_cache: VectorCache,
    default_language: String,
    embedding_dim: usize,
}

impl PgKnowledgeStore {
    pub fn new(db: Arc<DatabaseManager>, cache: Arc<TieredCache>, default_language: &str) -> Self {
        Self {
            db,
            query_cache: QueryCache::new(Arc::clone(&cache)),
            vector_cache: VectorCache::new(cache),
            default_language: default_language.to_string(),
            embedding_dim: rihla_embedder::EMBEDDING_DIM,
        }
    }

    /// Create the ANN and lookup indexes if absent and register them
    /// with the analyzer so they are not re-suggested.
    pub async fn ensure_indexes(&self) -> Result<(), KnowledgeError> {
        for kind in EntityKind::ALL {
            let table = kind.table();
            let ddl = format!(
                "CREATE INDEX IF NOT EXISTS {table}_embedding_hnsw ON {table} \
                 USING hnsw (embedding vector_cosine_ops) \
                 WITH (m = 16, ef_construction = 64)"
            );
            self.db.execute(&ddl, &[]).await?;
            let slug_ddl = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {table}_slug_key ON {table} (slug)"
            );
            self.db.execute(&slug_ddl, &[]).await?;

            let analyzer = self.db.analyzer();
            analyzer.register_index(table, "id");
            analyzer.register_index(table, "slug");
            analyzer.register_index(table, "embedding");
        }
        Ok(())
    }

    async fn invalidate(&self, kind: EntityKind) {
        self.query_cache.invalidate_table(kind.table()).await;
        self.vector_cache.invalidate_table(kind.table()).await;
    }

    /// Append filter conjuncts, continuing the bind numbering.
    fn push_filters(filters: &SearchFilters, sql: &mut String, params: &mut Vec<SqlParam>) {
        if filters.active_only {
            sql.push_str(" AND active = TRUE");
        }
        if let Some(city_id) = filters.city_id {
            params.push(SqlParam::I64(city_id));
            sql.push_str(&format!(" AND city_id = ${}", params.len()));
        }
        if let Some(region_id) = filters.region_id {
            params.push(SqlParam::I64(region_id));
            sql.push_str(&format!(" AND region_id = ${}", params.len()));
        }
        if let Some(category) = &filters.category {
            params.push(SqlParam::Str(category.clone()));
            sql.push_str(&format!(" AND category = ${}", params.len()));
        }
        if let Some(min_rating) = filters.min_rating {
            params.push(SqlParam::F64(min_rating));
            sql.push_str(&format!(" AND rating >= ${}", params.len()));
        }
        if let Some(price_tier) = &filters.price_tier {
            params.push(SqlParam::Str(price_tier.clone()));
            sql.push_str(&format!(" AND price_tier = ${}", params.len()));
        }
    }

    async fn vector_query(
        &self,
        kind: EntityKind,
        embedding: &[f32],
        candidate_limit: usize,
        ef_search: u32,
    ) -> Result<Vec<(KnowledgeEntity, f32)>, KnowledgeError> {
        let table = kind.table();
        let sql = format!(
            "SELECT {ENTITY_COLUMNS}, 1 - (embedding <=> $1) AS score \
             FROM {table} WHERE embedding IS NOT NULL \
             ORDER BY embedding <=> $1 LIMIT $2"
        );
        let params = vec![
            SqlParam::Vector(pgvector::Vector::from(embedding.to_vec())),
            SqlParam::I64(candidate_limit as i64),
        ];

        // ef_search only applies inside the issuing transaction.
        let ef = ef_search.clamp(1, MAX_EF_SEARCH);
        let rows: Vec<PgRow> = self
            .db
            .within_transaction(move |tx| {
                Box::pin(async move {
                    sqlx::query(&format!("SET LOCAL hnsw.ef_search = {ef}"))
                        .execute(&mut **tx)
                        .await?;
                    let rows = bind_params(sqlx::query(&sql), &params)
                        .fetch_all(&mut **tx)
                        .await?;
                    Ok(rows)
                })
            })
            .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let score: f64 = row.try_get("score").map_err(decode_err)?;
            scored.push((row_to_entity(kind, &row)?, score as f32));
        }
        Ok(scored)
    }
}

#[async_trait]
impl KnowledgeStore for PgKnowledgeStore {
    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    async fn get(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> Result<Option<KnowledgeEntity>, KnowledgeError> {
        let table = kind.table();
        let cache_params = vec![("id", id.to_string())];
        if let Some(hit) = self.query_cache.get::<KnowledgeEntity>(table, &cache_params).await {
            return Ok(Some(hit));
        }

        let sql = format!("SELECT {ENTITY_COLUMNS} FROM {table} WHERE id = $1");
        let row = self.db.fetch_optional(&sql, &[SqlParam::I64(id)]).await?;
        match row {
            Some(row) => {
                let entity = row_to_entity(kind, &row)?;
                self.query_cache.put(table, &cache_params, &entity).await;
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    async fn search(
        &self,
        kind: EntityKind,
        query: Option<&str>,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
        language: &str,
    ) -> Result<Page<KnowledgeEntity>, KnowledgeError> {
        if limit == 0 {
            return Ok(Page::empty(0, offset));
        }
        let limit = clamp_limit(limit);
        let offset = clamp_offset(offset);
        let table = kind.table();
        crate::database::validate_language(language)?;

        let mut cache_params = filters.cache_params();
        cache_params.push(("q", query.unwrap_or("").to_string()));
        cache_params.push(("limit", limit.to_string()));
        cache_params.push(("offset", offset.to_string()));
        cache_params.push(("lang", language.to_string()));
        if let Some(hit) = self
            .query_cache
            .get::<Page<KnowledgeEntity>>(table, &cache_params)
            .await
        {
            return Ok(hit);
        }

        let (sql, params) = match query.filter(|q| !q.trim().is_empty()) {
            Some(q) => {
                // Current-language text with a default-language fallback,
                // ranked by full-text relevance.
                let tsv = "to_tsvector('simple', \
                           coalesce(name->>$1,'') || ' ' || coalesce(description->>$1,'') || ' ' || \
                           coalesce(name->>$2,'') || ' ' || coalesce(description->>$2,''))";
                let mut sql = format!(
                    "SELECT {ENTITY_COLUMNS}, \
                     ts_rank({tsv}, plainto_tsquery('simple', $3)) AS rank \
                     FROM {table} \
                     WHERE {tsv} @@ plainto_tsquery('simple', $3)"
                );
                let mut params = vec![
                    SqlParam::Str(language.to_string()),
                    SqlParam::Str(self.default_language.clone()),
                    SqlParam::Str(q.to_string()),
                ];
                Self::push_filters(filters, &mut sql, &mut params);
                params.push(SqlParam::I64(limit as i64));
                sql.push_str(&format!(" ORDER BY rank DESC, popularity DESC LIMIT ${}", params.len()));
                params.push(SqlParam::I64(offset as i64));
                sql.push_str(&format!(" OFFSET ${}", params.len()));
                (sql, params)
            }
            None => {
                let mut sql =
                    format!("SELECT {ENTITY_COLUMNS} FROM {table} WHERE TRUE");
                let mut params = Vec::new();
                Self::push_filters(filters, &mut sql, &mut params);
                params.push(SqlParam::I64(limit as i64));
                sql.push_str(&format!(" ORDER BY popularity DESC, id LIMIT ${}", params.len()));
                params.push(SqlParam::I64(offset as i64));
                sql.push_str(&format!(" OFFSET ${}", params.len()));
                (sql, params)
            }
        };

        let rows = match self.db.fetch_all(&sql, &params).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table, error = %e, "search failed, returning empty page");
                return Ok(Page::empty(limit, offset));
            }
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(row_to_entity(kind, &row)?);
        }
        let page = Page {
            items,
            limit,
            offset,
        };
        self.query_cache.put(table, &cache_params, &page).await;
        Ok(page)
    }

    async fn vector_search(
        &self,
        kind: EntityKind,
        embedding: &[f32],
        filters: &SearchFilters,
        limit: usize,
        ef_search: u32,
    ) -> Result<Vec<ScoredEntity>, KnowledgeError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        if embedding.len() != self.embedding_dim {
            return Err(KnowledgeError::InvalidEntity(format!(
                "query embedding dimension {} does not match {}",
                embedding.len(),
                self.embedding_dim
            )));
        }
        let limit = clamp_limit(limit);
        let table = kind.table();

        let mut extra = filters.cache_params();
        extra.push(("limit", limit.to_string()));
        if let Some(hit) = self
            .vector_cache
            .get::<Vec<ScoredEntity>>(table, embedding, &extra)
            .await
        {
            return Ok(hit);
        }

        // First pass at the configured quality; filters apply as a
        // post-index predicate. When filtering starves the page, widen
        // once with double the ef and a larger candidate set.
        let first = match self.vector_query(kind, embedding, limit, ef_search).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table, error = %e, "vector search failed, returning empty result");
                return Ok(Vec::new());
            }
        };
        let mut filtered: Vec<(KnowledgeEntity, f32)> = first
            .into_iter()
            .filter(|(entity, _)| filters.matches(entity))
            .collect();

        if filtered.len() < limit {
            let widened_ef = (ef_search * 2).min(MAX_EF_SEARCH);
            let widened_limit = (limit * 4).min(MAX_EF_SEARCH as usize);
            match self
                .vector_query(kind, embedding, widened_limit, widened_ef)
                .await
            {
                Ok(rows) => {
                    filtered = rows
                        .into_iter()
                        .filter(|(entity, _)| filters.matches(entity))
                        .collect();
                }
                Err(e) => {
                    warn!(table, error = %e, "widened vector search failed, keeping first pass");
                }
            }
        }

        filtered.truncate(limit);
        let result: Vec<ScoredEntity> = filtered
            .into_iter()
            .map(|(entity, score)| ScoredEntity { entity, score })
            .collect();
        self.vector_cache.put(table, embedding, &extra, &result).await;
        Ok(result)
    }

    async fn nearby(
        &self,
        kind: EntityKind,
        lat: f64,
        lon: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<NearbyEntity>, KnowledgeError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = clamp_limit(limit);
        let table = kind.table();

        let sql = format!(
            "SELECT {ENTITY_COLUMNS}, \
             ST_Distance(geom, ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography) / 1000.0 \
               AS distance_km \
             FROM {table} \
             WHERE geom IS NOT NULL \
               AND ST_DWithin(geom, ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography, $3) \
             ORDER BY distance_km ASC LIMIT $4"
        );
        let params = vec![
            SqlParam::F64(lon),
            SqlParam::F64(lat),
            SqlParam::F64(radius_km * 1_000.0),
            SqlParam::I64(limit as i64),
        ];

        let rows = match self.db.fetch_all(&sql, &params).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table, error = %e, "nearby search failed, returning empty result");
                return Ok(Vec::new());
            }
        };

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let distance_km: f64 = row.try_get("distance_km").map_err(decode_err)?;
            result.push(NearbyEntity {
                entity: row_to_entity(kind, &row)?,
                distance_km,
            });
        }
        Ok(result)
    }

    async fn find_by_name(
        &self,
        kind: EntityKind,
        name: &str,
        languages: &[&str],
    ) -> Result<Option<KnowledgeEntity>, KnowledgeError> {
        let table = kind.table();
        for language in languages {
            crate::database::validate_language(language)?;
            let sql = format!(
                "SELECT {ENTITY_COLUMNS} FROM {table} \
                 WHERE lower(name->>$1) = lower($2) LIMIT 1"
            );
            let params = vec![
                SqlParam::Str(language.to_string()),
                SqlParam::Str(name.to_string()),
            ];
            if let Some(row) = self.db.fetch_optional(&sql, &params).await? {
                return Ok(Some(row_to_entity(kind, &row)?));
            }
        }
        Ok(None)
    }

    async fn create(&self, draft: &EntityDraft) -> Result<KnowledgeEntity, KnowledgeError> {
        draft
            .validate(&self.default_language, self.embedding_dim)
            .map_err(KnowledgeError::InvalidEntity)?;

        let table = draft.kind.table();
        let sql = format!(
            "INSERT INTO {table} \
             (slug, name, description, category, rating, price_tier, active, popularity, \
              city_id, region_id, data, embedding, geom, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
                     CASE WHEN $13::float8 IS NULL THEN NULL \
                          ELSE ST_SetSRID(ST_MakePoint($14, $13), 4326)::geography END, \
                     now(), now()) \
             RETURNING id, created_at, updated_at"
        );
        let params = vec![
            SqlParam::Str(draft.slug.clone()),
            SqlParam::Json(serde_json::to_value(&draft.name).unwrap_or_default()),
            SqlParam::Json(serde_json::to_value(&draft.description).unwrap_or_default()),
            SqlParam::OptStr(draft.category.clone()),
            SqlParam::OptF64(draft.rating),
            SqlParam::OptStr(draft.price_tier.clone()),
            SqlParam::Bool(draft.active),
            SqlParam::F64(draft.popularity),
            SqlParam::OptI64(draft.city_id),
            SqlParam::OptI64(draft.region_id),
            SqlParam::Json(draft.data.clone()),
            SqlParam::OptVector(
                draft
                    .embedding
                    .as_ref()
                    .map(|e| pgvector::Vector::from(e.clone())),
            ),
            SqlParam::OptF64(draft.location.map(|p| p.lat)),
            SqlParam::OptF64(draft.location.map(|p| p.lon)),
        ];

        let row = self
            .db
            .fetch_optional(&sql, &params)
            .await?
            .ok_or_else(|| KnowledgeError::InvalidEntity("insert returned no row".into()))?;
        let id: i64 = row.try_get("id").map_err(decode_err)?;
        let created_at = row.try_get("created_at").map_err(decode_err)?;
        let updated_at = row.try_get("updated_at").map_err(decode_err)?;

        self.invalidate(draft.kind).await;

        Ok(KnowledgeEntity {
            id,
            kind: draft.kind,
            slug: draft.slug.clone(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            category: draft.category.clone(),
            rating: draft.rating,
            price_tier: draft.price_tier.clone(),
            active: draft.active,
            popularity: draft.popularity,
            city_id: draft.city_id,
            region_id: draft.region_id,
            location: draft.location,
            embedding: draft.embedding.clone(),
            data: draft.data.clone(),
            created_at,
            updated_at,
        })
    }

    async fn update(&self, entity: &KnowledgeEntity) -> Result<(), KnowledgeError> {
        if let Some(embedding) = &entity.embedding {
            if embedding.len() != self.embedding_dim {
                return Err(KnowledgeError::InvalidEntity(format!(
                    "embedding dimension {} does not match {}",
                    embedding.len(),
                    self.embedding_dim
                )));
            }
        }
        let table = entity.kind.table();
        let sql = format!(
            "UPDATE {table} SET \
             name = $1, description = $2, category = $3, rating = $4, price_tier = $5, \
             active = $6, popularity = $7, city_id = $8, region_id = $9, data = $10, \
             embedding = $11, \
             geom = CASE WHEN $12::float8 IS NULL THEN NULL \
                         ELSE ST_SetSRID(ST_MakePoint($13, $12), 4326)::geography END, \
             updated_at = now() \
             WHERE id = $14"
        );
        let params = vec![
            SqlParam::Json(serde_json::to_value(&entity.name).unwrap_or_default()),
            SqlParam::Json(serde_json::to_value(&entity.description).unwrap_or_default()),
            SqlParam::OptStr(entity.category.clone()),
            SqlParam::OptF64(entity.rating),
            SqlParam::OptStr(entity.price_tier.clone()),
            SqlParam::Bool(entity.active),
            SqlParam::F64(entity.popularity),
            SqlParam::OptI64(entity.city_id),
            SqlParam::OptI64(entity.region_id),
            SqlParam::Json(entity.data.clone()),
            SqlParam::OptVector(
                entity
                    .embedding
                    .as_ref()
                    .map(|e| pgvector::Vector::from(e.clone())),
            ),
            SqlParam::OptF64(entity.location.map(|p| p.lat)),
            SqlParam::OptF64(entity.location.map(|p| p.lon)),
            SqlParam::I64(entity.id),
        ];

        let affected = self.db.execute(&sql, &params).await?;
        if affected == 0 {
            return Err(KnowledgeError::NotFound {
                kind: entity.kind,
                id: entity.id,
            });
        }
        self.invalidate(entity.kind).await;
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: i64) -> Result<(), KnowledgeError> {
        let table = kind.table();
        let sql = format!("DELETE FROM {table} WHERE id = $1");
        let affected = self.db.execute(&sql, &[SqlParam::I64(id)]).await?;
        if affected == 0 {
            return Err(KnowledgeError::NotFound { kind, id });
        }
        self.invalidate(kind).await;
        Ok(())
    }
}

fn decode_err(e: sqlx::Error) -> KnowledgeError {
    KnowledgeError::Database(DatabaseError::Decode(e.to_string()))
}

/// Decode one row into an entity. JSON columns are parsed exactly once,
/// here at the boundary.
fn row_to_entity(kind: EntityKind, row: &PgRow) -> Result<KnowledgeEntity, KnowledgeError> {
    let name: serde_json::Value = row.try_get("name").map_err(decode_err)?;
    let description: serde_json::Value = row.try_get("description").map_err(decode_err)?;
    let lat: Option<f64> = row.try_get("lat").map_err(decode_err)?;
    let lon: Option<f64> = row.try_get("lon").map_err(decode_err)?;

    Ok(KnowledgeEntity {
        id: row.try_get("id").map_err(decode_err)?,
        kind,
        slug: row.try_get("slug").map_err(decode_err)?,
        name: serde_json::from_value::<MultilingualText>(name)
            .map_err(|e| KnowledgeError::Database(DatabaseError::Decode(e.to_string())))?,
        description: serde_json::from_value::<MultilingualText>(description).unwrap_or_default(),
        category: row.try_get("category").map_err(decode_err)?,
        rating: row.try_get("rating").map_err(decode_err)?,
        price_tier: row.try_get("price_tier").map_err(decode_err)?,
        active: row.try_get("active").map_err(decode_err)?,
        popularity: row.try_get("popularity").map_err(decode_err)?,
        city_id: row.try_get("city_id").map_err(decode_err)?,
        region_id: row.try_get("region_id").map_err(decode_err)?,
        location: match (lat, lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        },
        embedding: None,
        data: row.try_get("data").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
    })
}
